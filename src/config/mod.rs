//! Configuration management
//!
//! This module handles loading and parsing configuration for Gatehouse.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted session lifetime (ten years)
pub const MAX_SESSION_LIFETIME_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Relational store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session store configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Per-request deadline; the request (and any open unit of work) is
    /// dropped when it elapses
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL (`:memory:` for an in-process database)
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/gatehouse.db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Store driver (memory or redis)
    #[serde(default)]
    pub driver: SessionStoreDriver,
    /// Redis connection URL (required for the redis driver)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Fixed session lifetime in seconds, at most
    /// `MAX_SESSION_LIFETIME_SECONDS`
    #[serde(default = "default_session_lifetime")]
    pub lifetime_seconds: u64,
}

impl SessionConfig {
    pub fn lifetime(&self) -> chrono::Duration {
        let seconds = self.lifetime_seconds.clamp(1, MAX_SESSION_LIFETIME_SECONDS);
        chrono::Duration::seconds(seconds as i64)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: SessionStoreDriver::default(),
            redis_url: None,
            lifetime_seconds: default_session_lifetime(),
        }
    }
}

fn default_session_lifetime() -> u64 {
    7 * 24 * 60 * 60
}

/// Session store driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreDriver {
    /// In-process store (default, single instance)
    #[default]
    Memory,
    /// Redis
    Redis,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML or holds an out-of-range
    /// value, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifetime = self.session.lifetime_seconds;
        if lifetime == 0 || lifetime > MAX_SESSION_LIFETIME_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "session.lifetime_seconds",
                message: format!(
                    "must be between 1 and {}, got {}",
                    MAX_SESSION_LIFETIME_SECONDS, lifetime
                ),
            });
        }

        Ok(())
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - GATEHOUSE_SERVER_HOST
    /// - GATEHOUSE_SERVER_PORT
    /// - GATEHOUSE_SERVER_CORS_ORIGIN
    /// - GATEHOUSE_SERVER_REQUEST_TIMEOUT_SECONDS
    /// - GATEHOUSE_DATABASE_URL
    /// - GATEHOUSE_DATABASE_MAX_CONNECTIONS
    /// - GATEHOUSE_SESSION_DRIVER
    /// - GATEHOUSE_SESSION_REDIS_URL
    /// - GATEHOUSE_SESSION_LIFETIME_SECONDS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GATEHOUSE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("GATEHOUSE_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("GATEHOUSE_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }
        if let Ok(timeout) = std::env::var("GATEHOUSE_SERVER_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.server.request_timeout_seconds = timeout;
            }
        }

        if let Ok(url) = std::env::var("GATEHOUSE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("GATEHOUSE_DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<u32>() {
                self.database.max_connections = max;
            }
        }

        if let Ok(driver) = std::env::var("GATEHOUSE_SESSION_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.session.driver = SessionStoreDriver::Memory,
                "redis" => self.session.driver = SessionStoreDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(redis_url) = std::env::var("GATEHOUSE_SESSION_REDIS_URL") {
            self.session.redis_url = Some(redis_url);
        }
        if let Ok(lifetime) = std::env::var("GATEHOUSE_SESSION_LIFETIME_SECONDS") {
            if let Ok(lifetime) = lifetime.parse::<u64>() {
                self.session.lifetime_seconds = lifetime;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every config test that touches environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "GATEHOUSE_SERVER_HOST",
    "GATEHOUSE_SERVER_PORT",
    "GATEHOUSE_SERVER_CORS_ORIGIN",
    "GATEHOUSE_SERVER_REQUEST_TIMEOUT_SECONDS",
    "GATEHOUSE_DATABASE_URL",
    "GATEHOUSE_DATABASE_MAX_CONNECTIONS",
    "GATEHOUSE_SESSION_DRIVER",
    "GATEHOUSE_SESSION_REDIS_URL",
    "GATEHOUSE_SESSION_LIFETIME_SECONDS",
];
