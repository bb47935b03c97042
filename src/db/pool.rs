//! Database connection pool
//!
//! Creates the process-wide SQLite pool every unit of work is opened from.
//! The pool is created once at startup and shared by all requests.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DatabaseConfig;

/// Whether the URL names a private in-memory database
fn is_memory_url(url: &str) -> bool {
    url == ":memory:" || url.starts_with("sqlite::memory:")
}

/// Normalise a configured database location into a sqlx connection URL
fn connection_url(url: &str) -> String {
    if url == ":memory:" {
        "sqlite::memory:".to_string()
    } else if url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite:{}", url)
    }
}

/// Create the parent directory of a file-backed database
fn ensure_parent_dir(url: &str) -> Result<()> {
    if is_memory_url(url) {
        return Ok(());
    }

    let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }
    }

    Ok(())
}

/// Create a SQLite connection pool from configuration.
///
/// File-backed databases are created if missing. An in-memory database
/// lives inside a single connection, so its pool is pinned to exactly one
/// connection that is never recycled; otherwise each unit of work could
/// land on a different, empty database.
///
/// # Errors
///
/// Returns an error if the URL is malformed or the connection cannot be
/// established.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    ensure_parent_dir(&config.url)?;

    let options = SqliteConnectOptions::from_str(&connection_url(&config.url))
        .with_context(|| format!("Invalid SQLite database URL: {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool_options = if is_memory_url(&config.url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to SQLite database: {}", config.url))?;

    tracing::debug!(url = %config.url, "SQLite pool ready");

    Ok(pool)
}

/// Check if the database connection is healthy
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Database ping failed")?;
    Ok(())
}

/// Create a SQLite in-memory database pool for testing
pub async fn create_test_pool() -> Result<SqlitePool> {
    let config = DatabaseConfig {
        url: ":memory:".to_string(),
        ..DatabaseConfig::default()
    };
    create_pool(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[test]
    fn test_connection_url() {
        assert_eq!(connection_url(":memory:"), "sqlite::memory:");
        assert_eq!(connection_url("sqlite:data/a.db"), "sqlite:data/a.db");
        assert_eq!(connection_url("data/a.db"), "sqlite:data/a.db");
    }

    #[tokio::test]
    async fn test_memory_pool_ping() {
        let pool = create_test_pool().await.expect("Failed to create pool");
        ping(&pool).await.expect("Ping should succeed");
    }

    #[tokio::test]
    async fn test_memory_pool_is_one_database() {
        let pool = create_test_pool().await.expect("Failed to create pool");

        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.expect("Failed to create pool");
        let row = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        let enabled: i64 = row.get(0);
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_sqlite_file_pool_creation() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("test.db");

        let config = DatabaseConfig {
            url: db_path.to_string_lossy().to_string(),
            ..DatabaseConfig::default()
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        ping(&pool).await.expect("Ping should succeed");

        assert!(db_path.exists());
    }
}
