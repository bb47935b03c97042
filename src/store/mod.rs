//! Session store layer
//!
//! This module provides the key-value engine the session adapter talks to.
//! It supports:
//! - In-memory store (moka) - default, for single-instance deployment
//! - Redis store - optional, for deployments sharing one session store
//!
//! The engine is selected based on configuration. Records are flat hashes of
//! string fields with a per-record TTL; per-user token indexes are plain sets.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatehouse::store::{create_store, KvSessionRepository};
//! use gatehouse::config::SessionConfig;
//!
//! let store = create_store(&SessionConfig::default()).await?;
//! let sessions = KvSessionRepository::boxed(store);
//! ```

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;
pub mod session;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SessionConfig, SessionStoreDriver};

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
pub use session::{
    decode_session, encode_session, KvSessionRepository, SessionRepository, SessionStoreError,
};

/// A single stored field value.
///
/// Writers emit `Int` for numeric fields. Readers must also accept `Text`,
/// because some engines hand every field back as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Int(i64),
    Text(String),
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Int(value)
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Text(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Text(value.to_string())
    }
}

/// A hash record as read back from the store
pub type StoreRecord = HashMap<String, StoreValue>;

/// Key-value engine trait
///
/// Implementations must be safe to share across concurrent requests; one
/// instance is created at startup.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Replace the hash at `key` with `fields` and expire it after `ttl`
    async fn put_hash(&self, key: &str, fields: &[(String, StoreValue)], ttl: Duration)
        -> Result<()>;

    /// Read the whole hash at `key`; `None` if absent or expired
    async fn get_hash(&self, key: &str) -> Result<Option<StoreRecord>>;

    /// Delete `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add `member` to the set at `key`, keeping the set alive for at least `ttl`
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()>;

    /// All members of the set at `key`, in no particular order
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Remove `member` from the set at `key`
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// Check that the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// The engine kind
    fn driver(&self) -> SessionStoreDriver;
}

/// Type alias for a shared key-value engine
pub type DynKeyValueStore = Arc<dyn KeyValueStore>;

/// Create a key-value engine based on configuration
///
/// - `SessionStoreDriver::Memory` - in-process store using moka
/// - `SessionStoreDriver::Redis` - Redis store (requires the `redis-store` feature)
///
/// # Errors
/// - Redis is configured but the `redis-store` feature is not enabled
/// - Redis is configured without a URL
/// - The Redis connection fails
pub async fn create_store(config: &SessionConfig) -> Result<DynKeyValueStore> {
    match config.driver {
        SessionStoreDriver::Memory => Ok(Arc::new(MemoryStore::new())),
        SessionStoreDriver::Redis => {
            #[cfg(feature = "redis-store")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using the Redis session driver. \
                         Set 'redis_url' in session configuration or use GATEHOUSE_SESSION_REDIS_URL."
                    )
                })?;

                let store = RedisStore::new(redis_url).await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "redis-store"))]
            {
                anyhow::bail!(
                    "Redis session driver is configured but the 'redis-store' feature is not enabled. \
                     Either enable the feature with `--features redis-store` or use the 'memory' driver."
                )
            }
        }
    }
}
