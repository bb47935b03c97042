//! Redis store implementation
//!
//! Provides the session store for deployments where several server
//! instances share one session store.
//!
//! # Features
//! - Records written with DEL + HSET + EXPIRE in one MULTI/EXEC pipeline
//! - Numeric fields written as integers; Redis hands them back as strings,
//!   which the session codec accepts
//! - Token indexes kept in plain sets whose TTL only ever grows

use super::{KeyValueStore, StoreRecord, StoreValue};
use crate::config::SessionStoreDriver;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Redis store implementation
pub struct RedisStore {
    /// Multiplexed connection shared by every request
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at the given URL
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { connection })
    }

    /// Redis TTLs are whole seconds; round up so a record never outlives
    /// less than it was asked to, and never pass zero.
    fn ttl_secs(ttl: Duration) -> i64 {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        secs.max(1) as i64
    }

    fn decode_value(field: &str, value: Value) -> Result<StoreValue> {
        match value {
            Value::Int(n) => Ok(StoreValue::Int(n)),
            Value::BulkString(bytes) => String::from_utf8(bytes)
                .map(StoreValue::Text)
                .with_context(|| format!("Field '{}' is not valid UTF-8", field)),
            Value::SimpleString(s) => Ok(StoreValue::Text(s)),
            other => Err(anyhow::anyhow!(
                "Unexpected Redis value for field '{}': {:?}",
                field,
                other
            )),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn put_hash(
        &self,
        key: &str,
        fields: &[(String, StoreValue)],
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.connection.clone();

        let mut hset = redis::cmd("HSET");
        hset.arg(key);
        for (name, value) in fields {
            hset.arg(name);
            match value {
                StoreValue::Int(n) => hset.arg(*n),
                StoreValue::Text(s) => hset.arg(s),
            };
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(key)
            .ignore()
            .add_command(hset)
            .ignore()
            .expire(key, Self::ttl_secs(ttl))
            .ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to write hash to Redis")?;

        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<StoreRecord>> {
        let mut conn = self.connection.clone();

        let raw: HashMap<String, Value> = conn
            .hgetall(key)
            .await
            .context("Failed to read hash from Redis")?;

        if raw.is_empty() {
            return Ok(None);
        }

        let mut record = StoreRecord::with_capacity(raw.len());
        for (field, value) in raw {
            let value = Self::decode_value(&field, value)?;
            record.insert(field, value);
        }
        Ok(Some(record))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();

        let removed: i64 = conn
            .del(key)
            .await
            .context("Failed to delete key from Redis")?;

        Ok(removed > 0)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();

        let secs = Self::ttl_secs(ttl);

        // NX covers a fresh set, GT extends an existing one; a shorter TTL
        // never shrinks the index below a longer-lived member (Redis >= 7.0).
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(key, member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(secs)
            .arg("NX")
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(secs)
            .arg("GT")
            .ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to add set member in Redis")?;

        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();

        let members: Vec<String> = conn
            .smembers(key)
            .await
            .context("Failed to read set members from Redis")?;

        Ok(members)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: i64 = conn
            .srem(key, member)
            .await
            .context("Failed to remove set member in Redis")?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis ping failed")?;

        Ok(())
    }

    fn driver(&self) -> SessionStoreDriver {
        SessionStoreDriver::Redis
    }
}
