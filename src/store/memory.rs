//! In-memory store implementation using moka
//!
//! Provides a fast, thread-safe in-process key-value store with per-record TTL.
//!
//! # Features
//! - Per-record expiration driven by the TTL given at write time
//! - Whole-record replacement on write (no field merging)
//! - Set indexes kept beside the records. Each member carries the deadline
//!   of its latest `set_add`; expired members are invisible to readers and
//!   dropped on the next write to their set or by a periodic sweep.
//!   Members may still outlive the record they point at and are pruned by
//!   readers.

use super::{KeyValueStore, StoreRecord, StoreValue};
use crate::config::SessionStoreDriver;
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default maximum store capacity (number of records)
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Set writes between two sweeps of every set
const SWEEP_INTERVAL: u64 = 1024;

/// Stand-in deadline for TTLs too large for `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Set members mapped to their deadlines
type MemberDeadlines = HashMap<String, Instant>;

fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Stored hash plus the TTL it was written with
#[derive(Clone)]
struct StoredHash {
    fields: Arc<StoreRecord>,
    ttl: Duration,
}

/// Expires each record after the TTL carried by the record itself
struct RecordExpiry;

impl Expiry<String, StoredHash> for RecordExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredHash,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredHash,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory key-value store using moka
pub struct MemoryStore {
    records: Cache<String, StoredHash>,
    sets: RwLock<HashMap<String, MemberDeadlines>>,
    set_writes: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.records.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new memory store with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    /// Create a new memory store with a custom max capacity
    pub fn with_capacity(max_capacity: u64) -> Self {
        let records = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(RecordExpiry)
            .build();

        Self {
            records,
            sets: RwLock::new(HashMap::new()),
            set_writes: AtomicU64::new(0),
        }
    }
}

/// Drop expired members of every set, and the sets left empty
fn sweep(sets: &mut HashMap<String, MemberDeadlines>, now: Instant) {
    sets.retain(|_, members| {
        members.retain(|_, deadline| *deadline > now);
        !members.is_empty()
    });
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put_hash(
        &self,
        key: &str,
        fields: &[(String, StoreValue)],
        ttl: Duration,
    ) -> Result<()> {
        let record: StoreRecord = fields.iter().cloned().collect();
        self.records
            .insert(
                key.to_string(),
                StoredHash {
                    fields: Arc::new(record),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<StoreRecord>> {
        Ok(self
            .records
            .get(key)
            .await
            .map(|stored| stored.fields.as_ref().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.records.remove(key).await.is_some();
        let removed_set = self.sets.write().await.remove(key).is_some();
        Ok(removed || removed_set)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let deadline = deadline_after(now, ttl);

        let mut sets = self.sets.write().await;
        let members = sets.entry(key.to_string()).or_default();
        members.retain(|_, existing| *existing > now);
        let entry = members.entry(member.to_string()).or_insert(deadline);
        *entry = (*entry).max(deadline);

        let writes = self.set_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            sweep(&mut sets, now);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let sets = self.sets.read().await;
        Ok(sets
            .get(key)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, deadline)| **deadline > now)
                    .map(|(member, _)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.write().await;
        if let Some(members) = sets.get_mut(key) {
            members.remove(member);
            if members.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn driver(&self) -> SessionStoreDriver {
        SessionStoreDriver::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, StoreValue)]) -> Vec<(String, StoreValue)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_and_get_hash() {
        let store = MemoryStore::new();
        store
            .put_hash(
                "session:a",
                &fields(&[("n", StoreValue::Int(7)), ("s", StoreValue::from("x"))]),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let record = store.get_hash("session:a").await.unwrap().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["n"], StoreValue::Int(7));
        assert_eq!(record["s"], StoreValue::Text("x".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing_hash() {
        let store = MemoryStore::new();
        assert!(store.get_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_whole_record() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store
            .put_hash("k", &fields(&[("a", StoreValue::Int(1)), ("b", StoreValue::Int(2))]), ttl)
            .await
            .unwrap();
        store
            .put_hash("k", &fields(&[("a", StoreValue::Int(3))]), ttl)
            .await
            .unwrap();

        let record = store.get_hash("k").await.unwrap().unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record["a"], StoreValue::Int(3));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store
            .put_hash("k", &fields(&[("a", StoreValue::Int(1))]), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get_hash("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store
            .put_hash("k", &fields(&[("a", StoreValue::Int(1))]), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(store.get_hash("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(store.get_hash("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_add("idx", "a", ttl).await.unwrap();
        store.set_add("idx", "b", ttl).await.unwrap();
        store.set_add("idx", "a", ttl).await.unwrap();

        let mut members = store.set_members("idx").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        store.set_remove("idx", "a").await.unwrap();
        assert_eq!(store.set_members("idx").await.unwrap(), vec!["b".to_string()]);

        store.set_remove("idx", "b").await.unwrap();
        assert!(store.set_members("idx").await.unwrap().is_empty());
        assert!(store.set_members("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_members_expire() {
        let store = MemoryStore::new();
        store
            .set_add("idx", "short", Duration::from_millis(100))
            .await
            .unwrap();
        store
            .set_add("idx", "long", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.set_members("idx").await.unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_set_add_drops_expired_members() {
        let store = MemoryStore::new();
        for i in 0..20 {
            store
                .set_add("idx", &format!("old-{}", i), Duration::from_millis(50))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        store.set_add("idx", "new", Duration::from_secs(60)).await.unwrap();

        let sets = store.sets.read().await;
        assert_eq!(sets["idx"].len(), 1);
        assert!(sets["idx"].contains_key("new"));
    }

    #[tokio::test]
    async fn test_set_add_keeps_longest_deadline() {
        let store = MemoryStore::new();
        store.set_add("idx", "a", Duration::from_secs(60)).await.unwrap();
        store
            .set_add("idx", "a", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.set_members("idx").await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_removes_abandoned_sets() {
        let store = MemoryStore::new();
        for i in 0..100 {
            store
                .set_add(&format!("idx:{}", i), "member", Duration::from_millis(50))
                .await
                .unwrap();
        }
        assert_eq!(store.sets.read().await.len(), 100);

        tokio::time::sleep(Duration::from_millis(200)).await;

        for _ in 0..SWEEP_INTERVAL {
            store.set_add("live", "member", Duration::from_secs(60)).await.unwrap();
        }

        assert_eq!(store.sets.read().await.len(), 1);
        assert!(store.set_members("idx:0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = MemoryStore::new();
        store.set_add("idx", "a", Duration::MAX).await.unwrap();
        assert_eq!(store.set_members("idx").await.unwrap(), vec!["a".to_string()]);
    }
}
