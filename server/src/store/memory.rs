use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::time::{Duration, Instant};

use super::SharedStore;
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    ttl: Duration,
}

/// Expires every entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Stored> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Stored, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stored,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store for single-instance deployments and tests.
///
/// Cloning shares the underlying cache, so two clones behave like two
/// gateway instances pointed at the same shared store.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, Stored>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cache.get(key).await.map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.cache
            .insert(
                key.to_string(),
                Stored {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let stored = Stored {
            value: value.to_string(),
            ttl,
        };
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(move |existing| {
                let op = if existing.is_some() {
                    Op::Nop
                } else {
                    Op::Put(stored)
                };
                std::future::ready(op)
            })
            .await;
        Ok(matches!(result, CompResult::Inserted(_)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let expected = expected.to_string();
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(move |existing| {
                let op = match existing {
                    Some(entry) if entry.value().value == expected => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(matches!(result, CompResult::Removed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::default();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_their_own_ttl() {
        let store = MemoryStore::default();
        store.set("short", "1", Duration::from_millis(20)).await.unwrap();
        store.set("long", "2", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn overwrite_resets_ttl() {
        let store = MemoryStore::default();
        store.set("k", "old", Duration::from_millis(20)).await.unwrap();
        store.set("k", "new", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn set_if_absent_only_first_writer_wins() {
        let store = MemoryStore::default();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn set_if_absent_succeeds_after_expiry() {
        let store = MemoryStore::default();
        assert!(store
            .set_if_absent("lock", "a", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_if_absent("lock", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_checks_value() {
        let store = MemoryStore::default();
        store.set("lock", "owner-1", Duration::from_secs(60)).await.unwrap();

        assert!(!store.delete_if_equals("lock", "owner-2").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());

        assert!(store.delete_if_equals("lock", "owner-1").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let a = MemoryStore::default();
        let b = a.clone();
        a.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(b.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
