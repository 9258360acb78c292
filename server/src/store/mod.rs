//! Shared key-value store with per-key expiration.
//!
//! Every gateway instance talks to the same store; it holds the ERP
//! credential, the renewal lock record and the response cache.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::StoreError;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically store `value` only when `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Atomically delete `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;
}

/// JSON helpers over any [`SharedStore`].
#[async_trait]
pub trait JsonStore: SharedStore {
    /// Read and decode a value. Undecodable entries count as a miss.
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }
}

impl<S: SharedStore + ?Sized> JsonStore for S {}
