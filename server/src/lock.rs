//! Mutual exclusion across gateway instances, built on the shared store.
//!
//! A lock is a single store key holding `<owner>:<acquired-at-ms>` with a
//! TTL. A holder that dies without releasing blocks others for at most one
//! TTL. Release only deletes the record while it still carries the
//! releasing guard's owner value.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::store::SharedStore;
use crate::util::now_unix_millis;

#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    /// Lifetime of the lock record; bounds how long a crashed holder blocks others.
    pub ttl: Duration,
    pub poll_interval: Duration,
    /// Longest time `acquire` keeps polling before giving up.
    pub wait_ceiling: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            wait_ceiling: Duration::from_secs(25),
        }
    }
}

/// Outcome of [`DistributedLock::acquire_or_resolve`].
pub enum Acquisition<T> {
    Acquired(LockGuard),
    /// The check produced a value while waiting; no lock is held.
    Resolved(T),
    TimedOut,
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    name: String,
    settings: LockSettings,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>, name: impl Into<String>, settings: LockSettings) -> Self {
        Self {
            store,
            name: name.into(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Single acquisition attempt.
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>, StoreError> {
        let owner = uuid::Uuid::new_v4().to_string();
        let record = format!("{owner}:{}", now_unix_millis());
        if self
            .store
            .set_if_absent(&self.name, &record, self.settings.ttl)
            .await?
        {
            tracing::debug!(lock = %self.name, "Lock acquired");
            Ok(Some(LockGuard {
                store: Arc::clone(&self.store),
                name: self.name.clone(),
                record: Some(record),
            }))
        } else {
            Ok(None)
        }
    }

    /// Poll for the lock until it is acquired or the wait ceiling passes.
    pub async fn acquire(&self) -> Option<LockGuard> {
        match self.acquire_or_resolve(|| async { None::<()> }).await {
            Acquisition::Acquired(guard) => Some(guard),
            Acquisition::Resolved(()) | Acquisition::TimedOut => None,
        }
    }

    /// Poll for the lock, calling `check` after every failed attempt.
    ///
    /// When the check yields a value the wait ends with
    /// [`Acquisition::Resolved`]; callers use this to notice that another
    /// instance already finished the work the lock protects. Store failures
    /// count as a failed attempt.
    pub async fn acquire_or_resolve<T, F, Fut>(&self, mut check: F) -> Acquisition<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = Instant::now() + self.settings.wait_ceiling;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_acquire().await {
                Ok(Some(guard)) => return Acquisition::Acquired(guard),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(lock = %self.name, error = %e, "Lock acquisition attempt failed");
                }
            }

            if let Some(value) = check().await {
                tracing::debug!(lock = %self.name, attempts, "Lock wait resolved by check");
                return Acquisition::Resolved(value);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(lock = %self.name, attempts, "Gave up waiting for lock");
                return Acquisition::TimedOut;
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Remove a lock record older than the lock TTL.
    ///
    /// Stores evict expired keys themselves; this covers a record that
    /// outlived its TTL anyway. Live records are never touched.
    pub async fn clear_stale(&self) -> Result<bool, StoreError> {
        let Some(record) = self.store.get(&self.name).await? else {
            return Ok(false);
        };
        let acquired_at = record
            .rsplit_once(':')
            .and_then(|(_, ts)| ts.parse::<u64>().ok());
        let ttl_ms = u64::try_from(self.settings.ttl.as_millis()).unwrap_or(u64::MAX);
        let stale = match acquired_at {
            Some(at) => now_unix_millis().saturating_sub(at) >= ttl_ms,
            None => true,
        };
        if stale {
            tracing::info!(lock = %self.name, "Clearing stale lock record");
            return self.store.delete_if_equals(&self.name, &record).await;
        }
        Ok(false)
    }
}

/// Proof of holding a [`DistributedLock`].
///
/// Call [`LockGuard::release`]; a guard dropped without it (early return,
/// panic, cancelled task) releases on a background task.
pub struct LockGuard {
    store: Arc<dyn SharedStore>,
    name: String,
    record: Option<String>,
}

impl LockGuard {
    pub async fn release(mut self) {
        if let Some(record) = self.record.take() {
            release_record(self.store.as_ref(), &self.name, &record).await;
        }
    }
}

async fn release_record(store: &dyn SharedStore, name: &str, record: &str) {
    match store.delete_if_equals(name, record).await {
        Ok(true) => tracing::debug!(lock = %name, "Lock released"),
        Ok(false) => {
            tracing::warn!(lock = %name, "Lock expired before release; left the current holder alone");
        }
        Err(e) => {
            tracing::warn!(lock = %name, error = %e, "Lock release failed; record will expire by TTL");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_record(store.as_ref(), &name, &record).await;
                });
            }
            Err(_) => {
                tracing::warn!(lock = %name, "No runtime to release lock; record will expire by TTL");
            }
        }
    }
}
