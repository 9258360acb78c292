//! Collapses concurrent identical requests into one in-flight operation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ErpError;
use crate::util::sha256_hex;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, ErpError>>>;

struct Pending<T: Clone> {
    id: u64,
    result: SharedResult<T>,
}

/// Derive a deduplication key from the request identity.
pub fn dedup_key(method: &str, url: &str, payload: &serde_json::Value) -> String {
    let mut identity = Vec::with_capacity(url.len() + 64);
    identity.extend_from_slice(method.as_bytes());
    identity.push(b' ');
    identity.extend_from_slice(url.as_bytes());
    identity.push(b'\n');
    identity.extend_from_slice(payload.to_string().as_bytes());
    sha256_hex(&identity)
}

/// At most one operation runs per key; later callers await its result.
///
/// The operation runs on its own task, so a caller that goes away does not
/// cancel it for the others. The key is freed as soon as the operation
/// settles, whether it succeeded, failed or panicked.
pub struct RequestDeduplicator<T: Clone> {
    pending: Arc<DashMap<String, Pending<T>>>,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn dedupe<F, Fut>(&self, key: &str, operation: F) -> Result<T, ErpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ErpError>> + Send + 'static,
    {
        let result = match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(key, "Joining in-flight request");
                existing.get().result.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let deregister = Deregister {
                    pending: Arc::clone(&self.pending),
                    key: key.to_string(),
                    id,
                };
                let fut = operation();
                let task = tokio::spawn(async move {
                    let _deregister = deregister;
                    fut.await
                });
                let result = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(ErpError::ServiceUnavailable(format!(
                            "in-flight request aborted: {e}"
                        ))),
                    }
                }
                .boxed()
                .shared();
                slot.insert(Pending {
                    id,
                    result: result.clone(),
                });
                result
            }
        };
        result.await
    }

    /// Number of distinct requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Frees the key when the operation's task finishes or unwinds.
struct Deregister<T: Clone> {
    pending: Arc<DashMap<String, Pending<T>>>,
    key: String,
    id: u64,
}

impl<T: Clone> Drop for Deregister<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.pending.remove_if(&self.key, |_, pending| pending.id == id);
    }
}
