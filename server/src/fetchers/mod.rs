//! Cache-aside readers for ERP entities, plus the order write path.
//!
//! Every reader derives a cache key from its effective parameters, serves
//! hits from the shared store, and on a miss queries the ERP through
//! [`ErpClient`], normalizes the rows and caches them with a TTL chosen by
//! how quickly the entity changes. A failed fetch caches an empty result
//! for a short while so a struggling ERP is not hammered, and still returns
//! the error to its caller.

mod orders;
mod partners;
mod products;
mod receivables;
mod reference;

pub use orders::{NewOrder, OrderQuery, OrderReceipt};
pub use partners::PartnerQuery;
pub use products::{ProductQuery, StockQuery};
pub use receivables::ReceivableQuery;
pub use reference::OperationTypeQuery;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ErpClient;
use crate::error::ErpError;
use crate::normalize::EntityPage;
use crate::store::{JsonStore, SharedStore};
use crate::util::sha256_hex;

/// How quickly an entity's data changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Stock levels; seconds.
    Stock,
    /// Partner, order and receivable lists; minutes.
    Transactional,
    /// Products and lookup tables; up to an hour.
    Reference,
}

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub stock: Duration,
    pub transactional: Duration,
    pub reference: Duration,
    /// Lifetime of the empty result cached after a failed fetch.
    pub failure: Duration,
}

impl TtlPolicy {
    #[must_use]
    pub const fn ttl(&self, volatility: Volatility) -> Duration {
        match volatility {
            Volatility::Stock => self.stock,
            Volatility::Transactional => self.transactional,
            Volatility::Reference => self.reference,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&sankhya_config::TtlConfig::default())
    }
}

impl From<&sankhya_config::TtlConfig> for TtlPolicy {
    fn from(config: &sankhya_config::TtlConfig) -> Self {
        Self {
            stock: Duration::from_secs(config.stock_secs),
            transactional: Duration::from_secs(config.transactional_secs),
            reference: Duration::from_secs(config.reference_secs),
            failure: Duration::from_secs(config.failure_secs),
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    /// Zero-based page index.
    pub page: u32,
    pub page_count: u32,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: 0,
            page_count: 0,
        }
    }
}

impl Page<crate::normalize::Record> {
    /// Wrap a query result; without an ERP-reported total the count is inferred from this page.
    pub fn from_entities(entities: EntityPage, page: u32, page_size: u32) -> Self {
        let size = u64::from(page_size.max(1));
        let seen = u64::try_from(entities.records.len()).unwrap_or(u64::MAX);
        let total = entities
            .total
            .unwrap_or_else(|| u64::from(page) * size + seen);
        Self {
            items: entities.records,
            total,
            page,
            page_count: u32::try_from(total.div_ceil(size)).unwrap_or(u32::MAX),
        }
    }
}

/// Cache key of a reader call: `<prefix>:cache:<operation>:<sha256 of params>`.
pub fn cache_key(prefix: &str, operation: &str, params: &impl Serialize) -> String {
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    format!("{prefix}:cache:{operation}:{}", sha256_hex(&encoded))
}

/// Read-through cache over the shared store.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn SharedStore>,
    prefix: String,
    ttl: TtlPolicy,
}

impl CacheAside {
    pub fn new(store: Arc<dyn SharedStore>, prefix: &str, ttl: TtlPolicy) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            ttl,
        }
    }

    pub fn key(&self, operation: &str, params: &impl Serialize) -> String {
        cache_key(&self.prefix, operation, params)
    }

    pub const fn ttl(&self, volatility: Volatility) -> Duration {
        self.ttl.ttl(volatility)
    }

    /// Return the cached value under `key`, or run `fetch` and cache its result for `ttl`.
    ///
    /// On failure `T::default()` is cached for the failure TTL and the error
    /// is returned. Store errors are logged and treated as misses.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, ErpError>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ErpError>>,
    {
        match self.store.get_json::<T>(key).await {
            Ok(Some(hit)) => {
                tracing::debug!(key, "Cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "Cache read failed; fetching"),
        }

        match fetch().await {
            Ok(value) => {
                self.put(key, &value, ttl).await;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(key, error = %err, kind = err.kind(), "Fetch failed; caching empty result");
                self.put(key, &T::default(), self.ttl.failure).await;
                Err(err)
            }
        }
    }

    async fn put<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.store.set_json(key, value, ttl).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }
}

/// Entity readers and the order writer.
#[derive(Clone)]
pub struct Fetchers {
    client: ErpClient,
    cache: CacheAside,
    page_size: u32,
}

impl Fetchers {
    pub const fn new(client: ErpClient, cache: CacheAside, page_size: u32) -> Self {
        Self {
            client,
            cache,
            page_size,
        }
    }

    pub const fn client(&self) -> &ErpClient {
        &self.client
    }
}
