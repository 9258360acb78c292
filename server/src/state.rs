use sankhya_config::GatewayConfig;
use std::sync::Arc;

use crate::client::{ErpClient, RetrySettings};
use crate::error::StoreError;
use crate::fetchers::{CacheAside, Fetchers, TtlPolicy};
use crate::login::SankhyaLogin;
use crate::recorder::{MetricsRecorder, RequestRecorder};
use crate::store::{MemoryStore, RedisStore, SharedStore};
use crate::token::{LoginTransport, TokenManager, TokenSettings};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cache store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct AppState {
    pub fetchers: Fetchers,
}

impl AppState {
    #[must_use]
    pub const fn new(fetchers: Fetchers) -> Self {
        Self { fetchers }
    }

    /// Wire the gateway from configuration, connecting to Redis when a URL is set.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, StartupError> {
        let store = open_store(config).await?;
        let login: Arc<dyn LoginTransport> = Arc::new(SankhyaLogin::from_config(&config.sankhya)?);
        Self::with_parts(config, store, login, Arc::new(MetricsRecorder))
    }

    /// Wire the gateway around an existing store and login transport.
    pub fn with_parts(
        config: &GatewayConfig,
        store: Arc<dyn SharedStore>,
        login: Arc<dyn LoginTransport>,
        recorder: Arc<dyn RequestRecorder>,
    ) -> Result<Self, StartupError> {
        let prefix = &config.cache.key_prefix;
        let tokens = TokenManager::new(
            Arc::clone(&store),
            login,
            prefix,
            TokenSettings::from(&config.token),
        );
        let client = ErpClient::new(
            &config.sankhya,
            RetrySettings::from(&config.retry),
            tokens,
            recorder,
        )?;
        let cache = CacheAside::new(store, prefix, TtlPolicy::from(&config.ttl));
        Ok(Self::new(Fetchers::new(
            client,
            cache,
            config.sankhya.page_size,
        )))
    }
}

async fn open_store(config: &GatewayConfig) -> Result<Arc<dyn SharedStore>, StoreError> {
    match &config.cache.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("Using Redis cache store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No redis_url configured; using in-process store, instances will not share tokens");
            Ok(Arc::new(MemoryStore::new(config.cache.memory_capacity)))
        }
    }
}
