use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub sankhya: SankhyaConfig,
    pub cache: CacheConfig,
    pub token: TokenConfig,
    pub retry: RetryConfig,
    pub ttl: TtlConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Reject combinations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sankhya.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "sankhya.base_url must be set".to_string(),
            ));
        }
        if self.token.store_margin_secs >= self.token.lifetime_secs {
            return Err(ConfigError::InvalidValue(format!(
                "token.store_margin_secs ({}) must be smaller than token.lifetime_secs ({})",
                self.token.store_margin_secs, self.token.lifetime_secs
            )));
        }
        if self.token.lock_poll_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "token.lock_poll_ms must be positive".to_string(),
            ));
        }
        if self.sankhya.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "sankhya.page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Upstream ERP endpoints and the static login credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SankhyaConfig {
    pub base_url: String,
    pub login_path: String,
    pub query_path: String,
    pub save_path: String,
    pub token: String,
    pub app_key: String,
    pub username: String,
    pub password: String,
    pub login_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Rows per page returned by the ERP for paginated queries.
    pub page_size: u32,
}

impl Default for SankhyaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sankhya.com.br".to_string(),
            login_path: "/login".to_string(),
            query_path: "/gateway/v1/mge/service.sbr?serviceName=CRUDServiceProvider.loadRecords&outputType=json".to_string(),
            save_path: "/gateway/v1/mge/service.sbr?serviceName=DatasetSP.save&outputType=json".to_string(),
            token: String::new(),
            app_key: String::new(),
            username: String::new(),
            password: String::new(),
            login_timeout_secs: 10,
            request_timeout_secs: 30,
            page_size: 50,
        }
    }
}

impl SankhyaConfig {
    pub const fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared store. Without it every instance keeps its own in-memory store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub memory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "sankhya".to_string(),
            memory_capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub lifetime_secs: u64,
    /// Subtracted from the lifetime to get the store TTL of the credential.
    pub store_margin_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_poll_ms: u64,
    pub lock_wait_secs: u64,
    pub max_login_attempts: u32,
    pub login_backoff_ms: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: 20 * 60,
            store_margin_secs: 30,
            lock_ttl_secs: 30,
            lock_poll_ms: 500,
            lock_wait_secs: 25,
            max_login_attempts: 3,
            login_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub session_retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            session_retry_delay_ms: 500,
        }
    }
}

/// Response cache lifetimes, grouped by how fast the data changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub stock_secs: u64,
    pub transactional_secs: u64,
    pub reference_secs: u64,
    pub failure_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            stock_secs: 30,
            transactional_secs: 300,
            reference_secs: 3600,
            failure_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            filter: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}
