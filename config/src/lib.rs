//! Sankhya Gateway configuration
//!
//! Provides YAML-based configuration for the gateway.
//!
//! # Configuration Loading Priority
//!
//! 1. Compiled-in defaults
//! 2. `/etc/sankhya-gateway/gateway.yaml` (system-wide)
//! 3. `~/.config/sankhya-gateway/gateway.yaml` (user)
//! 4. `./gateway.yaml` (project-local)
//! 5. `SANKHYA_GATEWAY_CONFIG=/path/to/config.yaml` (explicit, replaces 2-4)
//! 6. Environment variables (highest priority)
//!
//! # Example Configuration
//!
//! ```yaml
//! server:
//!   port: 8080
//!
//! sankhya:
//!   base_url: "https://api.sankhya.com.br"
//!   token: "${SANKHYA_TOKEN}"
//!   app_key: "${SANKHYA_APP_KEY}"
//!   username: "integration@example.com"
//!   password: "${SANKHYA_PASSWORD}"
//!
//! cache:
//!   redis_url: "redis://127.0.0.1:6379/"
//!
//! ttl:
//!   stock_secs: 30
//!   reference_secs: 3600
//! ```

#![allow(missing_docs)]

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::*;

/// Load configuration from default locations.
///
/// Searches for config files in order and merges them.
/// Environment variables override file values.
pub fn load() -> Result<GatewayConfig, ConfigError> {
    ConfigLoader::new().load()
}

/// Load configuration from a specific file.
pub fn load_from_file(path: &str) -> Result<GatewayConfig, ConfigError> {
    ConfigLoader::new().with_file(path).load()
}
