use crate::{ConfigError, GatewayConfig};
use regex::Regex;
use serde_yaml::Value;
use std::path::PathBuf;

pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".config/sankhya-gateway/gateway.yaml"));
        }
        search_paths.push(PathBuf::from("./gateway.yaml"));

        #[cfg(unix)]
        search_paths.insert(0, PathBuf::from("/etc/sankhya-gateway/gateway.yaml"));

        Self {
            explicit_file: None,
            search_paths,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: &str) -> Self {
        self.explicit_file = Some(PathBuf::from(path));
        self
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let explicit = std::env::var("SANKHYA_GATEWAY_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.explicit_file.clone());

        let mut merged = Value::Mapping(serde_yaml::Mapping::new());

        if let Some(path) = explicit {
            let content = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path, source })?;
            merged = self.parse_value(&content)?;
        } else {
            for path in &self.search_paths {
                if !path.exists() {
                    continue;
                }
                match std::fs::read_to_string(path) {
                    Ok(content) => {
                        let overlay = self.parse_value(&content)?;
                        merge_values(&mut merged, overlay);
                        tracing::debug!(path = %path.display(), "Merged config file");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
                    }
                }
            }
        }

        let mut config: GatewayConfig = if merged.is_null() {
            GatewayConfig::default()
        } else {
            serde_yaml::from_value(merged)?
        };
        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn parse_value(&self, content: &str) -> Result<Value, ConfigError> {
        let expanded = self.expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    fn expand_env_vars(&self, content: &str) -> String {
        let Ok(re) = Regex::new(r"\$\{([^}]+)\}") else {
            return content.to_string();
        };
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string()
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) {
        if let Ok(host) = std::env::var("SANKHYA_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("SANKHYA_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(url) = std::env::var("SANKHYA_BASE_URL") {
            if !url.is_empty() {
                config.sankhya.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("SANKHYA_TOKEN") {
            config.sankhya.token = token;
        }
        if let Ok(app_key) = std::env::var("SANKHYA_APP_KEY") {
            config.sankhya.app_key = app_key;
        }
        if let Ok(username) = std::env::var("SANKHYA_USERNAME") {
            config.sankhya.username = username;
        }
        if let Ok(password) = std::env::var("SANKHYA_PASSWORD") {
            config.sankhya.password = password;
        }
        if let Ok(redis_url) = std::env::var("SANKHYA_REDIS_URL") {
            if !redis_url.is_empty() {
                config.cache.redis_url = Some(redis_url);
            }
        }
        if let Ok(level) = std::env::var("SANKHYA_LOG_LEVEL") {
            if let Ok(l) = serde_yaml::from_str(&level) {
                config.logging.level = l;
            }
        }
    }
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}
