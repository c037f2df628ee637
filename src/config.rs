//! Adapter configuration, loadable from YAML.

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::transport::{CredentialsPolicy, TransportOptions};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Chat endpoint URL; the one POST per run goes here.
    pub endpoint: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub credentials: CredentialsPolicy,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Static header bag sent with every run.
    #[serde(default)]
    pub headers: FxHashMap<String, String>,
    /// Extra fields merged into every outbound request body.
    #[serde(default)]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl AdapterConfig {
    /// Parse and validate the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the endpoint is not an
    /// absolute `http`/`https` URL.
    pub fn endpoint_url(&self) -> Result<url::Url, ConfigError> {
        let parsed = url::Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::Validation(format!("invalid endpoint URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "endpoint must be http(s), got scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(parsed)
    }

    /// Build the static header map from the configured header bag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for header names or values that
    /// are not valid HTTP header tokens.
    pub fn header_map(&self) -> Result<http::HeaderMap, ConfigError> {
        let mut map = http::HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = http::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::Validation(format!("invalid header name '{name}': {e}")))?;
            let value = http::header::HeaderValue::from_str(value).map_err(|e| {
                ConfigError::Validation(format!("invalid value for header '{name}': {e}"))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }

    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            pool_max_idle_per_host: self.http_pool_max_idle_per_host,
            pool_idle_timeout: if self.http_pool_idle_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(self.http_pool_idle_timeout_secs))
            },
            credentials: self.credentials,
        }
    }
}

fn validate_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    config.endpoint_url()?;
    config.header_map()?;
    Ok(())
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails,
/// [`ConfigError::Yaml`] when parsing fails, or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn load_config(path: &str) -> Result<AdapterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AdapterConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}
