pub mod validation;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::exchange::LifecycleOptions;
use crate::protocol::{ProviderKind, RequestParams};

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

/// Exchange timing and network settings shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_cancel_grace_ms() -> u64 {
    2000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            proxy: None,
            http_use_env_proxy: false,
        }
    }
}

impl ExchangeConfig {
    #[must_use]
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
        }
    }
}

/// One configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl BackendConfig {
    /// Per-exchange parameters for this backend.
    #[must_use]
    pub fn request_params(&self, exchange: &ExchangeConfig) -> RequestParams {
        let mut params = RequestParams::new(self.model.clone(), self.api_key.clone());
        params.max_tokens = self.max_tokens;
        params.temperature = self.temperature;
        params.timeout = Duration::from_secs(exchange.timeout_secs);
        params.connect_timeout = Duration::from_secs(exchange.connect_timeout_secs);
        params
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit log lines as JSON objects instead of text.
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Select a backend: by name when given, else the default one, else the first.
    #[must_use]
    pub fn backend(&self, name: Option<&str>) -> Option<&BackendConfig> {
        match name {
            Some(name) => self.backends.iter().find(|backend| backend.name == name),
            None => self
                .backends
                .iter()
                .find(|backend| backend.is_default)
                .or_else(|| self.backends.first()),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
