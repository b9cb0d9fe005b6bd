use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CarepathError, Result};

/// Top-level Carepath configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Oracle endpoint. Omit to run fully deterministic: topological
    /// ordering, raw descriptions.
    #[serde(default)]
    pub oracle: Option<OracleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds the resolver waits for the ordering oracle before falling
    /// back to the topological order.
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Capacity of the outbound event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_timeout_secs: default_order_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_order_timeout() -> u64 {
    20
}

fn default_event_capacity() -> usize {
    256
}

/// Connection settings for the oracle endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub model_id: String,
    /// Raw key or a `${ENV_VAR}` reference.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.0
}

/// Retry configuration for oracle requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8_000
}

impl AppConfig {
    /// Load configuration from a TOML file, expanding `${ENV_VAR}`
    /// references in the oracle API key.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CarepathError::ConfigNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig =
            toml::from_str(&raw).map_err(|e| CarepathError::Config(e.to_string()))?;

        if let Some(oracle) = &mut config.oracle {
            if let Some(key) = oracle.api_key.take() {
                oracle.api_key = Some(expand_env(&key)?);
            }
        }
        Ok(config)
    }
}

/// Expand a `${VAR}` reference against the process environment; anything
/// else passes through unchanged.
fn expand_env(value: &str) -> Result<String> {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => std::env::var(var).map_err(|_| {
            CarepathError::Config(format!("environment variable {} is not set", var))
        }),
        None => Ok(value.to_string()),
    }
}
