//! Relay configuration.
//!
//! Loaded from a YAML file, then overridden by environment variables so a
//! deployment can inject credentials without editing the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exchange::DEFAULT_SYSTEM_ROLE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Operator channel for out-of-band fault reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorChannel {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// One backend session is created per API key.
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Directory holding the durable conversation store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_system_role")]
    pub default_role: String,

    /// Hard ceiling on prompt size, in estimated token units.
    #[serde(default = "default_prompt_budget")]
    pub prompt_budget: usize,

    #[serde(default = "default_rate_limit_size")]
    pub rate_limit_size: usize,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Paragraph boundary marker for stream flushing. Provider framing
    /// differs, so this is configuration rather than a constant.
    #[serde(default = "default_flush_boundary")]
    pub flush_boundary: String,

    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,

    #[serde(default)]
    pub operator: Option<OperatorChannel>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".db")
}

fn default_system_role() -> String {
    DEFAULT_SYSTEM_ROLE.to_string()
}

fn default_prompt_budget() -> usize {
    3000
}

fn default_rate_limit_size() -> usize {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_flush_boundary() -> String {
    "\n\n".to_string()
}

fn default_flush_debounce_ms() -> u64 {
    1000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            api_base: None,
            model: default_model(),
            data_dir: default_data_dir(),
            default_role: default_system_role(),
            prompt_budget: default_prompt_budget(),
            rate_limit_size: default_rate_limit_size(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            flush_boundary: default_flush_boundary(),
            flush_debounce_ms: default_flush_debounce_ms(),
            operator: None,
        }
    }
}

impl RelayConfig {
    /// Load from a YAML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: RelayConfig = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(keys) = std::env::var("RELAY_API_KEYS") {
            let keys: Vec<String> = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if !keys.is_empty() {
                self.api_keys = keys;
            }
        }
        if let Ok(api_base) = std::env::var("RELAY_API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Ok(model) = std::env::var("RELAY_MODEL") {
            self.model = model;
        }
        if let Ok(data_dir) = std::env::var("RELAY_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
    }
}
