//! Configuration loading and validation for fermata.
//!
//! Loads `~/.fermata/config.toml` with environment variable overrides and
//! validates all settings at startup. Everything has a sensible default;
//! the only value that has no fallback is the API key, which consumers
//! check before constructing a provider.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.fermata/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider API key. Usually supplied via `ANTHROPIC_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model to use for every provider call
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per provider response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System instructions sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Override the provider base URL (testing, proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Safety ceiling on tool-use round trips per query
    #[serde(default = "default_max_tool_cycles")]
    pub max_tool_cycles: u32,

    /// Conversation window: retained messages (2 per exchange)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Extended-thinking token budget; absent = thinking disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_max_tool_cycles() -> u32 {
    20
}
fn default_history_limit() -> usize {
    20
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("base_url", &self.base_url)
            .field("max_tool_cycles", &self.max_tool_cycles)
            .field("history_limit", &self.history_limit)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.fermata/config.toml)
    /// with environment overrides:
    /// - `ANTHROPIC_API_KEY` for the API key
    /// - `FERMATA_MODEL` for the model
    /// - `FERMATA_BASE_URL` for the base URL
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if let Ok(model) = std::env::var("FERMATA_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("FERMATA_BASE_URL") {
            config.base_url = Some(base_url);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".fermata")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".into(),
            ));
        }
        if self.max_tool_cycles == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_cycles must be greater than 0".into(),
            ));
        }
        if self.history_limit < 2 {
            return Err(ConfigError::ValidationError(
                "history_limit must hold at least one exchange (2 messages)".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            base_url: None,
            max_tool_cycles: default_max_tool_cycles(),
            history_limit: default_history_limit(),
            thinking_budget: None,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
