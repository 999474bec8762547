//! Configuration loading, validation, and management for Quill.
//!
//! Loads configuration from `~/.quill/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.quill/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Maximum context window of the model, in tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,

    /// Session loop settings (retry/backoff)
    #[serde(default)]
    pub session: SessionConfig,

    /// Snapshot store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Tool provider processes to launch at startup.
    /// Absence is valid: the session runs with an empty tool catalog.
    #[serde(default)]
    pub tool_providers: Vec<ToolProviderConfig>,

    /// Custom model pricing overrides (model name → per-million prices)
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_context_tokens() -> u32 {
    200_000
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("session", &self.session)
            .field("store", &self.store)
            .field("tool_providers", &self.tool_providers)
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// Retry/backoff settings for the session loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum streaming attempts per turn under rate limiting
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in seconds
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Backoff delay ceiling in seconds (the delay doubles up to this cap)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_max_retries() -> u32 {
    50
}
fn default_initial_backoff_secs() -> u64 {
    1
}
fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Snapshot store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for conversation snapshots and the session report.
    /// Defaults to `~/.quill/sessions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { dir: None }
    }
}

impl StoreConfig {
    /// Resolve the snapshot directory (config value or default).
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions"))
    }
}

/// Launch configuration for one tool provider process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    /// Unique name for this provider
    pub name: String,

    /// Executable to launch
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
    /// Price per 1M cached input tokens in USD (input price if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_per_m: Option<f64>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.quill/config.toml).
    ///
    /// Also checks environment variables:
    /// - `QUILL_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `QUILL_MODEL` overrides `default_model`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("QUILL_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("QUILL_MODEL") {
            config.default_model = model;
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
        dirs_home().join(".quill")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_context_tokens must be > 0".into(),
            ));
        }

        if self.session.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_retries must be > 0".into(),
            ));
        }

        for provider in &self.tool_providers {
            if provider.name.trim().is_empty() || provider.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool_providers entries need a non-empty name and command".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            max_context_tokens: default_max_context_tokens(),
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            tool_providers: vec![],
            pricing: HashMap::new(),
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
