//! Configuration loading, validation, and management for Handoff.
//!
//! Loads configuration from `~/.handoff/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.handoff/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name (selects the default base URL)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model used by agents that do not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// The agent started by the CLI
    #[serde(default)]
    pub agent: AgentSection,

    /// Defaults for each run
    #[serde(default)]
    pub run: RunSection,

    /// Transport retry schedule
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for HandoffConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("agent", &self.agent)
            .field("run", &self.run)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// Model for this agent; falls back to `default_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_agent_name() -> String {
    "Agent".into()
}
fn default_instructions() -> String {
    "You are a helpful agent.".into()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            instructions: default_instructions(),
            model: None,
            tool_choice: None,
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Maximum assistant turns per run; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,

    #[serde(default = "default_true")]
    pub execute_tools: bool,

    #[serde(default)]
    pub stream: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_turns: None,
            execute_tools: true,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Disable to fail on the first transport error
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before attempt `n`, in seconds; its length bounds the attempts
    #[serde(default = "default_delays_secs")]
    pub delays_secs: Vec<u64>,
}

fn default_delays_secs() -> Vec<u64> {
    vec![0, 5, 10, 30, 60]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delays_secs: default_delays_secs(),
        }
    }
}

impl HandoffConfig {
    /// Load configuration from the default path with environment overrides.
    ///
    /// Environment variables fill in a missing API key and override the
    /// base URL and default model.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("HANDOFF_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(base_url) = var("HANDOFF_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(model) = var("HANDOFF_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".handoff")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.enabled && self.retry.delays_secs.is_empty() {
            return Err(ConfigError::ValidationError(
                "retry.delays_secs must not be empty while retry is enabled".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The model the configured agent uses.
    pub fn agent_model(&self) -> &str {
        self.agent.model.as_deref().unwrap_or(&self.default_model)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: None,
            default_model: default_model(),
            agent: AgentSection::default(),
            run: RunSection::default(),
            retry: RetryConfig::default(),
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
