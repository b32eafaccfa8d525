//! Configuration loading, validation, and management for CABM.
//!
//! Loads configuration from `~/.cabm/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cabm_core::Character;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.cabm/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Turn orchestration limits and timeouts
    #[serde(default)]
    pub agent: AgentConfig,

    /// The persona the assistant speaks as
    #[serde(default)]
    pub character: CharacterConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat history storage
    #[serde(default)]
    pub history: HistoryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
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

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("character", &self.character)
            .field("gateway", &self.gateway)
            .field("history", &self.history)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Limits and timeouts applied to every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool round-trips per user turn
    #[serde(default = "default_max_ai_iterations")]
    pub max_ai_iterations: u32,

    /// Tool results longer than this (in characters) are cut and marked with `...`
    #[serde(default = "default_tool_result_max_chars")]
    pub tool_result_max_chars: usize,

    /// Maximum wait for the next chunk from the completion source
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Maximum wait for a single tool call
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Maximum wait for follow-up options before the turn closes without them
    #[serde(default = "default_option_timeout_secs")]
    pub option_timeout_secs: u64,

    /// Number of prior history messages loaded into each turn's context
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Whether requests that don't say otherwise may use tools
    #[serde(default)]
    pub tools_enabled_by_default: bool,

    /// Whether follow-up options are generated after a final answer
    #[serde(default = "default_true")]
    pub suggest_options: bool,
}

fn default_max_ai_iterations() -> u32 {
    10
}
fn default_tool_result_max_chars() -> usize {
    800
}
fn default_chunk_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_option_timeout_secs() -> u64 {
    20
}
fn default_history_window() -> usize {
    200
}

impl AgentConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn option_timeout(&self) -> Duration {
        Duration::from_secs(self.option_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_ai_iterations: default_max_ai_iterations(),
            tool_result_max_chars: default_tool_result_max_chars(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            option_timeout_secs: default_option_timeout_secs(),
            history_window: default_history_window(),
            tools_enabled_by_default: false,
            suggest_options: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    #[serde(default = "default_character_id")]
    pub id: String,

    #[serde(default = "default_character_name")]
    pub name: String,

    /// Overrides the built-in system prompt when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_character_id() -> String {
    Character::default().id
}
fn default_character_name() -> String {
    Character::default().name
}

impl CharacterConfig {
    pub fn to_character(&self) -> Character {
        let fallback = Character::default();
        Character {
            id: self.id.clone(),
            name: self.name.clone(),
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or(fallback.system_prompt),
        }
    }
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            id: default_character_id(),
            name: default_character_name(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// "memory" or "file"
    #[serde(default = "default_history_backend")]
    pub backend: String,

    /// JSONL file for the "file" backend (defaults to `~/.cabm/history.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_history_backend() -> String {
    "memory".into()
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("history.jsonl"))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.cabm/config.toml).
    ///
    /// Environment overrides:
    /// - `CABM_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CABM_PROVIDER`, `CABM_MODEL`
    /// - `CABM_MAX_AI_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup` (injectable for tests).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = lookup("CABM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("CABM_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("CABM_MODEL") {
            self.default_model = model;
        }

        if let Some(raw) = lookup("CABM_MAX_AI_ITERATIONS") {
            self.agent.max_ai_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CABM_MAX_AI_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cabm")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_ai_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_ai_iterations must be at least 1".into(),
            ));
        }

        if self.agent.chunk_timeout_secs == 0
            || self.agent.tool_timeout_secs == 0
            || self.agent.option_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than zero".into(),
            ));
        }

        if !matches!(self.history.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "history.backend must be 'memory' or 'file', got '{}'",
                self.history.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            character: CharacterConfig::default(),
            gateway: GatewayConfig::default(),
            history: HistoryConfig::default(),
            providers: HashMap::new(),
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
