//! Configuration loading, validation, and management for Durandal.
//!
//! Loads configuration from a TOML file with `DURANDAL_*` environment
//! variable overrides. Validates all settings before the engine starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The engine configuration.
///
/// Every field has a default matching the engine's calibration; a missing
/// or empty config file yields a fully working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory-tier (T1) capacity in entries.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Embedded-tier (T2) capacity in entries.
    #[serde(default = "default_embedded_capacity")]
    pub embedded_capacity_entries: usize,

    /// SQLite database for the embedded cache tier.
    /// `sqlite::memory:` gives an in-process ephemeral tier.
    #[serde(default = "default_cache_db_path")]
    pub cache_db_path: String,

    /// Recent messages fetched per assembly.
    #[serde(default = "default_recent_message_count")]
    pub recent_message_count: usize,

    /// Maximum artifacts per assembly.
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,

    /// Message count at which rolling summarization triggers.
    #[serde(default = "default_summary_threshold_messages")]
    pub summary_threshold_messages: usize,

    /// Recent-dialogue token count at which summarization triggers.
    #[serde(default = "default_summary_trigger_tokens")]
    pub summary_trigger_tokens: usize,

    /// Default context budget when the caller does not specify one.
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: usize,

    /// Minimum score for a reply to become an artifact.
    #[serde(default = "default_extraction_threshold")]
    pub extraction_threshold: f64,

    /// Minimum content length considered for extraction.
    #[serde(default = "default_min_extractable_length")]
    pub min_extractable_length: usize,

    /// Floor allocation per requested context layer.
    #[serde(default = "default_min_layer_tokens")]
    pub min_layer_tokens: usize,

    /// Orchestrator-level timeout for language model calls.
    #[serde(default = "default_lm_timeout_secs")]
    pub lm_timeout_secs: u64,

    /// Per-type TTL defaults for cache admission.
    #[serde(default)]
    pub ttl: TtlConfig,
}

fn default_memory_capacity() -> usize {
    200
}
fn default_embedded_capacity() -> usize {
    10_000
}
fn default_cache_db_path() -> String {
    "sqlite::memory:".into()
}
fn default_recent_message_count() -> usize {
    6
}
fn default_max_artifacts() -> usize {
    5
}
fn default_summary_threshold_messages() -> usize {
    20
}
fn default_summary_trigger_tokens() -> usize {
    1_500
}
fn default_budget_tokens() -> usize {
    4_096
}
fn default_extraction_threshold() -> f64 {
    5.0
}
fn default_min_extractable_length() -> usize {
    50
}
fn default_min_layer_tokens() -> usize {
    64
}
fn default_lm_timeout_secs() -> u64 {
    30
}

/// Per-type cache TTLs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_ttl_code")]
    pub code_secs: u64,

    #[serde(default = "default_ttl_code")]
    pub solution_secs: u64,

    #[serde(default = "default_ttl_configuration")]
    pub configuration_secs: u64,

    #[serde(default = "default_ttl_conversation_context")]
    pub conversation_context_secs: u64,

    #[serde(default = "default_ttl_summary")]
    pub summary_secs: u64,

    #[serde(default = "default_ttl_default")]
    pub default_secs: u64,
}

fn default_ttl_code() -> u64 {
    24 * 3600
}
fn default_ttl_configuration() -> u64 {
    12 * 3600
}
fn default_ttl_conversation_context() -> u64 {
    30 * 60
}
fn default_ttl_summary() -> u64 {
    6 * 3600
}
fn default_ttl_default() -> u64 {
    3600
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            code_secs: default_ttl_code(),
            solution_secs: default_ttl_code(),
            configuration_secs: default_ttl_configuration(),
            conversation_context_secs: default_ttl_conversation_context(),
            summary_secs: default_ttl_summary(),
            default_secs: default_ttl_default(),
        }
    }
}

impl TtlConfig {
    /// The TTL in seconds for a caller-tagged value type.
    pub fn for_type(&self, value_type: Option<&str>) -> u64 {
        match value_type {
            Some("code") => self.code_secs,
            Some("solution") => self.solution_secs,
            Some("configuration") => self.configuration_secs,
            Some("conversation_context") => self.conversation_context_secs,
            Some("summary") => self.summary_secs,
            _ => self.default_secs,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            embedded_capacity_entries: default_embedded_capacity(),
            cache_db_path: default_cache_db_path(),
            recent_message_count: default_recent_message_count(),
            max_artifacts: default_max_artifacts(),
            summary_threshold_messages: default_summary_threshold_messages(),
            summary_trigger_tokens: default_summary_trigger_tokens(),
            default_budget_tokens: default_budget_tokens(),
            extraction_threshold: default_extraction_threshold(),
            min_extractable_length: default_min_extractable_length(),
            min_layer_tokens: default_min_layer_tokens(),
            lm_timeout_secs: default_lm_timeout_secs(),
            ttl: TtlConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        let mut config: EngineConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `DURANDAL_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        override_usize("DURANDAL_MEMORY_CAPACITY", &mut self.memory_capacity);
        override_usize(
            "DURANDAL_EMBEDDED_CAPACITY",
            &mut self.embedded_capacity_entries,
        );
        if let Ok(path) = std::env::var("DURANDAL_CACHE_DB_PATH") {
            self.cache_db_path = path;
        }
        override_usize("DURANDAL_RECENT_MESSAGES", &mut self.recent_message_count);
        override_usize("DURANDAL_MAX_ARTIFACTS", &mut self.max_artifacts);
        override_usize("DURANDAL_BUDGET_TOKENS", &mut self.default_budget_tokens);
        if let Ok(raw) = std::env::var("DURANDAL_LM_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(v) => self.lm_timeout_secs = v,
                Err(_) => tracing::warn!("Ignoring non-numeric DURANDAL_LM_TIMEOUT_SECS"),
            }
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_capacity == 0 {
            return Err(ConfigError::Invalid("memory_capacity must be > 0".into()));
        }
        if self.embedded_capacity_entries == 0 {
            return Err(ConfigError::Invalid(
                "embedded_capacity_entries must be > 0".into(),
            ));
        }
        if self.default_budget_tokens < self.min_layer_tokens {
            return Err(ConfigError::Invalid(format!(
                "default_budget_tokens ({}) below min_layer_tokens ({})",
                self.default_budget_tokens, self.min_layer_tokens
            )));
        }
        if self.extraction_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "extraction_threshold must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

fn override_usize(var: &str, target: &mut usize) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring non-numeric {var}"),
        }
    }
}
