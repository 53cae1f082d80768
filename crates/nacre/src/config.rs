//! Agent configuration.
//!
//! Configuration is loaded by the host, typically from a JSON file:
//!
//! ```json
//! {
//!   "max_attempts": 2,
//!   "step_timeout_ms": 20000,
//!   "total_timeout_ms": 60000,
//!   "memory_limit_mb": 128,
//!   "max_output_chars": 10000
//! }
//! ```
//!
//! Every key is optional and falls back to its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::{ResourceLimits, duration_ms};

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// The config was not valid JSON for [`AgentConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Phrases that force the tool path even when the classifier says otherwise.
pub const DEFAULT_TRIGGER_PHRASES: &[&str] = &[
    "websearch",
    "fetchtext",
    "queryknowledgebase",
    "writenote",
    "remind me",
    "reminder",
    "notify",
    "notification",
    "alert me",
    "schedule",
    "every day",
    "every morning",
    "tomorrow at",
    "search",
    "look up",
    "latest news",
    "take a note",
    "save a note",
    "write down",
];

/// Configuration for a [`CodeAgent`](crate::agent::CodeAgent) and its sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum generate-and-run attempts per request
    pub max_attempts: u32,
    /// Upper bound for a single sandbox run
    #[serde(rename = "step_timeout_ms", with = "duration_ms")]
    pub step_timeout: Duration,
    /// Upper bound for the whole request, all attempts included
    #[serde(rename = "total_timeout_ms", with = "duration_ms")]
    pub total_timeout: Duration,
    /// V8 heap ceiling per isolate, in megabytes
    pub memory_limit_mb: u64,
    /// Captured output budget per run, in characters
    pub max_output_chars: usize,
    /// Capability calls allowed per run
    pub max_capability_calls: usize,
    /// Maximum snippet size in bytes
    pub max_script_bytes: usize,
    /// Whether to classify requests and answer simple ones directly
    pub classify: bool,
    /// Lowercase phrases that force the tool path when classifying
    pub trigger_phrases: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            max_attempts: 2,
            step_timeout: Duration::from_secs(20),
            total_timeout: Duration::from_secs(60),
            memory_limit_mb: limits.max_memory_bytes / (1024 * 1024),
            max_output_chars: limits.max_output_chars,
            max_capability_calls: limits.max_capability_calls,
            max_script_bytes: limits.max_script_bytes,
            classify: false,
            trigger_phrases: DEFAULT_TRIGGER_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl AgentConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.step_timeout.is_zero() {
            return Err(ConfigError::Invalid("step_timeout_ms must be positive".into()));
        }
        if self.total_timeout.is_zero() {
            return Err(ConfigError::Invalid("total_timeout_ms must be positive".into()));
        }
        if self.memory_limit_mb == 0 {
            return Err(ConfigError::Invalid("memory_limit_mb must be positive".into()));
        }
        Ok(())
    }

    /// The resource limits the sandbox should be built with.
    pub fn sandbox_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: self.memory_limit_mb.saturating_mul(1024 * 1024),
            max_output_chars: self.max_output_chars,
            max_capability_calls: self.max_capability_calls,
            max_script_bytes: self.max_script_bytes,
        }
    }
}
