//! Pipeline Configuration
//!
//! [`MdapConfig`] carries the voting parameters and per-call limits.
//! Every field has a default so partial JSON config files deserialize
//! cleanly; budgets stay optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Voting and pipeline parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdapConfig {
    /// Margin required to win a vote
    pub k: usize,
    /// Maximum accepted samples per vote
    pub max_samples: usize,
    /// Red-flag threshold on response length, in tokens
    pub max_tokens_response: usize,
    /// Sampling temperature for candidate generation
    pub temperature: f64,
    /// Model identifier, also keys the price table
    pub model_id: String,
    /// Recursion bound for nested sub-function generation
    pub max_depth: usize,
    /// Per-call timeout in seconds
    pub request_timeout_secs: u64,
    /// When true, a failed validation report moves the pipeline to Error
    pub gate_on_validation: bool,
    /// Optional hard resource limits
    pub budget: BudgetConfig,
}

impl Default for MdapConfig {
    fn default() -> Self {
        Self {
            k: 3,
            max_samples: 20,
            max_tokens_response: 500,
            temperature: 0.1,
            model_id: "claude-3-haiku-20240307".to_string(),
            max_depth: 3,
            request_timeout_secs: 60,
            gate_on_validation: false,
            budget: BudgetConfig::default(),
        }
    }
}

/// Optional hard limits enforced by the resource manager
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Limit on total tokens (input + output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Limit on estimated cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
    /// Limit on wall-clock seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_secs: Option<u64>,
}

impl BudgetConfig {
    /// True when no limit is set
    pub fn is_empty(&self) -> bool {
        self.max_tokens.is_none() && self.max_cost_usd.is_none() && self.max_time_secs.is_none()
    }
}

/// Configuration loading/validation failure
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(std::io::Error),
    /// File was not valid JSON for this schema
    Parse(serde_json::Error),
    /// A field value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl MdapConfig {
    /// Load from a JSON file; missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: MdapConfig = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range parameter values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::Invalid("k must be at least 1".into()));
        }
        if self.max_samples == 0 {
            return Err(ConfigError::Invalid("max_samples must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} out of range [0.0, 2.0]",
                self.temperature
            )));
        }
        if self.model_id.is_empty() {
            return Err(ConfigError::Invalid("model_id must not be empty".into()));
        }
        Ok(())
    }

    /// Per-call timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Rejection bound: a vote gives up after this many consecutive
    /// red-flag rejections.
    pub fn rejection_limit(&self) -> usize {
        3 * self.max_samples
    }
}
