//! Configuration system for ConfigForge.
//!
//! Load engine configuration from TOML or YAML to bound search effort and
//! tune session behavior without code changes.
//!
//! # Examples
//!
//! Load configuration from TOML string:
//!
//! ```
//! use configforge_config::{BusyPolicy, EngineConfig};
//! use std::time::Duration;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     domain_limit = 5000
//!
//!     [termination]
//!     time_limit_ms = 250
//!     backtrack_limit = 10000
//!
//!     [search]
//!     best_of = 3
//!
//!     [session]
//!     busy_policy = "block"
//! "#).unwrap();
//!
//! assert_eq!(config.time_limit(), Some(Duration::from_millis(250)));
//! assert_eq!(config.search.best_of, 3);
//! assert_eq!(config.session.busy_policy, BusyPolicy::Block);
//! ```
//!
//! Use default config when file is missing:
//!
//! ```
//! use configforge_config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml").unwrap_or_default();
//! // Proceeds with defaults if file doesn't exist
//! assert_eq!(config.search.best_of, 1);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use configforge_core::ConfigForgeError;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ConfigForgeError {
    fn from(error: ConfigError) -> Self {
        ConfigForgeError::Config(error.to_string())
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Search budgets.
    #[serde(default)]
    pub termination: TerminationConfig,

    /// Search behavior.
    #[serde(default)]
    pub search: SearchConfig,

    /// Session behavior.
    #[serde(default)]
    pub session: SessionConfig,

    /// Largest enumerated domain accepted when loading a model.
    #[serde(default = "default_domain_limit")]
    pub domain_limit: usize,
}

fn default_domain_limit() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            termination: TerminationConfig::default(),
            search: SearchConfig::default(),
            session: SessionConfig::default(),
            domain_limit: default_domain_limit(),
        }
    }
}

impl EngineConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist or contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no engine run could honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.best_of == 0 {
            return Err(ConfigError::Invalid("search.best_of must be at least 1".into()));
        }
        if self.search.max_rule_passes == 0 {
            return Err(ConfigError::Invalid(
                "search.max_rule_passes must be at least 1".into(),
            ));
        }
        if self.domain_limit == 0 {
            return Err(ConfigError::Invalid("domain_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Sets the wall-clock budget of one solve.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.termination.time_limit_ms = Some(limit.as_millis() as u64);
        self
    }

    /// Sets the backtrack budget of one solve.
    pub fn with_backtrack_limit(mut self, limit: u64) -> Self {
        self.termination.backtrack_limit = Some(limit);
        self
    }

    /// Sets the choice point budget of one solve.
    pub fn with_choice_point_limit(mut self, limit: u64) -> Self {
        self.termination.choice_point_limit = Some(limit);
        self
    }

    /// Ranks up to `n` solutions by preference score.
    pub fn with_best_of(mut self, n: usize) -> Self {
        self.search.best_of = n.max(1);
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.session.busy_policy = policy;
        self
    }

    /// Enables or disables incremental re-solving.
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.session.incremental = incremental;
        self
    }

    pub fn with_domain_limit(mut self, limit: usize) -> Self {
        self.domain_limit = limit;
        self
    }

    /// Returns the time limit, if configured.
    ///
    /// Convenience method that delegates to `termination.time_limit()`.
    pub fn time_limit(&self) -> Option<Duration> {
        self.termination.time_limit()
    }
}

/// Search budgets. Exceeding any of them ends the solve with a timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TerminationConfig {
    /// Maximum milliseconds one solve may take.
    pub time_limit_ms: Option<u64>,

    /// Maximum number of backtracks per solve.
    pub backtrack_limit: Option<u64>,

    /// Maximum number of choice points created per solve.
    pub choice_point_limit: Option<u64>,
}

impl TerminationConfig {
    /// Returns the time limit as a Duration, if any.
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }

    /// Returns true if no budget is configured.
    pub fn is_unbounded(&self) -> bool {
        self.time_limit_ms.is_none()
            && self.backtrack_limit.is_none()
            && self.choice_point_limit.is_none()
    }
}

/// Search configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SearchConfig {
    /// Number of solutions ranked by preference score. 1 keeps the first.
    #[serde(default = "default_best_of")]
    pub best_of: usize,

    /// Bound on the outer loop applying require/exclude rules.
    #[serde(default = "default_max_rule_passes")]
    pub max_rule_passes: usize,
}

fn default_best_of() -> usize {
    1
}

fn default_max_rule_passes() -> usize {
    16
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            best_of: default_best_of(),
            max_rule_passes: default_max_rule_passes(),
        }
    }
}

/// What a second concurrent call on a busy session does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail fast with a busy error.
    #[default]
    Reject,

    /// Wait for the in-flight operation to finish.
    Block,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Re-solve only the part of the graph an edit can reach.
    #[serde(default = "default_incremental")]
    pub incremental: bool,
}

fn default_incremental() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::default(),
            incremental: default_incremental(),
        }
    }
}

#[cfg(test)]
mod tests;
