//! Graph configuration.
//!
//! Loaded from `.specimpact/config.json` when present. Every field has a
//! default, so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default suggestion threshold: links below this are "suggested".
pub const DEFAULT_SUGGESTION_THRESHOLD: f64 = 0.5;

/// Default traversal depth for impact queries.
pub const DEFAULT_DEPTH: usize = 2;

/// Default number of nodes or edges inserted between cancellation checks.
pub const DEFAULT_BATCH_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Nodes and edges below this confidence (and not manual) are suggested.
    pub suggestion_threshold: f64,

    /// Depth used by `query_tests_for_change` and focal exports.
    pub default_depth: usize,

    /// Whether queries without an explicit flag include suggested links.
    pub include_suggested: bool,

    /// Rebuild batch size.
    pub batch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            suggestion_threshold: DEFAULT_SUGGESTION_THRESHOLD,
            default_depth: DEFAULT_DEPTH,
            include_suggested: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl GraphConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.suggestion_threshold = threshold;
        self
    }

    /// Reads a config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config: GraphConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.suggestion_threshold) {
            return Err(ConfigError::Invalid(format!(
                "suggestion_threshold must be within [0, 1], got {}",
                self.suggestion_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
