//! Gate configuration.
//!
//! A [`GateConfig`] holds one [`SourceConfig`] per known source, the config
//! applied to unknown sources, and the fallback chain of every request type.
//! [`GateConfig::default`] reproduces the built-in presets; a JSON file can
//! replace any part of it.

mod classification;
pub mod presets;
mod source;

pub use classification::ClassificationTable;
pub use source::{CircuitBreakerConfig, RetryPolicy, SourceConfig};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{GateError, Result};

/// Default number of recent errors kept per source.
pub const DEFAULT_ERROR_HISTORY: usize = 100;

/// Top-level configuration, validated once when a registry is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Per-source settings keyed by source id.
    pub sources: BTreeMap<String, SourceConfig>,
    /// Settings for sources missing from `sources`.
    pub default_source: SourceConfig,
    /// Ordered source ids keyed by request type.
    pub fallback_chains: BTreeMap<String, Vec<String>>,
    /// Recent errors kept per source by the stats recorder.
    pub error_history: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sources: presets::sources(),
            default_source: presets::default_source(),
            fallback_chains: presets::fallback_chains(),
            error_history: DEFAULT_ERROR_HISTORY,
        }
    }
}

impl GateConfig {
    /// Parse and validate a JSON document.
    ///
    /// Omitted top-level fields keep their preset values. A `sources` or
    /// `fallback_chains` map that is present replaces the presets entirely.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Config for `source`, falling back to `default_source`.
    pub fn source(&self, source: &str) -> &SourceConfig {
        self.sources.get(source).unwrap_or(&self.default_source)
    }

    /// Adds or replaces the config of one source.
    pub fn register_source(&mut self, source: impl Into<String>, config: SourceConfig) {
        self.sources.insert(source.into(), config);
    }

    /// Chain for `request_type`, or the default chain when it has none.
    pub fn chain(&self, request_type: &str) -> Option<&[String]> {
        self.fallback_chains
            .get(request_type)
            .or_else(|| self.fallback_chains.get(presets::DEFAULT_CHAIN))
            .map(Vec::as_slice)
    }

    pub fn validate(&self) -> Result<()> {
        for (id, source) in &self.sources {
            if id.trim().is_empty() {
                return Err(GateError::InvalidConfig("source ids must not be empty".into()));
            }
            source.validate(id)?;
        }
        self.default_source.validate(presets::DEFAULT_SOURCE)?;

        for (request_type, chain) in &self.fallback_chains {
            if chain.is_empty() {
                return Err(GateError::InvalidConfig(format!(
                    "fallback chain '{}' is empty",
                    request_type
                )));
            }
            if chain.iter().any(|id| id.trim().is_empty()) {
                return Err(GateError::InvalidConfig(format!(
                    "fallback chain '{}' contains an empty source id",
                    request_type
                )));
            }
        }

        if self.error_history == 0 {
            return Err(GateError::InvalidConfig(
                "error_history must be positive".into(),
            ));
        }
        Ok(())
    }
}
