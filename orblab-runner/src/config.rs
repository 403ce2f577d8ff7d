//! Serializable run configuration.

use anyhow::{Context, Result};
use orblab_core::config::StrategyConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

/// Everything needed to reproduce a run: the full strategy config, the
/// instrument, and the seed for any randomized collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub symbol: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub strategy: StrategyConfig,
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    pub fn new(symbol: impl Into<String>, strategy: StrategyConfig) -> Self {
        Self {
            symbol: symbol.into(),
            seed: default_seed(),
            strategy,
        }
    }

    /// Deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs share a RunId, which makes results
    /// cacheable and regressions attributable.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).expect("RunConfig serialization failed");
        let hash = blake3::hash(json.as_bytes());
        hash.to_hex().to_string()
    }

    /// Load and validate a TOML run configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config {}", path.display()))?;
        let config: RunConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse run config {}", path.display()))?;
        config
            .strategy
            .validate()
            .with_context(|| format!("Invalid strategy config in {}", path.display()))?;
        Ok(config)
    }
}
