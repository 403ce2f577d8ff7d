//! Regime labels from the (external) classifier.
//!
//! The engine never clusters; it consumes a `bar → RegimeLabel` function.
//! When the classifier is disabled a constant label stands in, which keeps
//! the orchestrator path fully deterministic.

use crate::domain::Bar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trend,
    Range,
    Volatile,
    Transitional,
}

/// A regime call plus the classifier's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeLabel {
    pub regime: Regime,
    /// Classifier confidence in [0, 1]; scales position size.
    pub clarity: f64,
}

impl RegimeLabel {
    pub fn new(regime: Regime, clarity: f64) -> Self {
        Self {
            regime,
            clarity: clarity.clamp(0.0, 1.0),
        }
    }
}

impl Default for RegimeLabel {
    fn default() -> Self {
        Self {
            regime: Regime::Range,
            clarity: 1.0,
        }
    }
}

/// Per-bar regime source.
pub trait RegimeProvider {
    fn classify(&self, bar: &Bar) -> RegimeLabel;
}

/// Disabled-classifier stand-in: the same label every bar.
#[derive(Debug, Clone)]
pub struct ConstantRegime(pub RegimeLabel);

impl ConstantRegime {
    pub fn range() -> Self {
        Self(RegimeLabel::default())
    }
}

impl RegimeProvider for ConstantRegime {
    fn classify(&self, _bar: &Bar) -> RegimeLabel {
        self.0
    }
}
