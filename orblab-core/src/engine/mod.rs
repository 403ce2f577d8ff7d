//! The deterministic bar-driven engine.
//!
//! Two selectable loops share the session machinery (OR lifecycle,
//! indicator cells, governance, trade managers): the single-strategy
//! confluence breakout loop and the multi-playbook orchestrator.

pub mod event_loop;
pub mod orchestrator;
pub mod result;
mod state;

pub use result::{
    Diagnostics, EquityPoint, FactorSnapshot, RejectedSignal, RejectionReason, RunResult,
    SessionSummary,
};

use crate::config::{ConfigError, EngineMode, StrategyConfig};
use crate::domain::{Bar, TradeError};
use crate::regime::{ConstantRegime, RegimeProvider};
use thiserror::Error;

/// Fatal run failures. Recoverable per-bar and per-session conditions are
/// logged and recorded in diagnostics instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("trade invariant violated for {trade_id} at bar {bar_index}: {source}")]
    TradeInvariant {
        trade_id: String,
        bar_index: usize,
        source: TradeError,
    },
}

/// Engine facade: validate once, then run over a bar slice.
pub struct BacktestEngine {
    config: StrategyConfig,
}

impl BacktestEngine {
    /// Build an engine. Refuses an invalid configuration.
    pub fn new(config: StrategyConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Run with the disabled-classifier constant regime label.
    pub fn run(&self, bars: &[Bar]) -> Result<RunResult, EngineError> {
        self.run_with_regime(bars, &ConstantRegime::range())
    }

    /// Run with an external regime source.
    pub fn run_with_regime(
        &self,
        bars: &[Bar],
        regime: &dyn RegimeProvider,
    ) -> Result<RunResult, EngineError> {
        match self.config.mode {
            EngineMode::SingleStrategy => event_loop::run_single(&self.config, bars, regime),
            EngineMode::MultiPlaybook => orchestrator::run_multi(&self.config, bars, regime),
        }
    }
}
