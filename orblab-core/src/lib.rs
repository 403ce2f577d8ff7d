//! OrbLab Core — deterministic intraday Opening-Range-Breakout engine.
//!
//! This crate contains the whole engine:
//! - Domain types (bars, signals, the trade state machine)
//! - Config schema with cross-field validation
//! - Incremental indicator cells (OR, VWAP, ADX, ATR, relative volume)
//! - Factor evaluation and the confluence scoring gate
//! - Breakout detection, stop placement, target ladders
//! - Trade lifecycle managers (classic and two-phase)
//! - Governance (daily caps, loss-streak lockouts, cutoffs)
//! - Funded-account risk limits (loss halts, trailing drawdown, circuit
//!   breaker), time-of-day filtering, and entry-quality grading
//! - Four playbooks behind a closed registry, signal arbitration, and
//!   portfolio sizing under a heat budget
//! - The two event loops (single-strategy and multi-playbook)
//!
//! Determinism is the primary contract: identical bars, config, and seed
//! produce identical trade logs and equity curves.

pub mod arbitration;
pub mod config;
pub mod detector;
pub mod domain;
pub mod engine;
pub mod entry_quality;
pub mod factors;
pub mod governance;
pub mod indicators;
pub mod playbooks;
pub mod portfolio;
pub mod regime;
pub mod risk;
pub mod scoring;
pub mod time_filters;
pub mod trade;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: result and domain types cross thread boundaries,
    /// so independent engine instances can run in parallel.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::ActiveTrade>();
        require_sync::<domain::ActiveTrade>();
        require_send::<domain::TradeRecord>();
        require_sync::<domain::TradeRecord>();
        require_send::<config::StrategyConfig>();
        require_sync::<config::StrategyConfig>();
        require_send::<engine::RunResult>();
        require_sync::<engine::RunResult>();
        require_send::<governance::GovernanceEvent>();
        require_sync::<governance::GovernanceEvent>();
    }
}
