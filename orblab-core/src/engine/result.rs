//! Run artifacts: trade log, equity curve, summaries, diagnostics.

use crate::domain::{Direction, TradeRecord};
use crate::governance::GovernanceEvent;
use crate::risk::RiskStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One equity observation, appended per bar once the OR has finalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub cumulative_r: f64,
}

/// Per-session rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub date: NaiveDate,
    pub or_built: bool,
    pub or_valid: bool,
    pub signals_emitted: u32,
    pub trades_completed: u32,
    pub session_r: f64,
    pub lockouts: u32,
}

/// Sampled factor state for later attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSnapshot {
    pub ts: DateTime<Utc>,
    pub or_finalized: bool,
    pub or_high: Option<f64>,
    pub or_low: Option<f64>,
    pub rel_vol: Option<f64>,
    pub vwap: Option<f64>,
    pub adx: Option<f64>,
    pub score_long: Option<f64>,
    pub score_short: Option<f64>,
}

/// An arbitration loser, recorded but never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub ts: DateTime<Utc>,
    pub playbook: String,
    pub direction: Direction,
    pub strength: f64,
    pub priority: f64,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Arbitration,
    HeatExhausted,
    /// The account risk circuit breaker scaled the position to zero.
    RiskLimited,
}

/// Counters for conditions that are recorded rather than raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub bars_processed: u64,
    pub bars_skipped: u64,
    pub suppressed_signals: u64,
    pub second_chance_suppressed: u64,
    /// Signals dropped by the time-of-day filter's skip windows.
    pub time_filter_rejected: u64,
    /// Signals dropped below the entry-quality bar.
    pub quality_rejected: u64,
    /// Signals dropped while the account risk manager was halted.
    pub risk_halted: u64,
}

/// Everything a run produces. Handed to external analytics at run end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub sessions: Vec<SessionSummary>,
    pub governance_events: Vec<GovernanceEvent>,
    pub factor_snapshots: Vec<FactorSnapshot>,
    pub rejected_signals: Vec<RejectedSignal>,
    pub diagnostics: Diagnostics,
    /// Final account risk state, when risk limits were enabled.
    pub risk_status: Option<RiskStatus>,
}

impl RunResult {
    pub fn total_r(&self) -> f64 {
        self.trades.iter().map(|t| t.realized_r).sum()
    }

    pub fn winning_trades(&self) -> usize {
        self.trades.iter().filter(|t| t.is_winner()).count()
    }
}
