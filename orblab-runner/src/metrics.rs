//! Summary performance metrics over a run's artifacts.

use orblab_core::domain::TradeRecord;
use orblab_core::engine::{EquityPoint, RunResult};
use serde::{Deserialize, Serialize};

/// Per-run performance rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub total_r: f64,
    pub expectancy_r: f64,
    pub avg_win_r: f64,
    pub avg_loss_r: f64,
    /// Gross wins over gross losses. None until at least one loss exists
    /// (the ratio is undefined, and JSON has no infinity).
    pub profit_factor: Option<f64>,
    /// Most negative excursion of the equity curve from its running peak.
    pub max_drawdown_r: f64,
    pub sessions: usize,
    pub ors_built: usize,
    pub ors_valid: usize,
    pub signals_emitted: u32,
    pub lockouts: u32,
}

impl PerformanceSummary {
    pub fn from_result(result: &RunResult) -> Self {
        let total_trades = result.trades.len();
        let winning_trades = result.winning_trades();
        let total_r = result.total_r();

        let wins: Vec<f64> = result
            .trades
            .iter()
            .filter(|t| t.realized_r > 0.0)
            .map(|t| t.realized_r)
            .collect();
        let losses: Vec<f64> = result
            .trades
            .iter()
            .filter(|t| t.realized_r <= 0.0)
            .map(|t| t.realized_r)
            .collect();

        let avg_win_r = mean(&wins);
        let avg_loss_r = mean(&losses);
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = (gross_loss > 0.0).then(|| gross_win / gross_loss);

        Self {
            total_trades,
            winning_trades,
            win_rate,
            total_r,
            expectancy_r: win_rate * avg_win_r + (1.0 - win_rate) * avg_loss_r,
            avg_win_r,
            avg_loss_r,
            profit_factor,
            max_drawdown_r: max_drawdown(&result.equity_curve),
            sessions: result.sessions.len(),
            ors_built: result.sessions.iter().filter(|s| s.or_built).count(),
            ors_valid: result.sessions.iter().filter(|s| s.or_valid).count(),
            signals_emitted: result.sessions.iter().map(|s| s.signals_emitted).sum(),
            lockouts: result.sessions.iter().map(|s| s.lockouts).sum(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Most negative distance below the running equity peak. Zero or negative.
pub fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for point in curve {
        peak = peak.max(point.cumulative_r);
        worst = worst.min(point.cumulative_r - peak);
    }
    worst
}

/// Rebuild the cumulative-R sequence at the equity curve's timestamps from
/// the trade log alone. With a faithful log this reproduces the curve.
pub fn replay_equity(trades: &[TradeRecord], curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .iter()
        .map(|point| {
            trades
                .iter()
                .filter(|t| t.exit_ts <= point.ts)
                .map(|t| t.realized_r)
                .sum()
        })
        .collect()
}
