//! Config → engine → artifacts wiring.

use crate::artifacts;
use crate::config::{RunConfig, RunId};
use crate::metrics::PerformanceSummary;
use anyhow::{Context, Result};
use orblab_core::domain::Bar;
use orblab_core::engine::{BacktestEngine, RunResult};
use orblab_core::regime::RegimeProvider;
use std::path::Path;
use tracing::info;

/// A completed run: identity, raw artifacts, and the summary rollup.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub symbol: String,
    pub result: RunResult,
    pub summary: PerformanceSummary,
}

/// Install the fmt subscriber with env-filter control (RUST_LOG).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Run a backtest with the disabled-classifier constant regime.
pub fn run_backtest(config: &RunConfig, bars: &[Bar]) -> Result<RunReport> {
    let engine = BacktestEngine::new(config.strategy.clone())
        .context("Engine rejected the strategy config")?;
    let result = engine.run(bars).context("Backtest run failed")?;
    Ok(report(config, result))
}

/// Run a backtest against an external regime source.
pub fn run_backtest_with_regime(
    config: &RunConfig,
    bars: &[Bar],
    regime: &dyn RegimeProvider,
) -> Result<RunReport> {
    let engine = BacktestEngine::new(config.strategy.clone())
        .context("Engine rejected the strategy config")?;
    let result = engine
        .run_with_regime(bars, regime)
        .context("Backtest run failed")?;
    Ok(report(config, result))
}

fn report(config: &RunConfig, result: RunResult) -> RunReport {
    let summary = PerformanceSummary::from_result(&result);
    info!(
        symbol = %config.symbol,
        trades = summary.total_trades,
        total_r = summary.total_r,
        max_dd_r = summary.max_drawdown_r,
        "backtest complete"
    );
    RunReport {
        run_id: config.run_id(),
        symbol: config.symbol.clone(),
        result,
        summary,
    }
}

/// Write the full artifact set for a report into `dir`.
///
/// Produces `trades.csv`, `trades.json`, `equity.csv`, `sessions.json`,
/// and `summary.json`.
pub fn export_artifacts(dir: &Path, report: &RunReport) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact dir {}", dir.display()))?;
    artifacts::write_trades_csv(&dir.join("trades.csv"), &report.result.trades)?;
    artifacts::write_trades_json(&dir.join("trades.json"), &report.result.trades)?;
    artifacts::write_equity_csv(&dir.join("equity.csv"), &report.result.equity_curve)?;
    artifacts::write_sessions_json(&dir.join("sessions.json"), &report.result.sessions)?;
    artifacts::write_summary_json(&dir.join("summary.json"), &report.summary)?;
    info!(dir = %dir.display(), run_id = %report.run_id, "artifacts exported");
    Ok(())
}
