//! Run artifact export: trade tape, equity curve, session summaries.

use crate::metrics::PerformanceSummary;
use anyhow::{Context, Result};
use orblab_core::domain::TradeRecord;
use orblab_core::engine::{EquityPoint, SessionSummary};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create trades CSV {}", path.display()))?;

    writeln!(
        file,
        "id,direction,entry_ts,exit_ts,entry_price,exit_price,initial_stop,stop_at_close,size,realized_r,exit_reason,mfe_r,mae_r,partials,playbook,arbitration_score"
    )?;

    for trade in trades {
        writeln!(
            file,
            "{},{},{},{},{:.4},{:.4},{:.4},{:.4},{},{:.4},{},{:.4},{:.4},{},{},{}",
            trade.id,
            trade.direction.label(),
            trade.entry_ts.to_rfc3339(),
            trade.exit_ts.to_rfc3339(),
            trade.entry_price,
            trade.exit_price,
            trade.initial_stop,
            trade.stop_at_close,
            trade.size,
            trade.realized_r,
            trade.exit_reason.label(),
            trade.peak_favorable_r,
            trade.worst_adverse_r,
            trade.fills.len(),
            trade.playbook.as_deref().unwrap_or(""),
            trade
                .arbitration_score
                .map(|s| format!("{s:.4}"))
                .unwrap_or_default(),
        )?;
    }

    Ok(())
}

pub fn write_trades_json(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(trades).context("Failed to serialize trades")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write trades JSON {}", path.display()))?;
    Ok(())
}

pub fn write_equity_csv(path: &Path, equity: &[EquityPoint]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create equity CSV {}", path.display()))?;
    writeln!(file, "ts,cumulative_r")?;
    for point in equity {
        writeln!(file, "{},{:.6}", point.ts.to_rfc3339(), point.cumulative_r)?;
    }
    Ok(())
}

pub fn write_sessions_json(path: &Path, sessions: &[SessionSummary]) -> Result<()> {
    let json = serde_json::to_string_pretty(sessions).context("Failed to serialize sessions")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write sessions JSON {}", path.display()))?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &PerformanceSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write summary JSON {}", path.display()))?;
    Ok(())
}
