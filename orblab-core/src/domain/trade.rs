//! ActiveTrade — the mutable trade state machine, and the closed-trade record.
//!
//! Phases advance one way: Initial → BreakevenPromoted → Trailing → Closed.
//! The trade manager is the sole mutator; every mutation goes through a
//! method that enforces the trade invariants (positive initial risk, stop
//! ratchet, size conservation, single close).

use super::signal::{r_multiple, Direction, TradeSignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle phase of an open trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TradePhase {
    Initial,
    BreakevenPromoted,
    Trailing,
    Closed,
}

/// Why a trade left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Initial or breakeven stop hit before any promotion past entry.
    Stop,
    /// All targets filled.
    Target,
    /// Stop hit after it had been ratcheted past entry.
    Trailing,
    /// Playbook salvage predicate fired; closed at bar close.
    Salvage,
    /// Flattened at session end.
    Eod,
    /// Closed by the governance layer.
    Governance,
}

impl ExitReason {
    pub fn label(self) -> &'static str {
        match self {
            ExitReason::Stop => "stop",
            ExitReason::Target => "target",
            ExitReason::Trailing => "trailing",
            ExitReason::Salvage => "salvage",
            ExitReason::Eod => "eod",
            ExitReason::Governance => "governance",
        }
    }
}

/// One rung of the profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub price: f64,
    pub size_fraction: f64,
    pub filled: bool,
}

/// Append-only record of a partial target fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFill {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub target_index: usize,
    pub size_fraction: f64,
    pub r_multiple: f64,
}

/// Trade invariant violations. These are programmer errors: the engine
/// aborts the run when one surfaces (carrying trade id and bar index).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradeError {
    #[error("initial risk must be positive (entry {entry}, stop {stop})")]
    NonPositiveRisk { entry: f64, stop: f64 },

    #[error("stop {stop} is on the wrong side of entry {entry} for a {direction} trade")]
    StopOnWrongSide {
        direction: &'static str,
        entry: f64,
        stop: f64,
    },

    #[error("target fractions sum to {sum}, above 1")]
    OversizedTargets { sum: f64 },

    #[error("target {index} already filled")]
    TargetAlreadyFilled { index: usize },

    #[error("remaining size would drop below zero ({remaining} - {fraction})")]
    NegativeRemaining { remaining: f64, fraction: f64 },

    #[error("trade already closed")]
    AlreadyClosed,
}

/// An open trade with full state tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub id: String,
    pub direction: Direction,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    /// |entry - initial_stop|, fixed at creation. Always > 0.
    pub initial_risk: f64,
    pub targets: Vec<Target>,
    /// Fraction of the position still open. In [0, 1].
    pub remaining_size: f64,
    pub fills: Vec<PartialFill>,
    pub phase: TradePhase,
    pub peak_favorable_r: f64,
    pub worst_adverse_r: f64,
    pub bars_held: usize,

    // Provenance
    pub signal: Option<TradeSignal>,
    pub playbook: Option<String>,
    pub arbitration_score: Option<f64>,

    // Terminal fields, set exactly once by close()
    pub exit_ts: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub realized_r: Option<f64>,
}

impl ActiveTrade {
    /// Open a trade. Targets are (price, size_fraction) rungs in fill order.
    pub fn new(
        id: String,
        direction: Direction,
        entry_ts: DateTime<Utc>,
        entry_price: f64,
        initial_stop: f64,
        targets: Vec<(f64, f64)>,
    ) -> Result<Self, TradeError> {
        let initial_risk = (entry_price - initial_stop).abs();
        if initial_risk <= 0.0 {
            return Err(TradeError::NonPositiveRisk {
                entry: entry_price,
                stop: initial_stop,
            });
        }
        let wrong_side = match direction {
            Direction::Long => initial_stop >= entry_price,
            Direction::Short => initial_stop <= entry_price,
        };
        if wrong_side {
            return Err(TradeError::StopOnWrongSide {
                direction: direction.label(),
                entry: entry_price,
                stop: initial_stop,
            });
        }
        let fraction_sum: f64 = targets.iter().map(|(_, f)| f).sum();
        if fraction_sum > 1.0 + 1e-9 {
            return Err(TradeError::OversizedTargets { sum: fraction_sum });
        }

        Ok(Self {
            id,
            direction,
            entry_ts,
            entry_price,
            initial_stop,
            current_stop: initial_stop,
            initial_risk,
            targets: targets
                .into_iter()
                .map(|(price, size_fraction)| Target {
                    price,
                    size_fraction,
                    filled: false,
                })
                .collect(),
            remaining_size: 1.0,
            fills: Vec::new(),
            phase: TradePhase::Initial,
            peak_favorable_r: 0.0,
            worst_adverse_r: 0.0,
            bars_held: 0,
            signal: None,
            playbook: None,
            arbitration_score: None,
            exit_ts: None,
            exit_price: None,
            exit_reason: None,
            realized_r: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.phase != TradePhase::Closed
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Stop has been promoted to (or past) breakeven.
    pub fn promoted(&self) -> bool {
        matches!(
            self.phase,
            TradePhase::BreakevenPromoted | TradePhase::Trailing
        )
    }

    /// Signed R at `price`.
    pub fn current_r(&self, price: f64) -> f64 {
        r_multiple(self.direction, self.entry_price, self.initial_risk, price)
    }

    /// Convert an R level back into a price.
    pub fn price_at_r(&self, r: f64) -> f64 {
        self.entry_price + self.direction.sign() * r * self.initial_risk
    }

    /// Fold a traded price into the MFE/MAE extremes.
    pub fn update_r_extremes(&mut self, price: f64) {
        let r = self.current_r(price);
        if r > self.peak_favorable_r {
            self.peak_favorable_r = r;
        }
        if r < self.worst_adverse_r {
            self.worst_adverse_r = r;
        }
    }

    /// Ratchet the stop toward the market. Returns true if the stop moved.
    ///
    /// A proposal that is not strictly tighter than the current stop is a
    /// no-op, never an error; managers propose freely and the ratchet
    /// filters.
    pub fn tighten_stop(&mut self, proposed: f64) -> bool {
        let better = match self.direction {
            Direction::Long => proposed > self.current_stop,
            Direction::Short => proposed < self.current_stop,
        };
        if better {
            self.current_stop = proposed;
        }
        better
    }

    /// Move the stop to breakeven and advance the phase.
    pub fn promote_to_breakeven(&mut self, stop: f64) -> bool {
        let moved = self.tighten_stop(stop);
        if moved && self.phase == TradePhase::Initial {
            self.phase = TradePhase::BreakevenPromoted;
        }
        moved
    }

    pub fn activate_trailing(&mut self) {
        if self.phase != TradePhase::Closed {
            self.phase = TradePhase::Trailing;
        }
    }

    /// Record a fill of target `index` at its target price.
    pub fn record_fill(&mut self, ts: DateTime<Utc>, index: usize) -> Result<(), TradeError> {
        if self.is_closed() {
            return Err(TradeError::AlreadyClosed);
        }
        let (price, fraction) = {
            let target = &self.targets[index];
            if target.filled {
                return Err(TradeError::TargetAlreadyFilled { index });
            }
            (target.price, target.size_fraction)
        };
        if self.remaining_size - fraction < -1e-9 {
            return Err(TradeError::NegativeRemaining {
                remaining: self.remaining_size,
                fraction,
            });
        }
        let r = self.current_r(price);
        self.targets[index].filled = true;
        self.remaining_size = (self.remaining_size - fraction).max(0.0);
        self.fills.push(PartialFill {
            ts,
            price,
            target_index: index,
            size_fraction: fraction,
            r_multiple: r,
        });
        Ok(())
    }

    /// Close the trade. Terminal fields are set exactly once.
    ///
    /// Realized R is the size-weighted sum over partial fills plus the
    /// weighted R of the final close on whatever size remained.
    pub fn close(
        &mut self,
        ts: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
    ) -> Result<(), TradeError> {
        if self.is_closed() {
            return Err(TradeError::AlreadyClosed);
        }
        let mut total_r: f64 = self
            .fills
            .iter()
            .map(|f| f.r_multiple * f.size_fraction)
            .sum();
        if self.remaining_size > 1e-9 {
            total_r += self.current_r(price) * self.remaining_size;
        }
        self.exit_ts = Some(ts);
        self.exit_price = Some(price);
        self.exit_reason = Some(reason);
        self.realized_r = Some(total_r);
        self.phase = TradePhase::Closed;
        Ok(())
    }

    /// True when the close was a full stop-out: no partials and reason `stop`.
    pub fn is_full_stop(&self) -> bool {
        self.exit_reason == Some(ExitReason::Stop) && self.fills.is_empty()
    }

    /// Freeze into the closed-trade artifact. Call only after close().
    pub fn to_record(&self, size: u32) -> TradeRecord {
        TradeRecord {
            id: self.id.clone(),
            direction: self.direction,
            entry_ts: self.entry_ts,
            entry_price: self.entry_price,
            exit_ts: self.exit_ts.unwrap_or(self.entry_ts),
            exit_price: self.exit_price.unwrap_or(self.entry_price),
            initial_stop: self.initial_stop,
            stop_at_close: self.current_stop,
            size,
            realized_r: self.realized_r.unwrap_or(0.0),
            exit_reason: self.exit_reason.unwrap_or(ExitReason::Stop),
            peak_favorable_r: self.peak_favorable_r,
            worst_adverse_r: self.worst_adverse_r,
            fills: self.fills.clone(),
            playbook: self.playbook.clone(),
            arbitration_score: self.arbitration_score,
        }
    }
}

/// A completed round-trip trade with full traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub direction: Direction,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_ts: DateTime<Utc>,
    pub exit_price: f64,
    pub initial_stop: f64,
    pub stop_at_close: f64,
    pub size: u32,
    pub realized_r: f64,
    pub exit_reason: ExitReason,
    pub peak_favorable_r: f64,
    pub worst_adverse_r: f64,
    pub fills: Vec<PartialFill>,
    pub playbook: Option<String>,
    pub arbitration_score: Option<f64>,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.realized_r > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30 + min, 0).unwrap()
    }

    fn long_trade() -> ActiveTrade {
        ActiveTrade::new(
            "L-1".into(),
            Direction::Long,
            ts(0),
            100.60,
            99.95,
            vec![(101.0, 0.5), (102.0, 0.5)],
        )
        .unwrap()
    }

    #[test]
    fn initial_risk_computed() {
        let trade = long_trade();
        assert!((trade.initial_risk - 0.65).abs() < 1e-12);
        assert_eq!(trade.phase, TradePhase::Initial);
        assert_eq!(trade.remaining_size, 1.0);
    }

    #[test]
    fn zero_risk_rejected() {
        let err = ActiveTrade::new(
            "X".into(),
            Direction::Long,
            ts(0),
            100.0,
            100.0,
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, TradeError::NonPositiveRisk { .. }));
    }

    #[test]
    fn stop_above_long_entry_rejected() {
        let err = ActiveTrade::new(
            "X".into(),
            Direction::Long,
            ts(0),
            100.0,
            100.5,
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, TradeError::StopOnWrongSide { .. }));
    }

    #[test]
    fn oversized_targets_rejected() {
        let err = ActiveTrade::new(
            "X".into(),
            Direction::Long,
            ts(0),
            100.0,
            99.0,
            vec![(101.0, 0.7), (102.0, 0.7)],
        )
        .unwrap_err();
        assert!(matches!(err, TradeError::OversizedTargets { .. }));
    }

    #[test]
    fn ratchet_rejects_loosening() {
        let mut trade = long_trade();
        assert!(trade.tighten_stop(100.2));
        assert!(!trade.tighten_stop(100.0)); // looser, ignored
        assert_eq!(trade.current_stop, 100.2);

        let mut short = ActiveTrade::new(
            "S-1".into(),
            Direction::Short,
            ts(0),
            100.0,
            100.5,
            vec![],
        )
        .unwrap();
        assert!(short.tighten_stop(100.2));
        assert!(!short.tighten_stop(100.4));
        assert_eq!(short.current_stop, 100.2);
    }

    #[test]
    fn promotion_advances_phase_once() {
        let mut trade = long_trade();
        assert!(trade.promote_to_breakeven(100.60));
        assert_eq!(trade.phase, TradePhase::BreakevenPromoted);
        trade.activate_trailing();
        assert_eq!(trade.phase, TradePhase::Trailing);
    }

    #[test]
    fn fill_then_close_weights_realized_r() {
        let mut trade = long_trade();
        trade.record_fill(ts(5), 0).unwrap();
        assert!((trade.remaining_size - 0.5).abs() < 1e-12);
        assert_eq!(trade.fills.len(), 1);
        let fill_r = trade.fills[0].r_multiple;
        assert!((fill_r - (101.0 - 100.60) / 0.65).abs() < 1e-12);

        // Stop out the rest at entry (breakeven): weighted R is half the fill R.
        trade.close(ts(8), 100.60, ExitReason::Stop).unwrap();
        let expected = 0.5 * fill_r;
        assert!((trade.realized_r.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn double_fill_rejected() {
        let mut trade = long_trade();
        trade.record_fill(ts(5), 0).unwrap();
        let err = trade.record_fill(ts(6), 0).unwrap_err();
        assert!(matches!(err, TradeError::TargetAlreadyFilled { index: 0 }));
    }

    #[test]
    fn close_is_terminal() {
        let mut trade = long_trade();
        trade.close(ts(5), 99.95, ExitReason::Stop).unwrap();
        assert!(trade.is_closed());
        assert!(trade.is_full_stop());
        assert!((trade.realized_r.unwrap() + 1.0).abs() < 1e-12);
        assert!(matches!(
            trade.close(ts(6), 99.0, ExitReason::Stop),
            Err(TradeError::AlreadyClosed)
        ));
    }

    #[test]
    fn r_extremes_track_both_sides() {
        let mut trade = long_trade();
        trade.update_r_extremes(101.25); // +1R
        trade.update_r_extremes(100.27); // ~-0.5R
        assert!((trade.peak_favorable_r - 1.0).abs() < 1e-9);
        assert!((trade.worst_adverse_r + 0.5077).abs() < 1e-3);
    }

    #[test]
    fn record_preserves_provenance() {
        let mut trade = long_trade();
        trade.playbook = Some("vwap_magnet".into());
        trade.arbitration_score = Some(0.72);
        trade.close(ts(9), 101.0, ExitReason::Salvage).unwrap();
        let record = trade.to_record(2);
        assert_eq!(record.size, 2);
        assert_eq!(record.playbook.as_deref(), Some("vwap_magnet"));
        assert_eq!(record.exit_reason, ExitReason::Salvage);
    }
}
