//! Trade lifecycle managers.
//!
//! Both managers walk the same per-bar protocol over an open trade:
//! R extremes → pessimistic co-occurrence → stop → partial fills → stop
//! promotion. The two-phase variant adds a trailing phase driven by the
//! peak favorable excursion. Stop adjustments from earlier steps take
//! effect on the next bar; within a bar the stop that entered it is the
//! stop that can be hit.

pub mod manager;
pub mod two_phase;

pub use manager::TradeManager;
pub use two_phase::TwoPhaseTradeManager;

use crate::domain::{ActiveTrade, Bar, Direction};
use serde::{Deserialize, Serialize};

/// Observable events from one manager update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeEvent {
    PartialFill,
    BreakevenMove,
    TrailingAdjust,
    StopHit,
    TargetHit,
}

/// Result of a per-bar trade update.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeUpdate {
    pub events: Vec<TradeEvent>,
    pub closed: bool,
}

impl TradeUpdate {
    pub fn open(events: Vec<TradeEvent>) -> Self {
        Self {
            events,
            closed: false,
        }
    }

    pub fn closed(events: Vec<TradeEvent>) -> Self {
        Self {
            events,
            closed: true,
        }
    }
}

/// Touch counts as a hit: a stop exactly equal to the bar extreme triggers.
pub(crate) fn stop_hit(trade: &ActiveTrade, bar: &Bar) -> bool {
    match trade.direction {
        Direction::Long => bar.low <= trade.current_stop,
        Direction::Short => bar.high >= trade.current_stop,
    }
}

pub(crate) fn target_touched(direction: Direction, price: f64, bar: &Bar) -> bool {
    match direction {
        Direction::Long => bar.high >= price,
        Direction::Short => bar.low <= price,
    }
}

/// Any unfilled target reachable inside this bar.
pub(crate) fn any_unfilled_target_hit(trade: &ActiveTrade, bar: &Bar) -> bool {
    trade
        .targets
        .iter()
        .any(|t| !t.filled && target_touched(trade.direction, t.price, bar))
}

/// Most favorable traded price of the bar for this direction.
pub(crate) fn favorable_extreme(direction: Direction, bar: &Bar) -> f64 {
    match direction {
        Direction::Long => bar.high,
        Direction::Short => bar.low,
    }
}
