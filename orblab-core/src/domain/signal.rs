//! Trade direction and the immutable breakout signal.

use crate::factors::FactorSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a signal or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Lets R arithmetic stay branch-free.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// Signed P&L in R-multiples for a price move from `entry`.
///
/// `initial_risk` must be positive; callers enforce that when a trade is
/// created.
pub fn r_multiple(direction: Direction, entry: f64, initial_risk: f64, price: f64) -> f64 {
    direction.sign() * (price - entry) / initial_risk
}

/// A breakout signal, immutable once emitted.
///
/// Carries the confluence evidence that justified it so the trade log can
/// attribute outcomes back to factor activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: String,
    pub direction: Direction,
    pub ts: DateTime<Utc>,
    pub entry_price: f64,
    pub score: f64,
    pub required: f64,
    pub factors: FactorSet,
    pub or_high: f64,
    pub or_low: f64,
}

impl TradeSignal {
    /// Deterministic signal id from direction and timestamp.
    pub fn make_id(direction: Direction, ts: DateTime<Utc>) -> String {
        format!(
            "{}-{}",
            match direction {
                Direction::Long => "L",
                Direction::Short => "S",
            },
            ts.format("%Y%m%d-%H%M%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
    }

    #[test]
    fn r_multiple_long() {
        // entry 100, risk 0.65: +0.65 move = +1R
        let r = r_multiple(Direction::Long, 100.0, 0.65, 100.65);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn r_multiple_short_inverts() {
        let r = r_multiple(Direction::Short, 100.0, 0.5, 99.0);
        assert!((r - 2.0).abs() < 1e-12);
        let r = r_multiple(Direction::Short, 100.0, 0.5, 101.0);
        assert!((r + 2.0).abs() < 1e-12);
    }

    #[test]
    fn signal_id_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 46, 0).unwrap();
        assert_eq!(TradeSignal::make_id(Direction::Long, ts), "L-20240102-144600");
        assert_eq!(
            TradeSignal::make_id(Direction::Short, ts),
            TradeSignal::make_id(Direction::Short, ts)
        );
    }
}
