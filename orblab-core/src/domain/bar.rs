//! Bar — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Intraday OHLCV bar for a single symbol.
///
/// Timestamps are UTC; session-local interpretation happens at the engine
/// boundary through the configured session offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Rejected bar input, detected before any engine state is mutated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    #[error("non-finite {field} field")]
    NonFinite { field: &'static str },

    #[error("malformed OHLC: low {low} > high {high}")]
    MalformedOhlc { high: f64, low: f64 },

    #[error("open {open} or close {close} outside [low, high]")]
    BodyOutsideRange { open: f64, close: f64 },

    #[error("non-monotonic timestamp: {curr} does not advance past {prev}")]
    NonMonotonicTimestamp {
        prev: DateTime<Utc>,
        curr: DateTime<Utc>,
    },
}

impl Bar {
    /// Check the per-bar input contract: finite fields and sane OHLC ordering.
    ///
    /// Timestamp monotonicity is the event loop's check, since it owns the
    /// previous timestamp.
    pub fn validate(&self) -> Result<(), InputError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(InputError::NonFinite { field });
            }
        }
        if self.low > self.high {
            return Err(InputError::MalformedOhlc {
                high: self.high,
                low: self.low,
            });
        }
        if self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(InputError::BodyOutsideRange {
                open: self.open,
                close: self.close,
            });
        }
        Ok(())
    }

    /// Typical price used by the session VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Candle body is bullish (close above open).
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
            open: 100.0,
            high: 100.5,
            low: 99.8,
            close: 100.2,
            volume: 1500,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn nan_field_rejected() {
        let mut bar = sample_bar();
        bar.close = f64::NAN;
        assert_eq!(
            bar.validate(),
            Err(InputError::NonFinite { field: "close" })
        );
    }

    #[test]
    fn inverted_high_low_rejected() {
        let mut bar = sample_bar();
        bar.low = 101.0;
        assert!(matches!(
            bar.validate(),
            Err(InputError::MalformedOhlc { .. })
        ));
    }

    #[test]
    fn body_outside_range_rejected() {
        let mut bar = sample_bar();
        bar.open = 101.0; // above high
        assert!(matches!(
            bar.validate(),
            Err(InputError::BodyOutsideRange { .. })
        ));
    }

    #[test]
    fn typical_price_is_hlc_mean() {
        let bar = sample_bar();
        let expected = (100.5 + 99.8 + 100.2) / 3.0;
        assert!((bar.typical_price() - expected).abs() < 1e-12);
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = sample_bar();
        let json = serde_json::to_string(&bar).unwrap();
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }
}
