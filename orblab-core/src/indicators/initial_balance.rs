//! Initial Balance — the session's first-N-bars envelope.
//!
//! Computed on demand from the session bar history (the IB Fade playbook is
//! the only consumer). One bar per minute is assumed, matching the session
//! bar cadence.

use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialBalance {
    pub high: f64,
    pub low: f64,
    pub range: f64,
    pub midpoint: f64,
    /// Mean volume per bar inside the IB window.
    pub volume_per_bar: f64,
    pub bars: usize,
}

impl InitialBalance {
    /// Build from session bars, taking the first `ib_bars` of them.
    ///
    /// Returns None until the window is complete or when it has zero range
    /// (a flat IB cannot anchor extension measurements).
    pub fn from_session(session_bars: &[Bar], ib_bars: usize) -> Option<Self> {
        if session_bars.len() < ib_bars || ib_bars == 0 {
            return None;
        }
        let window = &session_bars[..ib_bars];
        let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let range = high - low;
        if range <= 0.0 {
            return None;
        }
        let volume: u64 = window.iter().map(|b| b.volume).sum();
        Some(Self {
            high,
            low,
            range,
            midpoint: (high + low) / 2.0,
            volume_per_bar: volume as f64 / ib_bars as f64,
            bars: ib_bars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bar(min: i64, high: f64, low: f64, volume: u64) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(min),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume,
        }
    }

    #[test]
    fn needs_full_window() {
        let bars: Vec<Bar> = (0..30).map(|i| make_bar(i, 101.0, 100.0, 1000)).collect();
        assert!(InitialBalance::from_session(&bars, 60).is_none());
        assert!(InitialBalance::from_session(&bars, 30).is_some());
    }

    #[test]
    fn envelope_covers_window_only() {
        let mut bars: Vec<Bar> = (0..60).map(|i| make_bar(i, 101.0, 100.0, 1000)).collect();
        // Spike after the IB window must not widen it
        bars.push(make_bar(60, 110.0, 100.0, 1000));
        let ib = InitialBalance::from_session(&bars, 60).unwrap();
        assert_eq!(ib.high, 101.0);
        assert_eq!(ib.low, 100.0);
        assert!((ib.midpoint - 100.5).abs() < 1e-12);
        assert!((ib.volume_per_bar - 1000.0).abs() < 1e-12);
    }

    #[test]
    fn flat_window_rejected() {
        let bars: Vec<Bar> = (0..10).map(|i| make_bar(i, 100.0, 100.0, 1000)).collect();
        assert!(InitialBalance::from_session(&bars, 10).is_none());
    }
}
