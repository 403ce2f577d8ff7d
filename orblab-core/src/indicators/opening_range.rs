//! Opening Range builder.
//!
//! Mutable until finalized: bars inside [start, start + duration) extend the
//! running envelope; the first bar at or beyond the boundary finalizes it.
//! Finalization happens before that bar's signal logic runs. The validity
//! decision (width against ATR) is one-shot and permanent.

use crate::domain::Bar;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct OpeningRange {
    start_ts: DateTime<Utc>,
    duration: Duration,
    high: f64,
    low: f64,
    bars_seen: usize,
    finalized: bool,
    finalized_ts: Option<DateTime<Utc>>,
    valid: bool,
    width: f64,
}

impl OpeningRange {
    pub fn new(start_ts: DateTime<Utc>, duration_minutes: u32) -> Self {
        Self {
            start_ts,
            duration: Duration::minutes(duration_minutes as i64),
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            bars_seen: 0,
            finalized: false,
            finalized_ts: None,
            valid: false,
            width: 0.0,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration.num_minutes()
    }

    /// Extend the envelope if the bar falls inside the window.
    pub fn update(&mut self, bar: &Bar) {
        if self.finalized {
            return;
        }
        if bar.ts >= self.start_ts && bar.ts < self.start_ts + self.duration {
            self.high = self.high.max(bar.high);
            self.low = self.low.min(bar.low);
            self.bars_seen += 1;
        }
    }

    /// Finalize once `ts` reaches the window boundary. Returns true on the
    /// transition bar.
    ///
    /// `validity` is `(min_atr_mult, max_atr_mult)` when the width filter is
    /// enabled. A window that saw no bars (data gap) finalizes invalid with
    /// zero width. When the filter is on but no ATR is available yet, the
    /// width check cannot be evaluated and passes.
    pub fn finalize_if_due(
        &mut self,
        ts: DateTime<Utc>,
        atr: Option<f64>,
        validity: Option<(f64, f64)>,
    ) -> bool {
        if self.finalized || ts < self.start_ts + self.duration {
            return false;
        }
        self.finalized = true;
        self.finalized_ts = Some(ts);

        if self.bars_seen == 0 {
            self.width = 0.0;
            self.valid = false;
            return true;
        }

        self.width = self.high - self.low;
        self.valid = match (validity, atr) {
            (Some((min_mult, max_mult)), Some(atr)) => {
                self.width >= min_mult * atr && self.width <= max_mult * atr
            }
            _ => true,
        };
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn finalized_ts(&self) -> Option<DateTime<Utc>> {
        self.finalized_ts
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Finalized with a usable width: the only state that emits signals.
    pub fn is_ready(&self) -> bool {
        self.finalized && self.valid
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn upper_trigger(&self, buffer: f64) -> f64 {
        self.high + buffer
    }

    pub fn lower_trigger(&self, buffer: f64) -> f64 {
        self.low - buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(min)
    }

    fn make_bar(min: i64, high: f64, low: f64) -> Bar {
        Bar {
            ts: ts(min),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1000,
        }
    }

    #[test]
    fn envelope_extends_inside_window() {
        let mut or = OpeningRange::new(ts(0), 15);
        for i in 0..15 {
            or.update(&make_bar(i, 100.0 + i as f64 * 0.02, 99.8));
        }
        assert!(!or.is_finalized());
        assert!((or.high() - 100.28).abs() < 1e-9);
        assert_eq!(or.low(), 99.8);
    }

    #[test]
    fn finalizes_at_boundary_bar() {
        let mut or = OpeningRange::new(ts(0), 15);
        for i in 0..15 {
            or.update(&make_bar(i, 100.5, 100.0));
        }
        assert!(!or.finalize_if_due(ts(14), None, None));
        assert!(or.finalize_if_due(ts(15), None, None));
        assert!(or.is_finalized());
        assert!(or.is_valid());
        assert!((or.width() - 0.5).abs() < 1e-12);
        // Second call is not a transition
        assert!(!or.finalize_if_due(ts(16), None, None));
    }

    #[test]
    fn bars_after_boundary_do_not_extend() {
        let mut or = OpeningRange::new(ts(0), 15);
        or.update(&make_bar(0, 100.5, 100.0));
        or.finalize_if_due(ts(15), None, None);
        or.update(&make_bar(16, 105.0, 99.0));
        assert_eq!(or.high(), 100.5);
        assert_eq!(or.low(), 100.0);
    }

    #[test]
    fn width_filter_rejects_narrow_and_wide() {
        // ATR 1.0, validity [0.25, 1.75]
        let mut narrow = OpeningRange::new(ts(0), 15);
        narrow.update(&make_bar(0, 100.1, 100.0));
        narrow.finalize_if_due(ts(15), Some(1.0), Some((0.25, 1.75)));
        assert!(!narrow.is_valid());

        let mut wide = OpeningRange::new(ts(0), 15);
        wide.update(&make_bar(0, 102.0, 100.0));
        wide.finalize_if_due(ts(15), Some(1.0), Some((0.25, 1.75)));
        assert!(!wide.is_valid());

        let mut ok = OpeningRange::new(ts(0), 15);
        ok.update(&make_bar(0, 100.5, 100.0));
        ok.finalize_if_due(ts(15), Some(1.0), Some((0.25, 1.75)));
        assert!(ok.is_valid());
    }

    #[test]
    fn gap_session_finalizes_invalid() {
        let mut or = OpeningRange::new(ts(0), 15);
        // No bars inside the window at all
        assert!(or.finalize_if_due(ts(20), Some(1.0), Some((0.25, 1.75))));
        assert!(or.is_finalized());
        assert!(!or.is_valid());
        assert_eq!(or.width(), 0.0);
    }

    #[test]
    fn triggers_offset_by_buffer() {
        let mut or = OpeningRange::new(ts(0), 15);
        or.update(&make_bar(0, 100.5, 100.0));
        or.finalize_if_due(ts(15), None, None);
        assert!((or.upper_trigger(0.05) - 100.55).abs() < 1e-12);
        assert!((or.lower_trigger(0.05) - 99.95).abs() < 1e-12);
        assert!((or.midpoint() - 100.25).abs() < 1e-12);
    }
}
