//! ATR — Average True Range with Wilder smoothing, as a streaming cell.

use crate::domain::Bar;

/// True range of a bar given the previous close.
///
/// With no previous close (first bar), the plain high-low range is used.
pub fn true_range(prev_close: Option<f64>, bar: &Bar) -> f64 {
    match prev_close {
        Some(pc) => {
            let hl = bar.high - bar.low;
            let hc = (bar.high - pc).abs();
            let lc = (bar.low - pc).abs();
            hl.max(hc).max(lc)
        }
        None => bar.high - bar.low,
    }
}

/// Streaming Wilder ATR.
///
/// Seeds with the arithmetic mean of the first `period` true ranges, then
/// applies `atr = (atr * (period - 1) + tr) / period`.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            prev_close: None,
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Current ATR, None until `period` bars have been seen.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = true_range(self.prev_close, bar);
        self.prev_close = Some(bar.close);
        self.seen += 1;

        match self.value {
            Some(prev) => {
                let next = (prev * (self.period as f64 - 1.0) + tr) / self.period as f64;
                self.value = Some(next);
            }
            None => {
                self.seed_sum += tr;
                if self.seen >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_bar(i: u32, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
                + chrono::Duration::minutes(i as i64),
            open: (high + low) / 2.0,
            high,
            low,
            close,
            volume: 1000,
        }
    }

    #[test]
    fn true_range_uses_prev_close_gap() {
        let bar = make_bar(1, 102.0, 101.0, 101.5);
        // Gap up from 99: TR = high - prev_close = 3.0
        assert_eq!(true_range(Some(99.0), &bar), 3.0);
        // No previous close: plain range
        assert_eq!(true_range(None, &bar), 1.0);
    }

    #[test]
    fn atr_warms_up_after_period() {
        let mut atr = Atr::new(3);
        assert_eq!(atr.update(&make_bar(0, 101.0, 100.0, 100.5)), None);
        assert_eq!(atr.update(&make_bar(1, 101.5, 100.5, 101.0)), None);
        let first = atr.update(&make_bar(2, 102.0, 101.0, 101.5));
        assert!(first.is_some());
    }

    #[test]
    fn atr_constant_ranges_converge() {
        let mut atr = Atr::new(5);
        for i in 0..50 {
            let base = 100.0 + i as f64 * 0.1;
            atr.update(&make_bar(i, base + 0.5, base - 0.5, base));
        }
        // Ranges are ~1.0 plus the 0.1 drift; ATR should settle near 1.1
        let value = atr.value().unwrap();
        assert!((value - 1.1).abs() < 0.05, "ATR {value}");
    }
}
