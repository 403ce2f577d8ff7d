//! ADX — Average Directional Index (Wilder), as a streaming cell.
//!
//! Steps per bar:
//! 1. +DM / -DM from consecutive highs and lows
//! 2. Wilder-smooth +DM, -DM, and TR (alpha = 1/period)
//! 3. +DI / -DI = 100 * smoothed DM / smoothed TR
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = Wilder-smoothed DX
//!
//! Warm-up: DI values after `period` bars, ADX after roughly `2 * period`.

use crate::domain::Bar;

/// Snapshot of the ADX cell after an update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdxState {
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    /// ADX is available and below the configured threshold.
    pub trend_weak: bool,
}

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    threshold: f64,
    prev: Option<(f64, f64, f64)>, // (high, low, close)
    smooth_tr: Wilder,
    smooth_plus: Wilder,
    smooth_minus: Wilder,
    smooth_dx: Wilder,
    state: AdxState,
}

/// Single Wilder-smoothed series: mean-seeded, then
/// `s = (s * (n - 1) + x) / n`.
#[derive(Debug, Clone)]
struct Wilder {
    period: usize,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Wilder {
    fn new(period: usize) -> Self {
        Self {
            period,
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> Option<f64> {
        self.seen += 1;
        match self.value {
            Some(prev) => {
                self.value = Some((prev * (self.period as f64 - 1.0) + x) / self.period as f64);
            }
            None => {
                self.seed_sum += x;
                if self.seen >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }
}

impl Adx {
    pub fn new(period: usize, threshold: f64) -> Self {
        assert!(period >= 1, "ADX period must be >= 1");
        Self {
            period,
            threshold,
            prev: None,
            smooth_tr: Wilder::new(period),
            smooth_plus: Wilder::new(period),
            smooth_minus: Wilder::new(period),
            smooth_dx: Wilder::new(period),
            state: AdxState::default(),
        }
    }

    pub fn state(&self) -> AdxState {
        self.state
    }

    pub fn update(&mut self, bar: &Bar) -> AdxState {
        if let Some((prev_high, prev_low, prev_close)) = self.prev {
            let high_diff = bar.high - prev_high;
            let low_diff = prev_low - bar.low;

            let plus_dm = if high_diff > low_diff && high_diff > 0.0 {
                high_diff
            } else {
                0.0
            };
            let minus_dm = if low_diff > high_diff && low_diff > 0.0 {
                low_diff
            } else {
                0.0
            };
            let tr = {
                let hl = bar.high - bar.low;
                let hc = (bar.high - prev_close).abs();
                let lc = (bar.low - prev_close).abs();
                hl.max(hc).max(lc)
            };

            let smooth_tr = self.smooth_tr.update(tr);
            let smooth_plus = self.smooth_plus.update(plus_dm);
            let smooth_minus = self.smooth_minus.update(minus_dm);

            if let (Some(tr), Some(plus), Some(minus)) = (smooth_tr, smooth_plus, smooth_minus) {
                if tr > 0.0 {
                    let plus_di = 100.0 * plus / tr;
                    let minus_di = 100.0 * minus / tr;
                    self.state.plus_di = Some(plus_di);
                    self.state.minus_di = Some(minus_di);

                    let di_sum = plus_di + minus_di;
                    let dx = if di_sum == 0.0 {
                        0.0
                    } else {
                        100.0 * (plus_di - minus_di).abs() / di_sum
                    };
                    self.state.adx = self.smooth_dx.update(dx);
                }
            }
        }
        self.prev = Some((bar.high, bar.low, bar.close));
        self.state.trend_weak = self.state.adx.is_some_and(|v| v < self.threshold);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_bar(i: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
                + chrono::Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000,
        }
    }

    fn trend_bars(n: usize, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * step;
                make_bar(i as u32, base - 1.0, base + 3.0, base - 3.0, base + 2.0)
            })
            .collect()
    }

    #[test]
    fn adx_bounds() {
        let mut adx = Adx::new(3, 18.0);
        for bar in trend_bars(30, 1.5) {
            let state = adx.update(&bar);
            if let Some(v) = state.adx {
                assert!((0.0..=100.0).contains(&v), "ADX out of bounds: {v}");
            }
        }
    }

    #[test]
    fn strong_trend_elevates_adx() {
        let mut adx = Adx::new(5, 18.0);
        let mut last = AdxState::default();
        for bar in trend_bars(40, 5.0) {
            last = adx.update(&bar);
        }
        let value = last.adx.expect("ADX should be available after warm-up");
        assert!(value > 20.0, "strong trend should elevate ADX, got {value}");
        assert!(!last.trend_weak);
        assert!(last.plus_di.unwrap() > last.minus_di.unwrap());
    }

    #[test]
    fn flat_tape_is_weak_trend() {
        let mut adx = Adx::new(5, 18.0);
        let mut last = AdxState::default();
        for i in 0..40 {
            // Alternating chop around 100
            let up = i % 2 == 0;
            let bar = if up {
                make_bar(i, 100.0, 101.0, 99.5, 100.5)
            } else {
                make_bar(i, 100.5, 100.8, 99.2, 99.8)
            };
            last = adx.update(&bar);
        }
        let value = last.adx.expect("ADX available");
        assert!(value < 18.0, "chop should read as weak trend, got {value}");
        assert!(last.trend_weak);
    }

    #[test]
    fn no_adx_before_warmup() {
        let mut adx = Adx::new(14, 18.0);
        for bar in trend_bars(5, 1.0) {
            let state = adx.update(&bar);
            assert!(state.adx.is_none());
            assert!(!state.trend_weak);
        }
    }
}
