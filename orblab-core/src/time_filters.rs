//! Time-of-day filter: window-dependent sizing and quality thresholds.
//!
//! Intraday edge is strongly time-dependent: the open is where this system
//! earns, the afternoon is mediocre, and the in-between hours bleed. Each
//! exchange-local hour maps to a window with a position-size multiplier and
//! a minimum entry-quality grade:
//! - Prime: full size, the base quality bar.
//! - Good: reduced size, a stiffer bar.
//! - Avoid: minimal size and a near-top bar, or no trading at all when the
//!   avoid window is disabled.
//! - OffHours: never trades.

use crate::config::TimeFilterConfig;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Time window classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Prime,
    Good,
    Avoid,
    OffHours,
}

impl TimeWindow {
    pub fn label(self) -> &'static str {
        match self {
            TimeWindow::Prime => "prime",
            TimeWindow::Good => "good",
            TimeWindow::Avoid => "avoid",
            TimeWindow::OffHours => "off_hours",
        }
    }
}

/// Window verdict for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeFilterParams {
    pub window: TimeWindow,
    /// Position-size multiplier in [0, 1].
    pub position_multiplier: f64,
    /// Minimum entry-quality score for this window (0-100).
    pub quality_threshold: u8,
    pub skip_trading: bool,
}

/// Hour-of-day window classifier.
#[derive(Debug, Clone)]
pub struct TimeOfDayFilter {
    config: TimeFilterConfig,
}

impl TimeOfDayFilter {
    pub fn new(config: TimeFilterConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Classify an exchange-local clock time.
    pub fn params_for(&self, local_time: NaiveTime) -> TimeFilterParams {
        let hour = local_time.hour();
        let config = &self.config;

        if hour < config.market_open_hour || hour >= config.market_close_hour {
            return TimeFilterParams {
                window: TimeWindow::OffHours,
                position_multiplier: 0.0,
                quality_threshold: 100,
                skip_trading: true,
            };
        }
        if (config.prime_start_hour..config.prime_end_hour).contains(&hour) {
            return TimeFilterParams {
                window: TimeWindow::Prime,
                position_multiplier: config.prime_position_multiplier,
                quality_threshold: config.prime_quality_threshold,
                skip_trading: false,
            };
        }
        if (config.good_start_hour..config.good_end_hour).contains(&hour) {
            return TimeFilterParams {
                window: TimeWindow::Good,
                position_multiplier: config.good_position_multiplier,
                quality_threshold: config.good_quality_threshold,
                skip_trading: false,
            };
        }
        if config.enable_avoid_window {
            TimeFilterParams {
                window: TimeWindow::Avoid,
                position_multiplier: config.avoid_position_multiplier,
                quality_threshold: config.avoid_quality_threshold,
                skip_trading: false,
            }
        } else {
            debug!(hour, "avoid window disabled, no trading this hour");
            TimeFilterParams {
                window: TimeWindow::Avoid,
                position_multiplier: 0.0,
                quality_threshold: 100,
                skip_trading: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 15, 0).unwrap()
    }

    fn filter() -> TimeOfDayFilter {
        TimeOfDayFilter::new(TimeFilterConfig {
            enabled: true,
            ..TimeFilterConfig::default()
        })
    }

    #[test]
    fn prime_window_trades_full_size() {
        let params = filter().params_for(at(10));
        assert_eq!(params.window, TimeWindow::Prime);
        assert_eq!(params.position_multiplier, 1.0);
        assert_eq!(params.quality_threshold, 50);
        assert!(!params.skip_trading);
    }

    #[test]
    fn good_window_cuts_size_and_raises_bar() {
        let params = filter().params_for(at(14));
        assert_eq!(params.window, TimeWindow::Good);
        assert!((params.position_multiplier - 0.7).abs() < 1e-12);
        assert_eq!(params.quality_threshold, 65);
    }

    #[test]
    fn avoid_window_demands_top_grade() {
        let params = filter().params_for(at(12));
        assert_eq!(params.window, TimeWindow::Avoid);
        assert!((params.position_multiplier - 0.3).abs() < 1e-12);
        assert_eq!(params.quality_threshold, 80);
        assert!(!params.skip_trading);
    }

    #[test]
    fn off_hours_never_trades() {
        for hour in [3, 8, 16, 21] {
            let params = filter().params_for(at(hour));
            assert_eq!(params.window, TimeWindow::OffHours);
            assert!(params.skip_trading);
        }
    }

    #[test]
    fn disabled_avoid_window_skips_midday() {
        let mut config = TimeFilterConfig {
            enabled: true,
            ..TimeFilterConfig::default()
        };
        config.enable_avoid_window = false;
        let filter = TimeOfDayFilter::new(config);
        let params = filter.params_for(at(12));
        assert_eq!(params.window, TimeWindow::Avoid);
        assert!(params.skip_trading);
        assert_eq!(params.position_multiplier, 0.0);
    }

    #[test]
    fn window_edges_are_half_open() {
        let filter = filter();
        assert_eq!(filter.params_for(at(9)).window, TimeWindow::Prime);
        assert_eq!(filter.params_for(at(11)).window, TimeWindow::Avoid);
        assert_eq!(filter.params_for(at(15)).window, TimeWindow::Good);
        assert_eq!(filter.params_for(at(16)).window, TimeWindow::OffHours);
    }
}
