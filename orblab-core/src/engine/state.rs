//! Shared per-run and per-session engine state.
//!
//! The event loop owns every mutable cell here; playbooks and factor
//! evaluation see the state through read-only views built per bar.

use super::result::SessionSummary;
use crate::config::{OpeningRangeConfig, StrategyConfig};
use crate::domain::Bar;
use crate::indicators::OpeningRange;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

/// Exchange-local clock for a bar timestamp.
pub(crate) fn session_clock(
    ts: DateTime<Utc>,
    offset: FixedOffset,
) -> (NaiveDate, NaiveTime) {
    let local = ts.with_timezone(&offset);
    (local.date_naive(), local.time())
}

pub(crate) fn session_offset(config: &StrategyConfig) -> FixedOffset {
    FixedOffset::east_opt(config.session.utc_offset_minutes * 60)
        .expect("utc offset validated with the config")
}

/// Full session length in one-minute bars.
pub(crate) fn session_length_bars(config: &StrategyConfig) -> usize {
    (config.session.end - config.session.start).num_minutes().max(1) as usize
}

/// Pick the OR duration for a new session.
///
/// With the adaptive flag, the ATR at the session open is compared against
/// the mean of prior session-open ATRs: a calm open gets the short window, a
/// hot open the long one. Falls back to the base duration until a baseline
/// exists.
pub(crate) fn or_duration_minutes(
    config: &OpeningRangeConfig,
    atr_at_open: Option<f64>,
    prior_open_atrs: &[f64],
) -> u32 {
    if !config.adaptive {
        return config.base_minutes;
    }
    let (Some(atr), false) = (atr_at_open, prior_open_atrs.is_empty()) else {
        return config.base_minutes;
    };
    let baseline = prior_open_atrs.iter().sum::<f64>() / prior_open_atrs.len() as f64;
    if baseline <= 0.0 {
        return config.base_minutes;
    }
    let ratio = atr / baseline;
    if ratio <= config.low_norm_vol {
        config.short_or_minutes
    } else if ratio >= config.high_norm_vol {
        config.long_or_minutes
    } else {
        config.base_minutes
    }
}

/// Per-session mutable state. Recreated at every session rollover.
pub(crate) struct SessionCtx {
    pub date: NaiveDate,
    pub or: OpeningRange,
    pub bars: Vec<Bar>,
    pub session_open: f64,
    /// Set when the OR finalizes invalid: the session emits no signals.
    pub no_signals: bool,
    /// Last stop-out this session, for the second-chance window.
    pub last_stop_out: Option<DateTime<Utc>>,
    pub summary: SessionSummary,
    /// Governance event count at session start, to attribute lockouts.
    pub governance_events_at_start: usize,
}

impl SessionCtx {
    pub fn new(
        date: NaiveDate,
        first_bar: &Bar,
        or_minutes: u32,
        governance_events_at_start: usize,
    ) -> Self {
        Self {
            date,
            or: OpeningRange::new(first_bar.ts, or_minutes),
            bars: Vec::new(),
            session_open: first_bar.open,
            no_signals: false,
            last_stop_out: None,
            summary: SessionSummary {
                date,
                or_built: false,
                or_valid: false,
                signals_emitted: 0,
                trades_completed: 0,
                session_r: 0.0,
                lockouts: 0,
            },
            governance_events_at_start,
        }
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clock_applies_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let offset = FixedOffset::east_opt(-6 * 3600).unwrap();
        let (date, time) = session_clock(ts, offset);
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }

    #[test]
    fn midnight_rollover_in_local_frame() {
        // 01:00 UTC is still the prior date at UTC-6
        let ts = Utc.with_ymd_and_hms(2024, 1, 3, 1, 0, 0).unwrap();
        let offset = FixedOffset::east_opt(-6 * 3600).unwrap();
        let (date, _) = session_clock(ts, offset);
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn fixed_duration_when_not_adaptive() {
        let config = OpeningRangeConfig::default();
        assert_eq!(or_duration_minutes(&config, Some(2.0), &[1.0]), 15);
    }

    #[test]
    fn adaptive_duration_tracks_relative_vol() {
        let config = OpeningRangeConfig {
            adaptive: true,
            ..OpeningRangeConfig::default()
        };
        let history = [1.0, 1.0, 1.0];
        // Calm open: 0.3x baseline → short window
        assert_eq!(or_duration_minutes(&config, Some(0.3), &history), 10);
        // Hot open: 1.2x baseline → long window
        assert_eq!(or_duration_minutes(&config, Some(1.2), &history), 30);
        // In between → base
        assert_eq!(or_duration_minutes(&config, Some(0.6), &history), 15);
        // No baseline yet → base
        assert_eq!(or_duration_minutes(&config, Some(0.3), &[]), 15);
        assert_eq!(or_duration_minutes(&config, None, &history), 15);
    }
}
