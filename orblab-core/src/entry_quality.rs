//! Entry quality scoring: a 0-100 composite grade over a setup.
//!
//! Marginal setups are the silent killer of an otherwise sound signal
//! stream; this scorer makes the quality judgment explicit before entry:
//! - Pattern (0-40): setup range, tape-speed decline, volume participation.
//! - Order flow (0-30): signed body-volume imbalance aligned with the
//!   trade direction.
//! - Market context (0-20): trend alignment, regime steadiness, classifier
//!   clarity.
//! - Time of day (0-10): prime-window bonus.
//!
//! Scores map onto letter grades (A ≥ 80, B ≥ 65, C ≥ 50, D ≥ 35, else F);
//! entries below the configured grade, or below the active time window's
//! bar, are rejected.

use crate::config::EntryQualityConfig;
use crate::domain::{Bar, Direction};
use crate::regime::{Regime, RegimeLabel};
use crate::time_filters::TimeWindow;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(total: u8) -> Self {
        match total {
            80.. => Grade::A,
            65..=79 => Grade::B,
            50..=64 => Grade::C,
            35..=49 => Grade::D,
            _ => Grade::F,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

/// Quality score with its component breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub total: u8,
    pub pattern: u8,
    pub flow: u8,
    pub context: u8,
    pub time: u8,
    pub grade: Grade,
}

/// Everything the scorer reads about a setup, derived once per candidate
/// from the session state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetupContext {
    pub direction: Direction,
    /// Structural size of the setup in price points (entry to stop).
    pub setup_range: f64,
    /// Tape-speed decline fraction in [0, 1].
    pub tape_decline: f64,
    /// Recent volume relative to the session baseline.
    pub volume_ratio: f64,
    /// Signed body-volume imbalance in [-1, 1]; positive means buying.
    pub flow_imbalance: f64,
    /// Trend score in [-1, 1]; positive means up.
    pub trend: f64,
    pub regime: RegimeLabel,
    pub time_window: TimeWindow,
}

impl SetupContext {
    /// Derive the measurable components from session bars.
    pub fn derive(
        bars: &[Bar],
        direction: Direction,
        entry_price: f64,
        stop_price: f64,
        regime: RegimeLabel,
        time_window: TimeWindow,
    ) -> Self {
        Self {
            direction,
            setup_range: (entry_price - stop_price).abs(),
            tape_decline: tape_decline(bars, 20),
            volume_ratio: volume_ratio(bars, 5),
            flow_imbalance: flow_imbalance(bars, 5),
            trend: trend_score(bars, 20),
            regime,
            time_window,
        }
    }
}

/// Later-half per-bar volume rate against the earlier half over the last
/// `lookback` bars, clamped to [0, 1]. Zero when the tape is flat or short.
fn tape_decline(bars: &[Bar], lookback: usize) -> f64 {
    let take = lookback.min(bars.len());
    if take < 4 {
        return 0.0;
    }
    let window = &bars[bars.len() - take..];
    let mid = window.len() / 2;
    let early: u64 = window[..mid].iter().map(|b| b.volume).sum();
    let late: u64 = window[mid..].iter().map(|b| b.volume).sum();
    if early == 0 {
        return 0.0;
    }
    let early_rate = early as f64 / mid as f64;
    let late_rate = late as f64 / (window.len() - mid) as f64;
    (1.0 - late_rate / early_rate).clamp(0.0, 1.0)
}

/// Mean volume of the last `recent` bars over the session's per-bar mean.
fn volume_ratio(bars: &[Bar], recent: usize) -> f64 {
    if bars.is_empty() {
        return 1.0;
    }
    let session_mean = bars.iter().map(|b| b.volume).sum::<u64>() as f64 / bars.len() as f64;
    if session_mean <= 0.0 {
        return 1.0;
    }
    let take = recent.min(bars.len());
    let recent_mean = bars[bars.len() - take..]
        .iter()
        .map(|b| b.volume)
        .sum::<u64>() as f64
        / take as f64;
    recent_mean / session_mean
}

/// Signed body-volume imbalance over the last `lookback` bars, in [-1, 1].
fn flow_imbalance(bars: &[Bar], lookback: usize) -> f64 {
    let take = lookback.min(bars.len());
    if take == 0 {
        return 0.0;
    }
    let window = &bars[bars.len() - take..];
    let total: u64 = window.iter().map(|b| b.volume).sum();
    if total == 0 {
        return 0.0;
    }
    let signed: f64 = window
        .iter()
        .map(|b| {
            let sign = if b.is_bullish() {
                1.0
            } else if b.is_bearish() {
                -1.0
            } else {
                0.0
            };
            sign * b.volume as f64
        })
        .sum();
    signed / total as f64
}

/// Net close movement over the traded span of the last `lookback` bars,
/// clamped to [-1, 1]. A directional-efficiency trend proxy.
fn trend_score(bars: &[Bar], lookback: usize) -> f64 {
    let take = lookback.min(bars.len());
    if take < 2 {
        return 0.0;
    }
    let window = &bars[bars.len() - take..];
    let net = window[window.len() - 1].close - window[0].close;
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let span = high - low;
    if span <= 0.0 {
        return 0.0;
    }
    (net / span).clamp(-1.0, 1.0)
}

/// The 0-100 composite scorer.
#[derive(Debug, Clone)]
pub struct EntryQualityScorer {
    config: EntryQualityConfig,
}

impl EntryQualityScorer {
    pub fn new(config: EntryQualityConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn score(&self, ctx: &SetupContext) -> QualityScore {
        let pattern = score_pattern(ctx);
        let flow = if self.config.flow_scoring {
            score_flow(ctx)
        } else {
            0
        };
        let context = if self.config.context_scoring {
            score_context(ctx)
        } else {
            0
        };
        let time = if self.config.time_scoring {
            score_time(ctx.time_window)
        } else {
            0
        };

        let total = (pattern + flow + context + time).min(100);
        let score = QualityScore {
            total,
            pattern,
            flow,
            context,
            time,
            grade: Grade::from_score(total),
        };
        debug!(
            total,
            grade = score.grade.label(),
            pattern,
            flow,
            context,
            time,
            "entry quality scored"
        );
        score
    }

    /// Gate: the setup must clear both the scorer's own floor and the time
    /// window's bar.
    pub fn meets(&self, score: &QualityScore, window_threshold: u8) -> bool {
        score.total >= self.config.min_trade_quality.max(window_threshold)
    }
}

/// Pattern quality (0-40): range size, tape decline, participation.
fn score_pattern(ctx: &SetupContext) -> u8 {
    let range_points = match ctx.setup_range {
        r if r >= 5.0 => 15,
        r if r >= 4.0 => 12,
        r if r >= 3.5 => 10,
        r if r >= 3.0 => 7,
        r if r >= 2.5 => 5,
        _ => 0,
    };
    let tape_points = match ctx.tape_decline {
        t if t >= 0.5 => 15,
        t if t >= 0.4 => 12,
        t if t >= 0.3 => 10,
        t if t >= 0.25 => 7,
        t if t >= 0.2 => 5,
        _ => 0,
    };
    let volume_points = match ctx.volume_ratio {
        v if v >= 2.0 => 10,
        v if v >= 1.5 => 7,
        v if v >= 1.2 => 5,
        _ => 0,
    };
    range_points + tape_points + volume_points
}

/// Order-flow confirmation (0-30): imbalance aligned with the direction.
fn score_flow(ctx: &SetupContext) -> u8 {
    let aligned = ctx.direction.sign() * ctx.flow_imbalance;
    match aligned {
        a if a > 0.6 => 30,
        a if a > 0.4 => 20,
        a if a > 0.2 => 10,
        a if a > 0.0 => 5,
        _ => 0,
    }
}

/// Market context (0-20): trend alignment, regime steadiness, clarity.
fn score_context(ctx: &SetupContext) -> u8 {
    let aligned_trend = ctx.direction.sign() * ctx.trend;
    let trend_points = if aligned_trend > 0.0 {
        if aligned_trend > 0.7 {
            10
        } else if aligned_trend > 0.4 {
            7
        } else {
            5
        }
    } else {
        0
    };
    let regime_points = match ctx.regime.regime {
        Regime::Range | Regime::Trend => 5,
        Regime::Volatile => 3,
        Regime::Transitional => 0,
    };
    let clarity_points = if ctx.regime.clarity > 0.8 {
        5
    } else if ctx.regime.clarity > 0.6 {
        3
    } else {
        0
    };
    trend_points + regime_points + clarity_points
}

/// Time of day (0-10): prime bonus, half credit for the good window.
fn score_time(window: TimeWindow) -> u8 {
    match window {
        TimeWindow::Prime => 10,
        TimeWindow::Good => 5,
        TimeWindow::Avoid | TimeWindow::OffHours => 0,
    }
}
