//! Momentum Continuation — impulse, Fibonacci pullback, continuation entry.
//!
//! Detects a high-efficiency impulse (net close move ≥ 65% of the bar span),
//! scores it with the Impulse Quality Function
//! `(range/ATR)^0.7 · (volume/avg)^0.5 · e^(−λ·length)`, then waits for a
//! pullback into the 38.2–61.8% retracement window. Entry requires the
//! pullback to be turning back with directional commitment and without
//! contradicting volume pressure.

use super::{
    directional_velocity, CandidateSignal, Playbook, PlaybookKind, ProfitTarget, SessionView,
};
use crate::config::MomentumConfig;
use crate::domain::{ActiveTrade, Bar, Direction};
use crate::regime::Regime;
use tracing::debug;

const IMPULSE_LOOKBACK: usize = 50;
const IQF_DECAY: f64 = 0.05;

pub struct MomentumContinuation {
    config: MomentumConfig,
}

struct Impulse {
    direction: Direction,
    /// Index range inside the lookback window, end exclusive.
    start: usize,
    end: usize,
    high: f64,
    low: f64,
    range: f64,
    efficiency: f64,
}

struct Pullback {
    retrace_pct: f64,
    extreme: f64,
}

impl MomentumContinuation {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    /// Longest, most recent qualifying impulse wins; the scan order (length
    /// descending, then start descending) is fixed so detection is
    /// deterministic.
    fn detect_impulse(&self, window: &[Bar]) -> Option<Impulse> {
        if window.len() < 20 {
            return None;
        }
        let min_len = self.config.min_impulse_bars;
        let max_len = self.config.max_impulse_bars;

        for impulse_len in (min_len..=max_len).rev() {
            if impulse_len + 5 > window.len() {
                continue;
            }
            for start in (0..window.len() - impulse_len - 4).rev() {
                let segment = &window[start..start + impulse_len];
                let net = segment[segment.len() - 1].close - segment[0].close;
                let high = segment.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
                let low = segment.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
                let span = high - low;
                if span <= 0.0 {
                    continue;
                }
                let efficiency = net / span;
                if efficiency.abs() > 0.65 {
                    return Some(Impulse {
                        direction: if efficiency > 0.0 {
                            Direction::Long
                        } else {
                            Direction::Short
                        },
                        start,
                        end: start + impulse_len,
                        high,
                        low,
                        range: span,
                        efficiency: efficiency.abs(),
                    });
                }
            }
        }
        None
    }

    fn impulse_quality(&self, window: &[Bar], impulse: &Impulse, atr: Option<f64>) -> Option<f64> {
        let atr = atr.or_else(|| {
            let sum: f64 = window.iter().map(|b| b.range()).sum();
            if window.is_empty() {
                None
            } else {
                Some(sum / window.len() as f64)
            }
        })?;
        if atr <= 0.0 {
            return None;
        }

        let segment = &window[impulse.start..impulse.end];
        let avg_volume =
            window.iter().map(|b| b.volume).sum::<u64>() as f64 / window.len() as f64;
        let impulse_volume =
            segment.iter().map(|b| b.volume).sum::<u64>() as f64 / segment.len() as f64;

        let range_component = (impulse.range / atr).powf(0.7);
        let volume_component = if avg_volume > 0.0 {
            (impulse_volume / avg_volume).powf(0.5)
        } else {
            1.0
        };
        let time_component = (-IQF_DECAY * segment.len() as f64).exp();

        Some(range_component * volume_component * time_component)
    }

    fn detect_pullback(&self, window: &[Bar], impulse: &Impulse) -> Option<Pullback> {
        let after = &window[impulse.end..];
        if after.len() < 3 {
            return None;
        }
        match impulse.direction {
            Direction::Long => {
                let extreme = after.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
                let retrace_pct = (impulse.high - extreme) / impulse.range;
                (retrace_pct >= self.config.pullback_min
                    && retrace_pct <= self.config.pullback_max)
                    .then_some(Pullback {
                        retrace_pct,
                        extreme,
                    })
            }
            Direction::Short => {
                let extreme = after.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
                let retrace_pct = (extreme - impulse.low) / impulse.range;
                (retrace_pct >= self.config.pullback_min
                    && retrace_pct <= self.config.pullback_max)
                    .then_some(Pullback {
                        retrace_pct,
                        extreme,
                    })
            }
        }
    }

    /// Fraction of the last five bars whose body agrees with the trend.
    fn directional_commitment(&self, bars: &[Bar], direction: Direction) -> f64 {
        let take = 5.min(bars.len());
        if take == 0 {
            return 0.0;
        }
        let window = &bars[bars.len() - take..];
        let agreeing = window
            .iter()
            .filter(|b| match direction {
                Direction::Long => b.is_bullish(),
                Direction::Short => b.is_bearish(),
            })
            .count();
        agreeing as f64 / take as f64
    }

    /// Signed body-volume pressure in [-1, 1] over the last five bars.
    /// Positive agrees with `direction`.
    fn microstructure_pressure(&self, bars: &[Bar], direction: Direction) -> f64 {
        let take = 5.min(bars.len());
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
        direction.sign() * signed / total as f64
    }
}

impl Playbook for MomentumContinuation {
    fn name(&self) -> &'static str {
        "momentum_continuation"
    }

    fn kind(&self) -> PlaybookKind {
        PlaybookKind::Momentum
    }

    fn preferred_regimes(&self) -> &'static [Regime] {
        &[Regime::Trend]
    }

    fn check_entry(&self, view: &SessionView<'_>) -> Option<CandidateSignal> {
        let bars = view.bars;
        if bars.len() < 20 {
            return None;
        }
        let window = &bars[bars.len().saturating_sub(IMPULSE_LOOKBACK)..];

        let impulse = self.detect_impulse(window)?;
        let iqf = self.impulse_quality(window, &impulse, view.atr)?;
        if iqf < self.config.min_iqf {
            debug!(iqf, min = self.config.min_iqf, "impulse quality too low");
            return None;
        }
        let pullback = self.detect_pullback(window, &impulse)?;

        let bar = view.current_bar()?;
        // Pullback must be turning back with the trend.
        let turning = match impulse.direction {
            Direction::Long => bar.is_bullish(),
            Direction::Short => bar.is_bearish(),
        };
        if !turning {
            return None;
        }
        let commitment = self.directional_commitment(bars, impulse.direction);
        if commitment < self.config.min_directional_commitment {
            return None;
        }
        if self.microstructure_pressure(bars, impulse.direction) < -0.3 {
            return None;
        }
        let alignment = self.regime_alignment(view.regime.regime);
        if alignment < 0.5 {
            return None;
        }

        let entry = bar.close;
        let stop = pullback.extreme
            - impulse.direction.sign() * self.config.stop_buffer_r * impulse.range;
        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return None;
        }

        let at_r = |r: f64| entry + impulse.direction.sign() * r * risk;
        let targets = vec![
            ProfitTarget {
                price: at_r(1.5),
                size_fraction: 0.3,
                label: "t1",
                r_multiple: 1.5,
            },
            ProfitTarget {
                price: at_r(2.5),
                size_fraction: 0.3,
                label: "t2",
                r_multiple: 2.5,
            },
            ProfitTarget {
                price: at_r(4.0),
                size_fraction: 0.4,
                label: "runner",
                r_multiple: 4.0,
            },
        ];

        let iqf_score = (iqf / (2.0 * self.config.min_iqf)).min(1.0);
        let strength =
            (0.5 * iqf_score + 0.3 * commitment + 0.2 * impulse.efficiency.min(1.0)).clamp(0.0, 1.0);

        let candidate = CandidateSignal {
            playbook: self.name(),
            kind: self.kind(),
            direction: impulse.direction,
            ts: bar.ts,
            entry_price: entry,
            initial_stop: stop,
            targets,
            strength,
            regime_alignment: alignment,
            confidence: strength * alignment,
        };
        // Retrace depth is already validated; keep the structural guard last.
        debug!(retrace = pullback.retrace_pct, iqf, "momentum continuation setup");
        candidate.is_well_formed().then_some(candidate)
    }

    /// Momentum gets more room: breakeven from 0.75 R, structural trail from
    /// 1.5 R over an eight-bar swing.
    fn update_stop(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> Option<f64> {
        let mfe = trade.peak_favorable_r;
        if mfe < 0.75 {
            return None;
        }
        if mfe < 1.5 {
            return Some(trade.entry_price + trade.direction.sign() * trade.initial_risk * 0.1);
        }
        let take = 8.min(view.bars.len());
        if take == 0 {
            return None;
        }
        let window = &view.bars[view.bars.len() - take..];
        let buffer = trade.initial_risk * 0.25;
        Some(match trade.direction {
            Direction::Long => {
                window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min) - buffer
            }
            Direction::Short => {
                window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) + buffer
            }
        })
    }

    /// Momentum salvage: trend reversal, a long stall, or a deep giveback.
    fn check_salvage(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> bool {
        let bar = match view.current_bar() {
            Some(bar) => bar,
            None => return false,
        };
        let current_r = trade.current_r(bar.close);
        let mfe = trade.peak_favorable_r;

        if mfe > 0.5 {
            let velocity = directional_velocity(view.bars, trade.direction, 5);
            if velocity < -0.2 {
                return true;
            }
        }
        if trade.bars_held > 60 && current_r.abs() < 0.5 {
            return true;
        }
        if mfe > 1.0 {
            let retrace = (mfe - current_r) / mfe;
            if retrace > 0.75 {
                return true;
            }
        }
        false
    }
}
