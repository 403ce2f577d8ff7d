//! Opening Drive Reversal — fading an exhausted drive off the open.
//!
//! Confined to the first minutes of the session. A drive qualifies for the
//! fade when its tape is thinning (later-half volume well below the first
//! half), its signed per-bar volume shows no fat tails (low kurtosis rules
//! out institutional blocks), and no single print is a block-size outlier.
//! Targets walk back to the session open, the prior close, then a runner
//! beyond it.

use super::{CandidateSignal, Playbook, PlaybookKind, ProfitTarget, SessionView};
use crate::config::OpeningDriveConfig;
use crate::domain::{ActiveTrade, Bar, Direction};
use crate::regime::Regime;
use tracing::debug;

pub struct OpeningDriveReversal {
    config: OpeningDriveConfig,
}

struct Drive {
    /// Fade direction (counter to the drive).
    direction: Direction,
    extreme: f64,
    range: f64,
}

impl OpeningDriveReversal {
    pub fn new(config: OpeningDriveConfig) -> Self {
        Self { config }
    }

    fn identify_drive(&self, view: &SessionView<'_>) -> Option<Drive> {
        let bars = view.bars;
        let open = view.session_open;
        let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let last_close = bars.last()?.close;

        let up_range = high - open;
        let down_range = open - low;

        // One-sided, directional push away from the open.
        if up_range >= self.config.min_drive_range
            && up_range > 2.0 * down_range
            && last_close > open
        {
            return Some(Drive {
                direction: Direction::Short,
                extreme: high,
                range: up_range,
            });
        }
        if down_range >= self.config.min_drive_range
            && down_range > 2.0 * up_range
            && last_close < open
        {
            return Some(Drive {
                direction: Direction::Long,
                extreme: low,
                range: down_range,
            });
        }
        None
    }

    /// Tape-speed decline: volume in the later half of the drive against
    /// the earlier half. 0.3 means the tape thinned by 30%.
    fn tape_decline(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < 4 {
            return None;
        }
        let mid = bars.len() / 2;
        let early: u64 = bars[..mid].iter().map(|b| b.volume).sum();
        let late: u64 = bars[mid..].iter().map(|b| b.volume).sum();
        if early == 0 {
            return None;
        }
        // Normalize halves of unequal length to per-bar rates.
        let early_rate = early as f64 / mid as f64;
        let late_rate = late as f64 / (bars.len() - mid) as f64;
        Some(1.0 - late_rate / early_rate)
    }

    /// Kurtosis of per-bar signed volume. Fat tails (high kurtosis) mean a
    /// few conviction prints did the work, which is not a tape to fade.
    fn volume_delta_kurtosis(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < 4 {
            return None;
        }
        let deltas: Vec<f64> = bars
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
            .collect();
        let n = deltas.len() as f64;
        let mean = deltas.iter().sum::<f64>() / n;
        let m2 = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
        if m2 <= 0.0 {
            return None;
        }
        let m4 = deltas.iter().map(|d| (d - mean).powi(4)).sum::<f64>() / n;
        Some(m4 / (m2 * m2))
    }

    /// Any single print beyond `block_trade_sigma` deviations of the mean.
    fn has_block_trades(&self, bars: &[Bar]) -> bool {
        if bars.len() < 3 {
            return false;
        }
        let n = bars.len() as f64;
        let mean = bars.iter().map(|b| b.volume as f64).sum::<f64>() / n;
        let var = bars
            .iter()
            .map(|b| (b.volume as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let sigma = var.sqrt();
        if sigma <= 0.0 {
            return false;
        }
        bars.iter()
            .any(|b| b.volume as f64 > mean + self.config.block_trade_sigma * sigma)
    }

    fn build_targets(
        &self,
        drive: &Drive,
        entry: f64,
        risk: f64,
        view: &SessionView<'_>,
    ) -> Vec<ProfitTarget> {
        let sign = drive.direction.sign();
        let t1 = view.session_open;

        // Prior close is the second magnet when it sits beyond the open in
        // the fade direction (gap fill); otherwise derive a level from the
        // drive range.
        let t2 = match view.prior_close {
            Some(pc) if (pc - t1) * sign > 0.0 => pc,
            _ => t1 + sign * drive.range * 0.5,
        };
        let t3 = t2 + sign * drive.range * 0.5;

        [(t1, 0.5, "session_open"), (t2, 0.3, "prior_close"), (t3, 0.2, "runner")]
            .into_iter()
            .map(|(price, size_fraction, label)| ProfitTarget {
                price,
                size_fraction,
                label,
                r_multiple: (price - entry).abs() / risk,
            })
            .collect()
    }
}

impl Playbook for OpeningDriveReversal {
    fn name(&self) -> &'static str {
        "opening_drive_reversal"
    }

    fn kind(&self) -> PlaybookKind {
        PlaybookKind::Fade
    }

    fn preferred_regimes(&self) -> &'static [Regime] {
        &[Regime::Volatile, Regime::Transitional]
    }

    fn check_entry(&self, view: &SessionView<'_>) -> Option<CandidateSignal> {
        let bars = view.bars;
        if bars.len() < self.config.min_drive_minutes || bars.len() > self.config.max_drive_minutes
        {
            return None;
        }

        let drive = self.identify_drive(view)?;
        let decline = self.tape_decline(bars)?;
        if decline < self.config.min_tape_decline {
            debug!(decline, "tape still accelerating, not an exhausted drive");
            return None;
        }
        let kurtosis = self.volume_delta_kurtosis(bars)?;
        if kurtosis > self.config.max_volume_delta_kurtosis {
            debug!(kurtosis, "fat-tailed volume delta, institutional drive");
            return None;
        }
        if self.has_block_trades(bars) {
            return None;
        }
        let alignment = self.regime_alignment(view.regime.regime);
        if alignment < 0.5 {
            return None;
        }

        let bar = view.current_bar()?;
        let entry = bar.close;
        let stop = drive.extreme - drive.direction.sign() * self.config.stop_buffer_r * drive.range;
        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return None;
        }

        let decline_score = (decline / (2.0 * self.config.min_tape_decline)).min(1.0);
        let range_score = (drive.range / (2.0 * self.config.min_drive_range)).min(1.0);
        let kurtosis_score =
            (1.0 - kurtosis / self.config.max_volume_delta_kurtosis).clamp(0.0, 1.0);
        let strength =
            (0.4 * decline_score + 0.3 * range_score + 0.3 * kurtosis_score).clamp(0.0, 1.0);

        let candidate = CandidateSignal {
            playbook: self.name(),
            kind: self.kind(),
            direction: drive.direction,
            ts: bar.ts,
            entry_price: entry,
            initial_stop: stop,
            targets: self.build_targets(&drive, entry, risk, view),
            strength,
            regime_alignment: alignment,
            confidence: strength * alignment,
        };
        candidate.is_well_formed().then_some(candidate)
    }

    /// Tightest of the three-phase schemas: breakeven from 0.4 R, trail a
    /// three-bar swing from 0.8 R.
    fn update_stop(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> Option<f64> {
        let mfe = trade.peak_favorable_r;
        if mfe < 0.4 {
            return None;
        }
        if mfe < 0.8 {
            return Some(trade.entry_price + trade.direction.sign() * trade.initial_risk * 0.05);
        }
        let take = 3.min(view.bars.len());
        if take == 0 {
            return None;
        }
        let window = &view.bars[view.bars.len() - take..];
        let buffer = trade.initial_risk * 0.1;
        Some(match trade.direction {
            Direction::Long => {
                window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min) - buffer
            }
            Direction::Short => {
                window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) + buffer
            }
        })
    }

    /// A drive fade that stalls is wrong: short time limit, tight
    /// retracement tolerance.
    fn check_salvage(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> bool {
        let bar = match view.current_bar() {
            Some(bar) => bar,
            None => return false,
        };
        let current_r = trade.current_r(bar.close);
        let mfe = trade.peak_favorable_r;

        if mfe > 0.4 {
            let retrace = (mfe - current_r) / mfe;
            if retrace > 0.6 {
                return true;
            }
        }
        if trade.bars_held > 20 && current_r.abs() < 0.2 {
            return true;
        }
        false
    }
}
