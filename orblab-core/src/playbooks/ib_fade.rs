//! Initial Balance Fade — mean reversion against weak IB extensions.
//!
//! Waits for the IB to form, detects an extension beyond it, and fades the
//! extension when the Auction Efficiency Ratio says it lacked conviction and
//! price is being accepted back toward the balance. Targets walk back into
//! the IB: midpoint, opposite extreme, then a runner beyond it.

use super::{
    directional_velocity, CandidateSignal, Playbook, PlaybookKind, ProfitTarget, SessionView,
};
use crate::config::IbFadeConfig;
use crate::domain::{ActiveTrade, Bar, Direction};
use crate::indicators::InitialBalance;
use crate::regime::Regime;
use tracing::debug;

pub struct IbFade {
    config: IbFadeConfig,
}

struct Extension {
    direction: Direction,
    extreme: f64,
    range: f64,
}

impl IbFade {
    pub fn new(config: IbFadeConfig) -> Self {
        Self { config }
    }

    fn detect_extension(&self, view: &SessionView<'_>, ib: &InitialBalance) -> Option<Extension> {
        let extension_bars = &view.bars[self.config.ib_minutes..];
        if extension_bars.len() < 5 {
            return None;
        }
        let ext_high = extension_bars
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let ext_low = extension_bars
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);

        let upside = ext_high - ib.high;
        let downside = ib.low - ext_low;
        let min_points = self.config.min_extension_ticks as f64 * view.tick_size;
        let threshold = ib.range * self.config.extension_threshold;

        if upside > threshold && upside > min_points {
            // Upside extension gets faded short
            return Some(Extension {
                direction: Direction::Short,
                extreme: ext_high,
                range: upside,
            });
        }
        if downside > threshold && downside > min_points {
            return Some(Extension {
                direction: Direction::Long,
                extreme: ext_low,
                range: downside,
            });
        }
        None
    }

    /// AER = (extension range / Σ TR over extension bars) × (extension
    /// volume / expected volume at the IB's per-bar rate). Low values mean
    /// the move covered little ground per unit of churn on thin
    /// participation.
    fn auction_efficiency(
        &self,
        view: &SessionView<'_>,
        ib: &InitialBalance,
        extension: &Extension,
    ) -> Option<f64> {
        let extension_bars = &view.bars[self.config.ib_minutes..];
        let sequence: Vec<&Bar> = extension_bars
            .iter()
            .filter(|b| match extension.direction {
                Direction::Short => b.high >= ib.high,
                Direction::Long => b.low <= ib.low,
            })
            .collect();
        if sequence.len() < 3 {
            return None;
        }

        let mut sum_tr = 0.0;
        let mut prev_close: Option<f64> = None;
        for bar in &sequence {
            let tr = match prev_close {
                Some(pc) => {
                    let hl = bar.high - bar.low;
                    hl.max((bar.high - pc).abs()).max((bar.low - pc).abs())
                }
                None => bar.range(),
            };
            sum_tr += tr;
            prev_close = Some(bar.close);
        }
        if sum_tr <= 0.0 {
            return None;
        }

        let extension_volume: u64 = sequence.iter().map(|b| b.volume).sum();
        let expected_volume = ib.volume_per_bar * sequence.len() as f64;
        let volume_ratio = if expected_volume > 0.0 {
            extension_volume as f64 / expected_volume
        } else {
            1.0
        };

        Some((extension.range / sum_tr) * volume_ratio)
    }

    /// Most recent bars closing back inside the extension with momentum
    /// toward the IB.
    fn has_acceptance(&self, view: &SessionView<'_>, extension: &Extension) -> bool {
        let min_bars = self.config.min_acceptance_bars;
        if view.bars.len() < min_bars {
            return false;
        }
        let recent = &view.bars[view.bars.len() - min_bars..];
        let first = recent[0].close;
        let last = recent[recent.len() - 1].close;
        match extension.direction {
            Direction::Short => {
                let accepted = recent.iter().filter(|b| b.close < extension.extreme).count();
                accepted >= min_bars - 1 && last < first
            }
            Direction::Long => {
                let accepted = recent.iter().filter(|b| b.close > extension.extreme).count();
                accepted >= min_bars - 1 && last > first
            }
        }
    }

    fn build_targets(
        &self,
        direction: Direction,
        entry: f64,
        risk: f64,
        ib: &InitialBalance,
    ) -> Vec<ProfitTarget> {
        let opposite = match direction {
            Direction::Long => ib.high,
            Direction::Short => ib.low,
        };
        let runner = opposite + direction.sign() * ib.range * 0.5;
        [
            (ib.midpoint, 0.5, "ib_midpoint"),
            (opposite, 0.3, "ib_extreme"),
            (runner, 0.2, "runner"),
        ]
        .into_iter()
        .map(|(price, size_fraction, label)| ProfitTarget {
            price,
            size_fraction,
            label,
            r_multiple: (price - entry).abs() / risk,
        })
        .collect()
    }

    fn signal_strength(
        &self,
        aer: f64,
        extension: &Extension,
        ib: &InitialBalance,
        entropy: f64,
    ) -> f64 {
        let aer_score = (1.0 - aer / self.config.max_aer).clamp(0.0, 1.0);
        let extension_score = (extension.range / ib.range / 3.0).min(1.0);
        (0.5 * aer_score + 0.3 * extension_score + 0.2 * entropy).clamp(0.0, 1.0)
    }
}

impl Playbook for IbFade {
    fn name(&self) -> &'static str {
        "ib_fade"
    }

    fn kind(&self) -> PlaybookKind {
        PlaybookKind::MeanReversion
    }

    fn preferred_regimes(&self) -> &'static [Regime] {
        &[Regime::Range, Regime::Volatile]
    }

    fn check_entry(&self, view: &SessionView<'_>) -> Option<CandidateSignal> {
        if view.bars.len() < self.config.ib_minutes {
            return None;
        }
        let ib = InitialBalance::from_session(view.bars, self.config.ib_minutes)?;
        let extension = self.detect_extension(view, &ib)?;

        let aer = self.auction_efficiency(view, &ib, &extension)?;
        if aer > self.config.max_aer {
            debug!(aer, max = self.config.max_aer, "extension too efficient to fade");
            return None;
        }
        if !self.has_acceptance(view, &extension) {
            return None;
        }
        let alignment = self.regime_alignment(view.regime.regime);
        if alignment < 0.5 {
            return None;
        }

        let bar = view.current_bar()?;
        let entry = bar.close;
        // No edge once price has already traded back past the balance point.
        match extension.direction {
            Direction::Long => {
                if entry >= ib.midpoint {
                    return None;
                }
            }
            Direction::Short => {
                if entry <= ib.midpoint {
                    return None;
                }
            }
        }

        let stop =
            extension.extreme - extension.direction.sign() * self.config.stop_buffer_r * extension.range;
        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return None;
        }

        let strength = self.signal_strength(aer, &extension, &ib, view.features.rotation_entropy);
        let candidate = CandidateSignal {
            playbook: self.name(),
            kind: self.kind(),
            direction: extension.direction,
            ts: bar.ts,
            entry_price: entry,
            initial_stop: stop,
            targets: self.build_targets(extension.direction, entry, risk, &ib),
            strength,
            regime_alignment: alignment,
            confidence: strength * alignment,
        };
        candidate.is_well_formed().then_some(candidate)
    }

    /// Three-phase: hold to 0.5 R, lock a small profit to 1.25 R, then trail
    /// the recent swing.
    fn update_stop(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> Option<f64> {
        let mfe = trade.peak_favorable_r;
        if mfe < 0.5 {
            return None;
        }
        if mfe < 1.25 {
            return Some(trade.entry_price + trade.direction.sign() * trade.initial_risk * 0.1);
        }
        let take = 5.min(view.bars.len());
        if take == 0 {
            return None;
        }
        let window = &view.bars[view.bars.len() - take..];
        let buffer = trade.initial_risk * 0.15;
        Some(match trade.direction {
            Direction::Long => {
                window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min) - buffer
            }
            Direction::Short => {
                window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) + buffer
            }
        })
    }

    /// Fade salvage: deep MFE retracement, a long stall, or velocity decay.
    fn check_salvage(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> bool {
        let bar = match view.current_bar() {
            Some(bar) => bar,
            None => return false,
        };
        let current_r = trade.current_r(bar.close);
        let mfe = trade.peak_favorable_r;

        if mfe > 0.5 {
            let retrace = (mfe - current_r) / mfe;
            if retrace > 0.70 {
                return true;
            }
        }
        if trade.bars_held > 45 && current_r.abs() < 0.3 {
            return true;
        }
        if mfe > 0.3 {
            let velocity = directional_velocity(view.bars, trade.direction, 5).clamp(0.0, 1.0);
            if velocity < 0.1 {
                return true;
            }
        }
        false
    }
}
