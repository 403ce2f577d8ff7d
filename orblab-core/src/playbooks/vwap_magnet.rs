//! VWAP Magnet — mean reversion from the dynamic VWAP band.
//!
//! The band sits `k · σ · √(t/T)^α` away from the session VWAP, where σ is
//! the volume-weighted dispersion, t is bars since the open and T the full
//! session length. The time decay keeps the band tight early (when VWAP is
//! still finding itself) and lets it widen as the session matures. Entries
//! fade band exits that reject back toward VWAP with enough velocity.

use super::{
    directional_velocity, CandidateSignal, Playbook, PlaybookKind, ProfitTarget, SessionView,
};
use crate::config::VwapMagnetConfig;
use crate::domain::{ActiveTrade, Direction};
use crate::regime::Regime;
use tracing::debug;

pub struct VwapMagnet {
    config: VwapMagnetConfig,
}

struct Band {
    vwap: f64,
    upper: f64,
    lower: f64,
    width: f64,
}

impl VwapMagnet {
    pub fn new(config: VwapMagnetConfig) -> Self {
        Self { config }
    }

    fn band(&self, view: &SessionView<'_>) -> Option<Band> {
        let vwap = view.vwap.value()?;
        let sigma = view.vwap.sigma()?;
        if sigma <= 0.0 {
            return None;
        }
        let t = view.vwap.bars_seen() as f64;
        let total = view.session_length_bars.max(1) as f64;
        let decay = (t / total).min(1.0).sqrt().powf(self.config.time_decay_alpha);
        let width = self.config.band_multiplier * sigma * decay;
        Some(Band {
            vwap,
            upper: vwap + width,
            lower: vwap - width,
            width,
        })
    }

    fn build_targets(
        &self,
        direction: Direction,
        entry: f64,
        risk: f64,
        band: &Band,
    ) -> Vec<ProfitTarget> {
        let opposite = match direction {
            Direction::Long => band.upper,
            Direction::Short => band.lower,
        };
        let runner = opposite + direction.sign() * band.width * 0.5;
        [
            (band.vwap, 0.6, "vwap"),
            (opposite, 0.25, "opposite_band"),
            (runner, 0.15, "runner"),
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
}

impl Playbook for VwapMagnet {
    fn name(&self) -> &'static str {
        "vwap_magnet"
    }

    fn kind(&self) -> PlaybookKind {
        PlaybookKind::MeanReversion
    }

    fn preferred_regimes(&self) -> &'static [Regime] {
        &[Regime::Range, Regime::Volatile]
    }

    fn check_entry(&self, view: &SessionView<'_>) -> Option<CandidateSignal> {
        if view.vwap.bars_seen() < self.config.min_bars_for_vwap {
            return None;
        }
        let band = self.band(view)?;
        let bar = view.current_bar()?;

        let direction = if bar.close > band.upper {
            Direction::Short
        } else if bar.close < band.lower {
            Direction::Long
        } else {
            return None;
        };

        // Rejection velocity: how fast price is closing back toward VWAP,
        // in mean-range units per bar.
        let velocity = directional_velocity(view.bars, direction, 5).max(0.0);
        if velocity < self.config.min_rejection_velocity {
            debug!(
                velocity,
                min = self.config.min_rejection_velocity,
                "band exit without rejection"
            );
            return None;
        }

        let alignment = self.regime_alignment(view.regime.regime);
        if alignment < 0.5 {
            return None;
        }

        let entry = bar.close;
        let extension = (entry - band.vwap).abs();

        // Stop beyond the local extreme of the excursion.
        let take = 5.min(view.bars.len());
        let window = &view.bars[view.bars.len() - take..];
        let stop = match direction {
            Direction::Short => {
                window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)
                    + self.config.stop_buffer_r * extension
            }
            Direction::Long => {
                window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min)
                    - self.config.stop_buffer_r * extension
            }
        };
        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return None;
        }

        let stretch = ((entry - band.vwap).abs() / (band.width.max(1e-9)) - 1.0).clamp(0.0, 1.0);
        let velocity_score =
            (velocity / (2.0 * self.config.min_rejection_velocity.max(1e-9))).min(1.0);
        let strength = (0.4 * stretch + 0.4 * velocity_score + 0.2 * view.features.rotation_entropy)
            .clamp(0.0, 1.0);

        let candidate = CandidateSignal {
            playbook: self.name(),
            kind: self.kind(),
            direction,
            ts: bar.ts,
            entry_price: entry,
            initial_stop: stop,
            targets: self.build_targets(direction, entry, risk, &band),
            strength,
            regime_alignment: alignment,
            confidence: strength * alignment,
        };
        candidate.is_well_formed().then_some(candidate)
    }

    /// Three-phase: hold to 0.5 R, lock a sliver to 1.0 R, then trail the
    /// VWAP itself once the magnet has pulled price through it.
    fn update_stop(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> Option<f64> {
        let mfe = trade.peak_favorable_r;
        if mfe < 0.5 {
            return None;
        }
        if mfe < 1.0 {
            return Some(trade.entry_price + trade.direction.sign() * trade.initial_risk * 0.05);
        }
        let vwap = view.vwap.value()?;
        let buffer = trade.initial_risk * 0.1;
        Some(vwap - trade.direction.sign() * buffer)
    }

    /// Magnet salvage: rejection at VWAP, a stall, or a deep retracement.
    fn check_salvage(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> bool {
        let bar = match view.current_bar() {
            Some(bar) => bar,
            None => return false,
        };
        let current_r = trade.current_r(bar.close);
        let mfe = trade.peak_favorable_r;

        // Approached VWAP, then got pushed back out through the entry side.
        if let Some(vwap) = view.vwap.value() {
            if mfe > 0.3 && current_r < mfe * 0.5 {
                let rejected = match trade.direction {
                    Direction::Long => bar.close < vwap * 0.999,
                    Direction::Short => bar.close > vwap * 1.001,
                };
                if rejected {
                    return true;
                }
            }
        }
        if trade.bars_held > 30 && current_r.abs() < 0.2 {
            return true;
        }
        if mfe > 0.5 {
            let retrace = (mfe - current_r) / mfe;
            if retrace > 0.65 {
                return true;
            }
        }
        false
    }
}
