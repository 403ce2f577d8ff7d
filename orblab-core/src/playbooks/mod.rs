//! Playbooks — self-contained signal generators behind a closed registry.
//!
//! Each playbook reads shared session state through `SessionView` (no
//! playbook mutates shared data) and owns its entry detection, stop
//! management, and salvage predicate. All stops follow the three-phase
//! schema (initial → breakeven → trailing) with playbook-specific
//! boundaries; the standard fills/stop machinery is shared with the trade
//! managers.

pub mod ib_fade;
pub mod momentum;
pub mod opening_drive;
pub mod vwap_magnet;

pub use ib_fade::IbFade;
pub use momentum::MomentumContinuation;
pub use opening_drive::OpeningDriveReversal;
pub use vwap_magnet::VwapMagnet;

use crate::domain::{ActiveTrade, Bar, Direction};
use crate::indicators::SessionVwap;
use crate::regime::{Regime, RegimeLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad behavioral family; drives the cross-entropy redundancy filter and
/// the capital-efficiency prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookKind {
    MeanReversion,
    Momentum,
    Fade,
}

/// One rung of a playbook's profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitTarget {
    pub price: f64,
    pub size_fraction: f64,
    pub label: &'static str,
    pub r_multiple: f64,
}

/// A candidate signal from one playbook, pre-arbitration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSignal {
    pub playbook: &'static str,
    pub kind: PlaybookKind,
    pub direction: Direction,
    pub ts: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub targets: Vec<ProfitTarget>,
    /// Setup quality in [0, 1].
    pub strength: f64,
    /// Fit to the current regime in [0, 1].
    pub regime_alignment: f64,
    /// strength × regime_alignment.
    pub confidence: f64,
}

impl CandidateSignal {
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }

    /// Structural sanity: positive risk, stop on the protective side,
    /// ladder fractions within one unit.
    pub fn is_well_formed(&self) -> bool {
        let protective = match self.direction {
            Direction::Long => self.initial_stop < self.entry_price,
            Direction::Short => self.initial_stop > self.entry_price,
        };
        let fraction_sum: f64 = self.targets.iter().map(|t| t.size_fraction).sum();
        protective
            && self.initial_risk() > 0.0
            && !self.targets.is_empty()
            && fraction_sum <= 1.0 + 1e-9
            && (0.0..=1.0).contains(&self.strength)
            && (0.0..=1.0).contains(&self.regime_alignment)
    }

    /// Expected R at the first ladder rung; the arbitrator's efficiency
    /// prior and the learner's expectation both use it.
    pub fn expected_r(&self) -> f64 {
        self.targets.first().map(|t| t.r_multiple).unwrap_or(1.0)
    }
}

/// Engineered session features from the external feature pipeline. Neutral
/// defaults keep playbooks usable when the pipeline is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionFeatures {
    /// 0 = one-way rotation, 1 = balanced two-sided rotation.
    pub rotation_entropy: f64,
}

impl Default for SessionFeatures {
    fn default() -> Self {
        Self {
            rotation_entropy: 0.5,
        }
    }
}

/// Read-only view of shared per-session state, rebuilt each bar by the
/// event loop. Playbooks never hold references across bars.
pub struct SessionView<'a> {
    /// Session bars oldest-first, including the current bar.
    pub bars: &'a [Bar],
    /// First traded price of the session.
    pub session_open: f64,
    /// Prior session's closing price, once one exists.
    pub prior_close: Option<f64>,
    pub vwap: &'a SessionVwap,
    pub atr: Option<f64>,
    pub regime: RegimeLabel,
    pub features: SessionFeatures,
    pub tick_size: f64,
    /// Total bars in a full session (end - start at one bar per minute).
    pub session_length_bars: usize,
}

impl SessionView<'_> {
    pub fn current_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Signed price velocity over the last `lookback` bars, in mean-range units
/// per bar. Positive values move with `direction`, negative against it.
pub(crate) fn directional_velocity(bars: &[Bar], direction: Direction, lookback: usize) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let take = lookback.min(bars.len());
    let window = &bars[bars.len() - take..];
    let change = (window[window.len() - 1].close - window[0].close) * direction.sign();
    let mean_range = window.iter().map(|b| b.range()).sum::<f64>() / take as f64;
    if mean_range <= 0.0 {
        0.0
    } else {
        change / (mean_range * take as f64)
    }
}

/// The playbook capability set.
pub trait Playbook {
    fn name(&self) -> &'static str;
    fn kind(&self) -> PlaybookKind;
    fn preferred_regimes(&self) -> &'static [Regime];

    /// Entry detection. Pure over the view: identical state gives identical
    /// candidates.
    fn check_entry(&self, view: &SessionView<'_>) -> Option<CandidateSignal>;

    /// Propose a stop for an open position from this playbook. The caller
    /// ratchets: a proposal against the trade is discarded there.
    fn update_stop(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> Option<f64>;

    /// Early-exit predicate; a true verdict closes at the bar's close.
    fn check_salvage(&self, trade: &ActiveTrade, view: &SessionView<'_>) -> bool;

    /// Fit of `regime` to this playbook.
    fn regime_alignment(&self, regime: Regime) -> f64 {
        if self.preferred_regimes().contains(&regime) {
            1.0
        } else if regime == Regime::Transitional {
            0.5
        } else {
            0.2
        }
    }
}

/// Running per-playbook performance, fed by closed trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStats {
    pub trades: u32,
    pub wins: u32,
    pub total_r: f64,
    pub avg_win_r: f64,
    pub avg_loss_r: f64,
}

impl PlaybookStats {
    pub fn update(&mut self, realized_r: f64) {
        self.trades += 1;
        self.total_r += realized_r;
        if realized_r > 0.0 {
            let prior = self.avg_win_r * (self.wins as f64);
            self.wins += 1;
            self.avg_win_r = (prior + realized_r) / self.wins as f64;
        } else {
            let losses = self.trades - self.wins;
            let prior = self.avg_loss_r * (losses as f64 - 1.0);
            self.avg_loss_r = (prior + realized_r) / losses as f64;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    pub fn expectancy(&self) -> f64 {
        let p = self.win_rate();
        p * self.avg_win_r + (1.0 - p) * self.avg_loss_r
    }
}

/// Ordered, closed playbook registry. Registration order is the stable
/// arbitration tie-break, so it must not depend on map iteration.
pub struct PlaybookRegistry {
    playbooks: Vec<Box<dyn Playbook>>,
    stats: Vec<PlaybookStats>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self {
            playbooks: Vec::new(),
            stats: Vec::new(),
        }
    }

    pub fn register(&mut self, playbook: Box<dyn Playbook>) {
        self.playbooks.push(playbook);
        self.stats.push(PlaybookStats::default());
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Playbook> {
        self.playbooks.iter().map(|p| p.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Playbook> {
        self.playbooks
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Registration index; the arbitration tie-break key.
    pub fn order_of(&self, name: &str) -> Option<usize> {
        self.playbooks.iter().position(|p| p.name() == name)
    }

    pub fn stats_of(&self, name: &str) -> Option<&PlaybookStats> {
        self.order_of(name).map(|i| &self.stats[i])
    }

    pub fn record_result(&mut self, name: &str, realized_r: f64) {
        if let Some(index) = self.order_of(name) {
            self.stats[index].update(realized_r);
        }
    }
}

impl Default for PlaybookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Probe(&'static str);

    impl Playbook for Probe {
        fn name(&self) -> &'static str {
            self.0
        }
        fn kind(&self) -> PlaybookKind {
            PlaybookKind::MeanReversion
        }
        fn preferred_regimes(&self) -> &'static [Regime] {
            &[Regime::Range]
        }
        fn check_entry(&self, _view: &SessionView<'_>) -> Option<CandidateSignal> {
            None
        }
        fn update_stop(&self, _trade: &ActiveTrade, _view: &SessionView<'_>) -> Option<f64> {
            None
        }
        fn check_salvage(&self, _trade: &ActiveTrade, _view: &SessionView<'_>) -> bool {
            false
        }
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = PlaybookRegistry::new();
        registry.register(Box::new(Probe("alpha")));
        registry.register(Box::new(Probe("beta")));
        assert_eq!(registry.order_of("alpha"), Some(0));
        assert_eq!(registry.order_of("beta"), Some(1));
        assert!(registry.order_of("gamma").is_none());
    }

    #[test]
    fn alignment_defaults() {
        let probe = Probe("alpha");
        assert_eq!(probe.regime_alignment(Regime::Range), 1.0);
        assert_eq!(probe.regime_alignment(Regime::Transitional), 0.5);
        assert_eq!(probe.regime_alignment(Regime::Trend), 0.2);
    }

    #[test]
    fn stats_track_expectancy() {
        let mut stats = PlaybookStats::default();
        stats.update(1.0);
        stats.update(1.0);
        stats.update(-1.0);
        assert_eq!(stats.trades, 3);
        assert_eq!(stats.wins, 2);
        assert!((stats.win_rate() - 2.0 / 3.0).abs() < 1e-12);
        // E = 2/3 * 1 + 1/3 * -1 = 1/3
        assert!((stats.expectancy() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn candidate_well_formedness() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let mut candidate = CandidateSignal {
            playbook: "probe",
            kind: PlaybookKind::MeanReversion,
            direction: Direction::Long,
            ts,
            entry_price: 100.0,
            initial_stop: 99.0,
            targets: vec![ProfitTarget {
                price: 101.0,
                size_fraction: 1.0,
                label: "t1",
                r_multiple: 1.0,
            }],
            strength: 0.7,
            regime_alignment: 1.0,
            confidence: 0.7,
        };
        assert!(candidate.is_well_formed());
        candidate.initial_stop = 100.5; // wrong side for a long
        assert!(!candidate.is_well_formed());
    }
}
