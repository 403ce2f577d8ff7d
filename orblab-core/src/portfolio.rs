//! Portfolio manager — sizing under volatility, correlation, and heat.
//!
//! Steps: risk-based base size, the account risk manager's circuit-breaker
//! cap, volatility multiplier (clamped [0.5, 2.0]), correlation taper (down
//! to 0.6), regime-clarity taper (down to 0.6), the time-of-day multiplier,
//! integer floor, then the portfolio-heat budget. The manager is the sole
//! owner of the heat accumulator; heat never exceeds the configured
//! ceiling.

use crate::arbitration::CorrelationMatrix;
use crate::config::MultiPlaybookConfig;
use crate::playbooks::CandidateSignal;
use crate::risk::AccountRiskManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default realized volatility when no estimate is available yet.
const DEFAULT_REALIZED_VOL: f64 = 0.015;

/// Sizing decision with the full multiplier audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingBreakdown {
    pub base_size: u32,
    /// Base size after the account risk manager's circuit breaker and
    /// contract cap. Equals `base_size` when risk limits are off.
    pub risk_capped_base: u32,
    pub volatility_multiplier: f64,
    pub correlation_multiplier: f64,
    pub regime_multiplier: f64,
    /// Time-of-day window multiplier; 1.0 when the filter is off.
    pub time_multiplier: f64,
    /// After multipliers, before the heat budget.
    pub proposed_size: u32,
    /// After the heat budget. Zero means no budget remained or risk limits
    /// blocked the trade.
    pub final_size: u32,
    pub heat_before: f64,
    pub heat_after: f64,
}

/// Per-playbook volatility scaling of the position, relative to baseline.
fn playbook_vol_factor(playbook: &str) -> f64 {
    match playbook {
        "ib_fade" => 1.0,
        "vwap_magnet" => 0.9,
        "momentum_continuation" => 1.3,
        "opening_drive_reversal" => 0.8,
        _ => 1.0,
    }
}

#[derive(Debug, Clone)]
pub struct PortfolioManager {
    account_size: f64,
    base_risk: f64,
    target_volatility: f64,
    max_portfolio_heat: f64,
    correlation_threshold: f64,
    min_regime_clarity: f64,
    point_value: f64,
    current_heat: f64,
}

impl PortfolioManager {
    pub fn new(config: &MultiPlaybookConfig, point_value: f64) -> Self {
        Self {
            account_size: config.account_size,
            base_risk: config.base_risk,
            target_volatility: config.target_volatility,
            max_portfolio_heat: config.max_portfolio_heat,
            correlation_threshold: config.correlation_threshold,
            min_regime_clarity: config.min_regime_clarity,
            point_value,
            current_heat: 0.0,
        }
    }

    pub fn heat(&self) -> f64 {
        self.current_heat
    }

    pub fn max_heat(&self) -> f64 {
        self.max_portfolio_heat
    }

    /// Size a selected signal. Mutates the heat accumulator by the risk the
    /// final size actually takes on.
    ///
    /// `time_multiplier` comes from the time-of-day filter (1.0 when off);
    /// `account_risk` applies its circuit breaker to the base size before
    /// any other multiplier.
    pub fn size_signal(
        &mut self,
        candidate: &CandidateSignal,
        open_playbooks: &[String],
        correlations: &CorrelationMatrix,
        regime_clarity: f64,
        realized_volatility: Option<f64>,
        time_multiplier: f64,
        account_risk: Option<&AccountRiskManager>,
    ) -> SizingBreakdown {
        let risk_per_contract = candidate.initial_risk() * self.point_value;

        // 1. Base size from account risk.
        let base_size = if risk_per_contract > 0.0 {
            ((self.account_size * self.base_risk) / risk_per_contract).floor() as u32
        } else {
            0
        }
        .max(1);

        // 2. Account risk circuit breaker and contract cap.
        let risk_capped_base = match account_risk {
            Some(risk) => risk.position_size_limit(base_size),
            None => base_size,
        };

        // 3. Volatility targeting.
        let realized = realized_volatility.unwrap_or(DEFAULT_REALIZED_VOL);
        let combined = realized * playbook_vol_factor(candidate.playbook);
        let volatility_multiplier = if combined > 0.0 {
            (self.target_volatility / combined).clamp(0.5, 2.0)
        } else {
            1.0
        };

        // 4. Correlation taper against the open book.
        let correlation_multiplier =
            self.correlation_multiplier(candidate, open_playbooks, correlations);

        // 5. Regime-clarity taper.
        let regime_multiplier = self.regime_multiplier(regime_clarity);

        // 6. Integer proposal, time window applied with the other tapers.
        let proposed_size = if risk_capped_base == 0 || time_multiplier <= 0.0 {
            0
        } else {
            ((risk_capped_base as f64
                * volatility_multiplier
                * correlation_multiplier
                * regime_multiplier
                * time_multiplier)
                .floor() as u32)
                .max(1)
        };

        // 7. Heat budget.
        let heat_before = self.current_heat;
        let account_size = self.account_size;
        let risk_fraction = move |size: u32| size as f64 * risk_per_contract / account_size;
        let final_size = if heat_before + risk_fraction(proposed_size)
            <= self.max_portfolio_heat + 1e-12
        {
            proposed_size
        } else {
            let available = self.max_portfolio_heat - heat_before;
            if available <= 0.0 {
                warn!(
                    heat = heat_before,
                    max = self.max_portfolio_heat,
                    "portfolio heat exhausted, signal not sized"
                );
                0
            } else {
                let fit = ((available * self.account_size) / risk_per_contract).floor() as u32;
                let scaled = fit.min(proposed_size);
                debug!(proposed = proposed_size, scaled, "heat limit scaled position");
                scaled
            }
        };
        self.current_heat = heat_before + risk_fraction(final_size);

        SizingBreakdown {
            base_size,
            risk_capped_base,
            volatility_multiplier,
            correlation_multiplier,
            regime_multiplier,
            time_multiplier,
            proposed_size,
            final_size,
            heat_before,
            heat_after: self.current_heat,
        }
    }

    fn correlation_multiplier(
        &self,
        candidate: &CandidateSignal,
        open_playbooks: &[String],
        correlations: &CorrelationMatrix,
    ) -> f64 {
        if open_playbooks.is_empty() {
            return 1.0;
        }
        let max_corr = open_playbooks
            .iter()
            .filter_map(|open| correlations.get(candidate.playbook, open))
            .map(f64::abs)
            .fold(0.0, f64::max);
        if max_corr < self.correlation_threshold {
            return 1.0;
        }
        let taper =
            (max_corr - self.correlation_threshold) / (1.0 - self.correlation_threshold) * 0.4;
        (1.0 - taper).clamp(0.6, 1.0)
    }

    fn regime_multiplier(&self, clarity: f64) -> f64 {
        if clarity < self.min_regime_clarity {
            return 0.6;
        }
        let span = 1.0 - self.min_regime_clarity;
        if span <= 0.0 {
            return 1.0;
        }
        (0.6 + (clarity - self.min_regime_clarity) / span * 0.4).clamp(0.6, 1.0)
    }

    /// Release the heat a closed position was carrying.
    pub fn release(&mut self, size: u32, initial_risk: f64) {
        let fraction = size as f64 * initial_risk * self.point_value / self.account_size;
        self.current_heat = (self.current_heat - fraction).max(0.0);
    }

    /// Session-boundary reset.
    pub fn reset_heat(&mut self) {
        self.current_heat = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use crate::playbooks::{PlaybookKind, ProfitTarget};
    use chrono::{TimeZone, Utc};

    fn candidate(playbook: &'static str, entry: f64, stop: f64) -> CandidateSignal {
        let risk = (entry - stop).abs();
        CandidateSignal {
            playbook,
            kind: PlaybookKind::MeanReversion,
            direction: Direction::Long,
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            entry_price: entry,
            initial_stop: stop,
            targets: vec![ProfitTarget {
                price: entry + 1.5 * risk,
                size_fraction: 1.0,
                label: "t1",
                r_multiple: 1.5,
            }],
            strength: 0.7,
            regime_alignment: 1.0,
            confidence: 0.7,
        }
    }

    /// Account 100k, 1% risk, $500 point, 5% heat ceiling.
    fn manager() -> PortfolioManager {
        let config = MultiPlaybookConfig {
            account_size: 100_000.0,
            base_risk: 0.01,
            target_volatility: 0.01,
            max_portfolio_heat: 0.05,
            correlation_threshold: 0.7,
            min_regime_clarity: 0.5,
            ..MultiPlaybookConfig::default()
        };
        PortfolioManager::new(&config, 500.0)
    }

    fn neutral_vol() -> Option<f64> {
        // target / (vol * factor 1.0) = 1.0 multiplier
        Some(0.01)
    }

    #[test]
    fn base_size_from_account_risk() {
        let mut pm = manager();
        // Risk 0.65 points * $500 = $325/contract; $1000 budget → 3
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, neutral_vol(), 1.0, None);
        assert_eq!(sizing.base_size, 3);
        assert_eq!(sizing.final_size, 3);
        assert!((sizing.volatility_multiplier - 1.0).abs() < 1e-12);
        assert!((sizing.heat_after - 0.00975).abs() < 1e-9);
    }

    #[test]
    fn heat_limit_scales_to_fit_remaining_budget() {
        let mut pm = manager();
        // Pre-existing positions consume 4.2% of the 5% budget
        pm.current_heat = 0.042;
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, neutral_vol(), 1.0, None);
        assert_eq!(sizing.proposed_size, 3);
        // Remaining 0.8% of 100k = $800 / $325 per contract → 2
        assert_eq!(sizing.final_size, 2);
        assert!((sizing.heat_after - 0.0485).abs() < 1e-9);
        assert!(sizing.heat_after <= pm.max_heat() + 1e-9);
    }

    #[test]
    fn exhausted_heat_returns_zero() {
        let mut pm = manager();
        pm.current_heat = 0.05;
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, neutral_vol(), 1.0, None);
        assert_eq!(sizing.final_size, 0);
        assert_eq!(sizing.heat_after, 0.05);
    }

    #[test]
    fn volatility_multiplier_clamped_both_ways() {
        let mut pm = manager();
        let c = candidate("ib_fade", 100.60, 99.95);
        // Very calm tape: would be 10x, clamps to 2.0
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, Some(0.001), 1.0, None);
        assert!((sizing.volatility_multiplier - 2.0).abs() < 1e-12);

        let mut pm = manager();
        // Very hot tape: would be 0.2x, clamps to 0.5
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, Some(0.05), 1.0, None);
        assert!((sizing.volatility_multiplier - 0.5).abs() < 1e-12);
    }

    #[test]
    fn correlated_open_position_tapers_size() {
        let mut pm = manager();
        let c = candidate("vwap_magnet", 100.60, 99.95);
        // ib_fade × vwap_magnet correlation 0.65 is below the 0.7 threshold
        let sizing = pm.size_signal(
            &c,
            &["ib_fade".to_string()],
            &CorrelationMatrix::with_defaults(),
            1.0,
            neutral_vol(),
            1.0,
            None,
        );
        assert!((sizing.correlation_multiplier - 1.0).abs() < 1e-12);

        // Force a high correlation and verify the taper engages
        let mut matrix = CorrelationMatrix::with_defaults();
        matrix.set("ib_fade", "vwap_magnet", 0.9);
        let mut pm = manager();
        let sizing = pm.size_signal(&c, &["ib_fade".to_string()], &matrix, 1.0, neutral_vol(), 1.0, None);
        // 1 - (0.9 - 0.7) / 0.3 * 0.4 = 0.7333
        assert!((sizing.correlation_multiplier - (1.0 - 0.2 / 0.3 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn unclear_regime_cuts_size() {
        let mut pm = manager();
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 0.3, neutral_vol(), 1.0, None);
        assert!((sizing.regime_multiplier - 0.6).abs() < 1e-12);

        let mut pm = manager();
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 0.75, neutral_vol(), 1.0, None);
        // Midway between min clarity and 1.0 → 0.8
        assert!((sizing.regime_multiplier - 0.8).abs() < 1e-12);

        let mut pm = manager();
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, neutral_vol(), 1.0, None);
        assert!((sizing.regime_multiplier - 1.0).abs() < 1e-12);
    }

    #[test]
    fn release_returns_heat() {
        let mut pm = manager();
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(&c, &[], &CorrelationMatrix::with_defaults(), 1.0, neutral_vol(), 1.0, None);
        assert!(pm.heat() > 0.0);
        pm.release(sizing.final_size, c.initial_risk());
        assert!(pm.heat().abs() < 1e-12);
    }

    #[test]
    fn risk_circuit_breaker_caps_base_before_multipliers() {
        use crate::config::RiskLimitsConfig;
        use crate::risk::AccountRiskManager;
        use chrono::NaiveDate;

        let limits = RiskLimitsConfig {
            enabled: true,
            max_position_size: 100,
            ..RiskLimitsConfig::default()
        };
        let mut risk = AccountRiskManager::new(limits, 100_000.0);
        // 60% of the daily limit used → 75% circuit breaker
        risk.update_equity(-600.0, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());

        let mut pm = manager();
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(
            &c,
            &[],
            &CorrelationMatrix::with_defaults(),
            1.0,
            neutral_vol(),
            1.0,
            Some(&risk),
        );
        assert_eq!(sizing.base_size, 3);
        assert_eq!(sizing.risk_capped_base, 2); // floor(3 * 0.75)
        assert_eq!(sizing.final_size, 2);
    }

    #[test]
    fn halted_account_sizes_to_zero() {
        use crate::config::RiskLimitsConfig;
        use crate::risk::AccountRiskManager;
        use chrono::NaiveDate;

        let mut risk = AccountRiskManager::new(
            RiskLimitsConfig {
                enabled: true,
                ..RiskLimitsConfig::default()
            },
            100_000.0,
        );
        risk.update_equity(-1200.0, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(risk.halt().is_some());

        let mut pm = manager();
        let c = candidate("ib_fade", 100.60, 99.95);
        let sizing = pm.size_signal(
            &c,
            &[],
            &CorrelationMatrix::with_defaults(),
            1.0,
            neutral_vol(),
            1.0,
            Some(&risk),
        );
        assert_eq!(sizing.risk_capped_base, 0);
        assert_eq!(sizing.final_size, 0);
        assert_eq!(sizing.heat_after, sizing.heat_before);
    }

    #[test]
    fn time_window_multiplier_tapers_with_the_rest() {
        let mut pm = manager();
        // Wide risk so the base is 20 contracts
        let c = candidate("ib_fade", 100.0, 99.9);
        let sizing = pm.size_signal(
            &c,
            &[],
            &CorrelationMatrix::with_defaults(),
            1.0,
            neutral_vol(),
            0.7,
            None,
        );
        assert_eq!(sizing.base_size, 20);
        assert!((sizing.time_multiplier - 0.7).abs() < 1e-12);
        assert_eq!(sizing.proposed_size, 14);
    }

    #[test]
    fn heat_never_exceeds_ceiling_across_many_signals() {
        let mut pm = manager();
        let matrix = CorrelationMatrix::with_defaults();
        for _ in 0..10 {
            let c = candidate("ib_fade", 100.60, 99.95);
            pm.size_signal(&c, &[], &matrix, 1.0, neutral_vol(), 1.0, None);
            assert!(pm.heat() <= pm.max_heat() + 1e-9, "heat {}", pm.heat());
        }
    }
}
