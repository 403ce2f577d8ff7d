//! Funded-account risk limits: loss halts, trailing drawdown, size scaling.
//!
//! Enforces the dollar-denominated discipline rules of an evaluation-style
//! funded account on top of the R-based governance layer:
//! - daily loss limit (hard halt, released at the day roll),
//! - weekly loss limit (hard halt, released at the ISO-week roll),
//! - trailing drawdown from peak equity (hard halt, never released),
//! - a circuit breaker that scales position size down as any limit is
//!   approached: 75% of size at 50% usage, 50% at 70%, 25% at 85%, and a
//!   full stop at 100%.
//!
//! The portfolio manager consults `position_size_limit` on the base size
//! before its own multipliers; the event loops feed every closed trade's
//! dollar P&L back through `update_equity`.

use crate::config::RiskLimitsConfig;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Which limit halted trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    DailyLossLimit,
    WeeklyLossLimit,
    TrailingDrawdownLimit,
}

impl HaltReason {
    pub fn label(self) -> &'static str {
        match self {
            HaltReason::DailyLossLimit => "daily_loss_limit",
            HaltReason::WeeklyLossLimit => "weekly_loss_limit",
            HaltReason::TrailingDrawdownLimit => "trailing_drawdown_limit",
        }
    }
}

/// Snapshot of the account risk state, surfaced in run artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub can_trade: bool,
    pub halt: Option<HaltReason>,
    pub current_equity: f64,
    pub peak_equity: f64,
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    /// Equity below peak; zero or negative.
    pub trailing_drawdown: f64,
    /// Fraction of each limit consumed, in [0, 1+].
    pub daily_limit_used: f64,
    pub weekly_limit_used: f64,
    pub drawdown_limit_used: f64,
}

/// Dollar-denominated account risk manager.
///
/// Owns equity, peak equity, and the per-day/per-week P&L counters. All
/// limits are configured as positive magnitudes; breaches compare the
/// signed P&L against their negation.
#[derive(Debug, Clone)]
pub struct AccountRiskManager {
    config: RiskLimitsConfig,
    current_equity: f64,
    peak_equity: f64,
    daily_pnl: f64,
    weekly_pnl: f64,
    current_date: Option<NaiveDate>,
    /// ISO (year, week) of the running week.
    current_week: Option<(i32, u32)>,
    halt: Option<HaltReason>,
}

impl AccountRiskManager {
    pub fn new(config: RiskLimitsConfig, account_size: f64) -> Self {
        info!(
            daily = config.daily_loss_limit,
            weekly = config.weekly_loss_limit,
            drawdown = config.trailing_drawdown_limit,
            max_size = config.max_position_size,
            "account risk limits armed"
        );
        Self {
            config,
            current_equity: account_size,
            peak_equity: account_size,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
            current_date: None,
            current_week: None,
            halt: None,
        }
    }

    pub fn halt(&self) -> Option<HaltReason> {
        self.halt
    }

    /// Fold a closed trade's dollar P&L into the account, rolling the day
    /// and week counters from the exchange-local exit date.
    pub fn update_equity(&mut self, trade_pnl: f64, local_date: NaiveDate) {
        if self.current_date != Some(local_date) {
            self.roll_day(local_date);
        }
        let week = (local_date.iso_week().year(), local_date.iso_week().week());
        if self.current_week != Some(week) {
            self.roll_week(week);
        }

        self.daily_pnl += trade_pnl;
        self.weekly_pnl += trade_pnl;
        self.current_equity += trade_pnl;
        if self.current_equity > self.peak_equity {
            self.peak_equity = self.current_equity;
            debug!(peak = self.peak_equity, "new peak equity");
        }

        self.check_limits();
    }

    fn roll_day(&mut self, date: NaiveDate) {
        if self.current_date.is_some() {
            debug!(daily_pnl = self.daily_pnl, equity = self.current_equity, "day closed");
        }
        self.daily_pnl = 0.0;
        self.current_date = Some(date);
        // A daily halt releases with the new day; drawdown halts do not.
        if self.halt == Some(HaltReason::DailyLossLimit) {
            self.halt = None;
            info!("trading resumed for the new day");
        }
    }

    fn roll_week(&mut self, week: (i32, u32)) {
        if self.current_week.is_some() {
            debug!(weekly_pnl = self.weekly_pnl, "week closed");
        }
        self.weekly_pnl = 0.0;
        self.current_week = Some(week);
        if self.halt == Some(HaltReason::WeeklyLossLimit) {
            self.halt = None;
            info!("trading resumed for the new week");
        }
    }

    fn check_limits(&mut self) {
        if self.halt.is_some() {
            return;
        }
        if self.daily_pnl <= -self.config.daily_loss_limit {
            self.halt = Some(HaltReason::DailyLossLimit);
            error!(daily_pnl = self.daily_pnl, "daily loss limit breached, trading halted");
            return;
        }
        if self.config.enable_weekly_limit && self.weekly_pnl <= -self.config.weekly_loss_limit {
            self.halt = Some(HaltReason::WeeklyLossLimit);
            error!(weekly_pnl = self.weekly_pnl, "weekly loss limit breached, trading halted");
            return;
        }
        let trailing = self.current_equity - self.peak_equity;
        if trailing <= -self.config.trailing_drawdown_limit {
            self.halt = Some(HaltReason::TrailingDrawdownLimit);
            error!(trailing, "trailing drawdown limit breached, trading halted");
        }
    }

    /// Worst limit usage across daily, weekly, and drawdown, as a fraction.
    fn worst_limit_used(&self) -> f64 {
        let daily = (-self.daily_pnl / self.config.daily_loss_limit).max(0.0);
        let weekly = if self.config.enable_weekly_limit {
            (-self.weekly_pnl / self.config.weekly_loss_limit).max(0.0)
        } else {
            0.0
        };
        let trailing = self.peak_equity - self.current_equity;
        let drawdown = (trailing / self.config.trailing_drawdown_limit).max(0.0);
        daily.max(weekly).max(drawdown)
    }

    /// Circuit-breaker cap on a proposed base size.
    ///
    /// Full size below 50% of the worst limit, then 75% / 50% / 25% of size
    /// at 50% / 70% / 85% usage, zero when halted. Always capped at the
    /// configured contract maximum.
    pub fn position_size_limit(&self, base_size: u32) -> u32 {
        if self.halt.is_some() {
            return 0;
        }
        let capped = base_size.min(self.config.max_position_size);
        if !self.config.enable_position_scaling {
            return capped;
        }
        let worst = self.worst_limit_used();
        let multiplier = if worst >= 0.85 {
            0.25
        } else if worst >= 0.70 {
            0.50
        } else if worst >= 0.50 {
            0.75
        } else {
            1.0
        };
        let adjusted = (capped as f64 * multiplier).floor() as u32;
        if adjusted < base_size {
            debug!(base_size, adjusted, worst, "circuit breaker reduced position size");
        }
        adjusted
    }

    pub fn status(&self) -> RiskStatus {
        let trailing = self.current_equity - self.peak_equity;
        RiskStatus {
            can_trade: self.halt.is_none(),
            halt: self.halt,
            current_equity: self.current_equity,
            peak_equity: self.peak_equity,
            daily_pnl: self.daily_pnl,
            weekly_pnl: self.weekly_pnl,
            trailing_drawdown: trailing,
            daily_limit_used: (-self.daily_pnl / self.config.daily_loss_limit).max(0.0),
            weekly_limit_used: if self.config.enable_weekly_limit {
                (-self.weekly_pnl / self.config.weekly_loss_limit).max(0.0)
            } else {
                0.0
            },
            drawdown_limit_used: (-trailing / self.config.trailing_drawdown_limit).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimitsConfig {
        RiskLimitsConfig {
            enabled: true,
            daily_loss_limit: 1000.0,
            weekly_loss_limit: 1500.0,
            enable_weekly_limit: true,
            trailing_drawdown_limit: 2000.0,
            max_position_size: 3,
            enable_position_scaling: true,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn daily_loss_halts_and_releases_next_day() {
        let mut risk = AccountRiskManager::new(limits(), 100_000.0);
        risk.update_equity(-600.0, day(2));
        assert_eq!(risk.halt(), None);
        risk.update_equity(-450.0, day(2));
        assert_eq!(risk.halt(), Some(HaltReason::DailyLossLimit));
        assert_eq!(risk.position_size_limit(3), 0);

        // New day releases the daily halt
        risk.update_equity(0.0, day(3));
        assert_eq!(risk.halt(), None);
    }

    #[test]
    fn weekly_loss_halts_until_week_rolls() {
        let mut risk = AccountRiskManager::new(limits(), 100_000.0);
        // Spread under the daily limit across days of one ISO week
        risk.update_equity(-900.0, day(2)); // Tue, week 1
        risk.update_equity(-700.0, day(3)); // Wed
        assert_eq!(risk.halt(), Some(HaltReason::WeeklyLossLimit));

        // Next day, same week: still halted
        risk.update_equity(0.0, day(4));
        assert_eq!(risk.halt(), Some(HaltReason::WeeklyLossLimit));

        // Monday of the next ISO week releases it
        risk.update_equity(0.0, day(8));
        assert_eq!(risk.halt(), None);
    }

    #[test]
    fn trailing_drawdown_tracks_peak_and_never_releases() {
        let mut risk = AccountRiskManager::new(limits(), 100_000.0);
        // Run the account up, then give back more than the limit from peak
        risk.update_equity(900.0, day(2));
        risk.update_equity(600.0, day(3));
        assert_eq!(risk.status().peak_equity, 101_500.0);

        risk.update_equity(-900.0, day(4));
        risk.update_equity(-900.0, day(5));
        // Equity 99,700 vs peak 101,500: -1,800, still inside
        assert_eq!(risk.halt(), None);
        risk.update_equity(-300.0, day(8));
        assert_eq!(risk.halt(), Some(HaltReason::TrailingDrawdownLimit));

        // Neither a new day nor a new week releases a drawdown halt
        risk.update_equity(0.0, day(16));
        assert_eq!(risk.halt(), Some(HaltReason::TrailingDrawdownLimit));
        assert!(!risk.status().can_trade);
    }

    #[test]
    fn circuit_breaker_ladder() {
        let mut risk = AccountRiskManager::new(
            RiskLimitsConfig {
                max_position_size: 100,
                ..limits()
            },
            100_000.0,
        );
        risk.update_equity(0.0, day(2));
        assert_eq!(risk.position_size_limit(8), 8); // < 50% used

        risk.update_equity(-500.0, day(2)); // 50% of daily
        assert_eq!(risk.position_size_limit(8), 6); // 75%

        risk.update_equity(-200.0, day(2)); // 70%
        assert_eq!(risk.position_size_limit(8), 4); // 50%

        risk.update_equity(-150.0, day(2)); // 85%
        assert_eq!(risk.position_size_limit(8), 2); // 25%
    }

    #[test]
    fn contract_cap_applies_before_scaling() {
        let mut risk = AccountRiskManager::new(limits(), 100_000.0);
        risk.update_equity(0.0, day(2));
        // Base 10 capped to the 3-contract maximum at full health
        assert_eq!(risk.position_size_limit(10), 3);

        risk.update_equity(-600.0, day(2)); // 60% used → 75% of the cap
        assert_eq!(risk.position_size_limit(10), 2);
    }

    #[test]
    fn scaling_disabled_keeps_full_capped_size() {
        let mut risk = AccountRiskManager::new(
            RiskLimitsConfig {
                enable_position_scaling: false,
                ..limits()
            },
            100_000.0,
        );
        risk.update_equity(-800.0, day(2)); // 80% used
        assert_eq!(risk.position_size_limit(10), 3);
    }

    #[test]
    fn weekly_limit_can_be_disabled() {
        let mut risk = AccountRiskManager::new(
            RiskLimitsConfig {
                enable_weekly_limit: false,
                ..limits()
            },
            100_000.0,
        );
        risk.update_equity(-900.0, day(2));
        risk.update_equity(-900.0, day(3));
        // Daily resets kept both days under the daily limit; weekly is off
        assert_eq!(risk.halt(), None);
        assert_eq!(risk.status().weekly_limit_used, 0.0);
    }

    #[test]
    fn status_reports_usage_fractions() {
        let mut risk = AccountRiskManager::new(limits(), 100_000.0);
        risk.update_equity(-500.0, day(2));
        let status = risk.status();
        assert!(status.can_trade);
        assert!((status.daily_limit_used - 0.5).abs() < 1e-12);
        assert!((status.trailing_drawdown + 500.0).abs() < 1e-12);
        assert!((status.drawdown_limit_used - 0.25).abs() < 1e-12);
    }
}
