//! Strategy configuration with cross-field validation.
//!
//! All engine parameters live here. `StrategyConfig::validate` runs before a
//! backtest starts; the engine refuses to run on an invalid config.
//! Validation is pure and idempotent: it never rewrites the config.

use crate::domain::Direction;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration invariant failures, caught before the run starts.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be finite")]
    NonFinite { field: &'static str },

    #[error("{field} out of range: {detail}")]
    Range { field: &'static str, detail: String },

    #[error("invalid relation: {0}")]
    Relation(String),
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { field })
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    check_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Range {
            field,
            detail: format!("must be positive, got {value}"),
        })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    check_finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Range {
            field,
            detail: format!("must be non-negative, got {value}"),
        })
    }
}

/// Which event loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Confluence-gated OR breakout with a single trade at a time.
    SingleStrategy,
    /// Playbook orchestrator with arbitration and portfolio sizing.
    MultiPlaybook,
}

/// Trading session definition. Times are exchange-local; `utc_offset_minutes`
/// maps bar timestamps into that frame (session boundaries come from date
/// rollover in this offset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub utc_offset_minutes: i32,
    pub tick_size: f64,
    pub point_value: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            utc_offset_minutes: 0,
            tick_size: 0.25,
            point_value: 50.0,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("session.tick_size", self.tick_size)?;
        check_positive("session.point_value", self.point_value)?;
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Range {
                field: "session.utc_offset_minutes",
                detail: format!("must be within a day, got {}", self.utc_offset_minutes),
            });
        }
        if self.start >= self.end {
            return Err(ConfigError::Relation(format!(
                "session.start ({}) must be before session.end ({})",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Opening Range width validity filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrValidityConfig {
    pub enabled: bool,
    pub min_atr_mult: f64,
    pub max_atr_mult: f64,
}

impl Default for OrValidityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_atr_mult: 0.25,
            max_atr_mult: 1.75,
        }
    }
}

/// Opening Range construction, with optional volatility-adaptive duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningRangeConfig {
    pub base_minutes: u32,
    pub adaptive: bool,
    /// Normalized-vol threshold below which the short OR is used.
    pub low_norm_vol: f64,
    /// Normalized-vol threshold above which the long OR is used.
    pub high_norm_vol: f64,
    pub short_or_minutes: u32,
    pub long_or_minutes: u32,
    pub atr_period: usize,
    pub validity: OrValidityConfig,
}

impl Default for OpeningRangeConfig {
    fn default() -> Self {
        Self {
            base_minutes: 15,
            adaptive: false,
            low_norm_vol: 0.35,
            high_norm_vol: 0.85,
            short_or_minutes: 10,
            long_or_minutes: 30,
            atr_period: 14,
            validity: OrValidityConfig::default(),
        }
    }
}

impl OpeningRangeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_minutes == 0 {
            return Err(ConfigError::Range {
                field: "opening_range.base_minutes",
                detail: "must be >= 1".into(),
            });
        }
        if self.atr_period == 0 {
            return Err(ConfigError::Range {
                field: "opening_range.atr_period",
                detail: "must be >= 1".into(),
            });
        }
        check_non_negative("opening_range.validity.min_atr_mult", self.validity.min_atr_mult)?;
        check_non_negative("opening_range.validity.max_atr_mult", self.validity.max_atr_mult)?;
        if self.validity.enabled && self.validity.min_atr_mult >= self.validity.max_atr_mult {
            return Err(ConfigError::Relation(format!(
                "validity.min_atr_mult ({}) must be < validity.max_atr_mult ({})",
                self.validity.min_atr_mult, self.validity.max_atr_mult
            )));
        }
        if self.adaptive {
            check_finite("opening_range.low_norm_vol", self.low_norm_vol)?;
            check_finite("opening_range.high_norm_vol", self.high_norm_vol)?;
            if self.low_norm_vol >= self.high_norm_vol {
                return Err(ConfigError::Relation(format!(
                    "low_norm_vol ({}) must be < high_norm_vol ({})",
                    self.low_norm_vol, self.high_norm_vol
                )));
            }
            if self.short_or_minutes >= self.long_or_minutes {
                return Err(ConfigError::Relation(format!(
                    "short_or_minutes ({}) must be < long_or_minutes ({})",
                    self.short_or_minutes, self.long_or_minutes
                )));
            }
        }
        Ok(())
    }
}

/// Breakout trigger buffer: fixed price units, ATR-scaled, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffersConfig {
    pub fixed: f64,
    pub use_atr: bool,
    pub atr_mult: f64,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            fixed: 0.05,
            use_atr: false,
            atr_mult: 0.05,
        }
    }
}

impl BuffersConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("buffers.fixed", self.fixed)?;
        check_non_negative("buffers.atr_mult", self.atr_mult)?;
        if self.fixed == 0.0 && !self.use_atr {
            return Err(ConfigError::Relation(
                "buffers: need fixed > 0 or use_atr = true".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelVolumeFactorConfig {
    pub enabled: bool,
    pub lookback: usize,
    pub spike_mult: f64,
}

impl Default for RelVolumeFactorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback: 20,
            spike_mult: 1.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceActionConfig {
    pub enabled: bool,
    pub pivot_len: usize,
    pub engulfing: bool,
    pub structure: bool,
}

impl Default for PriceActionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pivot_len: 3,
            engulfing: true,
            structure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enabled: bool,
    /// Value Area Low percentile of session volume.
    pub val_pct: f64,
    /// Value Area High percentile of session volume.
    pub vah_pct: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            val_pct: 0.25,
            vah_pct: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VwapFactorConfig {
    pub enabled: bool,
}

impl Default for VwapFactorConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdxFactorConfig {
    pub enabled: bool,
    pub period: usize,
    pub threshold: f64,
}

impl Default for AdxFactorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 14,
            threshold: 18.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FactorsConfig {
    pub rel_volume: RelVolumeFactorConfig,
    pub price_action: PriceActionConfig,
    pub profile: ProfileConfig,
    pub vwap: VwapFactorConfig,
    pub adx: AdxFactorConfig,
}

impl FactorsConfig {
    pub fn count_enabled(&self) -> usize {
        [
            self.rel_volume.enabled,
            self.price_action.enabled,
            self.profile.enabled,
            self.vwap.enabled,
            self.adx.enabled,
        ]
        .iter()
        .filter(|e| **e)
        .count()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rel_volume.lookback == 0 {
            return Err(ConfigError::Range {
                field: "factors.rel_volume.lookback",
                detail: "must be >= 1".into(),
            });
        }
        check_finite("factors.rel_volume.spike_mult", self.rel_volume.spike_mult)?;
        if self.rel_volume.spike_mult < 1.0 {
            return Err(ConfigError::Range {
                field: "factors.rel_volume.spike_mult",
                detail: format!("must be >= 1.0, got {}", self.rel_volume.spike_mult),
            });
        }
        if self.price_action.pivot_len < 2 {
            return Err(ConfigError::Range {
                field: "factors.price_action.pivot_len",
                detail: "must be >= 2".into(),
            });
        }
        if self.price_action.enabled
            && !(self.price_action.engulfing || self.price_action.structure)
        {
            return Err(ConfigError::Relation(
                "factors.price_action: enable engulfing or structure".into(),
            ));
        }
        check_finite("factors.profile.val_pct", self.profile.val_pct)?;
        check_finite("factors.profile.vah_pct", self.profile.vah_pct)?;
        if self.profile.val_pct >= self.profile.vah_pct {
            return Err(ConfigError::Relation(format!(
                "profile.val_pct ({}) must be < profile.vah_pct ({})",
                self.profile.val_pct, self.profile.vah_pct
            )));
        }
        if self.adx.period == 0 {
            return Err(ConfigError::Range {
                field: "factors.adx.period",
                detail: "must be >= 1".into(),
            });
        }
        check_non_negative("factors.adx.threshold", self.adx.threshold)?;
        Ok(())
    }
}

/// Per-factor confluence weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub rel_vol: f64,
    pub price_action: f64,
    pub profile: f64,
    pub vwap: f64,
    pub adx: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            rel_vol: 1.0,
            price_action: 1.0,
            profile: 1.0,
            vwap: 1.0,
            adx: 1.0,
        }
    }
}

impl FactorWeights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.rel_vol,
            self.price_action,
            self.profile,
            self.vwap,
            self.adx,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_required: f64,
    pub weak_trend_required: f64,
    /// Direction that wins a dead-even long/short tie.
    pub priority: Direction,
    pub weights: FactorWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_required: 2.0,
            weak_trend_required: 3.0,
            priority: Direction::Long,
            weights: FactorWeights::default(),
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("scoring.base_required", self.base_required)?;
        check_non_negative("scoring.weak_trend_required", self.weak_trend_required)?;
        if self.base_required > self.weak_trend_required {
            return Err(ConfigError::Relation(format!(
                "scoring.base_required ({}) must not exceed weak_trend_required ({})",
                self.base_required, self.weak_trend_required
            )));
        }
        for (name, w) in [
            ("scoring.weights.rel_vol", self.weights.rel_vol),
            ("scoring.weights.price_action", self.weights.price_action),
            ("scoring.weights.profile", self.weights.profile),
            ("scoring.weights.vwap", self.weights.vwap),
            ("scoring.weights.adx", self.weights.adx),
        ] {
            check_non_negative(name, w)?;
        }
        Ok(())
    }
}

/// Initial stop placement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Opposite OR extreme, plus the extra buffer.
    OrOpposite,
    /// Recent swing low/high over a short lookback.
    Swing,
    /// Opposite OR extreme, but capped at an ATR multiple from entry.
    AtrCapped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    pub start_r: f64,
    pub distance_r: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_r: 0.5,
            distance_r: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub stop_mode: StopMode,
    pub extra_stop_buffer: f64,
    pub atr_stop_cap_mult: f64,
    pub swing_lookback: usize,
    pub partials: bool,
    pub t1_r: f64,
    pub t1_pct: f64,
    pub t2_r: f64,
    pub t2_pct: f64,
    pub runner_r: f64,
    /// Single full-size target when partials are off.
    pub primary_r: f64,
    pub move_be_at_r: f64,
    pub be_buffer: f64,
    /// Stop-first when stop and target co-occur inside a bar.
    pub conservative_fills: bool,
    pub trailing: TrailingConfig,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            stop_mode: StopMode::OrOpposite,
            extra_stop_buffer: 0.0,
            atr_stop_cap_mult: 0.80,
            swing_lookback: 5,
            partials: true,
            t1_r: 1.0,
            t1_pct: 0.5,
            t2_r: 1.5,
            t2_pct: 0.25,
            runner_r: 2.0,
            primary_r: 1.5,
            move_be_at_r: 1.0,
            be_buffer: 0.0,
            conservative_fills: true,
            trailing: TrailingConfig::default(),
        }
    }
}

impl TradeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("trade.extra_stop_buffer", self.extra_stop_buffer)?;
        check_non_negative("trade.atr_stop_cap_mult", self.atr_stop_cap_mult)?;
        if self.swing_lookback == 0 {
            return Err(ConfigError::Range {
                field: "trade.swing_lookback",
                detail: "must be >= 1".into(),
            });
        }
        check_positive("trade.primary_r", self.primary_r)?;
        check_positive("trade.move_be_at_r", self.move_be_at_r)?;
        check_non_negative("trade.be_buffer", self.be_buffer)?;

        if self.partials {
            check_positive("trade.t1_r", self.t1_r)?;
            check_positive("trade.t2_r", self.t2_r)?;
            check_positive("trade.runner_r", self.runner_r)?;
            for (field, pct) in [("trade.t1_pct", self.t1_pct), ("trade.t2_pct", self.t2_pct)] {
                check_finite(field, pct)?;
                if pct <= 0.0 || pct > 1.0 {
                    return Err(ConfigError::Range {
                        field,
                        detail: format!("must be in (0, 1], got {pct}"),
                    });
                }
            }
            if self.t1_pct + self.t2_pct > 1.0 + 1e-9 {
                return Err(ConfigError::Relation(format!(
                    "t1_pct + t2_pct ({}) must be <= 1.0",
                    self.t1_pct + self.t2_pct
                )));
            }
            if self.t1_r >= self.t2_r || self.t2_r >= self.runner_r {
                return Err(ConfigError::Relation(format!(
                    "target ladder must increase: t1_r ({}) < t2_r ({}) < runner_r ({})",
                    self.t1_r, self.t2_r, self.runner_r
                )));
            }
        }

        if self.trailing.enabled {
            check_positive("trade.trailing.distance_r", self.trailing.distance_r)?;
            if self.trailing.start_r < self.move_be_at_r {
                return Err(ConfigError::Relation(format!(
                    "trailing.start_r ({}) must be >= move_be_at_r ({})",
                    self.trailing.start_r, self.move_be_at_r
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub max_signals_per_day: u32,
    pub lockout_after_losses: u32,
    pub max_daily_loss_r: Option<f64>,
    /// No new entries at or after this exchange-local time.
    pub time_cutoff: Option<NaiveTime>,
    /// Suppress an immediate re-break within this window after OR
    /// finalization once a stop-out has occurred. 0 disables.
    pub second_chance_minutes: u32,
    pub flatten_at_session_end: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_signals_per_day: 3,
            lockout_after_losses: 2,
            max_daily_loss_r: None,
            time_cutoff: None,
            second_chance_minutes: 30,
            flatten_at_session_end: true,
        }
    }
}

impl GovernanceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_signals_per_day == 0 {
            return Err(ConfigError::Range {
                field: "governance.max_signals_per_day",
                detail: "must be >= 1".into(),
            });
        }
        if self.lockout_after_losses == 0 {
            return Err(ConfigError::Range {
                field: "governance.lockout_after_losses",
                detail: "must be >= 1".into(),
            });
        }
        if let Some(cap) = self.max_daily_loss_r {
            check_non_negative("governance.max_daily_loss_r", cap)?;
        }
        Ok(())
    }
}

/// Time-of-day filter: window hours, size multipliers, quality bars.
/// Hours are exchange-local, 24-hour, half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeFilterConfig {
    pub enabled: bool,
    pub prime_start_hour: u32,
    pub prime_end_hour: u32,
    pub good_start_hour: u32,
    pub good_end_hour: u32,
    pub market_open_hour: u32,
    pub market_close_hour: u32,
    pub prime_quality_threshold: u8,
    pub good_quality_threshold: u8,
    pub avoid_quality_threshold: u8,
    pub prime_position_multiplier: f64,
    pub good_position_multiplier: f64,
    pub avoid_position_multiplier: f64,
    /// Allow (reduced-size, top-grade) trading between the windows; when
    /// false those hours are skipped entirely.
    pub enable_avoid_window: bool,
}

impl Default for TimeFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prime_start_hour: 9,
            prime_end_hour: 11,
            good_start_hour: 14,
            good_end_hour: 16,
            market_open_hour: 9,
            market_close_hour: 16,
            prime_quality_threshold: 50,
            good_quality_threshold: 65,
            avoid_quality_threshold: 80,
            prime_position_multiplier: 1.0,
            good_position_multiplier: 0.7,
            avoid_position_multiplier: 0.3,
            enable_avoid_window: true,
        }
    }
}

impl TimeFilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, hour) in [
            ("time_filter.prime_start_hour", self.prime_start_hour),
            ("time_filter.prime_end_hour", self.prime_end_hour),
            ("time_filter.good_start_hour", self.good_start_hour),
            ("time_filter.good_end_hour", self.good_end_hour),
            ("time_filter.market_open_hour", self.market_open_hour),
            ("time_filter.market_close_hour", self.market_close_hour),
        ] {
            if hour > 24 {
                return Err(ConfigError::Range {
                    field,
                    detail: format!("must be a 24-hour clock hour, got {hour}"),
                });
            }
        }
        if self.prime_start_hour >= self.prime_end_hour {
            return Err(ConfigError::Relation(format!(
                "time_filter.prime_start_hour ({}) must be < prime_end_hour ({})",
                self.prime_start_hour, self.prime_end_hour
            )));
        }
        if self.good_start_hour >= self.good_end_hour {
            return Err(ConfigError::Relation(format!(
                "time_filter.good_start_hour ({}) must be < good_end_hour ({})",
                self.good_start_hour, self.good_end_hour
            )));
        }
        if self.market_open_hour >= self.market_close_hour {
            return Err(ConfigError::Relation(format!(
                "time_filter.market_open_hour ({}) must be < market_close_hour ({})",
                self.market_open_hour, self.market_close_hour
            )));
        }
        for (field, threshold) in [
            ("time_filter.prime_quality_threshold", self.prime_quality_threshold),
            ("time_filter.good_quality_threshold", self.good_quality_threshold),
            ("time_filter.avoid_quality_threshold", self.avoid_quality_threshold),
        ] {
            if threshold > 100 {
                return Err(ConfigError::Range {
                    field,
                    detail: format!("must be <= 100, got {threshold}"),
                });
            }
        }
        for (field, mult) in [
            ("time_filter.prime_position_multiplier", self.prime_position_multiplier),
            ("time_filter.good_position_multiplier", self.good_position_multiplier),
            ("time_filter.avoid_position_multiplier", self.avoid_position_multiplier),
        ] {
            check_finite(field, mult)?;
            if !(0.0..=1.0).contains(&mult) {
                return Err(ConfigError::Range {
                    field,
                    detail: format!("must be in [0, 1], got {mult}"),
                });
            }
        }
        Ok(())
    }
}

/// Entry-quality scoring: a 0-100 composite grade gating entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryQualityConfig {
    pub enabled: bool,
    /// Minimum total score to take any trade (C grade by default).
    pub min_trade_quality: u8,
    pub flow_scoring: bool,
    pub context_scoring: bool,
    pub time_scoring: bool,
}

impl Default for EntryQualityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_trade_quality: 50,
            flow_scoring: true,
            context_scoring: true,
            time_scoring: true,
        }
    }
}

impl EntryQualityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_trade_quality > 100 {
            return Err(ConfigError::Range {
                field: "entry_quality.min_trade_quality",
                detail: format!("must be <= 100, got {}", self.min_trade_quality),
            });
        }
        Ok(())
    }
}

/// Funded-account risk limits in account currency. All limits are positive
/// magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    pub enabled: bool,
    /// Hard daily loss halt, released at the day roll.
    pub daily_loss_limit: f64,
    /// Hard weekly loss halt, released at the ISO-week roll.
    pub weekly_loss_limit: f64,
    pub enable_weekly_limit: bool,
    /// Hard halt on drawdown from peak equity; never released.
    pub trailing_drawdown_limit: f64,
    /// Absolute contract cap per position.
    pub max_position_size: u32,
    /// Scale size down as limits are approached (circuit breaker).
    pub enable_position_scaling: bool,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily_loss_limit: 1000.0,
            weekly_loss_limit: 1500.0,
            enable_weekly_limit: true,
            trailing_drawdown_limit: 2000.0,
            max_position_size: 3,
            enable_position_scaling: true,
        }
    }
}

impl RiskLimitsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("risk_limits.daily_loss_limit", self.daily_loss_limit)?;
        check_positive("risk_limits.weekly_loss_limit", self.weekly_loss_limit)?;
        check_positive(
            "risk_limits.trailing_drawdown_limit",
            self.trailing_drawdown_limit,
        )?;
        if self.max_position_size == 0 {
            return Err(ConfigError::Range {
                field: "risk_limits.max_position_size",
                detail: "must be >= 1".into(),
            });
        }
        Ok(())
    }
}

// ── Playbook parameter blocks ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbFadeConfig {
    pub enabled: bool,
    pub ib_minutes: usize,
    /// Minimum extension as a multiple of IB range.
    pub extension_threshold: f64,
    pub min_extension_ticks: u32,
    pub max_aer: f64,
    pub min_acceptance_bars: usize,
    pub stop_buffer_r: f64,
}

impl Default for IbFadeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ib_minutes: 60,
            extension_threshold: 1.5,
            min_extension_ticks: 8,
            max_aer: 0.65,
            min_acceptance_bars: 3,
            stop_buffer_r: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VwapMagnetConfig {
    pub enabled: bool,
    /// Standard deviations for the dynamic band.
    pub band_multiplier: f64,
    pub min_rejection_velocity: f64,
    pub min_bars_for_vwap: usize,
    /// Exponent on √(t/T) time decay.
    pub time_decay_alpha: f64,
    pub stop_buffer_r: f64,
}

impl Default for VwapMagnetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            band_multiplier: 2.0,
            min_rejection_velocity: 0.3,
            min_bars_for_vwap: 30,
            time_decay_alpha: 0.5,
            stop_buffer_r: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub enabled: bool,
    pub min_iqf: f64,
    pub pullback_min: f64,
    pub pullback_max: f64,
    pub min_impulse_bars: usize,
    pub max_impulse_bars: usize,
    pub min_directional_commitment: f64,
    pub stop_buffer_r: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_iqf: 1.0,
            pullback_min: 0.382,
            pullback_max: 0.618,
            min_impulse_bars: 5,
            max_impulse_bars: 15,
            min_directional_commitment: 0.6,
            stop_buffer_r: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningDriveConfig {
    pub enabled: bool,
    pub min_drive_minutes: usize,
    pub max_drive_minutes: usize,
    /// Minimum drive range in price points.
    pub min_drive_range: f64,
    pub min_tape_decline: f64,
    pub max_volume_delta_kurtosis: f64,
    pub block_trade_sigma: f64,
    pub stop_buffer_r: f64,
}

impl Default for OpeningDriveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_drive_minutes: 5,
            max_drive_minutes: 15,
            min_drive_range: 4.0,
            min_tape_decline: 0.3,
            max_volume_delta_kurtosis: 3.0,
            block_trade_sigma: 2.0,
            stop_buffer_r: 0.25,
        }
    }
}

/// Arbitration priority weights. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitratorWeights {
    pub regime_alignment: f64,
    pub hourly_expectancy: f64,
    pub strength_percentile: f64,
    pub capital_efficiency: f64,
    pub correlation_contribution: f64,
}

impl Default for ArbitratorWeights {
    fn default() -> Self {
        Self {
            regime_alignment: 0.30,
            hourly_expectancy: 0.25,
            strength_percentile: 0.20,
            capital_efficiency: 0.15,
            correlation_contribution: 0.10,
        }
    }
}

impl ArbitratorWeights {
    pub fn sum(&self) -> f64 {
        self.regime_alignment
            + self.hourly_expectancy
            + self.strength_percentile
            + self.capital_efficiency
            + self.correlation_contribution
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitratorConfig {
    pub max_simultaneous_signals: usize,
    pub weight_learning: bool,
    pub learning_rate: f64,
    pub cross_entropy_filter: bool,
    pub similarity_threshold: f64,
    pub weights: ArbitratorWeights,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_signals: 1,
            weight_learning: false,
            learning_rate: 0.05,
            cross_entropy_filter: true,
            similarity_threshold: 0.7,
            weights: ArbitratorWeights::default(),
        }
    }
}

/// Orchestrator-mode configuration: account, sizing, heat, playbooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiPlaybookConfig {
    pub account_size: f64,
    /// Risk per trade as an account fraction.
    pub base_risk: f64,
    pub max_simultaneous_positions: usize,
    pub target_volatility: f64,
    pub max_portfolio_heat: f64,
    pub correlation_threshold: f64,
    pub min_regime_clarity: f64,
    pub reset_heat_per_session: bool,
    pub ib_fade: IbFadeConfig,
    pub vwap_magnet: VwapMagnetConfig,
    pub momentum: MomentumConfig,
    pub opening_drive: OpeningDriveConfig,
    pub arbitrator: ArbitratorConfig,
}

impl Default for MultiPlaybookConfig {
    fn default() -> Self {
        Self {
            account_size: 100_000.0,
            base_risk: 0.01,
            max_simultaneous_positions: 2,
            target_volatility: 0.01,
            max_portfolio_heat: 0.05,
            correlation_threshold: 0.7,
            min_regime_clarity: 0.5,
            reset_heat_per_session: true,
            ib_fade: IbFadeConfig::default(),
            vwap_magnet: VwapMagnetConfig::default(),
            momentum: MomentumConfig::default(),
            opening_drive: OpeningDriveConfig::default(),
            arbitrator: ArbitratorConfig::default(),
        }
    }
}

impl MultiPlaybookConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("multi_playbook.account_size", self.account_size)?;
        check_positive("multi_playbook.base_risk", self.base_risk)?;
        if self.base_risk >= 1.0 {
            return Err(ConfigError::Range {
                field: "multi_playbook.base_risk",
                detail: format!("must be < 1.0, got {}", self.base_risk),
            });
        }
        if self.max_simultaneous_positions == 0 {
            return Err(ConfigError::Range {
                field: "multi_playbook.max_simultaneous_positions",
                detail: "must be >= 1".into(),
            });
        }
        check_positive("multi_playbook.target_volatility", self.target_volatility)?;
        check_finite("multi_playbook.max_portfolio_heat", self.max_portfolio_heat)?;
        if self.max_portfolio_heat <= 0.0 || self.max_portfolio_heat > 1.0 {
            return Err(ConfigError::Range {
                field: "multi_playbook.max_portfolio_heat",
                detail: format!("must be in (0, 1], got {}", self.max_portfolio_heat),
            });
        }
        check_finite("multi_playbook.correlation_threshold", self.correlation_threshold)?;
        if !(0.0..1.0).contains(&self.correlation_threshold) {
            return Err(ConfigError::Range {
                field: "multi_playbook.correlation_threshold",
                detail: format!("must be in [0, 1), got {}", self.correlation_threshold),
            });
        }
        check_finite("multi_playbook.min_regime_clarity", self.min_regime_clarity)?;
        if !(0.0..1.0).contains(&self.min_regime_clarity) {
            return Err(ConfigError::Range {
                field: "multi_playbook.min_regime_clarity",
                detail: format!("must be in [0, 1), got {}", self.min_regime_clarity),
            });
        }

        check_positive("ib_fade.extension_threshold", self.ib_fade.extension_threshold)?;
        check_positive("ib_fade.max_aer", self.ib_fade.max_aer)?;
        if self.ib_fade.ib_minutes == 0 {
            return Err(ConfigError::Range {
                field: "ib_fade.ib_minutes",
                detail: "must be >= 1".into(),
            });
        }

        check_positive("vwap_magnet.band_multiplier", self.vwap_magnet.band_multiplier)?;
        check_non_negative(
            "vwap_magnet.min_rejection_velocity",
            self.vwap_magnet.min_rejection_velocity,
        )?;

        if !(self.momentum.pullback_min > 0.0
            && self.momentum.pullback_min < self.momentum.pullback_max
            && self.momentum.pullback_max < 1.0)
        {
            return Err(ConfigError::Relation(format!(
                "momentum pullback window must satisfy 0 < min ({}) < max ({}) < 1",
                self.momentum.pullback_min, self.momentum.pullback_max
            )));
        }
        if self.momentum.min_impulse_bars == 0
            || self.momentum.min_impulse_bars > self.momentum.max_impulse_bars
        {
            return Err(ConfigError::Relation(format!(
                "momentum impulse window must satisfy 1 <= min ({}) <= max ({})",
                self.momentum.min_impulse_bars, self.momentum.max_impulse_bars
            )));
        }

        if self.opening_drive.min_drive_minutes == 0
            || self.opening_drive.min_drive_minutes > self.opening_drive.max_drive_minutes
        {
            return Err(ConfigError::Relation(format!(
                "opening_drive window must satisfy 1 <= min ({}) <= max ({})",
                self.opening_drive.min_drive_minutes, self.opening_drive.max_drive_minutes
            )));
        }
        check_positive("opening_drive.min_drive_range", self.opening_drive.min_drive_range)?;

        let weights = self.arbitrator.weights;
        for (name, w) in [
            ("arbitrator.weights.regime_alignment", weights.regime_alignment),
            ("arbitrator.weights.hourly_expectancy", weights.hourly_expectancy),
            (
                "arbitrator.weights.strength_percentile",
                weights.strength_percentile,
            ),
            (
                "arbitrator.weights.capital_efficiency",
                weights.capital_efficiency,
            ),
            (
                "arbitrator.weights.correlation_contribution",
                weights.correlation_contribution,
            ),
        ] {
            check_non_negative(name, w)?;
        }
        if (weights.sum() - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Relation(format!(
                "arbitrator weights must sum to 1, got {}",
                weights.sum()
            )));
        }
        if self.arbitrator.max_simultaneous_signals == 0 {
            return Err(ConfigError::Range {
                field: "arbitrator.max_simultaneous_signals",
                detail: "must be >= 1".into(),
            });
        }
        check_positive("arbitrator.learning_rate", self.arbitrator.learning_rate)?;
        Ok(())
    }
}

/// Root configuration.
///
/// Scalar knobs come before the nested sections so the TOML form stays
/// well-ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub mode: EngineMode,
    /// Snapshot factor values every N bars; 0 disables.
    pub factor_snapshot_stride: u32,
    pub session: SessionConfig,
    pub opening_range: OpeningRangeConfig,
    pub buffers: BuffersConfig,
    pub factors: FactorsConfig,
    pub scoring: ScoringConfig,
    pub trade: TradeConfig,
    pub governance: GovernanceConfig,
    pub time_filter: TimeFilterConfig,
    pub entry_quality: EntryQualityConfig,
    pub risk_limits: RiskLimitsConfig,
    pub multi_playbook: MultiPlaybookConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::SingleStrategy,
            factor_snapshot_stride: 10,
            session: SessionConfig::default(),
            opening_range: OpeningRangeConfig::default(),
            buffers: BuffersConfig::default(),
            factors: FactorsConfig::default(),
            scoring: ScoringConfig::default(),
            trade: TradeConfig::default(),
            governance: GovernanceConfig::default(),
            time_filter: TimeFilterConfig::default(),
            entry_quality: EntryQualityConfig::default(),
            risk_limits: RiskLimitsConfig::default(),
            multi_playbook: MultiPlaybookConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Validate every invariant. Pure: calling twice gives the same verdict
    /// on the same value, and the config is never rewritten.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.opening_range.validate()?;
        self.buffers.validate()?;
        self.factors.validate()?;
        self.scoring.validate()?;
        self.trade.validate()?;
        self.governance.validate()?;
        self.time_filter.validate()?;
        self.entry_quality.validate()?;
        self.risk_limits.validate()?;
        if self.mode == EngineMode::MultiPlaybook {
            self.multi_playbook.validate()?;
        }

        // Required score cannot exceed the best attainable score.
        let max_score: f64 = {
            let w = self.scoring.weights;
            let mut total = 0.0;
            if self.factors.rel_volume.enabled {
                total += w.rel_vol;
            }
            if self.factors.price_action.enabled {
                total += w.price_action;
            }
            if self.factors.profile.enabled {
                total += w.profile;
            }
            if self.factors.vwap.enabled {
                total += w.vwap;
            }
            if self.factors.adx.enabled {
                total += w.adx;
            }
            total
        };
        if self.scoring.weak_trend_required > max_score + 1e-9 {
            return Err(ConfigError::Relation(format!(
                "scoring.weak_trend_required ({}) exceeds the maximum attainable score ({max_score})",
                self.scoring.weak_trend_required
            )));
        }
        Ok(())
    }
}
