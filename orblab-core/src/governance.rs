//! Governance — the discipline layer over signal emission.
//!
//! Denies new signals on the daily cap, an active lockout, or the time
//! cutoff. Tracks consecutive full stop-outs and cumulative session R to
//! trigger lockouts. All counters reset at the session boundary; the audit
//! event log survives.

use crate::config::GovernanceConfig;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutReason {
    LossStreak,
    DailyLoss,
}

impl LockoutReason {
    pub fn label(self) -> &'static str {
        match self {
            LockoutReason::LossStreak => "loss_streak",
            LockoutReason::DailyLoss => "daily_loss",
        }
    }
}

/// Why an emission was denied. Not an error; surfaced in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    DailyCap,
    Lockout,
    TimeCutoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GovernanceEventKind {
    LockoutActivated { reason: LockoutReason },
    SignalSuppressed { reason: SuppressReason },
    SessionRolled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: GovernanceEventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceState {
    pub session_date: Option<NaiveDate>,
    pub signals_today: u32,
    pub consecutive_full_stops: u32,
    pub lockout: Option<LockoutReason>,
    pub session_realized_r: f64,
}

#[derive(Debug, Clone)]
pub struct Governance {
    config: GovernanceConfig,
    state: GovernanceState,
    events: Vec<GovernanceEvent>,
}

impl Governance {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            state: GovernanceState::default(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &GovernanceState {
        &self.state
    }

    pub fn events(&self) -> &[GovernanceEvent] {
        &self.events
    }

    pub fn take_events(self) -> Vec<GovernanceEvent> {
        self.events
    }

    pub fn lockout_active(&self) -> bool {
        self.state.lockout.is_some()
    }

    /// Would a new signal be allowed right now? Pure check.
    ///
    /// `local_time` is the bar's exchange-local clock time (for the cutoff).
    pub fn allows(&self, local_time: NaiveTime) -> Option<SuppressReason> {
        if self.state.signals_today >= self.config.max_signals_per_day {
            return Some(SuppressReason::DailyCap);
        }
        if self.lockout_active() {
            return Some(SuppressReason::Lockout);
        }
        if let Some(cutoff) = self.config.time_cutoff {
            if local_time >= cutoff {
                return Some(SuppressReason::TimeCutoff);
            }
        }
        None
    }

    /// Record a denial that blocked an otherwise-firing signal.
    pub fn record_suppression(&mut self, ts: DateTime<Utc>, reason: SuppressReason) {
        warn!(?reason, "signal suppressed by governance");
        self.events.push(GovernanceEvent {
            ts,
            kind: GovernanceEventKind::SignalSuppressed { reason },
        });
    }

    pub fn register_signal(&mut self) {
        self.state.signals_today += 1;
    }

    /// Fold a closed trade into the discipline counters.
    ///
    /// A full stop-out (reason `stop`, no partials) extends the loss streak;
    /// any partial fill or non-stop exit resets it.
    pub fn register_close(&mut self, ts: DateTime<Utc>, full_stop: bool, realized_r: f64) {
        self.state.session_realized_r += realized_r;

        if full_stop {
            self.state.consecutive_full_stops += 1;
            if self.state.consecutive_full_stops >= self.config.lockout_after_losses
                && self.state.lockout.is_none()
            {
                self.activate_lockout(ts, LockoutReason::LossStreak);
            }
        } else {
            self.state.consecutive_full_stops = 0;
        }

        if let Some(cap) = self.config.max_daily_loss_r {
            if self.state.session_realized_r <= -cap && self.state.lockout.is_none() {
                self.activate_lockout(ts, LockoutReason::DailyLoss);
            }
        }
    }

    fn activate_lockout(&mut self, ts: DateTime<Utc>, reason: LockoutReason) {
        info!(reason = reason.label(), "lockout activated");
        self.state.lockout = Some(reason);
        self.events.push(GovernanceEvent {
            ts,
            kind: GovernanceEventKind::LockoutActivated { reason },
        });
    }

    /// Reset counters for a new session date. The event log is not touched.
    pub fn roll_session(&mut self, ts: DateTime<Utc>, date: NaiveDate) {
        if self.state.session_date == Some(date) {
            return;
        }
        self.state = GovernanceState {
            session_date: Some(date),
            ..GovernanceState::default()
        };
        self.events.push(GovernanceEvent {
            ts,
            kind: GovernanceEventKind::SessionRolled,
        });
    }
}
