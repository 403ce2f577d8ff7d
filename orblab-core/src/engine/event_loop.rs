//! Single-strategy event loop: confluence-gated OR breakout.
//!
//! Deterministic per-bar sequence (single-threaded):
//! 1. Validate the bar; bad input is logged and the bar skipped.
//! 2. Roll the session on local-date change; reset session cells.
//! 3. Update the OR (finalizing before any signal logic) and the
//!    indicator cells.
//! 4. Update the active trade; closures feed governance, account risk,
//!    and equity.
//! 5. When flat and the OR is ready, evaluate factors, score both sides,
//!    test the buffered triggers, and open a trade once governance, the
//!    account risk manager, the time-of-day filter, and the entry-quality
//!    gate all agree.
//! 6. Append an equity point for every bar after OR finalization.

use super::result::{FactorSnapshot, RunResult};
use super::state::{or_duration_minutes, session_clock, session_offset, SessionCtx};
use super::EngineError;
use crate::config::StrategyConfig;
use crate::detector::{build_targets, compute_stop, detect_breakout};
use crate::domain::{ActiveTrade, Bar, Direction, ExitReason, TradeRecord};
use crate::entry_quality::{EntryQualityScorer, SetupContext};
use crate::factors::{evaluate_factors, FactorInputs};
use crate::governance::{Governance, GovernanceEventKind};
use crate::indicators::{Adx, Atr, RelVolume, SessionVwap};
use crate::regime::RegimeProvider;
use crate::risk::AccountRiskManager;
use crate::scoring::compute_score;
use crate::time_filters::TimeOfDayFilter;
use crate::trade::{TradeManager, TradeUpdate, TwoPhaseTradeManager};
use chrono::{Duration, FixedOffset};
use tracing::{debug, info, warn};

/// Trade manager selection: the trailing block switches in the two-phase
/// variant.
pub(crate) enum LifecycleManager {
    Classic(TradeManager),
    TwoPhase(TwoPhaseTradeManager),
}

impl LifecycleManager {
    pub(crate) fn from_config(config: &StrategyConfig) -> Self {
        if config.trade.trailing.enabled {
            LifecycleManager::TwoPhase(TwoPhaseTradeManager::from_config(&config.trade))
        } else {
            LifecycleManager::Classic(TradeManager::from_config(&config.trade))
        }
    }

    pub(crate) fn update(
        &self,
        trade: &mut ActiveTrade,
        bar: &Bar,
    ) -> Result<TradeUpdate, crate::domain::TradeError> {
        match self {
            LifecycleManager::Classic(manager) => manager.update(trade, bar),
            LifecycleManager::TwoPhase(manager) => manager.update(trade, bar),
        }
    }
}

pub fn run_single(
    config: &StrategyConfig,
    bars: &[Bar],
    regime_provider: &dyn RegimeProvider,
) -> Result<RunResult, EngineError> {
    let offset = session_offset(config);
    let manager = LifecycleManager::from_config(config);
    let time_filter = TimeOfDayFilter::new(config.time_filter.clone());
    let quality_scorer = EntryQualityScorer::new(config.entry_quality.clone());
    let mut account_risk = config.risk_limits.enabled.then(|| {
        AccountRiskManager::new(
            config.risk_limits.clone(),
            config.multi_playbook.account_size,
        )
    });

    let mut atr = Atr::new(config.opening_range.atr_period);
    let mut adx = Adx::new(config.factors.adx.period, config.factors.adx.threshold);
    let mut rel_vol = RelVolume::new(
        config.factors.rel_volume.lookback,
        config.factors.rel_volume.spike_mult,
    );
    let mut vwap = SessionVwap::new();
    let mut governance = Governance::new(config.governance.clone());

    let mut session: Option<SessionCtx> = None;
    let mut active: Option<ActiveTrade> = None;
    let mut cumulative_r = 0.0;
    let mut open_atr_history: Vec<f64> = Vec::new();
    let mut prev_ts = None;

    let mut result = RunResult::default();

    for (bar_index, bar) in bars.iter().enumerate() {
        // 1. Input contract. Recoverable: log, count, skip.
        if let Err(err) = bar.validate() {
            warn!(bar_index, %err, "skipping malformed bar");
            result.diagnostics.bars_skipped += 1;
            continue;
        }
        if let Some(prev) = prev_ts {
            if bar.ts <= prev {
                warn!(bar_index, prev = %prev, curr = %bar.ts, "skipping non-monotonic bar");
                result.diagnostics.bars_skipped += 1;
                continue;
            }
        }
        prev_ts = Some(bar.ts);
        result.diagnostics.bars_processed += 1;

        let (date, local_time) = session_clock(bar.ts, offset);

        // 2. Session rollover.
        if session.as_ref().map(|s| s.date) != Some(date) {
            if let Some(finished) = session.take() {
                let summary = close_session(
                    config,
                    finished,
                    &mut active,
                    &mut governance,
                    &mut account_risk,
                    offset,
                    &mut cumulative_r,
                    &mut result,
                );
                result.sessions.push(summary);
            }
            governance.roll_session(bar.ts, date);
            vwap.reset();
            rel_vol.reset();
            let duration =
                or_duration_minutes(&config.opening_range, atr.value(), &open_atr_history);
            if let Some(atr_open) = atr.value() {
                open_atr_history.push(atr_open);
            }
            session = Some(SessionCtx::new(
                date,
                bar,
                duration,
                governance.events().len(),
            ));
            info!(%date, or_minutes = duration, "session opened");
        }
        let sess = session.as_mut().expect("session initialized above");

        // 3. OR lifecycle; the boundary bar finalizes before signal logic.
        let atr_before_bar = atr.value();
        if !sess.or.is_finalized() {
            sess.or.update(bar);
            let validity = config.opening_range.validity.enabled.then(|| {
                (
                    config.opening_range.validity.min_atr_mult,
                    config.opening_range.validity.max_atr_mult,
                )
            });
            if sess.or.finalize_if_due(bar.ts, atr_before_bar, validity) {
                sess.summary.or_built = true;
                sess.summary.or_valid = sess.or.is_valid();
                if sess.or.is_valid() {
                    info!(
                        high = sess.or.high(),
                        low = sess.or.low(),
                        width = sess.or.width(),
                        "opening range finalized"
                    );
                } else {
                    sess.no_signals = true;
                    warn!(width = sess.or.width(), "opening range invalid, session muted");
                }
            }
        }

        // Indicator cells update unconditionally.
        atr.update(bar);
        let adx_state = adx.update(bar);
        let rel_vol_state = rel_vol.update(bar.volume);
        vwap.update(bar.typical_price(), bar.volume);
        sess.bars.push(bar.clone());

        // 4. Active trade lifecycle.
        let mut trade_closed = false;
        if let Some(trade) = active.as_mut() {
            let trade_id = trade.id.clone();
            let update = manager
                .update(trade, bar)
                .map_err(|source| EngineError::TradeInvariant {
                    trade_id,
                    bar_index,
                    source,
                })?;
            trade_closed = update.closed;
        }
        if trade_closed {
            let trade = active.take().expect("closed trade present");
            if trade.exit_reason == Some(ExitReason::Stop) {
                sess.last_stop_out = Some(bar.ts);
            }
            settle_trade(
                &trade,
                &mut governance,
                &mut cumulative_r,
                &mut result.trades,
            );
            settle_account_risk(&mut account_risk, &trade, 1, config, offset);
            sess.summary.trades_completed += 1;
        }

        // 5. Signal detection when flat.
        if active.is_none() && sess.or.is_ready() && !sess.no_signals {
            let inputs = FactorInputs {
                session_bars: &sess.bars,
                rel_vol: rel_vol_state,
                vwap: vwap.value(),
                adx: adx_state,
            };
            let factors_long = evaluate_factors(Direction::Long, &inputs, &config.factors);
            let factors_short = evaluate_factors(Direction::Short, &inputs, &config.factors);
            let verdict_long = compute_score(
                Direction::Long,
                &factors_long,
                adx_state.trend_weak,
                &config.scoring,
            );
            let verdict_short = compute_score(
                Direction::Short,
                &factors_short,
                adx_state.trend_weak,
                &config.scoring,
            );

            let buffer = config.buffers.fixed
                + if config.buffers.use_atr {
                    atr.value().unwrap_or(0.0) * config.buffers.atr_mult
                } else {
                    0.0
                };

            if let Some(signal) = detect_breakout(
                &sess.or,
                bar,
                buffer,
                &verdict_long,
                &verdict_short,
                &factors_long,
                &factors_short,
                config.scoring.priority,
            ) {
                let window_params = time_filter.params_for(local_time);
                if let Some(reason) = governance.allows(local_time) {
                    governance.record_suppression(bar.ts, reason);
                    result.diagnostics.suppressed_signals += 1;
                } else if in_second_chance_window(config, sess, bar) {
                    result.diagnostics.second_chance_suppressed += 1;
                } else if account_risk
                    .as_ref()
                    .is_some_and(|risk| risk.halt().is_some())
                {
                    debug!("signal dropped while account risk halted");
                    result.diagnostics.risk_halted += 1;
                } else if time_filter.is_enabled() && window_params.skip_trading {
                    debug!(window = window_params.window.label(), "signal outside trading windows");
                    result.diagnostics.time_filter_rejected += 1;
                } else {
                    let stop = compute_stop(
                        signal.direction,
                        signal.entry_price,
                        &sess.or,
                        &sess.bars,
                        atr.value(),
                        &config.trade,
                    );

                    let mut quality_rejected = false;
                    if quality_scorer.is_enabled() {
                        let regime = regime_provider.classify(bar);
                        let setup = SetupContext::derive(
                            &sess.bars,
                            signal.direction,
                            signal.entry_price,
                            stop,
                            regime,
                            window_params.window,
                        );
                        let score = quality_scorer.score(&setup);
                        let window_bar = if time_filter.is_enabled() {
                            window_params.quality_threshold
                        } else {
                            0
                        };
                        if !quality_scorer.meets(&score, window_bar) {
                            debug!(
                                total = score.total,
                                grade = score.grade.label(),
                                "signal below the entry-quality bar"
                            );
                            result.diagnostics.quality_rejected += 1;
                            quality_rejected = true;
                        }
                    }

                    if !quality_rejected {
                        let targets = build_targets(
                            signal.direction,
                            signal.entry_price,
                            stop,
                            &config.trade,
                        );
                        let mut trade = ActiveTrade::new(
                            signal.id.clone(),
                            signal.direction,
                            signal.ts,
                            signal.entry_price,
                            stop,
                            targets,
                        )
                        .map_err(|source| EngineError::TradeInvariant {
                            trade_id: signal.id.clone(),
                            bar_index,
                            source,
                        })?;
                        trade.signal = Some(signal);
                        governance.register_signal();
                        sess.summary.signals_emitted += 1;
                        info!(
                            trade_id = %trade.id,
                            direction = trade.direction.label(),
                            entry = trade.entry_price,
                            stop = trade.current_stop,
                            "trade opened"
                        );
                        active = Some(trade);
                    }
                }
            }
        }

        // Factor snapshots at the configured stride.
        let stride = config.factor_snapshot_stride as u64;
        if stride > 0 && result.diagnostics.bars_processed % stride == 0 {
            let (score_long, score_short) = if sess.or.is_finalized() {
                let inputs = FactorInputs {
                    session_bars: &sess.bars,
                    rel_vol: rel_vol_state,
                    vwap: vwap.value(),
                    adx: adx_state,
                };
                let fl = evaluate_factors(Direction::Long, &inputs, &config.factors);
                let fs = evaluate_factors(Direction::Short, &inputs, &config.factors);
                (
                    Some(compute_score(Direction::Long, &fl, adx_state.trend_weak, &config.scoring).score),
                    Some(compute_score(Direction::Short, &fs, adx_state.trend_weak, &config.scoring).score),
                )
            } else {
                (None, None)
            };
            result.factor_snapshots.push(FactorSnapshot {
                ts: bar.ts,
                or_finalized: sess.or.is_finalized(),
                or_high: sess.or.is_finalized().then(|| sess.or.high()),
                or_low: sess.or.is_finalized().then(|| sess.or.low()),
                rel_vol: rel_vol_state.rel_vol,
                vwap: vwap.value(),
                adx: adx_state.adx,
                score_long,
                score_short,
            });
        }

        // 6. Equity point once the OR exists.
        if sess.or.is_finalized() {
            result.equity_curve.push(super::result::EquityPoint {
                ts: bar.ts,
                cumulative_r,
            });
        }
    }

    if let Some(finished) = session.take() {
        let summary = close_session(
            config,
            finished,
            &mut active,
            &mut governance,
            &mut account_risk,
            offset,
            &mut cumulative_r,
            &mut result,
        );
        result.sessions.push(summary);
    }
    result.governance_events = governance.take_events();
    result.risk_status = account_risk.as_ref().map(|risk| risk.status());
    Ok(result)
}

/// A re-break shortly after OR finalization following a same-session
/// stop-out is suppressed when the window is configured.
fn in_second_chance_window(config: &StrategyConfig, sess: &SessionCtx, bar: &Bar) -> bool {
    if config.governance.second_chance_minutes == 0 || sess.last_stop_out.is_none() {
        return false;
    }
    match sess.or.finalized_ts() {
        Some(finalized) => {
            bar.ts < finalized + Duration::minutes(config.governance.second_chance_minutes as i64)
        }
        None => false,
    }
}

/// Feed a closed trade's dollar P&L into the account risk manager.
pub(crate) fn settle_account_risk(
    account_risk: &mut Option<AccountRiskManager>,
    trade: &ActiveTrade,
    size: u32,
    config: &StrategyConfig,
    offset: FixedOffset,
) {
    if let Some(risk) = account_risk.as_mut() {
        let pnl = trade.realized_r.unwrap_or(0.0)
            * trade.initial_risk
            * size as f64
            * config.session.point_value;
        let exit_ts = trade.exit_ts.unwrap_or(trade.entry_ts);
        let (local_date, _) = session_clock(exit_ts, offset);
        risk.update_equity(pnl, local_date);
    }
}

/// Fold a closed trade into governance, cumulative R, and the trade log.
pub(crate) fn settle_trade(
    trade: &ActiveTrade,
    governance: &mut Governance,
    cumulative_r: &mut f64,
    trades: &mut Vec<TradeRecord>,
) {
    let realized = trade.realized_r.unwrap_or(0.0);
    *cumulative_r += realized;
    governance.register_close(
        trade.exit_ts.unwrap_or(trade.entry_ts),
        trade.is_full_stop(),
        realized,
    );
    info!(
        trade_id = %trade.id,
        reason = trade.exit_reason.map(|r| r.label()).unwrap_or("open"),
        r = realized,
        cumulative = *cumulative_r,
        "trade closed"
    );
    trades.push(trade.to_record(1));
}

/// End-of-session wrap-up: flatten, settle, summarize.
#[allow(clippy::too_many_arguments)]
fn close_session(
    config: &StrategyConfig,
    mut sess: SessionCtx,
    active: &mut Option<ActiveTrade>,
    governance: &mut Governance,
    account_risk: &mut Option<AccountRiskManager>,
    offset: FixedOffset,
    cumulative_r: &mut f64,
    result: &mut RunResult,
) -> super::result::SessionSummary {
    if config.governance.flatten_at_session_end {
        if let Some(mut trade) = active.take() {
            let ts = sess.bars.last().map(|b| b.ts).unwrap_or(trade.entry_ts);
            let price = sess.last_close().unwrap_or(trade.entry_price);
            // close() only errors on an already-closed trade, which cannot
            // be in `active`.
            let _ = trade.close(ts, price, ExitReason::Eod);
            settle_trade(&trade, governance, cumulative_r, &mut result.trades);
            settle_account_risk(account_risk, &trade, 1, config, offset);
            sess.summary.trades_completed += 1;
            // The session's last equity point was taken before the flatten;
            // fold the exit into it so the curve matches the trade log.
            if let Some(last) = result.equity_curve.last_mut() {
                if last.ts == ts {
                    last.cumulative_r = *cumulative_r;
                }
            }
        }
    }
    sess.summary.session_r = governance.state().session_realized_r;
    sess.summary.lockouts = governance.events()[sess.governance_events_at_start..]
        .iter()
        .filter(|e| matches!(e.kind, GovernanceEventKind::LockoutActivated { .. }))
        .count() as u32;
    sess.summary
}
