//! Multi-playbook orchestrator: candidates → arbitration → sizing → book.
//!
//! Per bar, after the shared session machinery updates: open positions get
//! their playbook's stop proposal (ratcheted), the salvage predicate, and
//! the standard fills/stops machinery; then, if a position slot is free and
//! the OR is ready, every regime-eligible playbook is polled for a
//! candidate, the arbitrator picks at most `max_simultaneous_signals`, and
//! the portfolio manager sizes each winner under the heat budget.
//! Governance gates every emission, exactly as in the single-strategy path.

use super::event_loop::LifecycleManager;
use super::result::{RejectedSignal, RejectionReason, RunResult};
use super::state::{
    or_duration_minutes, session_clock, session_length_bars, session_offset, SessionCtx,
};
use super::EngineError;
use crate::arbitration::{Arbitrator, CorrelationMatrix, PriorityBreakdown, ScoredCandidate};
use crate::config::StrategyConfig;
use crate::domain::{ActiveTrade, Bar, ExitReason};
use crate::entry_quality::{EntryQualityScorer, SetupContext};
use crate::governance::Governance;
use crate::indicators::{Adx, Atr, RelVolume, SessionVwap};
use crate::playbooks::{
    CandidateSignal, IbFade, MomentumContinuation, OpeningDriveReversal, Playbook,
    PlaybookRegistry, SessionFeatures, SessionView, VwapMagnet,
};
use crate::portfolio::PortfolioManager;
use crate::regime::{Regime, RegimeProvider};
use crate::risk::AccountRiskManager;
use crate::time_filters::TimeOfDayFilter;
use chrono::{FixedOffset, Timelike};
use tracing::{debug, info, warn};

/// A sized, live position owned by the orchestrator.
struct OpenPosition {
    trade: ActiveTrade,
    playbook: String,
    size: u32,
    entry_hour: u32,
    expected_r: f64,
    breakdown: PriorityBreakdown,
}

/// Build the closed registry in its stable arbitration order.
fn build_registry(config: &StrategyConfig) -> PlaybookRegistry {
    let mp = &config.multi_playbook;
    let mut registry = PlaybookRegistry::new();
    if mp.ib_fade.enabled {
        registry.register(Box::new(IbFade::new(mp.ib_fade.clone())));
    }
    if mp.vwap_magnet.enabled {
        registry.register(Box::new(VwapMagnet::new(mp.vwap_magnet.clone())));
    }
    if mp.momentum.enabled {
        registry.register(Box::new(MomentumContinuation::new(mp.momentum.clone())));
    }
    if mp.opening_drive.enabled {
        registry.register(Box::new(OpeningDriveReversal::new(mp.opening_drive.clone())));
    }
    registry
}

pub fn run_multi(
    config: &StrategyConfig,
    bars: &[Bar],
    regime_provider: &dyn RegimeProvider,
) -> Result<RunResult, EngineError> {
    let offset = session_offset(config);
    let manager = LifecycleManager::from_config(config);
    let session_bars_total = session_length_bars(config);
    let time_filter = TimeOfDayFilter::new(config.time_filter.clone());
    let quality_scorer = EntryQualityScorer::new(config.entry_quality.clone());
    let mut account_risk = config.risk_limits.enabled.then(|| {
        AccountRiskManager::new(
            config.risk_limits.clone(),
            config.multi_playbook.account_size,
        )
    });

    let mut registry = build_registry(config);
    let mut arbitrator = Arbitrator::new(config.multi_playbook.arbitrator.clone());
    let correlations = CorrelationMatrix::with_defaults();
    let mut portfolio = PortfolioManager::new(&config.multi_playbook, config.session.point_value);

    let mut atr = Atr::new(config.opening_range.atr_period);
    let mut adx = Adx::new(config.factors.adx.period, config.factors.adx.threshold);
    let mut rel_vol = RelVolume::new(
        config.factors.rel_volume.lookback,
        config.factors.rel_volume.spike_mult,
    );
    let mut vwap = SessionVwap::new();
    let mut governance = Governance::new(config.governance.clone());

    let mut session: Option<SessionCtx> = None;
    let mut positions: Vec<OpenPosition> = Vec::new();
    let mut cumulative_r = 0.0;
    let mut open_atr_history: Vec<f64> = Vec::new();
    let mut last_session_close: Option<f64> = None;
    let mut prev_ts = None;

    let mut result = RunResult::default();

    for (bar_index, bar) in bars.iter().enumerate() {
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

        // Session rollover.
        if session.as_ref().map(|s| s.date) != Some(date) {
            if let Some(finished) = session.take() {
                last_session_close = finished.last_close().or(last_session_close);
                let summary = flatten_session(
                    config,
                    finished,
                    &mut positions,
                    &mut governance,
                    &mut portfolio,
                    &mut registry,
                    &mut arbitrator,
                    &mut account_risk,
                    offset,
                    &mut cumulative_r,
                    &mut result,
                );
                result.sessions.push(summary);
                if config.multi_playbook.reset_heat_per_session {
                    portfolio.reset_heat();
                }
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

        // OR lifecycle, finalized before any signal logic.
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
                if !sess.or.is_valid() {
                    sess.no_signals = true;
                    warn!(width = sess.or.width(), "opening range invalid, session muted");
                }
            }
        }

        atr.update(bar);
        adx.update(bar);
        rel_vol.update(bar.volume);
        vwap.update(bar.typical_price(), bar.volume);
        sess.bars.push(bar.clone());

        let regime = regime_provider.classify(bar);
        let hour = local_time.hour();
        let window_params = time_filter.params_for(local_time);

        // Position maintenance: playbook stops, salvage, standard machinery.
        for pos in positions.iter_mut() {
            let view = SessionView {
                bars: &sess.bars,
                session_open: sess.session_open,
                prior_close: last_session_close,
                vwap: &vwap,
                atr: atr.value(),
                regime,
                features: SessionFeatures::default(),
                tick_size: config.session.tick_size,
                session_length_bars: session_bars_total,
            };
            let playbook = registry
                .get(&pos.playbook)
                .expect("open position references a registered playbook");

            if let Some(proposed) = playbook.update_stop(&pos.trade, &view) {
                // Ratchet: proposals against the trade are discarded.
                pos.trade.tighten_stop(proposed);
            }
            if playbook.check_salvage(&pos.trade, &view) {
                pos.trade
                    .close(bar.ts, bar.close, ExitReason::Salvage)
                    .map_err(|source| EngineError::TradeInvariant {
                        trade_id: pos.trade.id.clone(),
                        bar_index,
                        source,
                    })?;
                continue;
            }
            let trade_id = pos.trade.id.clone();
            manager
                .update(&mut pos.trade, bar)
                .map_err(|source| EngineError::TradeInvariant {
                    trade_id,
                    bar_index,
                    source,
                })?;
        }

        // Settle closed positions in book order.
        let closed: Vec<OpenPosition> = {
            let mut open = Vec::with_capacity(positions.len());
            let mut closed = Vec::new();
            for pos in positions.drain(..) {
                if pos.trade.is_closed() {
                    closed.push(pos);
                } else {
                    open.push(pos);
                }
            }
            positions = open;
            closed
        };
        for pos in closed {
            settle_position(
                pos,
                &mut governance,
                &mut portfolio,
                &mut registry,
                &mut arbitrator,
                &mut account_risk,
                offset,
                config.session.point_value,
                &mut cumulative_r,
                &mut result,
            );
            sess.summary.trades_completed += 1;
        }

        // Candidate generation, arbitration, sizing.
        if sess.or.is_ready()
            && !sess.no_signals
            && positions.len() < config.multi_playbook.max_simultaneous_positions
        {
            let mut candidates: Vec<(usize, CandidateSignal)> = Vec::new();
            for (order, playbook) in registry.iter().enumerate() {
                if positions.iter().any(|p| p.playbook == playbook.name()) {
                    continue;
                }
                let eligible = playbook.preferred_regimes().contains(&regime.regime)
                    || regime.regime == Regime::Transitional;
                if !eligible {
                    continue;
                }
                let view = SessionView {
                    bars: &sess.bars,
                    session_open: sess.session_open,
                    prior_close: last_session_close,
                    vwap: &vwap,
                    atr: atr.value(),
                    regime,
                    features: SessionFeatures::default(),
                    tick_size: config.session.tick_size,
                    session_length_bars: session_bars_total,
                };
                if let Some(candidate) = playbook.check_entry(&view) {
                    if !candidate.is_well_formed() {
                        warn!(playbook = playbook.name(), "discarding malformed candidate");
                        continue;
                    }
                    if time_filter.is_enabled() && window_params.skip_trading {
                        debug!(
                            playbook = playbook.name(),
                            window = window_params.window.label(),
                            "candidate outside trading windows"
                        );
                        result.diagnostics.time_filter_rejected += 1;
                        continue;
                    }
                    if quality_scorer.is_enabled() {
                        let setup = SetupContext::derive(
                            &sess.bars,
                            candidate.direction,
                            candidate.entry_price,
                            candidate.initial_stop,
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
                                playbook = playbook.name(),
                                total = score.total,
                                grade = score.grade.label(),
                                "candidate below the entry-quality bar"
                            );
                            result.diagnostics.quality_rejected += 1;
                            continue;
                        }
                    }
                    candidates.push((order, candidate));
                }
            }

            if !candidates.is_empty() {
                let open_names: Vec<String> =
                    positions.iter().map(|p| p.playbook.clone()).collect();
                if let Some(decision) =
                    arbitrator.arbitrate(candidates, hour, &open_names, &correlations)
                {
                    for loser in &decision.rejected {
                        result.rejected_signals.push(rejection_record(
                            loser,
                            RejectionReason::Arbitration,
                        ));
                    }
                    for winner in decision.selected {
                        if positions.len() >= config.multi_playbook.max_simultaneous_positions {
                            break;
                        }
                        if let Some(reason) = governance.allows(local_time) {
                            governance.record_suppression(bar.ts, reason);
                            result.diagnostics.suppressed_signals += 1;
                            continue;
                        }
                        if account_risk
                            .as_ref()
                            .is_some_and(|risk| risk.halt().is_some())
                        {
                            debug!(
                                playbook = winner.candidate.playbook,
                                "winner dropped while account risk halted"
                            );
                            result.diagnostics.risk_halted += 1;
                            continue;
                        }
                        let open_names: Vec<String> =
                            positions.iter().map(|p| p.playbook.clone()).collect();
                        let time_multiplier = if time_filter.is_enabled() {
                            window_params.position_multiplier
                        } else {
                            1.0
                        };
                        let sizing = portfolio.size_signal(
                            &winner.candidate,
                            &open_names,
                            &correlations,
                            regime.clarity,
                            None,
                            time_multiplier,
                            account_risk.as_ref(),
                        );
                        if sizing.final_size == 0 {
                            let reason = if sizing.risk_capped_base == 0 {
                                RejectionReason::RiskLimited
                            } else {
                                RejectionReason::HeatExhausted
                            };
                            result.rejected_signals.push(rejection_record(&winner, reason));
                            continue;
                        }
                        match open_position(&winner, sizing.final_size, hour, bar_index) {
                            Ok(pos) => {
                                governance.register_signal();
                                sess.summary.signals_emitted += 1;
                                info!(
                                    playbook = %pos.playbook,
                                    direction = pos.trade.direction.label(),
                                    entry = pos.trade.entry_price,
                                    size = pos.size,
                                    priority = winner.priority,
                                    "position opened"
                                );
                                positions.push(pos);
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
        }

        // Factor snapshots at the configured stride. The orchestrator does
        // not score confluence, so only the raw cells are sampled.
        let stride = config.factor_snapshot_stride as u64;
        if stride > 0 && result.diagnostics.bars_processed % stride == 0 {
            result.factor_snapshots.push(super::result::FactorSnapshot {
                ts: bar.ts,
                or_finalized: sess.or.is_finalized(),
                or_high: sess.or.is_finalized().then(|| sess.or.high()),
                or_low: sess.or.is_finalized().then(|| sess.or.low()),
                rel_vol: rel_vol.state().rel_vol,
                vwap: vwap.value(),
                adx: adx.state().adx,
                score_long: None,
                score_short: None,
            });
        }

        if sess.or.is_finalized() {
            result.equity_curve.push(super::result::EquityPoint {
                ts: bar.ts,
                cumulative_r,
            });
        }
    }

    if let Some(finished) = session.take() {
        let summary = flatten_session(
            config,
            finished,
            &mut positions,
            &mut governance,
            &mut portfolio,
            &mut registry,
            &mut arbitrator,
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

fn rejection_record(scored: &ScoredCandidate, reason: RejectionReason) -> RejectedSignal {
    RejectedSignal {
        ts: scored.candidate.ts,
        playbook: scored.candidate.playbook.to_string(),
        direction: scored.candidate.direction,
        strength: scored.candidate.strength,
        priority: scored.priority,
        reason,
    }
}

/// Materialize an arbitration winner into a live position.
fn open_position(
    winner: &ScoredCandidate,
    size: u32,
    entry_hour: u32,
    bar_index: usize,
) -> Result<OpenPosition, EngineError> {
    let candidate = &winner.candidate;
    let id = format!(
        "{}-{}",
        candidate.playbook,
        candidate.ts.format("%Y%m%d-%H%M%S")
    );
    let targets: Vec<(f64, f64)> = candidate
        .targets
        .iter()
        .map(|t| (t.price, t.size_fraction))
        .collect();
    let mut trade = ActiveTrade::new(
        id.clone(),
        candidate.direction,
        candidate.ts,
        candidate.entry_price,
        candidate.initial_stop,
        targets,
    )
    .map_err(|source| EngineError::TradeInvariant {
        trade_id: id,
        bar_index,
        source,
    })?;
    trade.playbook = Some(candidate.playbook.to_string());
    trade.arbitration_score = Some(winner.priority);

    Ok(OpenPosition {
        trade,
        playbook: candidate.playbook.to_string(),
        size,
        entry_hour,
        expected_r: candidate.expected_r(),
        breakdown: winner.breakdown,
    })
}

/// Fold a closed position into every stateful collaborator.
#[allow(clippy::too_many_arguments)]
fn settle_position(
    pos: OpenPosition,
    governance: &mut Governance,
    portfolio: &mut PortfolioManager,
    registry: &mut PlaybookRegistry,
    arbitrator: &mut Arbitrator,
    account_risk: &mut Option<AccountRiskManager>,
    offset: FixedOffset,
    point_value: f64,
    cumulative_r: &mut f64,
    result: &mut RunResult,
) {
    let realized = pos.trade.realized_r.unwrap_or(0.0);
    *cumulative_r += realized;
    governance.register_close(
        pos.trade.exit_ts.unwrap_or(pos.trade.entry_ts),
        pos.trade.is_full_stop(),
        realized,
    );
    if let Some(risk) = account_risk.as_mut() {
        let pnl = realized * pos.trade.initial_risk * pos.size as f64 * point_value;
        let exit_ts = pos.trade.exit_ts.unwrap_or(pos.trade.entry_ts);
        let (local_date, _) = session_clock(exit_ts, offset);
        risk.update_equity(pnl, local_date);
    }
    portfolio.release(pos.size, pos.trade.initial_risk);
    registry.record_result(&pos.playbook, realized);
    if let Some(stats) = registry.stats_of(&pos.playbook) {
        debug!(
            playbook = %pos.playbook,
            trades = stats.trades,
            expectancy = stats.expectancy(),
            "playbook stats updated"
        );
    }
    arbitrator.record_outcome(
        &pos.playbook,
        pos.entry_hour,
        &pos.breakdown,
        pos.expected_r,
        realized,
    );
    info!(
        trade_id = %pos.trade.id,
        playbook = %pos.playbook,
        reason = pos.trade.exit_reason.map(|r| r.label()).unwrap_or("open"),
        r = realized,
        "position closed"
    );
    result.trades.push(pos.trade.to_record(pos.size));
}

/// End-of-session wrap-up for the orchestrator book.
#[allow(clippy::too_many_arguments)]
fn flatten_session(
    config: &StrategyConfig,
    mut sess: SessionCtx,
    positions: &mut Vec<OpenPosition>,
    governance: &mut Governance,
    portfolio: &mut PortfolioManager,
    registry: &mut PlaybookRegistry,
    arbitrator: &mut Arbitrator,
    account_risk: &mut Option<AccountRiskManager>,
    offset: FixedOffset,
    cumulative_r: &mut f64,
    result: &mut RunResult,
) -> super::result::SessionSummary {
    if config.governance.flatten_at_session_end && !positions.is_empty() {
        let ts = sess.bars.last().map(|b| b.ts);
        let price = sess.last_close();
        for mut pos in positions.drain(..) {
            let close_ts = ts.unwrap_or(pos.trade.entry_ts);
            let close_price = price.unwrap_or(pos.trade.entry_price);
            let _ = pos.trade.close(close_ts, close_price, ExitReason::Eod);
            settle_position(
                pos,
                governance,
                portfolio,
                registry,
                arbitrator,
                account_risk,
                offset,
                config.session.point_value,
                cumulative_r,
                result,
            );
            sess.summary.trades_completed += 1;
        }
        // Fold the flatten into the session's final equity point so the
        // curve matches the trade log.
        if let (Some(last), Some(close_ts)) = (result.equity_curve.last_mut(), ts) {
            if last.ts == close_ts {
                last.cumulative_r = *cumulative_r;
            }
        }
    }
    sess.summary.session_r = governance.state().session_realized_r;
    sess.summary.lockouts = governance.events()[sess.governance_events_at_start..]
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                crate::governance::GovernanceEventKind::LockoutActivated { .. }
            )
        })
        .count() as u32;
    sess.summary
}
