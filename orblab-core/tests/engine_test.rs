//! Engine-level behavior: sessions, recovery, determinism, both modes.

use chrono::{DateTime, Duration, TimeZone, Utc};
use orblab_core::config::{EngineMode, StrategyConfig, TradeConfig};
use orblab_core::domain::{Bar, ExitReason};
use orblab_core::engine::BacktestEngine;
use orblab_core::governance::GovernanceEventKind;
use orblab_core::regime::{ConstantRegime, Regime, RegimeLabel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn ts(day: u32, min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 14, 30, 0).unwrap() + Duration::minutes(min)
}

fn make_bar(day: u32, min: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        ts: ts(day, min),
        open,
        high,
        low,
        close,
        volume: 1000,
    }
}

/// Seeded random-walk session: `n` one-minute bars starting at `base`.
fn synthetic_session(day: u32, n: usize, base: f64, rng: &mut StdRng) -> Vec<Bar> {
    let mut close = base;
    (0..n)
        .map(|i| {
            let drift: f64 = rng.gen_range(-0.2..0.25);
            let open = close;
            close = (close + drift).max(1.0);
            let high = open.max(close) + rng.gen_range(0.0..0.15);
            let low = open.min(close) - rng.gen_range(0.0..0.15);
            Bar {
                ts: ts(day, i as i64),
                open,
                high,
                low,
                close,
                volume: 800 + rng.gen_range(0..600),
            }
        })
        .collect()
}

fn open_gate_config() -> StrategyConfig {
    let mut config = StrategyConfig::default();
    config.scoring.base_required = 0.0;
    config.scoring.weak_trend_required = 0.0;
    config.opening_range.validity.enabled = false;
    config.trade = TradeConfig {
        partials: false,
        primary_r: 1.5,
        extra_stop_buffer: 0.05,
        move_be_at_r: 10.0,
        ..TradeConfig::default()
    };
    config.governance.second_chance_minutes = 0;
    config
}

#[test]
fn identical_runs_produce_identical_artifacts() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut bars = synthetic_session(2, 180, 100.0, &mut rng);
    bars.extend(synthetic_session(3, 180, bars.last().unwrap().close, &mut rng));

    let engine = BacktestEngine::new(open_gate_config()).unwrap();
    let a = engine.run(&bars).unwrap();
    let b = engine.run(&bars).unwrap();

    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn multi_playbook_runs_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(11);
    let bars = synthetic_session(2, 180, 100.0, &mut rng);

    let mut config = open_gate_config();
    config.mode = EngineMode::MultiPlaybook;
    let engine = BacktestEngine::new(config).unwrap();
    let regime = ConstantRegime(RegimeLabel::new(Regime::Range, 0.9));
    let a = engine.run_with_regime(&bars, &regime).unwrap();
    let b = engine.run_with_regime(&bars, &regime).unwrap();

    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn sessions_roll_on_local_date_change() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut bars = synthetic_session(2, 60, 100.0, &mut rng);
    bars.extend(synthetic_session(3, 60, 101.0, &mut rng));
    bars.extend(synthetic_session(4, 60, 102.0, &mut rng));

    let engine = BacktestEngine::new(open_gate_config()).unwrap();
    let result = engine.run(&bars).unwrap();

    assert_eq!(result.sessions.len(), 3);
    let rolls = result
        .governance_events
        .iter()
        .filter(|e| matches!(e.kind, GovernanceEventKind::SessionRolled))
        .count();
    assert_eq!(rolls, 3);
}

#[test]
fn invalid_or_mutes_the_session() {
    let mut config = open_gate_config();
    config.opening_range.validity.enabled = true;
    config.opening_range.validity.min_atr_mult = 0.25;
    config.opening_range.validity.max_atr_mult = 1.75;

    // Tight per-bar ranges but a wide drifting OR: width far above ATR
    let mut bars: Vec<Bar> = (0..15)
        .map(|i| {
            let base = 100.0 + i as f64 * 0.22;
            make_bar(2, i, base, base + 0.1, base - 0.1, base + 0.05)
        })
        .collect();
    // A breakout-shaped bar that would fire if the session were live
    bars.push(make_bar(2, 15, 103.6, 104.2, 103.5, 104.0));
    bars.push(make_bar(2, 16, 104.0, 104.5, 103.9, 104.3));

    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.sessions.len(), 1);
    assert!(result.sessions[0].or_built);
    assert!(!result.sessions[0].or_valid);
    assert_eq!(result.sessions[0].signals_emitted, 0);
    // Equity still tracks the (flat) session after finalization
    assert_eq!(result.equity_curve.len(), 2);
    assert!(result.equity_curve.iter().all(|p| p.cumulative_r == 0.0));
}

#[test]
fn malformed_and_non_monotonic_bars_are_skipped() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut bars = synthetic_session(2, 60, 100.0, &mut rng);
    // Inject a NaN bar and a timestamp replay
    bars[20].close = f64::NAN;
    bars[40].ts = bars[39].ts;

    let engine = BacktestEngine::new(open_gate_config()).unwrap();
    let result = engine.run(&bars).unwrap();

    assert_eq!(result.diagnostics.bars_skipped, 2);
    assert_eq!(result.diagnostics.bars_processed, 58);
}

#[test]
fn open_trade_flattens_at_session_end() {
    let mut bars: Vec<Bar> = (0..15)
        .map(|i| make_bar(2, i, 100.25, 100.50, 100.00, 100.25))
        .collect();
    // Breakout with no stop or target hit before the day ends
    bars.push(make_bar(2, 15, 100.60, 100.90, 100.58, 100.85));
    bars.push(make_bar(2, 16, 100.85, 101.00, 100.70, 100.95));
    bars.push(make_bar(2, 17, 100.95, 101.05, 100.80, 101.00));
    // Next session triggers the rollover
    for i in 0..16 {
        bars.push(make_bar(3, i, 101.0, 101.2, 100.9, 101.1));
    }

    let mut config = open_gate_config();
    config.governance.max_signals_per_day = 1;
    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::Eod);
    assert!((trade.exit_price - 101.00).abs() < 1e-12);
    assert_eq!(result.sessions.len(), 2);
    assert_eq!(result.sessions[0].trades_completed, 1);
}

#[test]
fn second_chance_window_suppresses_immediate_rebreak() {
    let mut config = open_gate_config();
    config.governance.second_chance_minutes = 30;

    let mut bars: Vec<Bar> = (0..15)
        .map(|i| make_bar(2, i, 100.25, 100.50, 100.00, 100.25))
        .collect();
    bars.push(make_bar(2, 15, 100.60, 100.90, 100.58, 100.85)); // entry
    bars.push(make_bar(2, 16, 100.40, 100.45, 99.60, 99.70)); // full stop
    bars.push(make_bar(2, 17, 100.60, 100.90, 100.56, 100.85)); // re-break

    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.diagnostics.second_chance_suppressed, 1);
}

#[test]
fn daily_loss_limit_halts_trading_for_the_day() {
    let mut config = open_gate_config();
    // Keep governance out of the way so the account risk manager is the
    // only gate under test
    config.governance.lockout_after_losses = 10;
    config.trade.extra_stop_buffer = 0.05;
    config.risk_limits.enabled = true;
    // Each full stop costs 0.65 points × $50 = $32.50; two of them breach
    config.risk_limits.daily_loss_limit = 50.0;

    let mut bars: Vec<Bar> = (0..15)
        .map(|i| make_bar(2, i, 100.25, 100.50, 100.00, 100.25))
        .collect();
    bars.push(make_bar(2, 15, 100.60, 100.90, 100.58, 100.85)); // trade A
    bars.push(make_bar(2, 16, 100.40, 100.45, 99.60, 99.70)); // full stop
    bars.push(make_bar(2, 17, 100.60, 100.90, 100.56, 100.85)); // trade B
    bars.push(make_bar(2, 18, 100.40, 100.45, 99.60, 99.70)); // full stop, halt
    bars.push(make_bar(2, 19, 100.60, 100.90, 100.56, 100.85)); // suppressed

    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();

    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.diagnostics.risk_halted, 1);
    let status = result.risk_status.expect("risk limits were enabled");
    assert!(!status.can_trade);
    assert_eq!(
        status.halt,
        Some(orblab_core::risk::HaltReason::DailyLossLimit)
    );
    assert!((status.daily_pnl + 65.0).abs() < 1e-9);
    assert!((status.current_equity - 99_935.0).abs() < 1e-9);
}

#[test]
fn time_filter_skip_window_mutes_signals() {
    let mut config = open_gate_config();
    // Bars run 14:30-14:49 local; with the good window moved aside and the
    // avoid window disabled, hour 14 is a skip hour
    config.time_filter.enabled = true;
    config.time_filter.good_start_hour = 12;
    config.time_filter.good_end_hour = 13;
    config.time_filter.enable_avoid_window = false;

    let mut bars: Vec<Bar> = (0..15)
        .map(|i| make_bar(2, i, 100.25, 100.50, 100.00, 100.25))
        .collect();
    bars.push(make_bar(2, 15, 100.60, 100.90, 100.58, 100.85));

    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.diagnostics.time_filter_rejected, 1);
}

#[test]
fn quality_gate_rejects_below_the_bar() {
    let mut config = open_gate_config();
    config.entry_quality.enabled = true;
    config.entry_quality.min_trade_quality = 100;

    let mut bars: Vec<Bar> = (0..15)
        .map(|i| make_bar(2, i, 100.25, 100.50, 100.00, 100.25))
        .collect();
    bars.push(make_bar(2, 15, 100.60, 100.90, 100.58, 100.85));
    bars.push(make_bar(2, 16, 100.85, 101.00, 100.70, 100.95));

    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();
    assert!(result.trades.is_empty());
    assert!(result.diagnostics.quality_rejected >= 1);

    // An open floor lets the same tape trade
    let mut config = open_gate_config();
    config.entry_quality.enabled = true;
    config.entry_quality.min_trade_quality = 0;
    config.governance.max_signals_per_day = 1;
    let engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&bars).unwrap();
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.diagnostics.quality_rejected, 0);
}

#[test]
fn risk_contract_cap_flows_through_orchestrator_sizing() {
    let mut config = StrategyConfig::default();
    config.mode = EngineMode::MultiPlaybook;
    config.opening_range.base_minutes = 5;
    config.opening_range.validity.enabled = false;
    config.governance.max_signals_per_day = 1;
    config.risk_limits.enabled = true;
    config.risk_limits.max_position_size = 2;

    // Same exhausted opening drive as the fade test below
    let volumes = [5000u64, 4800, 4600, 4400, 3000, 2600, 2300, 2000];
    let mut bars = Vec::new();
    for (i, volume) in volumes.iter().enumerate() {
        let base = 100.0 + i as f64 * 0.8;
        let (open, close) = if i < 4 {
            (base, base + 0.8)
        } else if i == 6 {
            (base, base + 0.5)
        } else {
            (base + 0.5, base + 0.1)
        };
        bars.push(Bar {
            ts: ts(2, i as i64),
            open,
            high: base + 0.9,
            low: base - 0.1,
            close,
            volume: *volume,
        });
    }

    let engine = BacktestEngine::new(config).unwrap();
    let regime = ConstantRegime(RegimeLabel::new(Regime::Volatile, 1.0));
    let result = engine.run_with_regime(&bars, &regime).unwrap();

    // Uncapped this setup sizes to 7 contracts; the 2-contract cap feeds
    // the base before the volatility taper, leaving a single contract.
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.size, 1);
    let status = result.risk_status.expect("risk limits were enabled");
    assert!(status.can_trade);
    // One contract of P&L at $50 a point lands in the account equity
    let risk_points = (trade.entry_price - trade.initial_stop).abs();
    let expected_equity = 100_000.0 + trade.realized_r * risk_points * 50.0;
    assert!((status.current_equity - expected_equity).abs() < 1e-6);
}

#[test]
fn opening_drive_fade_flows_through_the_orchestrator() {
    let mut config = StrategyConfig::default();
    config.mode = EngineMode::MultiPlaybook;
    config.opening_range.base_minutes = 5;
    config.opening_range.validity.enabled = false;
    config.governance.max_signals_per_day = 1;

    // Exhausted 8-bar opening drive: +0.8/bar on a fading, thin-tailed tape
    let volumes = [5000u64, 4800, 4600, 4400, 3000, 2600, 2300, 2000];
    let mut bars = Vec::new();
    for (i, volume) in volumes.iter().enumerate() {
        let base = 100.0 + i as f64 * 0.8;
        let (open, close) = if i < 4 {
            (base, base + 0.8)
        } else if i == 6 {
            (base, base + 0.5)
        } else {
            (base + 0.5, base + 0.1)
        };
        bars.push(Bar {
            ts: ts(2, i as i64),
            open,
            high: base + 0.9,
            low: base - 0.1,
            close,
            volume: *volume,
        });
    }

    let engine = BacktestEngine::new(config).unwrap();
    let regime = ConstantRegime(RegimeLabel::new(Regime::Volatile, 1.0));
    let result = engine.run_with_regime(&bars, &regime).unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.playbook.as_deref(), Some("opening_drive_reversal"));
    assert!(trade.arbitration_score.is_some());
    assert!(trade.size >= 1);
    assert_eq!(result.sessions.len(), 1);
    assert_eq!(result.sessions[0].signals_emitted, 1);
}
