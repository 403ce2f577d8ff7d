//! Breakout signal detection: buffered triggers, stop placement, targets.

use crate::config::{StopMode, TradeConfig};
use crate::domain::{Bar, Direction, TradeSignal};
use crate::factors::FactorSet;
use crate::indicators::OpeningRange;
use crate::scoring::{resolve_direction, ScoreVerdict};

/// Detect a breakout through the buffered OR triggers.
///
/// A direction fires when the bar touches its trigger and the scorer passed
/// for that side. When both fire in the same bar, the higher score margin
/// wins; a dead tie goes to `priority`.
///
/// Entry is the trigger price (conservative fill) unless the bar opens
/// beyond it, in which case entry is the open: `max(open, trigger)` for
/// longs, `min` for shorts.
pub fn detect_breakout(
    or: &OpeningRange,
    bar: &Bar,
    buffer: f64,
    long: &ScoreVerdict,
    short: &ScoreVerdict,
    factors_long: &FactorSet,
    factors_short: &FactorSet,
    priority: Direction,
) -> Option<TradeSignal> {
    if !or.is_ready() {
        return None;
    }
    let upper = or.upper_trigger(buffer);
    let lower = or.lower_trigger(buffer);

    // A side is live only when its trigger was touched AND its score passed;
    // the scorer's margin tie-break then resolves a double fire.
    let long_live = ScoreVerdict {
        passes: long.passes && bar.high >= upper,
        ..*long
    };
    let short_live = ScoreVerdict {
        passes: short.passes && bar.low <= lower,
        ..*short
    };
    let direction = resolve_direction(&long_live, &short_live, priority)?;

    let (entry_price, verdict, factors) = match direction {
        Direction::Long => (bar.open.max(upper), long, factors_long),
        Direction::Short => (bar.open.min(lower), short, factors_short),
    };

    Some(TradeSignal {
        id: TradeSignal::make_id(direction, bar.ts),
        direction,
        ts: bar.ts,
        entry_price,
        score: verdict.score,
        required: verdict.required,
        factors: *factors,
        or_high: or.high(),
        or_low: or.low(),
    })
}

/// Place the initial stop for a breakout entry.
///
/// `session_bars` feeds the swing mode; `atr` feeds the ATR cap. A mode that
/// cannot produce a stop strictly on the protective side of entry falls back
/// to the opposite OR extreme.
pub fn compute_stop(
    direction: Direction,
    entry_price: f64,
    or: &OpeningRange,
    session_bars: &[Bar],
    atr: Option<f64>,
    config: &TradeConfig,
) -> f64 {
    let opposite = match direction {
        Direction::Long => or.low() - config.extra_stop_buffer,
        Direction::Short => or.high() + config.extra_stop_buffer,
    };

    let stop = match config.stop_mode {
        StopMode::OrOpposite => opposite,
        StopMode::Swing => {
            let lookback = config.swing_lookback.min(session_bars.len());
            if lookback == 0 {
                opposite
            } else {
                let window = &session_bars[session_bars.len() - lookback..];
                match direction {
                    Direction::Long => {
                        let swing_low =
                            window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
                        swing_low - config.extra_stop_buffer
                    }
                    Direction::Short => {
                        let swing_high = window
                            .iter()
                            .map(|b| b.high)
                            .fold(f64::NEG_INFINITY, f64::max);
                        swing_high + config.extra_stop_buffer
                    }
                }
            }
        }
        StopMode::AtrCapped => match atr {
            Some(atr) => {
                let cap = config.atr_stop_cap_mult * atr;
                let distance = (entry_price - opposite).abs().min(cap);
                entry_price - direction.sign() * distance
            }
            None => opposite,
        },
    };

    // A stop on the wrong side of entry cannot define risk; fall back to the
    // structural OR stop.
    let protective = match direction {
        Direction::Long => stop < entry_price,
        Direction::Short => stop > entry_price,
    };
    if protective {
        stop
    } else {
        opposite
    }
}

/// Build the profit-target ladder as (price, size_fraction) rungs.
///
/// With partials: T1 and T2 at their configured R levels and fractions, the
/// remainder riding to the runner. Without: one full-size target at
/// `primary_r`.
pub fn build_targets(
    direction: Direction,
    entry_price: f64,
    stop_price: f64,
    config: &TradeConfig,
) -> Vec<(f64, f64)> {
    let risk = (entry_price - stop_price).abs();
    let at_r = |r: f64| entry_price + direction.sign() * r * risk;

    if config.partials {
        let runner_fraction = 1.0 - config.t1_pct - config.t2_pct;
        let mut targets = vec![
            (at_r(config.t1_r), config.t1_pct),
            (at_r(config.t2_r), config.t2_pct),
        ];
        if runner_fraction > 1e-9 {
            targets.push((at_r(config.runner_r), runner_fraction));
        }
        targets
    } else {
        vec![(at_r(config.primary_r), 1.0)]
    }
}
