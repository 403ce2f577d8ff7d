//! Classic trade manager: partials, breakeven promotion, conservative fills.

use super::{
    any_unfilled_target_hit, favorable_extreme, stop_hit, target_touched, TradeEvent, TradeUpdate,
};
use crate::config::TradeConfig;
use crate::domain::{ActiveTrade, Bar, Direction, ExitReason, TradeError};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Manages an active trade bar by bar.
///
/// Breakeven promotion at `move_be_at_r`; no trailing phase (see
/// `TwoPhaseTradeManager` for that). With `conservative_fills`, a bar that
/// could touch both the stop and an unfilled target is resolved stop-first,
/// whatever the intrabar path might have been.
#[derive(Debug, Clone)]
pub struct TradeManager {
    pub conservative_fills: bool,
    pub move_be_at_r: f64,
    pub be_buffer: f64,
}

impl TradeManager {
    pub fn new(conservative_fills: bool, move_be_at_r: f64, be_buffer: f64) -> Self {
        Self {
            conservative_fills,
            move_be_at_r,
            be_buffer,
        }
    }

    pub fn from_config(config: &TradeConfig) -> Self {
        Self::new(
            config.conservative_fills,
            config.move_be_at_r,
            config.be_buffer,
        )
    }

    /// Advance an open trade by one bar.
    pub fn update(&self, trade: &mut ActiveTrade, bar: &Bar) -> Result<TradeUpdate, TradeError> {
        if trade.is_closed() {
            return Err(TradeError::AlreadyClosed);
        }
        let mut events = Vec::new();
        trade.bars_held += 1;

        // 1. R extremes from both bar extremes.
        trade.update_r_extremes(bar.high);
        trade.update_r_extremes(bar.low);

        // 2. Pessimistic co-occurrence: stop-first when both could fill.
        let stop = stop_hit(trade, bar);
        let target = any_unfilled_target_hit(trade, bar);
        if self.conservative_fills && stop && target {
            debug!(trade_id = %trade.id, "stop and target co-occur, assuming stop first");
            return close_on_stop(trade, bar.ts).map(|e| TradeUpdate::closed(vec![e]));
        }

        // 3. Stop hit.
        if stop {
            return close_on_stop(trade, bar.ts).map(|e| TradeUpdate::closed(vec![e]));
        }

        // 4. Partial target fills, in ladder order.
        fill_reached_targets(trade, bar, &mut events)?;
        if trade.remaining_size <= 1e-9 {
            let last_price = trade
                .fills
                .last()
                .map(|f| f.price)
                .unwrap_or(trade.entry_price);
            trade.close(bar.ts, last_price, ExitReason::Target)?;
            events.push(TradeEvent::TargetHit);
            info!(trade_id = %trade.id, r = trade.realized_r, "all targets filled");
            return Ok(TradeUpdate::closed(events));
        }

        // 5. Breakeven promotion off the bar's favorable extreme.
        if !trade.promoted() {
            let favorable_r = trade.current_r(favorable_extreme(trade.direction, bar));
            if favorable_r >= self.move_be_at_r {
                let stop = breakeven_stop(trade, self.be_buffer);
                if trade.promote_to_breakeven(stop) {
                    events.push(TradeEvent::BreakevenMove);
                    info!(trade_id = %trade.id, stop, "stop moved to breakeven");
                }
            }
        }

        Ok(TradeUpdate::open(events))
    }
}

pub(super) fn breakeven_stop(trade: &ActiveTrade, be_buffer: f64) -> f64 {
    match trade.direction {
        Direction::Long => trade.entry_price + be_buffer,
        Direction::Short => trade.entry_price - be_buffer,
    }
}

/// Close at the current stop. Reason is `Trailing` once the stop had been
/// promoted to or past entry, `Stop` otherwise.
pub(super) fn close_on_stop(
    trade: &mut ActiveTrade,
    ts: DateTime<Utc>,
) -> Result<TradeEvent, TradeError> {
    let past_entry = match trade.direction {
        Direction::Long => trade.current_stop >= trade.entry_price,
        Direction::Short => trade.current_stop <= trade.entry_price,
    };
    let reason = if trade.promoted() && past_entry {
        ExitReason::Trailing
    } else {
        ExitReason::Stop
    };
    let price = trade.current_stop;
    trade.close(ts, price, reason)?;
    info!(trade_id = %trade.id, price, r = trade.realized_r, reason = reason.label(), "stop hit");
    Ok(TradeEvent::StopHit)
}

/// Walk the ladder and fill every reached, unfilled target.
pub(super) fn fill_reached_targets(
    trade: &mut ActiveTrade,
    bar: &Bar,
    events: &mut Vec<TradeEvent>,
) -> Result<(), TradeError> {
    for index in 0..trade.targets.len() {
        let (price, filled) = {
            let t = &trade.targets[index];
            (t.price, t.filled)
        };
        if filled || !target_touched(trade.direction, price, bar) {
            continue;
        }
        trade.record_fill(bar.ts, index)?;
        let fill = trade.fills.last().expect("fill just recorded");
        info!(
            trade_id = %trade.id,
            target = index + 1,
            price = fill.price,
            r = fill.r_multiple,
            remaining = trade.remaining_size,
            "partial fill"
        );
        events.push(TradeEvent::PartialFill);
    }
    Ok(())
}
