//! Two-phase trade manager: early breakeven, then an R-space trailing stop.
//!
//! Phase boundaries (defaults): breakeven at 0.3 R, trailing from 0.5 R at a
//! 0.3 R distance behind the peak favorable excursion. The early promotion
//! protects small wins; the trail rides larger moves. Stops only tighten.

use super::manager::{breakeven_stop, close_on_stop, fill_reached_targets};
use super::{any_unfilled_target_hit, favorable_extreme, stop_hit, TradeEvent, TradeUpdate};
use crate::config::TradeConfig;
use crate::domain::{ActiveTrade, Bar, ExitReason, TradeError, TradePhase};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TwoPhaseTradeManager {
    pub conservative_fills: bool,
    pub breakeven_threshold_r: f64,
    pub trailing_start_r: f64,
    pub trail_distance_r: f64,
    pub be_buffer: f64,
}

impl TwoPhaseTradeManager {
    pub fn new(
        conservative_fills: bool,
        breakeven_threshold_r: f64,
        trailing_start_r: f64,
        trail_distance_r: f64,
        be_buffer: f64,
    ) -> Self {
        Self {
            conservative_fills,
            breakeven_threshold_r,
            trailing_start_r,
            trail_distance_r,
            be_buffer,
        }
    }

    /// Wire from the trade config; the trailing block supplies the phase
    /// boundaries.
    pub fn from_config(config: &TradeConfig) -> Self {
        Self::new(
            config.conservative_fills,
            config.move_be_at_r,
            config.trailing.start_r,
            config.trailing.distance_r,
            config.be_buffer,
        )
    }

    /// Advance an open trade by one bar.
    ///
    /// Same step order as the classic manager; stop adjustments made here
    /// are armed for the next bar.
    pub fn update(&self, trade: &mut ActiveTrade, bar: &Bar) -> Result<TradeUpdate, TradeError> {
        if trade.is_closed() {
            return Err(TradeError::AlreadyClosed);
        }
        let mut events = Vec::new();
        trade.bars_held += 1;

        // 1. R extremes; the peak drives the trail.
        trade.update_r_extremes(bar.high);
        trade.update_r_extremes(bar.low);

        // 2. Pessimistic co-occurrence.
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

        // 4. Partial fills.
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

        // 5. Breakeven promotion.
        if !trade.promoted() {
            let favorable_r = trade.current_r(favorable_extreme(trade.direction, bar));
            if favorable_r >= self.breakeven_threshold_r {
                let stop = breakeven_stop(trade, self.be_buffer);
                if trade.promote_to_breakeven(stop) {
                    events.push(TradeEvent::BreakevenMove);
                    info!(
                        trade_id = %trade.id,
                        stop,
                        r = favorable_r,
                        "stop moved to breakeven"
                    );
                }
            }
        }

        // 6. Trailing off the peak favorable excursion.
        if trade.peak_favorable_r >= self.trailing_start_r {
            if trade.phase != TradePhase::Trailing {
                trade.activate_trailing();
                debug!(trade_id = %trade.id, peak = trade.peak_favorable_r, "trailing activated");
            }
            let trail_r = trade.peak_favorable_r - self.trail_distance_r;
            let proposed = trade.price_at_r(trail_r);
            if trade.tighten_stop(proposed) {
                events.push(TradeEvent::TrailingAdjust);
                debug!(trade_id = %trade.id, stop = proposed, "trail update");
            }
        }

        Ok(TradeUpdate::open(events))
    }
}
