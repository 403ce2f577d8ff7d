//! Domain types: bars, signals, trades.

pub mod bar;
pub mod signal;
pub mod trade;

pub use bar::{Bar, InputError};
pub use signal::{Direction, TradeSignal};
pub use trade::{
    ActiveTrade, ExitReason, PartialFill, Target, TradeError, TradePhase, TradeRecord,
};
