//! Incremental per-bar indicator cells.
//!
//! Each cell owns a bounded amount of state (ring buffers sized from the
//! lookback config) and is updated exactly once per bar by the event loop.
//! Playbooks and factor evaluation receive the cells by read-only view.

pub mod adx;
pub mod atr;
pub mod initial_balance;
pub mod opening_range;
pub mod rel_volume;
pub mod vwap;

pub use adx::{Adx, AdxState};
pub use atr::{true_range, Atr};
pub use initial_balance::InitialBalance;
pub use opening_range::OpeningRange;
pub use rel_volume::{RelVolume, RelVolumeState};
pub use vwap::SessionVwap;
