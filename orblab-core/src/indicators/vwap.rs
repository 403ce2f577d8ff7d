//! Session VWAP with volume-weighted dispersion.
//!
//! Resets at each session start. Besides the plain VWAP the cell tracks the
//! volume-weighted second moment, which the VWAP Magnet playbook needs for
//! its dynamic band.

/// Cumulative session VWAP cell.
#[derive(Debug, Clone, Default)]
pub struct SessionVwap {
    cum_pv: f64,
    cum_p2v: f64,
    cum_v: f64,
    bars: usize,
}

impl SessionVwap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, typical_price: f64, volume: u64) -> Option<f64> {
        let v = volume as f64;
        self.cum_pv += typical_price * v;
        self.cum_p2v += typical_price * typical_price * v;
        self.cum_v += v;
        self.bars += 1;
        self.value()
    }

    /// Σ(p·v) / Σv. None until any volume has traded.
    pub fn value(&self) -> Option<f64> {
        if self.cum_v > 0.0 {
            Some(self.cum_pv / self.cum_v)
        } else {
            None
        }
    }

    /// Volume-weighted standard deviation around the VWAP.
    pub fn sigma(&self) -> Option<f64> {
        let vwap = self.value()?;
        let variance = (self.cum_p2v / self.cum_v) - vwap * vwap;
        // Numerically clamped: tiny negative values appear when all prices equal.
        Some(variance.max(0.0).sqrt())
    }

    /// Bars absorbed this session.
    pub fn bars_seen(&self) -> usize {
        self.bars
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
