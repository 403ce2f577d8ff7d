//! Relative volume — current bar volume against a rolling mean.

use std::collections::VecDeque;

/// Snapshot of the relative-volume cell after an update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelVolumeState {
    /// Volume relative to the rolling mean of prior bars. None during warm-up.
    pub rel_vol: Option<f64>,
    pub spike: bool,
}

/// Rolling-mean relative volume with a fixed-capacity ring.
///
/// The mean is taken over the prior `lookback` bars, excluding the bar being
/// evaluated, so a spike does not dilute its own baseline. The spike flag
/// only arms once `min_history` bars have been absorbed.
#[derive(Debug, Clone)]
pub struct RelVolume {
    lookback: usize,
    min_history: usize,
    spike_mult: f64,
    ring: VecDeque<u64>,
    sum: u64,
    seen: usize,
    state: RelVolumeState,
}

impl RelVolume {
    pub fn new(lookback: usize, spike_mult: f64) -> Self {
        assert!(lookback >= 1, "rel-volume lookback must be >= 1");
        Self {
            lookback,
            min_history: lookback + 5,
            spike_mult,
            ring: VecDeque::with_capacity(lookback),
            sum: 0,
            seen: 0,
            state: RelVolumeState::default(),
        }
    }

    pub fn state(&self) -> RelVolumeState {
        self.state
    }

    pub fn update(&mut self, volume: u64) -> RelVolumeState {
        self.seen += 1;

        if self.ring.len() == self.lookback {
            let mean = self.sum as f64 / self.lookback as f64;
            let rel = if mean > 0.0 {
                volume as f64 / mean
            } else {
                0.0
            };
            self.state.rel_vol = Some(rel);
            self.state.spike = self.seen >= self.min_history && rel >= self.spike_mult;
        } else {
            self.state = RelVolumeState::default();
        }

        if self.ring.len() == self.lookback {
            if let Some(old) = self.ring.pop_front() {
                self.sum -= old;
            }
        }
        self.ring.push_back(volume);
        self.sum += volume;

        self.state
    }

    /// Reset at a session boundary; the volume baseline does not carry over.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.sum = 0;
        self.seen = 0;
        self.state = RelVolumeState::default();
    }
}
