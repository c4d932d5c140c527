// src/recorder/level.rs

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The lock-free bridge. The input callback writes to this, the UI thread
/// polls it.
pub struct LevelBridge {
    peak: AtomicU32,
    rms: AtomicU32,
}

impl LevelBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peak: AtomicU32::new(0),
            rms: AtomicU32::new(0),
        })
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }
}

/// The stateful level calculator, owned strictly by the audio thread.
/// Instant attack, block-size-scaled decay so the meter falls at the same
/// visual speed regardless of callback size.
pub struct LevelState {
    decay_coeff: f32,
    stored_peak: f32,
}

impl LevelState {
    pub fn new(sample_rate: f32) -> Self {
        let release_time_sec = 0.300; // 300ms visual falloff
        Self {
            decay_coeff: (-1.0 / (release_time_sec * sample_rate)).exp(),
            stored_peak: 0.0,
        }
    }

    /// Fold one interleaved block into the meter. Channels are collapsed to a
    /// single mono level; a mic meter doesn't need more.
    pub fn process_block(&mut self, buffer: &[f32], bridge: &LevelBridge) {
        if buffer.is_empty() {
            return;
        }

        let mut max = 0.0_f32;
        let mut sum_sq = 0.0_f32;
        for &s in buffer {
            max = max.max(s.abs());
            sum_sq += s * s;
        }
        let rms = (sum_sq / buffer.len() as f32).sqrt();

        let block_decay = self.decay_coeff.powf(buffer.len() as f32);
        if max > self.stored_peak {
            self.stored_peak = max;
        } else {
            self.stored_peak *= block_decay;
            self.stored_peak += 1e-20; // Denormal protection
            self.stored_peak -= 1e-20;
        }

        bridge
            .peak
            .store(self.stored_peak.to_bits(), Ordering::Relaxed);
        bridge.rms.store(rms.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn attack_is_instant() {
        let bridge = LevelBridge::new();
        let mut state = LevelState::new(48_000.0);
        state.process_block(&[0.0, 0.5, -0.9, 0.1], &bridge);
        assert_abs_diff_eq!(bridge.peak(), 0.9, epsilon = 1e-6);
    }

    #[test]
    fn peak_decays_between_loud_blocks() {
        let bridge = LevelBridge::new();
        let mut state = LevelState::new(48_000.0);
        state.process_block(&[1.0; 64], &bridge);
        let loud = bridge.peak();

        for _ in 0..100 {
            state.process_block(&[0.0; 512], &bridge);
        }
        assert!(bridge.peak() < loud * 0.5);
    }

    #[test]
    fn rms_of_a_constant_block() {
        let bridge = LevelBridge::new();
        let mut state = LevelState::new(48_000.0);
        state.process_block(&[0.5; 256], &bridge);
        assert_abs_diff_eq!(bridge.rms(), 0.5, epsilon = 1e-5);
    }
}
