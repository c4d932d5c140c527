// src/oscillator.rs

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free f32 cell: f32 bits inside an AtomicU32. Single writer (control
/// thread), single reader (audio callback).
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// A tone to synthesize: frequency in Hz (> 0), amplitude in (0, 1], and an
/// optional fixed duration for one-shot playback.
#[derive(Clone, Copy, Debug)]
pub struct ToneRequest {
    pub frequency: f32,
    pub amplitude: f32,
    pub duration: Option<std::time::Duration>,
}

impl ToneRequest {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency: frequency.max(f32::MIN_POSITIVE),
            amplitude: amplitude.clamp(f32::MIN_POSITIVE, 1.0),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Phase-accumulator sine render step. Runs on the real-time audio thread:
/// no allocation, no locking, no calls out.
///
/// Writes `amplitude * sin(2π·phase)` into every channel of each frame and
/// advances `phase` by `frequency / sample_rate` per frame, wrapped mod 1.
/// The caller owns `phase`; frequency is read once per call, so a change
/// lands on the next render without resetting phase (the small audible
/// discontinuity is accepted).
#[inline]
pub fn render_sine(
    out: &mut [f32],
    channels: usize,
    frequency: f32,
    amplitude: f32,
    sample_rate: f32,
    phase: &mut f32,
) {
    let step = frequency / sample_rate;
    for frame in out.chunks_mut(channels) {
        let s = amplitude * (TAU * *phase).sin();
        for sample in frame.iter_mut() {
            *sample = s;
        }
        // fract, not a single subtraction: holds phase in [0, 1) even when
        // the requested frequency exceeds the sample rate.
        *phase = (*phase + step).fract();
    }
}
