// src/pitch.rs

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Chromatic name table, C-rooted, sharps only.
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Below this amplitude the detector treats the input as background noise and
/// holds the previous note instead of flickering.
pub const SILENCE_GATE: f32 = 0.01;

/// One measurement from the external pitch tracker: fundamental frequency in
/// Hz plus a normalized amplitude.
#[derive(Clone, Copy, Debug)]
pub struct PitchSample {
    pub frequency: f32,
    pub amplitude: f32,
}

/// Reference pitch and transposition. Mutable at any time; the detector reads
/// it fresh on every call, never a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    reference_a4: f32,
    transposition_semitones: i32,
}

impl TuningConfig {
    pub fn new(reference_a4: f32, transposition_semitones: i32) -> Self {
        Self {
            reference_a4: reference_a4.clamp(410.0, 470.0),
            transposition_semitones: transposition_semitones.clamp(-12, 12),
        }
    }

    pub fn reference_a4(&self) -> f32 {
        self.reference_a4
    }

    pub fn transposition_semitones(&self) -> i32 {
        self.transposition_semitones
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reference_a4: 440.0,
            transposition_semitones: 0,
        }
    }
}

/// Result of one detection: nearest note, how far off it the input is in
/// cents, and the same distance normalized to [-1, 1] for a tuning needle.
#[derive(Clone, Debug)]
pub struct NoteResult {
    pub name: String,
    pub octave: i32,
    pub frequency: f32,
    pub cents_deviation: f32,
    pub normalized_distance: f32,
}

impl Default for NoteResult {
    fn default() -> Self {
        Self {
            name: "A4".to_string(),
            octave: 4,
            frequency: 440.0,
            cents_deviation: 0.0,
            normalized_distance: 0.0,
        }
    }
}

/// Map one pitch sample to the nearest 12-TET note under the given tuning.
///
/// Quiet input (amplitude below the gate) returns `previous` with the needle
/// centered and the frequency untouched; the note name is not recomputed.
pub fn detect(sample: &PitchSample, config: &TuningConfig, previous: &NoteResult) -> NoteResult {
    if sample.amplitude < SILENCE_GATE {
        let mut held = previous.clone();
        held.normalized_distance = 0.0;
        return held;
    }

    let half_steps = 12.0 * (sample.frequency / config.reference_a4).log2();
    let nearest = half_steps.round() as i32;
    let ideal_frequency = config.reference_a4 * 2f32.powf(nearest as f32 / 12.0);
    let cents = 1200.0 * (sample.frequency / ideal_frequency).log2();

    // +9 roots the C-indexed name table at A; rem_euclid keeps the index in
    // range however far below A0 the input falls.
    let note_index = (nearest + 9 + config.transposition_semitones).rem_euclid(12) as usize;
    let octave = 4 + (nearest + 9 + config.transposition_semitones).div_euclid(12);

    NoteResult {
        name: format!("{}{}", NOTE_NAMES[note_index], octave),
        octave,
        frequency: sample.frequency,
        cents_deviation: cents,
        normalized_distance: (cents / 50.0).clamp(-1.0, 1.0),
    }
}

/// Where the detector reads its tuning from at detection time.
pub trait TuningSource: Send + Sync {
    fn tuning(&self) -> TuningConfig;
}

/// Shared tuning store: two lock-free cells so the control thread can retune
/// while detection keeps running.
pub struct SharedTuning {
    reference_a4_bits: AtomicU32,
    transposition: AtomicI32,
}

impl SharedTuning {
    pub fn new(config: TuningConfig) -> Self {
        Self {
            reference_a4_bits: AtomicU32::new(config.reference_a4.to_bits()),
            transposition: AtomicI32::new(config.transposition_semitones),
        }
    }

    pub fn set(&self, config: TuningConfig) {
        self.reference_a4_bits
            .store(config.reference_a4.to_bits(), Ordering::Relaxed);
        self.transposition
            .store(config.transposition_semitones, Ordering::Relaxed);
    }

    pub fn set_reference_a4(&self, hz: f32) {
        self.reference_a4_bits
            .store(hz.clamp(410.0, 470.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_transposition(&self, semitones: i32) {
        self.transposition
            .store(semitones.clamp(-12, 12), Ordering::Relaxed);
    }
}

impl Default for SharedTuning {
    fn default() -> Self {
        Self::new(TuningConfig::default())
    }
}

impl TuningSource for SharedTuning {
    fn tuning(&self) -> TuningConfig {
        TuningConfig {
            reference_a4: f32::from_bits(self.reference_a4_bits.load(Ordering::Relaxed)),
            transposition_semitones: self.transposition.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(frequency: f32) -> PitchSample {
        PitchSample {
            frequency,
            amplitude: 1.0,
        }
    }

    #[test]
    fn reference_pitch_detects_a4() {
        let result = detect(
            &sample(440.0),
            &TuningConfig::default(),
            &NoteResult::default(),
        );
        assert_eq!(result.name, "A4");
        assert_eq!(result.octave, 4);
        assert_abs_diff_eq!(result.cents_deviation, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.normalized_distance, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn silence_gate_holds_the_previous_note() {
        let previous = detect(
            &sample(261.63),
            &TuningConfig::default(),
            &NoteResult::default(),
        );
        assert_eq!(previous.name, "C4");

        let quiet = PitchSample {
            frequency: 1234.5,
            amplitude: 0.005,
        };
        let held = detect(&quiet, &TuningConfig::default(), &previous);
        assert_eq!(held.name, "C4");
        assert_eq!(held.frequency, previous.frequency);
        assert_eq!(held.normalized_distance, 0.0);
    }

    #[test]
    fn transposition_shifts_the_name() {
        let config = TuningConfig::new(440.0, 2);
        let result = detect(&sample(440.0), &config, &NoteResult::default());
        assert_eq!(result.name, "B4");
        assert_abs_diff_eq!(result.normalized_distance, 0.0, epsilon = 1e-4);

        let config = TuningConfig::new(440.0, -2);
        let result = detect(&sample(440.0), &config, &NoteResult::default());
        assert_eq!(result.name, "G4");
    }

    #[test]
    fn octave_boundaries_are_correct() {
        let config = TuningConfig::default();
        let previous = NoteResult::default();
        // B3 is just below the C4 boundary.
        assert_eq!(detect(&sample(246.94), &config, &previous).name, "B3");
        assert_eq!(detect(&sample(261.63), &config, &previous).name, "C4");
        // A few octaves out in both directions.
        assert_eq!(detect(&sample(27.5), &config, &previous).name, "A0");
        assert_eq!(detect(&sample(3520.0), &config, &previous).name, "A7");
    }

    #[test]
    fn sharp_input_pushes_the_needle_up() {
        let config = TuningConfig::default();
        // 25 cents sharp of A4.
        let freq = 440.0 * 2f32.powf(25.0 / 1200.0);
        let result = detect(&sample(freq), &config, &NoteResult::default());
        assert_eq!(result.name, "A4");
        assert_abs_diff_eq!(result.cents_deviation, 25.0, epsilon = 0.1);
        assert_abs_diff_eq!(result.normalized_distance, 0.5, epsilon = 1e-2);

        // Far off pitch saturates at the clamp.
        let freq = 440.0 * 2f32.powf(-49.0 / 1200.0);
        let result = detect(&sample(freq), &config, &NoteResult::default());
        assert_abs_diff_eq!(result.normalized_distance, -0.98, epsilon = 2e-2);
        assert!(result.normalized_distance >= -1.0);
    }

    #[test]
    fn subsonic_input_stays_in_the_name_table() {
        // Far below any playable note the index math must still land inside
        // the table instead of wrapping through a negative remainder.
        let config = TuningConfig::new(440.0, -12);
        let result = detect(&sample(0.1), &config, &NoteResult::default());
        assert_eq!(result.name, "G#-9");
        assert_eq!(result.octave, -9);
    }

    #[test]
    fn alternate_reference_moves_the_grid() {
        let config = TuningConfig::new(432.0, 0);
        let result = detect(&sample(432.0), &config, &NoteResult::default());
        assert_eq!(result.name, "A4");
        assert_abs_diff_eq!(result.cents_deviation, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn config_values_are_clamped() {
        let config = TuningConfig::new(500.0, 30);
        assert_eq!(config.reference_a4(), 470.0);
        assert_eq!(config.transposition_semitones(), 12);
    }

    #[test]
    fn shared_tuning_is_read_fresh() {
        let store = SharedTuning::default();
        let before = detect(&sample(440.0), &store.tuning(), &NoteResult::default());
        assert_eq!(before.name, "A4");

        store.set_transposition(2);
        let after = detect(&sample(440.0), &store.tuning(), &NoteResult::default());
        assert_eq!(after.name, "B4");
    }
}
