// src/lib.rs

pub mod audio;
pub mod decoder;
pub mod error;
pub mod metronome;
pub mod oscillator;
pub mod permission;
pub mod pitch;
mod player;
pub mod recorder;
pub mod runtime;
pub mod session;
pub mod tone;
pub mod tuner;

pub use error::StartError;
pub use metronome::{MetronomeConfig, MetronomeScheduler, Tick};
pub use oscillator::ToneRequest;
pub use pitch::{NoteResult, PitchSample, SharedTuning, TuningConfig};
pub use player::Playback;
pub use recorder::{RecordedClip, Recorder};
pub use runtime::PracticeAudio; // convenience
pub use session::{ClientKind, DisplacedPolicy, SessionArbiter, SessionToken};
pub use tone::Drone;
pub use tuner::Tuner;
