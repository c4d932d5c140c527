// src/runtime.rs

use crate::error::StartError;
use crate::metronome::click::ClickOutput;
use crate::metronome::{MetronomeConfig, MetronomeScheduler};
use crate::oscillator::ToneRequest;
use crate::permission::{CpalMicAccess, MicAccess};
use crate::pitch::{NoteResult, PitchSample, SharedTuning, TuningConfig};
use crate::player::Playback;
use crate::recorder::{RecordedClip, Recorder};
use crate::session::backend::{CpalSessionBackend, HardwareConfig, SessionBackend};
use crate::session::{ClientKind, DisplacedPolicy, SessionArbiter, SessionToken, SharedArbiter};
use crate::tone::{self, Drone};
use crate::tuner::Tuner;
use std::sync::Arc;
use std::time::Duration;

/// Central audio facade: owns the one arbiter and every consumer, and exposes
/// the command/observe surface the UI talks to. Constructed explicitly and
/// passed around; there is no global instance.
///
/// All commands run on the caller's control thread; the arbiter is never
/// mutated from anywhere else.
pub struct PracticeAudio {
    arbiter: SharedArbiter,
    tuning: Arc<SharedTuning>,
    mic: Box<dyn MicAccess>,
    recorder: Recorder,
    tuner: Tuner,
    metronome: MetronomeScheduler,
    metronome_token: Option<SessionToken>,
    playback: Option<Playback>,
    drone: Drone,
}

impl PracticeAudio {
    /// Production wiring: CPAL hardware backend and mic gate.
    pub fn new() -> Self {
        Self::with_parts(
            CpalSessionBackend::new(),
            CpalMicAccess,
            DisplacedPolicy::default(),
        )
    }

    /// Explicit wiring for tests and alternative platforms.
    pub fn with_parts(
        backend: impl SessionBackend + 'static,
        mic: impl MicAccess + 'static,
        policy: DisplacedPolicy,
    ) -> Self {
        let arbiter = SessionArbiter::new(backend).into_shared();
        let tuning = Arc::new(SharedTuning::new(TuningConfig::default()));
        let recorder = Recorder::new(arbiter.clone(), policy);
        let tuner = Tuner::new(arbiter.clone(), tuning.clone());
        let drone = Drone::new(arbiter.clone());

        Self {
            arbiter,
            tuning,
            mic: Box::new(mic),
            recorder,
            tuner,
            metronome: MetronomeScheduler::new(MetronomeConfig::default()),
            metronome_token: None,
            playback: None,
            drone,
        }
    }

    /// Who owns the hardware session right now.
    pub fn session_owner(&self) -> Option<ClientKind> {
        self.arbiter.lock().unwrap().owner()
    }

    /// Control-thread housekeeping tick: displaced-consumer checks and
    /// finished-playback cleanup. Call it from the UI timer.
    pub fn poll(&mut self) {
        self.recorder.check_displaced();
        let finished = self
            .playback
            .as_ref()
            .is_some_and(|p| p.is_finished() && p.get_current_time() >= p.get_total_duration());
        if finished {
            self.stop_playback();
        }
    }

    // --- RECORDER ---

    pub fn start_recording(&mut self) -> Result<(), StartError> {
        self.recorder.start(self.mic.as_ref())
    }

    pub fn stop_recording(&mut self) -> Option<RecordedClip> {
        self.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn input_level(&self) -> f32 {
        self.recorder.level()
    }

    // --- PLAYBACK ---

    /// Play one encoded clip blob. An already-running playback is stopped
    /// first; the arbiter would displace it anyway, this just keeps its
    /// teardown orderly.
    pub fn play_clip(&mut self, blob: Vec<u8>) -> Result<(), StartError> {
        self.stop_playback();
        let playback = Playback::start(self.arbiter.clone(), blob)?;
        self.playback = Some(playback);
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.is_playing())
    }

    pub fn playback_position(&self) -> Option<Duration> {
        self.playback.as_ref().map(|p| p.get_current_time())
    }

    pub fn playback_duration(&self) -> Option<Duration> {
        self.playback.as_ref().map(|p| p.get_total_duration())
    }

    // --- TUNER ---

    pub fn start_tuner(&mut self) -> Result<(), StartError> {
        self.tuner.start(self.mic.as_ref())
    }

    pub fn stop_tuner(&mut self) {
        self.tuner.stop();
    }

    pub fn is_tuner_listening(&self) -> bool {
        self.tuner.is_listening()
    }

    /// Feed one sample from the pitch tracker through detection.
    pub fn process_pitch(&mut self, sample: PitchSample) -> NoteResult {
        self.tuner.process(sample)
    }

    pub fn current_note(&self) -> &NoteResult {
        self.tuner.note()
    }

    pub fn tuning(&self) -> Arc<SharedTuning> {
        self.tuning.clone()
    }

    pub fn set_reference_a4(&self, hz: f32) {
        self.tuning.set_reference_a4(hz);
    }

    pub fn set_transposition(&self, semitones: i32) {
        self.tuning.set_transposition(semitones);
    }

    // --- METRONOME ---

    pub fn start_metronome(&mut self) -> Result<(), StartError> {
        if self.metronome.is_running() {
            return Ok(());
        }

        let token = self
            .arbiter
            .lock()
            .unwrap()
            .request(ClientKind::Metronome, &HardwareConfig::playback())?;

        let mut click = match ClickOutput::new() {
            Ok(click) => click,
            Err(e) => {
                self.arbiter.lock().unwrap().release(&token);
                return Err(StartError::EngineStartFailure(e));
            }
        };

        // The click sink moves onto the scheduler thread and dies with it.
        self.metronome.start(move |tick| click.click(tick.accented));
        self.metronome_token = Some(token);
        Ok(())
    }

    pub fn stop_metronome(&mut self) {
        self.metronome.stop();
        if let Some(token) = self.metronome_token.take() {
            self.arbiter.lock().unwrap().release(&token);
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.metronome.set_bpm(bpm);
    }

    pub fn bpm(&self) -> f64 {
        self.metronome.bpm()
    }

    pub fn is_metronome_running(&self) -> bool {
        self.metronome.is_running()
    }

    pub fn metronome_elapsed(&self) -> Duration {
        self.metronome.elapsed()
    }

    // --- TONE / DRONE ---

    /// One-shot tone for ear training. Blocks for the tone's duration.
    pub fn play_tone(&self, request: &ToneRequest) -> Result<(), StartError> {
        tone::play_tone(&self.arbiter, request)
    }

    pub fn start_drone(&mut self, request: &ToneRequest) -> Result<(), StartError> {
        self.drone.start(request)
    }

    pub fn set_drone_frequency(&self, hz: f32) {
        self.drone.set_frequency(hz);
    }

    pub fn stop_drone(&mut self) {
        self.drone.stop();
    }

    pub fn is_drone_running(&self) -> bool {
        self.drone.is_running()
    }
}

impl Default for PracticeAudio {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::fakes::{Denied, Granted};

    struct OkBackend;

    impl SessionBackend for OkBackend {
        fn deactivate(&mut self, _notify_others: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn apply(&mut self, _config: &HardwareConfig) -> anyhow::Result<()> {
            Ok(())
        }
        fn activate(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn input_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn tuner_round_trip_through_the_facade() {
        let mut core = PracticeAudio::with_parts(OkBackend, Granted, DisplacedPolicy::default());
        assert_eq!(core.session_owner(), None);

        core.start_tuner().unwrap();
        assert!(core.is_tuner_listening());
        assert_eq!(core.session_owner(), Some(ClientKind::Tuner));

        let note = core.process_pitch(PitchSample {
            frequency: 440.0,
            amplitude: 1.0,
        });
        assert_eq!(note.name, "A4");

        core.stop_tuner();
        assert!(!core.is_tuner_listening());
        assert_eq!(core.session_owner(), None);
    }

    #[test]
    fn permission_denial_reaches_the_caller() {
        let mut core = PracticeAudio::with_parts(OkBackend, Denied, DisplacedPolicy::default());
        assert!(matches!(
            core.start_recording(),
            Err(StartError::PermissionDenied)
        ));
        assert!(matches!(
            core.start_tuner(),
            Err(StartError::PermissionDenied)
        ));
        assert_eq!(core.session_owner(), None);
    }

    #[test]
    fn retuning_through_the_facade_applies_immediately() {
        let mut core = PracticeAudio::with_parts(OkBackend, Granted, DisplacedPolicy::default());
        let sample = PitchSample {
            frequency: 440.0,
            amplitude: 1.0,
        };
        assert_eq!(core.process_pitch(sample).name, "A4");
        core.set_transposition(2);
        assert_eq!(core.process_pitch(sample).name, "B4");
    }

    #[test]
    fn bpm_commands_are_clamped_and_observable() {
        let mut core = PracticeAudio::with_parts(OkBackend, Granted, DisplacedPolicy::default());
        core.set_bpm(999.0);
        assert_eq!(core.bpm(), 240.0);
        core.set_bpm(10.0);
        assert_eq!(core.bpm(), 40.0);
        assert!(!core.is_metronome_running());
    }

    #[test]
    fn poll_is_safe_with_nothing_running() {
        let mut core = PracticeAudio::with_parts(OkBackend, Granted, DisplacedPolicy::HardStop);
        core.poll();
        assert_eq!(core.session_owner(), None);
    }
}
