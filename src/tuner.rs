// src/tuner.rs

use crate::error::StartError;
use crate::permission::MicAccess;
use crate::pitch::{detect, NoteResult, PitchSample, TuningSource};
use crate::session::backend::HardwareConfig;
use crate::session::{ClientKind, SessionToken, SharedArbiter};
use std::sync::Arc;

/// Tuner consumer: owns the strict record/playback session while listening
/// and maps incoming pitch samples to notes. The samples themselves come from
/// an external pitch tracker at buffer rate.
pub struct Tuner {
    arbiter: SharedArbiter,
    tuning: Arc<dyn TuningSource>,
    token: Option<SessionToken>,
    last: NoteResult,
}

impl Tuner {
    pub fn new(arbiter: SharedArbiter, tuning: Arc<dyn TuningSource>) -> Self {
        Self {
            arbiter,
            tuning,
            token: None,
            last: NoteResult::default(),
        }
    }

    /// Permission first, then the session. The arbiter runs the tuner's
    /// strict configure-settle-verify sequence. Idempotent while listening.
    pub fn start(&mut self, mic: &dyn MicAccess) -> Result<(), StartError> {
        if self.token.is_some() {
            return Ok(());
        }
        if !mic.request_input() {
            eprintln!("Tuner start refused: microphone permission denied");
            return Err(StartError::PermissionDenied);
        }

        let token = self
            .arbiter
            .lock()
            .unwrap()
            .request(ClientKind::Tuner, &HardwareConfig::tuner())?;
        self.token = Some(token);
        Ok(())
    }

    /// Run one sample through detection. The tuning config is re-read from
    /// the store on every call, so retuning mid-stream takes effect at once.
    pub fn process(&mut self, sample: PitchSample) -> NoteResult {
        let config = self.tuning.tuning();
        let result = detect(&sample, &config, &self.last);
        self.last = result.clone();
        result
    }

    pub fn note(&self) -> &NoteResult {
        &self.last
    }

    pub fn is_listening(&self) -> bool {
        self.token.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.arbiter.lock().unwrap().release(&token);
        }
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.stop();
    }
}
