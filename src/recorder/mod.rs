// src/recorder/mod.rs

pub mod input;
pub mod level;
pub mod writer;

use crate::error::StartError;
use crate::permission::MicAccess;
use crate::recorder::{input::AudioInput, level::LevelBridge};
use crate::session::backend::HardwareConfig;
use crate::session::{ClientKind, DisplacedPolicy, SessionToken, SharedArbiter};
use ringbuf::{traits::Split, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What a finished take looks like to the rest of the app: one encoded blob
/// plus its measured duration.
pub struct RecordedClip {
    pub data: Vec<u8>,
    pub duration: Duration,
}

/// Recorder consumer. Owns a Record session while capturing; mic input runs
/// through a ring buffer into a writer thread that encodes the in-memory WAV
/// blob. Tolerates being silently displaced by another consumer.
pub struct Recorder {
    arbiter: SharedArbiter,
    policy: DisplacedPolicy,
    token: Option<SessionToken>,
    input: Option<AudioInput>,
    writer_handle: Option<thread::JoinHandle<anyhow::Result<Vec<u8>>>>,
    take_done: Option<Arc<AtomicBool>>,
    level: Arc<LevelBridge>,
}

impl Recorder {
    pub fn new(arbiter: SharedArbiter, policy: DisplacedPolicy) -> Self {
        Self {
            arbiter,
            policy,
            token: None,
            input: None,
            writer_handle: None,
            take_done: None,
            level: LevelBridge::new(),
        }
    }

    /// Permission gate, then session, then capture graph. Any failure aborts
    /// the whole start; a session acquired before an engine failure is given
    /// back immediately.
    pub fn start(&mut self, mic: &dyn MicAccess) -> Result<(), StartError> {
        if self.token.is_some() {
            return Ok(());
        }
        if !mic.request_input() {
            eprintln!("Recorder start refused: microphone permission denied");
            return Err(StartError::PermissionDenied);
        }

        let token = self
            .arbiter
            .lock()
            .unwrap()
            .request(ClientKind::Recorder, &HardwareConfig::record())?;

        // Ring buffer for recording
        let rec_capacity = 192_000;
        let rb_rec = HeapRb::<f32>::new(rec_capacity);
        let (prod_rec, cons_rec) = rb_rec.split();

        let (audio_input, channels, sample_rate) =
            match AudioInput::new(prod_rec, self.level.clone()) {
                Ok(parts) => parts,
                Err(e) => {
                    self.arbiter.lock().unwrap().release(&token);
                    return Err(StartError::EngineStartFailure(e));
                }
            };

        // Writer thread: encode the take into the in-memory blob. The done
        // flag lets stop() end even a take that never saw a sample.
        let take_done = Arc::new(AtomicBool::new(false));
        let writer_done = take_done.clone();
        let writer_handle = thread::spawn(move || {
            writer::encode_from_ring(cons_rec, sample_rate, channels, writer_done)
        });

        println!(
            "🎙️ Recording: {} ch @ {} Hz",
            audio_input.channels, audio_input.sample_rate
        );

        self.input = Some(audio_input);
        self.writer_handle = Some(writer_handle);
        self.take_done = Some(take_done);
        self.token = Some(token);
        Ok(())
    }

    /// Stop capturing and hand back the finished clip. Synchronous: returns
    /// after the input stream is torn down, the writer has finalized the blob
    /// and the session is released (exactly once, stale tokens are no-ops).
    pub fn stop(&mut self) -> Option<RecordedClip> {
        let input = self.input.take()?;
        // Drop input to stop capture, then raise the flag; the writer drains
        // whatever is left and finalizes without waiting out the idle window.
        drop(input);
        if let Some(done) = self.take_done.take() {
            done.store(true, Ordering::Relaxed);
        }

        let data = match self.writer_handle.take() {
            Some(handle) => match handle.join() {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => {
                    eprintln!("Audio recorder thread error: {e}");
                    Vec::new()
                }
                Err(_) => {
                    eprintln!("Audio recorder thread panicked");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        if let Some(token) = self.token.take() {
            self.arbiter.lock().unwrap().release(&token);
        }

        if data.is_empty() {
            return None;
        }

        // Duration comes from decoding the blob once, not from live counters.
        let duration = writer::measure_duration(&data).unwrap_or_else(|e| {
            eprintln!("Clip duration probe failed: {e}");
            Duration::ZERO
        });

        Some(RecordedClip { data, duration })
    }

    /// Control-thread tick: notice displacement. Nobody calls a displaced
    /// consumer back, so the recorder checks its own token and applies the
    /// configured policy.
    pub fn check_displaced(&mut self) {
        let Some(token) = &self.token else {
            return;
        };
        if self.arbiter.lock().unwrap().is_current(token) {
            return;
        }

        match self.policy {
            DisplacedPolicy::KeepRunning => {
                // Keep capturing with degraded routing until stop().
            }
            DisplacedPolicy::HardStop => {
                eprintln!("Recorder displaced; hard-stop policy tearing down capture");
                let _ = self.stop();
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.input.is_some()
    }

    /// Current input level for the UI meter.
    pub fn level(&self) -> f32 {
        self.level.peak()
    }

    pub fn rms_level(&self) -> f32 {
        self.level.rms()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.is_recording() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::fakes::Denied;
    use crate::session::SessionArbiter;

    struct OkBackend;

    impl crate::session::backend::SessionBackend for OkBackend {
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
    fn denied_permission_means_no_session_request() {
        let arbiter = SessionArbiter::new(OkBackend).into_shared();
        let mut recorder = Recorder::new(arbiter.clone(), DisplacedPolicy::default());

        let result = recorder.start(&Denied);
        assert!(matches!(result, Err(StartError::PermissionDenied)));
        assert!(!recorder.is_recording());
        assert_eq!(arbiter.lock().unwrap().owner(), None);
    }

    #[test]
    fn stop_without_start_returns_nothing() {
        let arbiter = SessionArbiter::new(OkBackend).into_shared();
        let mut recorder = Recorder::new(arbiter, DisplacedPolicy::default());
        assert!(recorder.stop().is_none());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn displacement_check_is_quiet_when_owning() {
        let arbiter = SessionArbiter::new(OkBackend).into_shared();
        let mut recorder = Recorder::new(arbiter, DisplacedPolicy::HardStop);
        // Not recording at all: nothing to do, nothing to panic about.
        recorder.check_displaced();
        assert!(!recorder.is_recording());
    }
}
