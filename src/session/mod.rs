// src/session/mod.rs

pub mod backend;

use crate::error::StartError;
use backend::{HardwareConfig, SessionBackend};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Logical consumer of the hardware session. Identifies a kind, not an
/// instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientKind {
    Recorder,
    Playback,
    Tuner,
    Metronome,
}

/// Proof of ownership handed out by `request`. Displacement makes old tokens
/// stale; `release` and `is_current` compare serials, not just kinds, so a
/// consumer that lost the session without being told can find out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    kind: ClientKind,
    serial: u64,
}

impl SessionToken {
    pub fn kind(&self) -> ClientKind {
        self.kind
    }
}

/// What a recorder should do when it discovers it has been displaced.
/// Nothing in the arbiter calls the displaced consumer back; this policy is
/// consulted by the consumer itself on its next control-thread tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DisplacedPolicy {
    /// Keep capturing; audio quality silently degrades with the session gone.
    #[default]
    KeepRunning,
    /// Tear the capture graph down on discovery.
    HardStop,
}

/// Time the hardware gets to settle between deactivation and the tuner's
/// record/playback reconfiguration.
const TUNER_SETTLE: Duration = Duration::from_millis(100);

/// Gatekeeper for the one physical audio session. At most one owner at any
/// time; a competing request reconfigures the hardware and replaces the owner
/// with no queueing and no notification to the displaced consumer.
///
/// All mutation happens from the control thread; share as `SharedArbiter`.
pub struct SessionArbiter {
    backend: Box<dyn SessionBackend>,
    owner: Option<SessionToken>,
    next_serial: u64,
}

pub type SharedArbiter = Arc<Mutex<SessionArbiter>>;

impl SessionArbiter {
    pub fn new(backend: impl SessionBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            owner: None,
            next_serial: 0,
        }
    }

    pub fn with_cpal() -> Self {
        Self::new(backend::CpalSessionBackend::new())
    }

    pub fn into_shared(self) -> SharedArbiter {
        Arc::new(Mutex::new(self))
    }

    /// Request exclusive ownership for `kind` with the given hardware
    /// configuration. Displaces any different current owner first. On any
    /// configuration failure the owner slot is cleared and the error
    /// surfaces as a result, never as a panic or propagated exception.
    pub fn request(
        &mut self,
        kind: ClientKind,
        config: &HardwareConfig,
    ) -> Result<SessionToken, StartError> {
        if let Some(current) = &self.owner {
            if current.kind != kind {
                println!("🎛️ Audio session: {:?} displaces {:?}", kind, current.kind);
                // Best-effort: a failed teardown must not block the new owner.
                if let Err(e) = self.backend.deactivate(false) {
                    eprintln!("Session deactivate failed (ignored): {e}");
                }
            }
        }

        let configured = if kind == ClientKind::Tuner {
            self.configure_tuner()
        } else {
            self.configure(config)
        };

        match configured {
            Ok(()) => {
                self.next_serial += 1;
                let token = SessionToken {
                    kind,
                    serial: self.next_serial,
                };
                self.owner = Some(token.clone());
                Ok(token)
            }
            Err(err) => {
                eprintln!("Session request for {:?} failed: {err:?}", kind);
                self.owner = None;
                Err(err)
            }
        }
    }

    /// Release ownership. No-op unless the token is the current owner's;
    /// a previously-displaced client releasing late must not deactivate the
    /// new owner's session.
    pub fn release(&mut self, token: &SessionToken) {
        if self.owner.as_ref() != Some(token) {
            return;
        }
        if let Err(e) = self.backend.deactivate(true) {
            eprintln!("Session deactivate failed (ignored): {e}");
        }
        self.owner = None;
    }

    pub fn owner(&self) -> Option<ClientKind> {
        self.owner.as_ref().map(|t| t.kind)
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        self.owner.as_ref() == Some(token)
    }

    fn configure(&mut self, config: &HardwareConfig) -> Result<(), StartError> {
        self.backend
            .apply(config)
            .and_then(|_| self.backend.activate())
            .map_err(|e| {
                eprintln!("Session configure failed: {e}");
                StartError::SessionUnavailable
            })
    }

    /// The tuner path is stricter: tear down, let the route settle, configure
    /// for simultaneous record/playback in measurement mode, bring it up and
    /// verify an input path actually exists.
    fn configure_tuner(&mut self) -> Result<(), StartError> {
        if let Err(e) = self.backend.deactivate(false) {
            eprintln!("Session deactivate failed (ignored): {e}");
        }
        thread::sleep(TUNER_SETTLE);

        self.configure(&HardwareConfig::tuner())?;

        if !self.backend.input_available() {
            eprintln!("Tuner session activated but no input path present");
            return Err(StartError::InputUnavailable);
        }
        Ok(())
    }
}
