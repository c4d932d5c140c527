// src/error.rs

use thiserror::Error;

/// Failures that can abort a consumer start. Everything here is terminal for
/// the attempt: no automatic retry, the caller has to ask again.
#[derive(Debug, Error)]
pub enum StartError {
    /// Hardware session configuration failed (busy, unsupported, or denied).
    /// The arbiter owner is cleared when this happens.
    #[error("audio session unavailable")]
    SessionUnavailable,

    /// Microphone access refused. No session was requested.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The render/capture graph could not start after a session was granted.
    /// The just-acquired session has already been released by the time the
    /// caller sees this, so there is never a phantom owner.
    #[error("audio engine failed to start: {0}")]
    EngineStartFailure(anyhow::Error),

    /// Tuner only: the session activated but no input path showed up.
    /// Handled exactly like `SessionUnavailable` by callers.
    #[error("no audio input path available")]
    InputUnavailable,
}
