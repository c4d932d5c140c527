// src/permission.rs

use cpal::traits::{DeviceTrait, HostTrait};

/// Microphone access gate. Queried before any capture consumer starts; a
/// denial is terminal for that attempt and never retried automatically.
pub trait MicAccess: Send {
    fn request_input(&self) -> bool;
}

/// Desktop backends have no permission prompt; a missing or unusable default
/// input device is what "denied" looks like here.
pub struct CpalMicAccess;

impl MicAccess for CpalMicAccess {
    fn request_input(&self) -> bool {
        let host = cpal::default_host();
        match host.default_input_device() {
            Some(device) => device.default_input_config().is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use super::MicAccess;

    pub struct Granted;
    impl MicAccess for Granted {
        fn request_input(&self) -> bool {
            true
        }
    }

    pub struct Denied;
    impl MicAccess for Denied {
        fn request_input(&self) -> bool {
            false
        }
    }
}
