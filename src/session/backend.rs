// src/session/backend.rs

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use serde::{Deserialize, Serialize};

/// What the session needs from the hardware: output, input, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCategory {
    Playback,
    Record,
    PlayAndRecord,
}

/// Latency/processing mode. Measurement turns platform input processing off
/// for the tuner's sake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    Default,
    Measurement,
}

/// Hardware session configuration supplied by the requesting consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub category: SessionCategory,
    pub mode: SessionMode,
    pub mix_with_others: bool,
    pub default_to_speaker: bool,
    pub allow_bluetooth: bool,
}

impl HardwareConfig {
    pub fn playback() -> Self {
        Self {
            category: SessionCategory::Playback,
            mode: SessionMode::Default,
            mix_with_others: false,
            default_to_speaker: false,
            allow_bluetooth: false,
        }
    }

    pub fn record() -> Self {
        Self {
            category: SessionCategory::Record,
            mode: SessionMode::Default,
            mix_with_others: false,
            default_to_speaker: false,
            allow_bluetooth: true,
        }
    }

    /// The tuner's fixed, stricter configuration: simultaneous record and
    /// playback in measurement mode, routed to the speaker, bluetooth allowed.
    pub fn tuner() -> Self {
        Self {
            category: SessionCategory::PlayAndRecord,
            mode: SessionMode::Measurement,
            mix_with_others: false,
            default_to_speaker: true,
            allow_bluetooth: true,
        }
    }
}

/// The hardware side of the arbiter. One implementation talks to real devices,
/// test implementations script failures.
pub trait SessionBackend: Send {
    /// Tear the active session down. `notify_others` asks the platform to tell
    /// interrupted apps they may resume.
    fn deactivate(&mut self, notify_others: bool) -> Result<()>;

    /// Configure the session for the given category/mode/options.
    fn apply(&mut self, config: &HardwareConfig) -> Result<()>;

    /// Bring the configured session up.
    fn activate(&mut self) -> Result<()>;

    /// Is an input path actually present on the active session?
    fn input_available(&self) -> bool;
}

/// Backend over CPAL's default host. "Configuring" here means resolving and
/// holding the device handles the category needs; consumers open their own
/// streams against the same defaults afterwards.
pub struct CpalSessionBackend {
    output: Option<Device>,
    input: Option<Device>,
    active: bool,
}

impl CpalSessionBackend {
    pub fn new() -> Self {
        Self {
            output: None,
            input: None,
            active: false,
        }
    }
}

impl Default for CpalSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for CpalSessionBackend {
    fn deactivate(&mut self, _notify_others: bool) -> Result<()> {
        self.output = None;
        self.input = None;
        self.active = false;
        Ok(())
    }

    fn apply(&mut self, config: &HardwareConfig) -> Result<()> {
        let host = cpal::default_host();

        let needs_output = matches!(
            config.category,
            SessionCategory::Playback | SessionCategory::PlayAndRecord
        );
        let needs_input = matches!(
            config.category,
            SessionCategory::Record | SessionCategory::PlayAndRecord
        );

        if needs_output {
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow::anyhow!("No output device available"))?;
            // Confirm the device actually answers before committing to it.
            device.default_output_config()?;
            self.output = Some(device);
        } else {
            self.output = None;
        }

        if needs_input {
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow::anyhow!("No input device available"))?;
            device.default_input_config()?;
            self.input = Some(device);
        } else {
            self.input = None;
        }

        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn input_available(&self) -> bool {
        match &self.input {
            Some(device) => device.default_input_config().is_ok(),
            None => false,
        }
    }
}
