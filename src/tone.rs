// src/tone.rs

use crate::audio::{setup_output_device, OutputConfig};
use crate::error::StartError;
use crate::oscillator::{render_sine, AtomicF32, ToneRequest};
use crate::session::backend::HardwareConfig;
use crate::session::{ClientKind, SessionToken, SharedArbiter};
use anyhow::Result;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Gain ramp length for the drone's start/stop, in seconds. Long enough to
/// kill the click, short enough to feel immediate.
const RAMP_SECONDS: f32 = 0.005;

/// Fallback length for a one-shot tone when the request has no duration.
const DEFAULT_TONE: Duration = Duration::from_secs(1);

/// Play a single tone and tear everything down afterwards. Blocking: returns
/// once the dedicated render graph has been destroyed and the session
/// released. Each call is independent, nothing is reused.
pub fn play_tone(arbiter: &SharedArbiter, request: &ToneRequest) -> Result<(), StartError> {
    let token = arbiter
        .lock()
        .unwrap()
        .request(ClientKind::Playback, &HardwareConfig::playback())?;

    let duration = request.duration.unwrap_or(DEFAULT_TONE);
    let result = run_one_shot(request, duration);

    arbiter.lock().unwrap().release(&token);
    result.map_err(StartError::EngineStartFailure)
}

fn run_one_shot(request: &ToneRequest, duration: Duration) -> Result<()> {
    let OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    } = setup_output_device()?;

    let stream = match sample_format {
        SampleFormat::F32 => build_one_shot_stream::<f32>(
            &device,
            &config,
            output_channels,
            output_sample_rate as f32,
            request.frequency,
            request.amplitude,
        )?,
        SampleFormat::I16 => build_one_shot_stream::<i16>(
            &device,
            &config,
            output_channels,
            output_sample_rate as f32,
            request.frequency,
            request.amplitude,
        )?,
        SampleFormat::U16 => build_one_shot_stream::<u16>(
            &device,
            &config,
            output_channels,
            output_sample_rate as f32,
            request.frequency,
            request.amplitude,
        )?,
        other => anyhow::bail!("Unsupported sample format: {:?}", other),
    };

    stream.play()?;
    thread::sleep(duration);
    drop(stream);
    Ok(())
}

fn build_one_shot_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    sample_rate: f32,
    frequency: f32,
    amplitude: f32,
) -> Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
{
    let err_fn = |err| eprintln!("Tone output error: {err}");
    let mut phase = 0.0f32;
    // Fixed-size frame-aligned scratch; the callback loops over it in chunks
    // so no buffer size can make it allocate.
    let mut scratch = vec![0.0f32; scratch_len(channels)];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut offset = 0;
            while offset < data.len() {
                let n = scratch.len().min(data.len() - offset);
                render_sine(
                    &mut scratch[..n],
                    channels,
                    frequency,
                    amplitude,
                    sample_rate,
                    &mut phase,
                );
                for (out, s) in data[offset..offset + n].iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*s);
                }
                offset += n;
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Scratch length for the render callbacks: around 4096 samples, rounded to
/// whole frames.
fn scratch_len(channels: usize) -> usize {
    (4096 / channels.max(1)).max(1) * channels.max(1)
}

/// Continuous reference tone for tuning by ear.
///
/// The render graph is built once and kept alive; start/stop only move a
/// gain ramp on the output stage, so there are no restart clicks. Frequency
/// changes go through a lock-free cell and land on the next render call
/// without resetting phase.
pub struct Drone {
    arbiter: SharedArbiter,
    token: Option<SessionToken>,
    frequency: Arc<AtomicF32>,
    target_gain: Arc<AtomicF32>,
    amplitude: f32,
    stream: Option<Stream>,
}

impl Drone {
    pub fn new(arbiter: SharedArbiter) -> Self {
        Self {
            arbiter,
            token: None,
            frequency: Arc::new(AtomicF32::new(440.0)),
            target_gain: Arc::new(AtomicF32::new(0.0)),
            amplitude: 0.0,
            stream: None,
        }
    }

    /// Acquire the session and ramp the drone in. Idempotent while running.
    pub fn start(&mut self, request: &ToneRequest) -> Result<(), StartError> {
        self.frequency.set(request.frequency);
        self.amplitude = request.amplitude;

        let token = self
            .arbiter
            .lock()
            .unwrap()
            .request(ClientKind::Metronome, &HardwareConfig::playback())?;

        if self.stream.is_none() {
            match self.build_graph() {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => {
                    // No phantom owner: give the session back on engine failure.
                    self.arbiter.lock().unwrap().release(&token);
                    return Err(StartError::EngineStartFailure(e));
                }
            }
        }

        self.token = Some(token);
        self.target_gain.set(self.amplitude);
        Ok(())
    }

    /// Ramp out and release the session. The graph stays up for the next
    /// start.
    pub fn stop(&mut self) {
        self.target_gain.set(0.0);
        if let Some(token) = self.token.take() {
            self.arbiter.lock().unwrap().release(&token);
        }
    }

    pub fn set_frequency(&self, hz: f32) {
        self.frequency.set(hz.max(f32::MIN_POSITIVE));
    }

    pub fn frequency(&self) -> f32 {
        self.frequency.get()
    }

    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    fn build_graph(&self) -> Result<Stream> {
        let OutputConfig {
            device,
            config,
            sample_format,
            output_channels,
            output_sample_rate,
        } = setup_output_device()?;

        let stream = match sample_format {
            SampleFormat::F32 => build_drone_stream::<f32>(
                &device,
                &config,
                output_channels,
                output_sample_rate as f32,
                self.frequency.clone(),
                self.target_gain.clone(),
            )?,
            SampleFormat::I16 => build_drone_stream::<i16>(
                &device,
                &config,
                output_channels,
                output_sample_rate as f32,
                self.frequency.clone(),
                self.target_gain.clone(),
            )?,
            SampleFormat::U16 => build_drone_stream::<u16>(
                &device,
                &config,
                output_channels,
                output_sample_rate as f32,
                self.frequency.clone(),
                self.target_gain.clone(),
            )?,
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        };

        stream.play()?;
        Ok(stream)
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_drone_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    sample_rate: f32,
    frequency: Arc<AtomicF32>,
    target_gain: Arc<AtomicF32>,
) -> Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
{
    let err_fn = |err| eprintln!("Drone output error: {err}");
    // Phase and the ramped gain live inside the callback closure; the control
    // thread only ever touches the atomic cells.
    let mut phase = 0.0f32;
    let mut gain = 0.0f32;
    let ramp_step = 1.0 / (RAMP_SECONDS * sample_rate);
    let mut scratch = vec![0.0f32; scratch_len(channels)];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let freq = frequency.get();
            let target = target_gain.get();

            let mut offset = 0;
            while offset < data.len() {
                let n = scratch.len().min(data.len() - offset);
                render_sine(&mut scratch[..n], channels, freq, 1.0, sample_rate, &mut phase);

                let mut idx = 0;
                for frame in data[offset..offset + n].chunks_mut(channels) {
                    if gain < target {
                        gain = (gain + ramp_step).min(target);
                    } else {
                        gain = (gain - ramp_step).max(target);
                    }
                    for (out, s) in frame.iter_mut().zip(scratch[idx..].iter()) {
                        *out = T::from_sample(*s * gain);
                    }
                    idx += channels;
                }
                offset += n;
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
