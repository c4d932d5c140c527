// src/player.rs

use crate::audio::{build_stream, setup_output_device, OutputConfig};
use crate::decoder::{probe_blob, spawn_blob_decoder};
use crate::error::StartError;
use crate::session::backend::HardwareConfig;
use crate::session::{ClientKind, SessionToken, SharedArbiter};
use anyhow::Result;
use cpal::{SampleFormat, Stream};
use cpal::traits::StreamTrait;
use ringbuf::{traits::Split, HeapRb};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

/// Playback consumer: takes one encoded audio blob, owns a Playback session
/// while audible, and plays the blob through a decoder thread feeding a ring
/// buffer that the output stream drains. Never touches files.
pub struct Playback {
    arbiter: SharedArbiter,
    token: Option<SessionToken>,
    _stream: Stream,
    decoder_handle: Option<JoinHandle<()>>,
    is_playing: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    total_duration: Duration,
    current_time_samples: Arc<AtomicU64>,
    output_sample_rate: u32,
    output_channels: u16,
}

impl Playback {
    /// Request the session, probe the blob and start playing it. Any engine
    /// failure after the grant releases the session before returning.
    pub fn start(arbiter: SharedArbiter, blob: Vec<u8>) -> Result<Self, StartError> {
        let token = arbiter
            .lock()
            .unwrap()
            .request(ClientKind::Playback, &HardwareConfig::playback())?;

        match Self::engine_start(arbiter.clone(), token.clone(), blob) {
            Ok(player) => Ok(player),
            Err(e) => {
                arbiter.lock().unwrap().release(&token);
                Err(StartError::EngineStartFailure(e))
            }
        }
    }

    fn engine_start(arbiter: SharedArbiter, token: SessionToken, blob: Vec<u8>) -> Result<Self> {
        let info = probe_blob(&blob)?;
        println!(
            "🎧 Clip info: channels: {}, sample_rate: {}, duration: {:?}",
            info.channels, info.sample_rate, info.duration
        );

        let rb = HeapRb::<f32>::new(131_072);
        let (producer, consumer) = rb.split();

        let is_playing = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let current_time_samples = Arc::new(AtomicU64::new(0));

        let output = setup_output_device()?;

        let decoder_handle = spawn_blob_decoder(
            blob,
            producer,
            is_playing.clone(),
            stopped.clone(),
            finished.clone(),
            output.output_channels,
            output.output_sample_rate,
        );

        let err_fn = |err| eprintln!("An error occurred on the output audio stream: {}", err);
        let OutputConfig {
            device,
            config,
            sample_format,
            output_channels,
            output_sample_rate,
        } = output;

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32, _>(
                device,
                config,
                is_playing.clone(),
                volume.clone(),
                current_time_samples.clone(),
                consumer,
                err_fn,
            )?,
            SampleFormat::I16 => build_stream::<i16, _>(
                device,
                config,
                is_playing.clone(),
                volume.clone(),
                current_time_samples.clone(),
                consumer,
                err_fn,
            )?,
            SampleFormat::U16 => build_stream::<u16, _>(
                device,
                config,
                is_playing.clone(),
                volume.clone(),
                current_time_samples.clone(),
                consumer,
                err_fn,
            )?,
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        };

        stream.play()?;

        Ok(Self {
            arbiter,
            token: Some(token),
            _stream: stream,
            decoder_handle: Some(decoder_handle),
            is_playing,
            stopped,
            finished,
            volume,
            total_duration: info.duration,
            current_time_samples,
            output_sample_rate,
            output_channels: output_channels as u16,
        })
    }

    pub fn get_total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn get_current_time(&self) -> Duration {
        let samples = self.current_time_samples.load(Ordering::Relaxed) as f64;
        let frames = samples / self.output_channels as f64;
        let seconds = frames / self.output_sample_rate as f64;
        Duration::from_secs_f64(seconds)
    }

    pub fn pause(&self) {
        self.is_playing.store(false, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.is_playing.store(true, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    /// The decoder pushed its last sample. The ring may still hold a moment
    /// of audio.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, level: f32) {
        let new_float = level.clamp(0.0, 1.0);
        self.volume.store(new_float.to_bits(), Ordering::Relaxed);
    }

    pub fn get_volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Synchronous stop: silences output, unwinds the decoder thread and
    /// releases the session exactly once. Safe to call repeatedly; also runs
    /// on drop so a finished or abandoned playback cannot leak ownership.
    pub fn stop(&mut self) {
        self.is_playing.store(false, Ordering::Relaxed);
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(handle) = self.decoder_handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
        if let Some(token) = self.token.take() {
            self.arbiter.lock().unwrap().release(&token);
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}
