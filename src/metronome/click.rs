// src/metronome/click.rs

use crate::audio::{setup_output_device, OutputConfig};
use anyhow::Result;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::{
    traits::{Producer, Split},
    HeapRb,
};
use std::f32::consts::TAU;

/// Click length in seconds: 1ms attack, sustain to 20ms, 10ms release.
const CLICK_SECONDS: f32 = 0.03;

/// Pre-render one click as mono samples. The downbeat gets a higher pitch and
/// more level than the upbeats.
pub fn render_click(sample_rate: f32, accented: bool) -> Vec<f32> {
    let num_samples = (sample_rate * CLICK_SECONDS) as usize;
    let freq = if accented { 1200.0 } else { 1000.0 };
    let level = if accented { 1.0 } else { 0.7 };

    let mut samples = Vec::with_capacity(num_samples);
    for i in 0..num_samples {
        let t = i as f32 / sample_rate;
        let env = if t < 0.001 {
            t / 0.001
        } else if t < 0.02 {
            1.0
        } else {
            (1.0 - (t - 0.02) / 0.01).max(0.0)
        };
        samples.push((TAU * freq * t).sin() * env * level);
    }
    samples
}

/// Owns the metronome's output stream. Ticks push a pre-rendered click into
/// an SPSC ring; the audio callback drains it, mono fanned out to every
/// channel.
pub struct ClickOutput {
    producer: ringbuf::HeapProd<f32>,
    _stream: Stream,
    normal: Vec<f32>,
    accent: Vec<f32>,
}

impl ClickOutput {
    pub fn new() -> Result<Self> {
        let OutputConfig {
            device,
            config,
            sample_format,
            output_channels,
            output_sample_rate,
        } = setup_output_device()?;

        // One second of mono headroom is far more than a click needs.
        let rb = HeapRb::<f32>::new(output_sample_rate as usize);
        let (producer, consumer) = rb.split();

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_click_stream::<f32, _>(&device, &config, output_channels, consumer)?
            }
            SampleFormat::I16 => {
                build_click_stream::<i16, _>(&device, &config, output_channels, consumer)?
            }
            SampleFormat::U16 => {
                build_click_stream::<u16, _>(&device, &config, output_channels, consumer)?
            }
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        };
        stream.play()?;

        let rate = output_sample_rate as f32;
        Ok(Self {
            producer,
            _stream: stream,
            normal: render_click(rate, false),
            accent: render_click(rate, true),
        })
    }

    /// Queue one click. Best-effort: if the ring is somehow full the click is
    /// shortened rather than blocking the scheduler thread.
    pub fn click(&mut self, accented: bool) {
        let buffer = if accented { &self.accent } else { &self.normal };
        let _ = self.producer.push_slice(buffer);
    }
}

fn build_click_stream<T, C>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut consumer: C,
) -> Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
    C: ringbuf::traits::Consumer<Item = f32> + Send + 'static,
{
    let err_fn = |err| eprintln!("Metronome output error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            for frame in data.chunks_mut(channels) {
                let s = consumer.try_pop().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = T::from_sample(s);
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
