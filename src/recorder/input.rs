// src/recorder/input.rs

use crate::recorder::level::{LevelBridge, LevelState};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::producer::Producer;
use std::sync::Arc;

/// AudioInput holds the CPAL input stream. The producer and the level state
/// are moved into the input callback; dropping AudioInput stops capture and
/// lets the writer thread drain out.
pub struct AudioInput {
    pub stream: Stream,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioInput {
    pub fn new<P>(producer: P, level: Arc<LevelBridge>) -> Result<(Self, usize, u32)>
    where
        P: Producer<Item = f32> + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No input device available"))?;

        let supported_config = device.default_input_config()?;
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let meter = LevelState::new(sample_rate as f32);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream_f32(&device, &config, producer, level, meter)?,
            SampleFormat::I16 => build_stream_i16(&device, &config, producer, level, meter)?,
            SampleFormat::U16 => build_stream_u16(&device, &config, producer, level, meter)?,
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        };

        Ok((
            Self {
                stream,
                channels,
                sample_rate,
            },
            channels,
            sample_rate,
        ))
    }
}

/// Push a block into the capture ring. If the ring is full the remainder is
/// dropped; the writer thread is expected to keep up.
fn push_block<P>(producer: &mut P, data: &[f32])
where
    P: Producer<Item = f32>,
{
    let mut pushed = 0usize;
    while pushed < data.len() {
        let n = producer.push_slice(&data[pushed..]);
        if n == 0 {
            break;
        }
        pushed += n;
    }
}

/// Build input stream when device sample format is f32 (no conversion needed).
fn build_stream_f32<P>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: P,
    level: Arc<LevelBridge>,
    mut meter: LevelState,
) -> Result<Stream>
where
    P: Producer<Item = f32> + Send + 'static,
{
    let err_fn = |err| eprintln!("Input stream error: {:?}", err);

    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _| {
            meter.process_block(data, &level);
            push_block(&mut producer, data);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Build input stream for i16 samples; convert to f32 before pushing.
fn build_stream_i16<P>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: P,
    level: Arc<LevelBridge>,
    mut meter: LevelState,
) -> Result<Stream>
where
    P: Producer<Item = f32> + Send + 'static,
{
    let err_fn = |err| eprintln!("Input stream error: {:?}", err);

    let stream = device.build_input_stream(
        config,
        move |data: &[i16], _| {
            let mut conv = Vec::with_capacity(data.len());
            for &s in data.iter() {
                conv.push(s as f32 / i16::MAX as f32);
            }
            meter.process_block(&conv, &level);
            push_block(&mut producer, &conv);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Build input stream for u16 samples; convert to f32 before pushing.
fn build_stream_u16<P>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: P,
    level: Arc<LevelBridge>,
    mut meter: LevelState,
) -> Result<Stream>
where
    P: Producer<Item = f32> + Send + 'static,
{
    let err_fn = |err| eprintln!("Input stream error: {:?}", err);

    let stream = device.build_input_stream(
        config,
        move |data: &[u16], _| {
            let mut conv = Vec::with_capacity(data.len());
            for &s in data.iter() {
                let f = (s as f32 / u16::MAX as f32) * 2.0 - 1.0;
                conv.push(f);
            }
            meter.process_block(&conv, &level);
            push_block(&mut producer, &conv);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}
