// src/recorder/writer.rs

use anyhow::Result;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use ringbuf::consumer::Consumer;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Drain f32 samples from the capture ring into an in-memory 16-bit WAV blob.
/// Runs on the writer thread until `done` is raised (and the ring drained) or
/// the producer goes away; returns the finalized bytes. The core never touches
/// files; persistence gets one opaque blob.
pub fn encode_from_ring<C>(
    mut consumer: C,
    sample_rate: u32,
    channels: usize,
    done: Arc<AtomicBool>,
) -> Result<Vec<u8>>
where
    C: Consumer<Item = f32>,
{
    let spec = WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut data = Vec::new();
    {
        let cursor = Cursor::new(&mut data);
        let mut writer = WavWriter::new(cursor, spec)?;

        // Temporary buffer for popping samples from consumer.
        let mut tmp = vec![0.0f32; 4096];

        // Only allow an exit once at least one sample has been written, so an
        // empty buffer at startup doesn't end the take immediately.
        let mut wrote_any = false;

        // After we've written data, a buffer that stays empty this long means
        // the input stream was dropped; finalize.
        const GRACEFUL_IDLE_MS: u128 = 500;
        let mut idle_start: Option<Instant> = None;

        loop {
            let popped = consumer.pop_slice(tmp.as_mut_slice());

            if popped == 0 {
                // Ring drained and stop() raised the flag: the take is over,
                // written samples or not.
                if done.load(Ordering::Relaxed) {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
                if wrote_any {
                    idle_start.get_or_insert_with(Instant::now);
                    if let Some(start) = idle_start {
                        if start.elapsed().as_millis() >= GRACEFUL_IDLE_MS {
                            break;
                        }
                    }
                }
                continue;
            }

            idle_start = None;
            wrote_any = true;

            // Write popped samples as 16-bit signed ints.
            for &s in &tmp[..popped] {
                let samp = if s.is_finite() {
                    (s.clamp(-1.0, 1.0) * (i16::MAX as f32)) as i16
                } else {
                    0i16
                };
                writer.write_sample(samp)?;
            }
        }

        writer.finalize()?;
    }

    Ok(data)
}

/// Measure a finished blob's duration by decoding it once. This is the
/// authoritative duration; nothing tracks it live.
pub fn measure_duration(data: &[u8]) -> Result<Duration> {
    let reader = WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    let frames = reader.duration();
    Ok(Duration::from_secs_f64(
        frames as f64 / spec.sample_rate as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ringbuf::{
        traits::{Producer, Split},
        HeapRb,
    };

    #[test]
    fn encodes_ring_contents_into_a_wav_blob() {
        let rb = HeapRb::<f32>::new(65_536);
        let (mut producer, consumer) = rb.split();

        // Half a second of mono at 8kHz.
        let samples: Vec<f32> = (0..4000).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        assert_eq!(producer.push_slice(&samples), samples.len());
        drop(producer);

        let done = Arc::new(AtomicBool::new(true));
        let blob = encode_from_ring(consumer, 8_000, 1, done).unwrap();
        assert!(!blob.is_empty());

        let mut reader = WavReader::new(Cursor::new(&blob[..])).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.duration(), 4000);

        // Samples survive the int16 round trip.
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), samples.len());
        assert_abs_diff_eq!(
            decoded[150] as f32 / i16::MAX as f32,
            samples[150],
            epsilon = 1e-3
        );
    }

    #[test]
    fn duration_is_measured_from_the_blob() {
        let rb = HeapRb::<f32>::new(65_536);
        let (mut producer, consumer) = rb.split();
        let samples = vec![0.25f32; 44_100];
        producer.push_slice(&samples);
        drop(producer);

        // No stop signal here: the graceful-idle fallback still ends the take.
        let done = Arc::new(AtomicBool::new(false));
        let blob = encode_from_ring(consumer, 44_100, 1, done).unwrap();
        let duration = measure_duration(&blob).unwrap();
        assert_abs_diff_eq!(duration.as_secs_f64(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_take_finalizes_once_signaled() {
        // A take stopped before the input stream ever delivered a sample must
        // still finalize instead of waiting for data forever.
        let rb = HeapRb::<f32>::new(1024);
        let (producer, consumer) = rb.split();
        drop(producer);

        let done = Arc::new(AtomicBool::new(true));
        let started = Instant::now();
        let blob = encode_from_ring(consumer, 48_000, 2, done).unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));

        let reader = WavReader::new(Cursor::new(&blob[..])).unwrap();
        assert_eq!(reader.duration(), 0);
    }

    #[test]
    fn non_finite_samples_are_written_as_silence() {
        let rb = HeapRb::<f32>::new(1024);
        let (mut producer, consumer) = rb.split();
        producer.push_slice(&[f32::NAN, f32::INFINITY, 0.5]);
        drop(producer);

        let done = Arc::new(AtomicBool::new(true));
        let blob = encode_from_ring(consumer, 8_000, 1, done).unwrap();
        let mut reader = WavReader::new(Cursor::new(&blob[..])).unwrap();
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded[0], 0);
        assert_eq!(decoded[1], 0);
        assert!(decoded[2] > 0);
    }
}
