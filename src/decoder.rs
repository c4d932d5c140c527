// src/decoder.rs

use anyhow::{anyhow, Result};
use ringbuf::traits::Producer as RbProducer;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};

/// What a probe learns about an encoded blob.
pub struct BlobInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub duration: Duration,
}

/// Probe an encoded audio blob for rate, channel count and duration without
/// decoding the whole thing.
pub fn probe_blob(data: &[u8]) -> Result<BlobInfo> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default());
    let probed = get_probe().format(
        &Default::default(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("missing sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("missing channel layout"))?
        .count();
    let n_frames = track.codec_params.n_frames.unwrap_or(0);
    let duration = Duration::from_secs_f64(n_frames as f64 / sample_rate as f64);

    Ok(BlobInfo {
        sample_rate,
        channels,
        duration,
    })
}

/// Decode a blob on a worker thread, resampling to the output device rate and
/// pushing interleaved f32 into the playback ring. `finished` flips once the
/// last sample has been pushed; `stopped` aborts the thread from outside.
pub fn spawn_blob_decoder<P>(
    data: Vec<u8>,
    producer: P,
    is_playing: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    output_channels: usize,
    output_sample_rate: u32,
) -> JoinHandle<()>
where
    P: RbProducer<Item = f32> + Send + 'static,
{
    thread::spawn(move || {
        let run = BlobDecoder {
            data,
            producer,
            is_playing,
            stopped: stopped.clone(),
            output_channels,
            output_sample_rate,
        }
        .run();
        if let Err(e) = run {
            eprintln!("Decoder thread error: {e}");
        }
        finished.store(true, Ordering::Relaxed);
    })
}

struct BlobDecoder<P>
where
    P: RbProducer<Item = f32>,
{
    data: Vec<u8>,
    producer: P,
    is_playing: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    output_channels: usize,
    output_sample_rate: u32,
}

impl<P> BlobDecoder<P>
where
    P: RbProducer<Item = f32>,
{
    fn run(mut self) -> Result<()> {
        let blob = std::mem::take(&mut self.data);
        let mss = MediaSourceStream::new(Box::new(Cursor::new(blob)), Default::default());
        let probed = get_probe().format(
            &Default::default(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("no default audio track"))?;
        let track_id = track.id;
        let source_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("missing sample rate"))?;

        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        let mut resampler =
            build_resampler(source_rate, self.output_sample_rate, self.output_channels)?;
        let mut stage_planar: Vec<Vec<f32>> =
            vec![Vec::with_capacity(4096); self.output_channels];

        loop {
            if self.stopped.load(Ordering::Relaxed) {
                return Ok(());
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::ResetRequired) => break,
                Err(_) => break, // end of stream
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let decoded_ch = decoded.spec().channels.count();

                    if sample_buf.is_none() {
                        let capacity = decoded.capacity() as u64;
                        sample_buf = Some(SampleBuffer::<f32>::new(capacity, *decoded.spec()));
                    }
                    let buf = sample_buf.as_mut().unwrap();
                    buf.copy_interleaved_ref(decoded);

                    let interleaved = if decoded_ch == self.output_channels {
                        buf.samples().to_vec()
                    } else {
                        updown_mix_interleaved(buf.samples(), decoded_ch, self.output_channels)
                    };

                    if let Some(r) = resampler.as_mut() {
                        append_interleaved_to_planar(
                            &interleaved,
                            &mut stage_planar,
                            self.output_channels,
                        );
                        loop {
                            let need = r.input_frames_next();
                            if planar_len(&stage_planar) < need {
                                break;
                            }
                            let in_block = take_from_planar(&mut stage_planar, need);
                            let out = r.process(&in_block, None)?;
                            if !self.push_all(&interleave(&out)) {
                                return Ok(());
                            }
                        }
                    } else if !self.push_all(&interleaved) {
                        return Ok(());
                    }
                }
                Err(SymphoniaError::IoError(_)) => continue,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(_) => break,
            }

            if !self.is_playing.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
        }

        // Flush whatever the resampler still holds.
        if let Some(r) = resampler.as_mut() {
            let have = planar_len(&stage_planar);
            if have > 0 {
                let tail = take_from_planar(&mut stage_planar, have);
                let out = r.process_partial(Some(&tail), None)?;
                if !self.push_all(&interleave(&out)) {
                    return Ok(());
                }
            }
            let out = r.process_partial::<Vec<f32>>(None, None)?;
            if !out.is_empty() && !out[0].is_empty() {
                self.push_all(&interleave(&out));
            }
        }

        Ok(())
    }

    /// Blocking push into the playback ring. Returns false if a stop arrived
    /// while waiting, so the decode loop can bail instead of spinning against
    /// a consumer that no longer drains.
    fn push_all(&mut self, data: &[f32]) -> bool {
        let mut idx = 0usize;
        while idx < data.len() {
            match self.producer.try_push(data[idx]) {
                Ok(()) => idx += 1,
                Err(_) => {
                    if self.stopped.load(Ordering::Relaxed) {
                        return false;
                    }
                    thread::park_timeout(Duration::from_micros(200));
                }
            }
        }
        true
    }
}

fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let chunk_size = 1024;
    let r = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels)?;
    Ok(Some(r))
}

fn append_interleaved_to_planar(interleaved: &[f32], planar: &mut [Vec<f32>], channels: usize) {
    let frames = interleaved.len() / channels;
    for f in 0..frames {
        let row = &interleaved[f * channels..(f + 1) * channels];
        for ch in 0..channels {
            planar[ch].push(row[ch]);
        }
    }
}

fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    let channels = planar.len();
    let mut out = Vec::with_capacity(channels);
    for ch in 0..channels {
        let n = frames.min(planar[ch].len());
        let tail = planar[ch].split_off(n);
        let head = std::mem::replace(&mut planar[ch], tail);
        out.push(head);
    }
    out
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    if channels == 0 {
        return Vec::new();
    }
    let frames = planar[0].len();
    let mut out = vec![0.0f32; frames * channels];
    for f in 0..frames {
        for ch in 0..channels {
            out[f * channels + ch] = planar[ch][f];
        }
    }
    out
}

fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, 2) => {
            for f in 0..frames {
                let m = input[f];
                out[f * 2] = m;
                out[f * 2 + 1] = m;
            }
        }
        (2, 1) => {
            for f in 0..frames {
                let l = input[f * 2];
                let r = input[f * 2 + 1];
                out[f] = 0.5 * (l + r);
            }
        }
        _ if out_ch < in_ch => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc];
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    let ic = oc % in_ch;
                    out[f * out_ch + oc] = input[f * in_ch + ic];
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn wav_blob(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut data = Vec::new();
        {
            let cursor = Cursor::new(&mut data);
            let mut writer = hound::WavWriter::new(cursor, spec).unwrap();
            for i in 0..(frames * channels as u32) {
                writer.write_sample(((i % 100) as i16) * 50).unwrap();
            }
            writer.finalize().unwrap();
        }
        data
    }

    #[test]
    fn probe_reads_rate_channels_and_duration() {
        let blob = wav_blob(22_050, 2, 22_050);
        let info = probe_blob(&blob).unwrap();
        assert_eq!(info.sample_rate, 22_050);
        assert_eq!(info.channels, 2);
        assert_abs_diff_eq!(info.duration.as_secs_f64(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn probe_rejects_garbage() {
        assert!(probe_blob(&[0u8; 64]).is_err());
    }

    #[test]
    fn mono_fans_out_to_stereo() {
        let out = updown_mix_interleaved(&[0.1, 0.2], 1, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_folds_down_to_mono() {
        let out = updown_mix_interleaved(&[0.2, 0.4], 2, 1);
        assert_abs_diff_eq!(out[0], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn planar_staging_round_trips() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[1.0, 2.0, 3.0, 4.0], &mut planar, 2);
        assert_eq!(planar_len(&planar), 2);
        let taken = take_from_planar(&mut planar, 1);
        assert_eq!(taken, vec![vec![1.0], vec![2.0]]);
        assert_eq!(interleave(&taken), vec![1.0, 2.0]);
        assert_eq!(planar_len(&planar), 1);
    }
}
