//! Playback sink (CPAL output stream).
//!
//! The pull loop sends interleaved stereo `i16` blocks over a bounded channel; the
//! CPAL callback drains it without blocking, maps stereo onto the device layout and
//! converts to the device sample format. Underruns are filled with silence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::Receiver;

/// Counters updated by the output callback.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

/// Build a CPAL output stream playing stereo blocks received on `blocks`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    blocks: Receiver<Vec<i16>>,
    counters: Arc<PlaybackCounters>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, blocks, counters),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, blocks, counters),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, blocks, counters),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, blocks, counters),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

const SRC_CHANNELS: usize = 2;

/// Block currently being played by the callback.
#[derive(Default)]
struct PlaybackState {
    pos: usize,
    src: Vec<i16>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    blocks: Receiver<Vec<i16>>,
    counters: Arc<PlaybackCounters>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = config.channels as usize;
    let mut st = PlaybackState::default();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let mut filled = 0usize;

            'frames: for frame in 0..frames {
                while st.pos + SRC_CHANNELS > st.src.len() {
                    match blocks.try_recv() {
                        Ok(block) => {
                            st.src = block;
                            st.pos = 0;
                        }
                        Err(_) => {
                            counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                            counters
                                .underrun_frames
                                .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                            data[frame * channels_out..].fill(T::EQUILIBRIUM);
                            break 'frames;
                        }
                    }
                }
                let left = st.src[st.pos];
                let right = st.src[st.pos + 1];
                for ch in 0..channels_out {
                    let sample = map_channel(left, right, channels_out, ch);
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<i16>(sample);
                }
                st.pos += SRC_CHANNELS;
                filled += 1;
            }

            if filled > 0 {
                counters.played_frames.fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Stereo to `dst_channels` mapping: mono averages, stereo passes through, extra
/// channels reuse the right channel.
fn map_channel(left: i16, right: i16, dst_channels: usize, dst_ch: usize) -> i16 {
    match (dst_channels, dst_ch) {
        (1, _) => ((left as i32 + right as i32) / 2) as i16,
        (_, 0) => left,
        _ => right,
    }
}

/// Decode an S16LE byte block into samples.
pub fn le_bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
