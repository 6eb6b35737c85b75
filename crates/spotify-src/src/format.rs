//! Fixed output format and sample/time conversions.
//!
//! The element never negotiates: it always produces signed 16-bit little-endian
//! interleaved stereo at 44.1 kHz, which is what the streaming client decodes to.

use std::time::Duration;

/// Output sample rate in Hz.
pub const OUTPUT_RATE: u32 = 44_100;
/// Output channel count.
pub const OUTPUT_CHANNELS: u16 = 2;
/// Bytes per sample (`i16`).
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Sample format of a block delivered by the streaming client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Size in bytes of `frames` interleaved 16-bit frames in this format.
    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames
            .saturating_mul(self.channels as usize)
            .saturating_mul(BYTES_PER_SAMPLE)
    }

    /// Whether this format matches the element's fixed output caps.
    pub fn matches_output(&self) -> bool {
        self.sample_rate == OUTPUT_RATE && self.channels == OUTPUT_CHANNELS
    }
}

/// Capabilities stamped onto every buffer handed to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioCaps {
    pub rate: u32,
    pub channels: u16,
    pub width: u16,
    pub signed: bool,
    pub little_endian: bool,
}

impl AudioCaps {
    /// The one format this element produces.
    pub const fn output() -> Self {
        Self {
            rate: OUTPUT_RATE,
            channels: OUTPUT_CHANNELS,
            width: 16,
            signed: true,
            little_endian: true,
        }
    }

    /// Bytes per interleaved frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.width as usize / 8)
    }
}

impl std::fmt::Display for AudioCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "audio/x-raw, format={}{}{}, rate={}, channels={}",
            if self.signed { "S" } else { "U" },
            self.width,
            if self.little_endian { "LE" } else { "BE" },
            self.rate,
            self.channels
        )
    }
}

/// Duration of `frames` frames at `rate_hz`, rounded down to whole nanoseconds.
///
/// A zero rate yields a zero duration.
pub fn frames_to_duration(frames: u64, rate_hz: u32) -> Duration {
    if rate_hz == 0 {
        return Duration::ZERO;
    }
    let nanos = (frames as u128 * 1_000_000_000u128) / rate_hz as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Convert interleaved `i16` samples to little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
