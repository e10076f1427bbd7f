// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Audio frame formats exchanged during port negotiation.
//!
//! A [`Format`] fixes the sample rate, channel count and sample encoding of a
//! stream. The frame size derived from it is the unit of every pipe cursor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Highest channel count a pipe accepts.
pub const MAX_CHANNELS: u32 = 8;

/// Sample rates accepted by [`Format::is_valid`].
pub const SUPPORTED_SAMPLE_RATES: [u32; 13] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000, 176400, 192000,
];

/// Encoding of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit integer.
    I16,
    /// Signed 24-bit integer, packed in 3 bytes.
    I24Packed,
    /// Signed 32-bit integer.
    I32,
    /// 32-bit IEEE float.
    F32,
}

impl SampleFormat {
    /// Returns the width of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I24Packed => 3,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

/// Stream format: sample rate × channel count × sample width.
///
/// # Examples
///
/// ```
/// use mxl_transport::{Format, SampleFormat};
///
/// let format = Format::new(48000, 2, SampleFormat::I16);
/// assert!(format.is_valid());
/// assert_eq!(format.frame_size(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channel_count: u32,
    /// Encoding of each sample.
    pub sample_format: SampleFormat,
}

impl Format {
    /// A format that never validates.
    pub const INVALID: Format = Format {
        sample_rate: 0,
        channel_count: 0,
        sample_format: SampleFormat::I16,
    };

    /// Creates a format from its three components.
    pub const fn new(sample_rate: u32, channel_count: u32, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_format,
        }
    }

    /// Returns `true` if the rate is supported and the channel count is in `1..=MAX_CHANNELS`.
    pub fn is_valid(&self) -> bool {
        SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate)
            && (1..=MAX_CHANNELS).contains(&self.channel_count)
    }

    /// Returns the size of one interleaved frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.channel_count as usize * self.sample_format.bytes_per_sample()
    }

    /// Returns the playback duration of `frames` frames at this sample rate.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = frames as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Returns the number of whole frames played in `duration`.
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        let frames = duration.as_nanos() * self.sample_rate as u128 / 1_000_000_000;
        frames.min(u64::MAX as u128) as u64
    }
}
