// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Tuning parameters for the transport primitives.
//!
//! The retry counts and sleep durations used by the bounded lock and the
//! write throttle are empirical. They are collected here so deployments can
//! override them from a JSON document; every section falls back to the
//! defaults when omitted.
//!
//! ```json
//! {
//!   "lock": { "retries": 2, "retry_delay_us": 500 },
//!   "poll_tries": 5,
//!   "pipe": {
//!     "requested_frames": 1024,
//!     "format": { "sample_rate": 48000, "channel_count": 2, "sample_format": "i16" },
//!     "write_can_block": true
//!   }
//! }
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Format, Result};

/// Default number of attempts made by [`crate::Observer::poll`].
pub const DEFAULT_POLL_TRIES: u32 = 5;

/// Schedule for acquiring the control block lock without blocking indefinitely.
///
/// One immediate try-lock is followed by `retries` further attempts, each
/// preceded by a sleep of `retry_delay_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockRetryPolicy {
    /// Additional try-lock attempts after the first one fails.
    pub retries: u32,
    /// Sleep before each retry, in microseconds.
    pub retry_delay_us: u64,
    /// Polling granularity of the shared condition variable, in microseconds.
    pub wait_poll_us: u64,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay_us: 1000,
            wait_poll_us: 500,
        }
    }
}

impl LockRetryPolicy {
    /// Returns the sleep before each retry.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_micros(self.retry_delay_us)
    }

    /// Returns the condition variable polling interval (at least one microsecond).
    pub fn wait_poll(&self) -> Duration {
        Duration::from_micros(self.wait_poll_us.max(1))
    }

    /// Upper bound on the time spent acquiring the lock, excluding scheduler noise.
    pub fn budget(&self) -> Duration {
        self.retry_delay() * self.retries
    }
}

/// One fill band of the write throttle.
///
/// A write that leaves the pipe filled to at most `max_fill_permille` of the
/// setpoint sleeps for `pace_percent` of the nominal playback time of the
/// frames it wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleBand {
    /// Upper bound of the band, in thousandths of the setpoint.
    pub max_fill_permille: u32,
    /// Sleep length relative to real time, in percent.
    pub pace_percent: u32,
}

/// Fill-level dependent backoff used by blocking pipe writes.
///
/// Near-empty pipes fill fastest and near-full pipes slowest, which keeps the
/// mean depth around the setpoint the way a hardware sink would.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Bands ordered by ascending `max_fill_permille`.
    pub bands: Vec<ThrottleBand>,
    /// Pace used when the fill level exceeds every band.
    pub saturated_pace_percent: u32,
    /// Pace used when a write made no progress because the pipe was full.
    pub stalled_pace_percent: u32,
    /// Longest single sleep, in nanoseconds.
    pub max_sleep_ns: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let band = |max_fill_permille, pace_percent| ThrottleBand {
            max_fill_permille,
            pace_percent,
        };
        Self {
            bands: vec![
                band(500, 50),
                band(750, 75),
                band(1250, 100),
                band(1500, 115),
                band(1750, 135),
            ],
            saturated_pace_percent: 175,
            stalled_pace_percent: 135,
            max_sleep_ns: 999_999_999,
        }
    }
}

/// Construction parameters of a [`crate::MonoPipe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Requested capacity in frames; rounded up to a power of two.
    pub requested_frames: usize,
    /// The pipe's fixed format.
    pub format: Format,
    /// Whether writes sleep to emulate a draining device.
    #[serde(default)]
    pub write_can_block: bool,
    /// Throttle setpoint in frames; 11/16 of `requested_frames` when absent.
    #[serde(default)]
    pub setpoint_frames: Option<u32>,
    /// Throttle bands.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Control block lock schedule.
    pub lock: LockRetryPolicy,
    /// Attempts made by a state queue observer before giving up on a poll.
    pub poll_tries: u32,
    /// Optional pipe definition.
    pub pipe: Option<PipeConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lock: LockRetryPolicy::default(),
            poll_tries: DEFAULT_POLL_TRIES,
            pipe: None,
        }
    }
}

impl TransportConfig {
    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be read and
    /// [`crate::Error::Config`] if it is malformed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
