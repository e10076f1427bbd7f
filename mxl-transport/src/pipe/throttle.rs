// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Write pacing for pipes that emulate a draining device.

use std::time::Duration;

use crate::config::ThrottleConfig;

/// Returns the pace, in percent of real time, for a pipe holding `filled`
/// frames against a target depth of `setpoint` frames.
pub fn pace_percent(config: &ThrottleConfig, filled: u32, setpoint: u32) -> u32 {
    let fill_permille = filled as u64 * 1000 / setpoint.max(1) as u64;
    config
        .bands
        .iter()
        .find(|band| fill_permille <= band.max_fill_permille as u64)
        .map_or(config.saturated_pace_percent, |band| band.pace_percent)
}

/// Computes how long a blocking writer sleeps after one pass of its loop.
///
/// `written` frames went in during this pass, leaving `filled` frames in the
/// pipe. When nothing could be written the writer backs off for the playback
/// time of `stalled` frames at the stalled pace instead.
pub fn sleep_duration(
    config: &ThrottleConfig,
    written: u32,
    stalled: u32,
    filled: u32,
    setpoint: u32,
    sample_rate: u32,
) -> Duration {
    let (frames, pace) = if written > 0 {
        (written, pace_percent(config, filled, setpoint))
    } else {
        (stalled, config.stalled_pace_percent)
    };
    // percent of 1e9 ns per second
    let ns = frames as u128 * pace as u128 * 10_000_000 / sample_rate.max(1) as u128;
    let ns = ns.min(config.max_sleep_ns as u128) as u64;
    Duration::from_nanos(ns)
}
