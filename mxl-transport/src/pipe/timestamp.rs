// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::OnceLock, time::Instant};

/// Correlates a frame position with the time it was consumed.
///
/// Fixed layout so it can travel through a [`crate::Shared`] slot placed in a
/// shared region.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AudioTimestamp {
    /// Total frames consumed by the reader when the timestamp was taken.
    pub position: u64,
    /// Monotonic clock reading in nanoseconds, see [`now_ns`].
    pub time_ns: u64,
}

/// Nanoseconds on the process-wide monotonic clock.
///
/// The epoch is the first call in the process, so values are only
/// comparable within one process.
pub fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
