// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, atomic::Ordering};

use tracing::trace;

use super::{
    Port, Source, checked_bytes, negotiate_fixed, not_negotiated,
    timestamp::{AudioTimestamp, now_ns},
    writer::PipeShared,
};
use crate::{Format, Result, state_queue::Mutator};

/// Reading end of a [`crate::MonoPipe`].
///
/// Obtained from [`crate::MonoPipe::reader`]; dropping it detaches the reader
/// so another one can attach. Reads never block. After every non-empty read
/// the reader publishes an [`AudioTimestamp`] that the writer side can pick up
/// with [`crate::MonoPipe::poll_timestamp`].
pub struct MonoPipeReader {
    shared: Arc<PipeShared>,
    negotiated: bool,
    frames_read: u64,
    /// Set once an external timestamp source took over.
    external_timestamps: bool,
}

impl MonoPipeReader {
    pub(crate) fn new(shared: Arc<PipeShared>) -> Self {
        Self {
            shared,
            negotiated: false,
            frames_read: 0,
            external_timestamps: false,
        }
    }

    /// Publishes a timestamp measured elsewhere, e.g. by the device that
    /// actually rendered the frames.
    ///
    /// From then on reads no longer publish their own timestamps.
    pub fn on_timestamp(&mut self, timestamp: AudioTimestamp) {
        self.external_timestamps = true;
        self.publish(timestamp);
    }

    fn publish(&self, timestamp: AudioTimestamp) {
        Mutator::new(&self.shared.timestamps).push(timestamp);
    }
}

impl Port for MonoPipeReader {
    fn format(&self) -> Format {
        self.shared.format
    }

    fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    fn negotiate(&mut self, offers: &[Format]) -> Result<usize> {
        let index = negotiate_fixed("MonoPipeReader", self.shared.format, offers)?;
        self.negotiated = true;
        Ok(index)
    }
}

impl Source for MonoPipeReader {
    fn available_to_read(&self) -> Result<usize> {
        if !self.negotiated {
            return Err(not_negotiated());
        }
        let filled = self.shared.filled();
        debug_assert!(filled <= self.shared.max_frames);
        Ok(filled as usize)
    }

    fn read(&mut self, buffer: &mut [u8], count: usize) -> Result<usize> {
        if !self.negotiated {
            return Err(not_negotiated());
        }
        let frame_size = self.shared.frame_size;
        checked_bytes(count, frame_size, buffer.len())?;

        let shared = &self.shared;
        let rear = shared.rear.load(Ordering::Acquire);
        let front = shared.front.load(Ordering::Relaxed);
        let filled = rear.wrapping_sub(front).min(shared.max_frames);
        let read = filled.min(count.min(u32::MAX as usize) as u32);
        if read == 0 {
            return Ok(0);
        }
        // Safety: the frames up to `rear` were published by the writer and
        // stay ours until `front` moves past them.
        unsafe { shared.copy_out(front, &mut buffer[..read as usize * frame_size]) };
        shared
            .front
            .store(front.wrapping_add(read), Ordering::Release);
        self.frames_read += read as u64;

        if !self.external_timestamps {
            self.publish(AudioTimestamp {
                position: self.frames_read,
                time_ns: now_ns(),
            });
        }
        trace!("MonoPipeReader read {read} of {count} frames");
        Ok(read as usize)
    }

    fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl Drop for MonoPipeReader {
    fn drop(&mut self) {
        self.shared.reader_attached.store(false, Ordering::Release);
    }
}
