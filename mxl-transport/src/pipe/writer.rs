// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use std::{
    cell::UnsafeCell,
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Instant,
};

use tracing::{debug, trace};

use super::{
    Port, Sink, checked_bytes, negotiate_fixed, not_negotiated, reader::MonoPipeReader, throttle,
    timestamp::AudioTimestamp,
};
use crate::{
    Error, Format, Result,
    config::{DEFAULT_POLL_TRIES, PipeConfig, ThrottleConfig},
    state_queue::{Observer, Shared},
};

/// Largest ring a pipe may allocate, in frames.
pub const MAX_PIPE_FRAMES: usize = 1 << 30;

/// State shared by the two ends of a pipe.
pub(crate) struct PipeShared {
    buffer: Box<[UnsafeCell<u8>]>,
    /// Consumer cursor.
    pub(crate) front: AtomicU32,
    /// Producer cursor.
    pub(crate) rear: AtomicU32,
    pub(crate) max_frames: u32,
    pub(crate) frame_size: usize,
    pub(crate) format: Format,
    shutdown: AtomicBool,
    pub(crate) reader_attached: AtomicBool,
    pub(crate) timestamps: Shared<AudioTimestamp>,
}

// Safety: the ring bytes between `front` and `rear` belong to the reader and
// the rest to the writer. Each side only touches its own range, and ownership
// moves with the release/acquire publication of the cursors.
unsafe impl Sync for PipeShared {}

impl PipeShared {
    fn ring(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.buffer.as_ptr())
    }

    fn split(&self, position: u32, bytes: usize) -> (usize, usize) {
        let start = (position & (self.max_frames - 1)) as usize * self.frame_size;
        let first = bytes.min(self.buffer.len() - start);
        (start, first)
    }

    /// Copies `src` into the ring starting at cursor `position`, wrapping at
    /// the end of the buffer.
    ///
    /// # Safety
    ///
    /// The destination frames must be owned by the writer.
    pub(crate) unsafe fn copy_in(&self, position: u32, src: &[u8]) {
        let (start, first) = self.split(position, src.len());
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ring().add(start), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.ring(), src.len() - first);
        }
    }

    /// Copies frames starting at cursor `position` out of the ring into `dst`.
    ///
    /// # Safety
    ///
    /// The source frames must be owned by the reader.
    pub(crate) unsafe fn copy_out(&self, position: u32, dst: &mut [u8]) {
        let (start, first) = self.split(position, dst.len());
        unsafe {
            ptr::copy_nonoverlapping(self.ring().add(start), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.ring(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    /// Frames currently queued in the ring.
    pub(crate) fn filled(&self) -> u32 {
        self.rear
            .load(Ordering::Acquire)
            .wrapping_sub(self.front.load(Ordering::Acquire))
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn set_shutdown(&self, shutdown: bool) {
        self.shutdown.store(shutdown, Ordering::Release);
    }
}

/// Cloneable handle that can stop a blocking writer from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<PipeShared>,
}

impl ShutdownHandle {
    /// Requests (or clears) shutdown; a throttled write returns after its current pass.
    pub fn shutdown(&self, shutdown: bool) {
        self.shared.set_shutdown(shutdown);
    }

    /// Returns `true` while shutdown is requested.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

/// Writing end of a bounded single-producer single-consumer pipe.
///
/// The pipe owns the ring. Its single reader is attached with
/// [`Self::reader`] and shares the ring through reference counting.
///
/// When created with `write_can_block`, [`Sink::write`] keeps going until
/// every requested frame is in the pipe, sleeping after each pass for a time
/// derived from the fill level. A near-empty pipe is refilled quickly and a
/// near-full one slowly, so a software-only consumer sees the pacing of a
/// hardware device.
pub struct MonoPipe {
    shared: Arc<PipeShared>,
    negotiated: bool,
    write_can_block: bool,
    frames_written: u64,
    setpoint: u32,
    throttle: ThrottleConfig,
    poll_tries: u32,
    last_write_end: Option<Instant>,
    last_timestamp: Option<AudioTimestamp>,
}

impl MonoPipe {
    /// Creates a pipe holding at least `requested_frames` frames of `format`.
    ///
    /// The capacity is rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `requested_frames` is zero or larger
    /// than [`MAX_PIPE_FRAMES`], or if `format` is not valid.
    pub fn new(requested_frames: usize, format: Format, write_can_block: bool) -> Result<Self> {
        if requested_frames == 0 || requested_frames > MAX_PIPE_FRAMES || !format.is_valid() {
            return Err(Error::InvalidArg);
        }
        let max_frames = requested_frames.next_power_of_two();
        let frame_size = format.frame_size();
        let bytes = max_frames
            .checked_mul(frame_size)
            .ok_or(Error::InvalidArg)?;
        let buffer = (0..bytes).map(|_| UnsafeCell::new(0u8)).collect();

        debug!(
            "Created pipe of {max_frames} frames ({bytes} bytes), requested {requested_frames}, blocking {write_can_block}"
        );
        Ok(Self {
            shared: Arc::new(PipeShared {
                buffer,
                front: AtomicU32::new(0),
                rear: AtomicU32::new(0),
                max_frames: max_frames as u32,
                frame_size,
                format,
                shutdown: AtomicBool::new(false),
                reader_attached: AtomicBool::new(false),
                timestamps: Shared::default(),
            }),
            negotiated: false,
            write_can_block,
            frames_written: 0,
            setpoint: (requested_frames * 11 / 16).max(1) as u32,
            throttle: ThrottleConfig::default(),
            poll_tries: DEFAULT_POLL_TRIES,
            last_write_end: None,
            last_timestamp: None,
        })
    }

    /// Creates a pipe from a configuration section.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_config(config: &PipeConfig) -> Result<Self> {
        let mut pipe = Self::new(
            config.requested_frames,
            config.format,
            config.write_can_block,
        )?;
        if let Some(setpoint) = config.setpoint_frames {
            pipe.set_avg_frames(setpoint);
        }
        pipe.throttle = config.throttle.clone();
        Ok(pipe)
    }

    /// Sets how many attempts a timestamp poll makes before giving up.
    pub fn with_poll_tries(mut self, poll_tries: u32) -> Self {
        self.poll_tries = poll_tries.max(1);
        self
    }

    /// Attaches the single reader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a reader is already attached.
    pub fn reader(&self) -> Result<MonoPipeReader> {
        self.shared
            .reader_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Conflict)?;
        Ok(MonoPipeReader::new(Arc::clone(&self.shared)))
    }

    /// Returns a handle that can shut the pipe down from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ring capacity in frames.
    pub fn max_frames(&self) -> usize {
        self.shared.max_frames as usize
    }

    /// Sets the fill level, in frames, that the write throttle steers toward.
    pub fn set_avg_frames(&mut self, frames: u32) {
        self.setpoint = frames.clamp(1, self.shared.max_frames);
    }

    /// Fill level, in frames, that the write throttle steers toward.
    pub fn avg_frames(&self) -> u32 {
        self.setpoint
    }

    /// Requests (or clears) shutdown; see [`ShutdownHandle::shutdown`].
    pub fn shutdown(&self, shutdown: bool) {
        self.shared.set_shutdown(shutdown);
    }

    /// Returns `true` while shutdown is requested.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Copies the reader's newest timestamp into `timestamp`.
    ///
    /// Returns `false` if nothing new was published since the last poll.
    pub fn poll_timestamp(&mut self, timestamp: &mut AudioTimestamp) -> bool {
        let mut observer = Observer::new(&self.shared.timestamps).with_max_tries(self.poll_tries);
        if observer.poll(timestamp) {
            self.last_timestamp = Some(*timestamp);
            true
        } else {
            false
        }
    }

    /// Returns the newest timestamp seen so far, or `None` if the reader has
    /// not published one yet.
    pub fn timestamp(&mut self) -> Option<AudioTimestamp> {
        let mut timestamp = AudioTimestamp::default();
        self.poll_timestamp(&mut timestamp);
        self.last_timestamp
    }

    fn ensure_negotiated(&self) -> Result<()> {
        if self.negotiated {
            Ok(())
        } else {
            Err(not_negotiated())
        }
    }

    /// Sleeps after one pass of a blocking write, minus the time already
    /// spent since the previous pass ended.
    fn throttle(&mut self, written: u32, remaining: usize) {
        let shared = &self.shared;
        let stalled = remaining.min(self.setpoint as usize) as u32;
        let mut sleep = throttle::sleep_duration(
            &self.throttle,
            written,
            stalled,
            shared.filled(),
            self.setpoint,
            shared.format.sample_rate,
        );
        if let Some(last) = self.last_write_end {
            sleep = sleep.saturating_sub(last.elapsed());
        }
        if !sleep.is_zero() {
            trace!("Throttling pipe write for {:?}", sleep);
            std::thread::sleep(sleep);
        }
        self.last_write_end = Some(Instant::now());
    }
}

impl Port for MonoPipe {
    fn format(&self) -> Format {
        self.shared.format
    }

    fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    fn negotiate(&mut self, offers: &[Format]) -> Result<usize> {
        let index = negotiate_fixed("MonoPipe", self.shared.format, offers)?;
        self.negotiated = true;
        Ok(index)
    }
}

impl Sink for MonoPipe {
    fn available_to_write(&self) -> Result<usize> {
        self.ensure_negotiated()?;
        let filled = self.shared.filled();
        debug_assert!(filled <= self.shared.max_frames);
        Ok((self.shared.max_frames - filled.min(self.shared.max_frames)) as usize)
    }

    fn write(&mut self, buffer: &[u8], count: usize) -> Result<usize> {
        self.ensure_negotiated()?;
        let frame_size = self.shared.frame_size;
        checked_bytes(count, frame_size, buffer.len())?;

        let mut total = 0usize;
        while total < count {
            let shared = &self.shared;
            let front = shared.front.load(Ordering::Acquire);
            let rear = shared.rear.load(Ordering::Relaxed);
            let free = shared.max_frames.saturating_sub(rear.wrapping_sub(front));
            let written = free.min((count - total).min(u32::MAX as usize) as u32);
            if written > 0 {
                let start = total * frame_size;
                let end = start + written as usize * frame_size;
                // Safety: the `free` frames after `rear` are not visible to
                // the reader until `rear` is published below.
                unsafe { shared.copy_in(rear, &buffer[start..end]) };
                shared
                    .rear
                    .store(rear.wrapping_add(written), Ordering::Release);
                total += written as usize;
                self.frames_written += written as u64;
            }
            if !self.write_can_block || shared.is_shutdown() {
                break;
            }
            self.throttle(written, count - total);
        }

        trace!("MonoPipe wrote {total} of {count} frames");
        Ok(total)
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
