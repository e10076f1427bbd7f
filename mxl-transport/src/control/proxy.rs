// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Client and server views of a control block.
//!
//! Each side of a session wraps the shared [`ControlBlock`] in its own proxy.
//! The proxies never own the block; they borrow it for the session's lifetime
//! and remember the ring geometry, direction and lock policy so call sites
//! don't have to.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use super::block::{ControlBlock, Direction, NO_LOOP, ServerStep, flags};
use crate::{Error, Result, config::LockRetryPolicy};

/// A contiguous run of frames inside the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion {
    /// Cursor position of the first frame.
    pub position: u32,
    /// Frame offset of the first frame inside the buffer.
    pub offset: u32,
    /// Number of contiguous frames.
    pub frames: u32,
}

impl BufferRegion {
    fn empty(position: u32, base: u32) -> Self {
        Self {
            position,
            offset: position.wrapping_sub(base),
            frames: 0,
        }
    }

    /// Returns `true` if the region holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Byte range of the region for frames of `frame_size` bytes.
    pub fn byte_range(&self, frame_size: usize) -> std::ops::Range<usize> {
        let start = self.offset as usize * frame_size;
        start..start + self.frames as usize * frame_size
    }
}

/// Computes the contiguous frames from `position` to the end of the ring, or
/// to the loop end when it comes first.
fn contiguous_frames(
    cblk: &ControlBlock,
    position: u32,
    base: u32,
    frame_count: u32,
    direction: Direction,
) -> u32 {
    let mut end = base.wrapping_add(frame_count);
    if direction.is_out() {
        let loop_end = cblk.loop_end();
        let ahead = loop_end.wrapping_sub(position) as i32;
        if loop_end != NO_LOOP && ahead > 0 && (ahead as u32) < end.wrapping_sub(position) {
            end = loop_end;
        }
    }
    end.wrapping_sub(position)
}

/// The client side of a session (user cursor).
///
/// Produces frames for [`Direction::Playback`] and consumes them for
/// [`Direction::Capture`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mxl_transport::{ClientProxy, ControlBlock, Direction, LockRetryPolicy};
///
/// # fn main() -> Result<(), mxl_transport::Error> {
/// let cblk = ControlBlock::new(256);
/// let client = ClientProxy::new(&cblk, Direction::Playback, LockRetryPolicy::default());
///
/// let region = client.obtain_buffer(64, Some(Duration::from_millis(10)))?;
/// assert_eq!((region.offset, region.frames), (0, 64));
/// // ... fill frames region.offset .. region.offset + region.frames ...
/// client.release_buffer(region.frames);
/// assert_eq!(client.frames_available()?, 192);
/// # Ok(())
/// # }
/// ```
pub struct ClientProxy<'a> {
    cblk: &'a ControlBlock,
    frame_count: u32,
    direction: Direction,
    policy: LockRetryPolicy,
}

impl<'a> ClientProxy<'a> {
    /// Wraps `cblk` for the client side of a `direction` ring.
    pub fn new(cblk: &'a ControlBlock, direction: Direction, policy: LockRetryPolicy) -> Self {
        Self {
            cblk,
            frame_count: cblk.frame_count(),
            direction,
            policy,
        }
    }

    /// Returns the wrapped control block.
    pub fn control_block(&self) -> &'a ControlBlock {
        self.cblk
    }

    /// Returns the ring direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Advances the user cursor and returns its new position.
    pub fn step(&self, frames: u32) -> u32 {
        self.cblk.step_user(frames, self.frame_count, self.direction)
    }

    /// Frames the client may write to a playback ring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn frames_available(&self) -> Result<u32> {
        self.cblk
            .frames_available(self.frame_count, self.direction, &self.policy)
    }

    /// Frames the client may read from a capture ring.
    pub fn frames_ready(&self) -> u32 {
        self.cblk.frames_ready(self.direction, &self.policy)
    }

    /// Current buffer timeout, narrowed once the stream is running.
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.cblk.buffer_timeout_ms() as u64)
    }

    /// Returns the next contiguous region the client may fill (playback) or
    /// drain (capture).
    ///
    /// Waits on the shared condition variable while the ring has nothing to
    /// offer, for at most `timeout` or the control block's buffer timeout when
    /// `None`. The region ends at the ring end or, for playback, at the loop
    /// end if that comes first.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing became available in time
    /// - [`Error::Invalidated`] if the server invalidated the session
    /// - [`Error::LockUnavailable`] if the shared lock could not be taken
    pub fn obtain_buffer(&self, requested: u32, timeout: Option<Duration>) -> Result<BufferRegion> {
        let timeout = timeout.unwrap_or_else(|| self.buffer_timeout());
        let deadline = Instant::now() + timeout;

        let mut guard = self.cblk.mutex().lock_bounded(&self.policy)?;
        let available = loop {
            if self.cblk.has_flags(flags::INVALID) {
                return Err(Error::Invalidated);
            }
            let available = match self.direction {
                Direction::Playback => {
                    self.cblk
                        .frames_available_l(&guard, self.frame_count, self.direction)
                }
                Direction::Capture => self.cblk.server().wrapping_sub(self.cblk.user()),
            };
            if available > 0 || requested == 0 {
                break available;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "obtain_buffer timed out after {:?} (user {}, server {})",
                    timeout,
                    self.cblk.user(),
                    self.cblk.server()
                );
                return Err(Error::Timeout);
            }
            let (reacquired, _) =
                self.cblk
                    .condvar()
                    .wait_timeout(guard, deadline - now, &self.policy)?;
            guard = reacquired;
        };
        drop(guard);

        let position = self.cblk.user();
        let base = self.cblk.user_base();
        let contiguous =
            contiguous_frames(self.cblk, position, base, self.frame_count, self.direction);
        let region = BufferRegion {
            position,
            offset: position.wrapping_sub(base),
            frames: requested.min(available).min(contiguous),
        };
        trace!("obtain_buffer: {:?}", region);
        Ok(region)
    }

    /// Hands `frames` frames of the last obtained region back to the server.
    pub fn release_buffer(&self, frames: u32) -> u32 {
        self.step(frames)
    }

    /// Configures a loop region; see [`ControlBlock::set_loop`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] for an invalid region and
    /// [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn set_loop(&self, start: u32, end: u32, count: i32) -> Result<()> {
        self.cblk.set_loop(start, end, count, &self.policy)
    }

    /// Sets the left and right gains (4.12 fixed point).
    pub fn set_volume(&self, left: u16, right: u16) {
        self.cblk.set_volume_lr(left, right);
    }

    /// Sets the auxiliary send level (4.12 fixed point).
    pub fn set_send_level(&self, level: u16) {
        self.cblk.set_send_level(level);
    }

    /// Sets the stream sample rate.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.cblk.set_sample_rate(sample_rate);
    }

    /// Returns `true` once the server invalidated the session.
    pub fn is_invalid(&self) -> bool {
        self.cblk.has_flags(flags::INVALID)
    }
}

/// The server side of a session (server cursor).
///
/// Consumes frames for [`Direction::Playback`] and produces them for
/// [`Direction::Capture`]. Designed for a real-time thread: nothing here
/// blocks longer than the bounded lock policy.
pub struct ServerProxy<'a> {
    cblk: &'a ControlBlock,
    frame_count: u32,
    direction: Direction,
    policy: LockRetryPolicy,
    /// Frames released while the lock was unavailable, applied on the next attempt.
    pending_step: u32,
}

impl<'a> ServerProxy<'a> {
    /// Wraps `cblk` for the server side of a `direction` ring.
    pub fn new(cblk: &'a ControlBlock, direction: Direction, policy: LockRetryPolicy) -> Self {
        Self {
            cblk,
            frame_count: cblk.frame_count(),
            direction,
            policy,
            pending_step: 0,
        }
    }

    /// Returns the wrapped control block.
    pub fn control_block(&self) -> &'a ControlBlock {
        self.cblk
    }

    /// Returns the ring direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Advances the server cursor by `frames` plus any step that previously failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken; the
    /// frames are then kept pending and retried by the next step or
    /// [`Self::get_next_buffer`].
    pub fn step(&mut self, frames: u32) -> Result<ServerStep> {
        let total = self.pending_step.wrapping_add(frames);
        match self
            .cblk
            .step_server(total, self.frame_count, self.direction, &self.policy)
        {
            Ok(step) => {
                self.pending_step = 0;
                Ok(step)
            }
            Err(err) => {
                self.pending_step = total;
                Err(err)
            }
        }
    }

    /// Frames not yet applied because the lock was unavailable.
    pub fn pending_step(&self) -> u32 {
        self.pending_step
    }

    /// Frames ready for the server to consume from a playback ring; zero if
    /// the bounded lock could not be taken.
    pub fn frames_ready(&self) -> u32 {
        self.cblk.frames_ready(self.direction, &self.policy)
    }

    /// Frames the server may write into a capture ring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn frames_available(&self) -> Result<u32> {
        self.cblk
            .frames_available(self.frame_count, self.direction, &self.policy)
    }

    /// Returns the next contiguous region to consume (playback) or fill
    /// (capture), without waiting.
    ///
    /// An empty region means "not ready this cycle": nothing to read, no
    /// room to write, or a pending step still could not take the lock. An
    /// empty playback ring raises [`flags::UNDERRUN`].
    pub fn get_next_buffer(&mut self, requested: u32) -> BufferRegion {
        if self.pending_step > 0 && self.step(0).is_err() {
            return BufferRegion::empty(self.cblk.server(), self.cblk.server_base());
        }

        let ready = match self.direction {
            Direction::Playback => self.frames_ready(),
            Direction::Capture => self.frames_available().unwrap_or(0),
        };
        let position = self.cblk.server();
        let base = self.cblk.server_base();
        if ready == 0 {
            if self.direction.is_out() && !self.cblk.has_flags(flags::UNDERRUN) {
                trace!("get_next_buffer: underrun at server {position}");
                self.cblk.set_flags(flags::UNDERRUN);
            }
            return BufferRegion::empty(position, base);
        }
        let contiguous =
            contiguous_frames(self.cblk, position, base, self.frame_count, self.direction);
        BufferRegion {
            position,
            offset: position.wrapping_sub(base),
            frames: requested.min(ready).min(contiguous),
        }
    }

    /// Releases `frames` frames of the last region; see [`Self::step`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn release_buffer(&mut self, frames: u32) -> Result<ServerStep> {
        self.step(frames)
    }

    /// Flushes the ring; see [`ControlBlock::reset`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn reset(&mut self) -> Result<()> {
        self.cblk.reset(&self.policy)?;
        self.pending_step = 0;
        Ok(())
    }

    /// Invalidates the session and wakes the client.
    pub fn invalidate(&self) {
        self.cblk.invalidate();
    }

    /// Returns `true` while the underrun flag is raised.
    pub fn is_underrun(&self) -> bool {
        self.cblk.has_flags(flags::UNDERRUN)
    }

    /// Left and right gains requested by the client.
    pub fn volume(&self) -> (u16, u16) {
        self.cblk.volume_lr()
    }

    /// Auxiliary send level requested by the client.
    pub fn send_level(&self) -> u16 {
        self.cblk.send_level()
    }

    /// Sample rate requested by the client.
    pub fn sample_rate(&self) -> u32 {
        self.cblk.sample_rate()
    }
}
