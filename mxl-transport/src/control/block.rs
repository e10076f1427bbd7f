// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-layout ring control block.

use std::{
    mem::offset_of,
    sync::atomic::{AtomicI32, AtomicU32, Ordering},
};

use tracing::{debug, warn};

use super::lock::{SharedCondvar, SharedMutex, SharedMutexGuard};
use crate::{Error, Result, config::LockRetryPolicy};

/// Identifies a formatted control block ("MXLC").
pub const CONTROL_BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"MXLC");

/// Layout version, major in the high 16 bits.
pub const CONTROL_BLOCK_VERSION: u32 = 1 << 16;

/// Loop bound meaning "no loop region".
pub const NO_LOOP: u32 = u32::MAX;

/// Loop count meaning "repeat until reconfigured".
pub const LOOP_FOREVER: i32 = -1;

/// Buffer timeout until the server has consumed its first buffer.
pub const MAX_STARTUP_TIMEOUT_MS: u32 = 3000;

/// Buffer timeout once the stream is running.
pub const MAX_RUN_TIMEOUT_MS: u32 = 1000;

/// Unity gain in the 4.12 fixed point volume representation.
pub const UNITY_GAIN: u16 = 0x1000;

/// Status bits stored in the control block.
pub mod flags {
    /// The server found no data to consume.
    pub const UNDERRUN: u32 = 0x0001;
    /// The server should treat the stream as ready even if it is not full.
    pub const FORCE_READY: u32 = 0x0002;
    /// The server invalidated the session; the client must recreate it.
    pub const INVALID: u32 = 0x0004;
    /// The server disabled the stream after a sustained underrun.
    pub const DISABLED: u32 = 0x0008;
}

/// Which side produces the frames.
///
/// For [`Direction::Playback`] the client (user cursor) produces and the
/// server consumes; for [`Direction::Capture`] it is the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Output ring: client writes, server reads.
    Playback,
    /// Input ring: server writes, client reads.
    Capture,
}

impl Direction {
    /// Returns `true` for an output ring.
    pub fn is_out(self) -> bool {
        self == Direction::Playback
    }
}

/// Outcome of a successful [`ControlBlock::step_server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStep {
    /// Server cursor after the step.
    pub position: u32,
    /// The step ran after a reset and the cursor was pulled back to the user cursor.
    pub reset_detected: bool,
    /// The cursor reached the loop end and was rewound to the loop start.
    pub looped: bool,
}

/// Cursor pair and shared lock describing an externally allocated ring.
///
/// The block holds no pointers and only 32-bit atomics, so two address spaces
/// agree on it byte for byte. It never owns the frame buffer; the
/// [`crate::ClientProxy`] and [`crate::ServerProxy`] wrappers reference it for
/// the lifetime of the session.
///
/// Cursors are free-running `u32` positions that wrap modulo 2^32. The
/// matching `*_base` is moved in whole `frame_count` steps so that
/// `position - base < frame_count` always holds and gives the frame offset
/// inside the buffer.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ControlBlock {
    magic: AtomicU32,
    version: AtomicU32,
    lock: SharedMutex,
    cv: SharedCondvar,
    user: AtomicU32,
    server: AtomicU32,
    user_base: AtomicU32,
    server_base: AtomicU32,
    frame_count: AtomicU32,
    loop_start: AtomicU32,
    loop_end: AtomicU32,
    loop_count: AtomicI32,
    flags: AtomicU32,
    buffer_timeout_ms: AtomicU32,
    sample_rate: AtomicU32,
    /// Left gain in the low half, right gain in the high half (4.12 each).
    volume_lr: AtomicU32,
    send_level: AtomicU32,
    _reserved: [u32; 15],
}

const _: () = assert!(size_of::<ControlBlock>() == 128);
const _: () = assert!(align_of::<ControlBlock>() == 64);
const _: () = assert!(offset_of!(ControlBlock, lock) == 8);
const _: () = assert!(offset_of!(ControlBlock, user) == 16);
const _: () = assert!(offset_of!(ControlBlock, server) == 20);
const _: () = assert!(offset_of!(ControlBlock, frame_count) == 32);
const _: () = assert!(offset_of!(ControlBlock, loop_count) == 44);
const _: () = assert!(offset_of!(ControlBlock, flags) == 48);
const _: () = assert!(offset_of!(ControlBlock, send_level) == 64);

/// Moves `base` in whole `frame_count` steps until `position - base` lies in
/// `[0, frame_count)`. A zero `frame_count` leaves `base` where it is.
fn rebase(position: u32, base: u32, frame_count: u32) -> u32 {
    if frame_count == 0 {
        return base;
    }
    let distance = position.wrapping_sub(base) as i32 as i64;
    let steps = distance.div_euclid(frame_count as i64);
    base.wrapping_add((steps * frame_count as i64) as u32)
}

/// `a` is strictly before `b` on the wrapping cursor line.
fn is_before(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

impl ControlBlock {
    /// Creates a block for a ring of `frame_count` frames, for in-process use.
    ///
    /// # Panics
    ///
    /// Panics if `frame_count` is zero or exceeds `i32::MAX`.
    pub fn new(frame_count: u32) -> Self {
        assert!(
            frame_count > 0 && frame_count <= i32::MAX as u32,
            "frame count must be in 1..=i32::MAX"
        );
        Self {
            magic: AtomicU32::new(CONTROL_BLOCK_MAGIC),
            version: AtomicU32::new(CONTROL_BLOCK_VERSION),
            lock: SharedMutex::new(),
            cv: SharedCondvar::new(),
            user: AtomicU32::new(0),
            server: AtomicU32::new(0),
            user_base: AtomicU32::new(0),
            server_base: AtomicU32::new(0),
            frame_count: AtomicU32::new(frame_count),
            loop_start: AtomicU32::new(NO_LOOP),
            loop_end: AtomicU32::new(NO_LOOP),
            loop_count: AtomicI32::new(0),
            flags: AtomicU32::new(0),
            buffer_timeout_ms: AtomicU32::new(MAX_STARTUP_TIMEOUT_MS),
            sample_rate: AtomicU32::new(0),
            volume_lr: AtomicU32::new((UNITY_GAIN as u32) << 16 | UNITY_GAIN as u32),
            send_level: AtomicU32::new(0),
            _reserved: [0; 15],
        }
    }

    /// Formats a control block in place, e.g. at the start of a mapped region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `frame_count` is zero or exceeds
    /// `i32::MAX`, and [`Error::InvalidLayout`] if `block` is misaligned.
    ///
    /// # Safety
    ///
    /// `block` must be valid for writes of `size_of::<ControlBlock>()` bytes
    /// and stay mapped for `'a`. No other party may use the region while it is
    /// being formatted.
    pub unsafe fn init_at<'a>(block: *mut ControlBlock, frame_count: u32) -> Result<&'a Self> {
        if frame_count == 0 || frame_count > i32::MAX as u32 {
            return Err(Error::InvalidArg);
        }
        if block.is_null() || (block as usize) % align_of::<ControlBlock>() != 0 {
            return Err(Error::InvalidLayout(
                "control block must be 64-byte aligned".to_string(),
            ));
        }
        unsafe {
            std::ptr::write(block, Self::new(frame_count));
            Ok(&*block)
        }
    }

    /// Attaches to a control block formatted by another party.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the pointer is misaligned, the
    /// magic or major version do not match, or the frame count is invalid.
    ///
    /// # Safety
    ///
    /// `block` must point to at least `size_of::<ControlBlock>()` readable and
    /// writable bytes that stay mapped for `'a`.
    pub unsafe fn attach<'a>(block: *const ControlBlock) -> Result<&'a Self> {
        if block.is_null() || (block as usize) % align_of::<ControlBlock>() != 0 {
            return Err(Error::InvalidLayout(
                "control block must be 64-byte aligned".to_string(),
            ));
        }
        let cblk = unsafe { &*block };
        let magic = cblk.magic.load(Ordering::Acquire);
        if magic != CONTROL_BLOCK_MAGIC {
            return Err(Error::InvalidLayout(format!("bad magic {magic:#010x}")));
        }
        let version = cblk.version.load(Ordering::Relaxed);
        if version >> 16 != CONTROL_BLOCK_VERSION >> 16 {
            return Err(Error::InvalidLayout(format!(
                "incompatible version {version:#x}, expected {CONTROL_BLOCK_VERSION:#x}"
            )));
        }
        let frame_count = cblk.frame_count();
        if frame_count == 0 || frame_count > i32::MAX as u32 {
            return Err(Error::InvalidLayout(format!(
                "invalid frame count {frame_count}"
            )));
        }
        debug!("Attached to control block with {} frames", frame_count);
        Ok(cblk)
    }

    /// Returns the shared mutex.
    pub fn mutex(&self) -> &SharedMutex {
        &self.lock
    }

    /// Returns the shared condition variable.
    pub fn condvar(&self) -> &SharedCondvar {
        &self.cv
    }

    /// Ring capacity in frames.
    pub fn frame_count(&self) -> u32 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Client cursor.
    pub fn user(&self) -> u32 {
        self.user.load(Ordering::Acquire)
    }

    /// Server cursor.
    pub fn server(&self) -> u32 {
        self.server.load(Ordering::Acquire)
    }

    /// Base of the client cursor.
    pub fn user_base(&self) -> u32 {
        self.user_base.load(Ordering::Relaxed)
    }

    /// Base of the server cursor.
    pub fn server_base(&self) -> u32 {
        self.server_base.load(Ordering::Relaxed)
    }

    /// Loop start, or [`NO_LOOP`].
    pub fn loop_start(&self) -> u32 {
        self.loop_start.load(Ordering::Relaxed)
    }

    /// Loop end, or [`NO_LOOP`].
    pub fn loop_end(&self) -> u32 {
        self.loop_end.load(Ordering::Relaxed)
    }

    /// Remaining loop iterations; [`LOOP_FOREVER`] repeats indefinitely.
    pub fn loop_count(&self) -> i32 {
        self.loop_count.load(Ordering::Relaxed)
    }

    /// Current status bits (see [`flags`]).
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    /// Returns `true` if every bit of `mask` is set.
    pub fn has_flags(&self, mask: u32) -> bool {
        self.flags() & mask == mask
    }

    /// Sets the bits of `mask`.
    pub fn set_flags(&self, mask: u32) {
        self.flags.fetch_or(mask, Ordering::AcqRel);
    }

    /// Clears the bits of `mask`.
    pub fn clear_flags(&self, mask: u32) {
        self.flags.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Current client buffer timeout in milliseconds.
    pub fn buffer_timeout_ms(&self) -> u32 {
        self.buffer_timeout_ms.load(Ordering::Relaxed)
    }

    /// Stream sample rate; not interpreted by the block.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Sets the stream sample rate.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Returns `(left, right)` gains in 4.12 fixed point.
    pub fn volume_lr(&self) -> (u16, u16) {
        let packed = self.volume_lr.load(Ordering::Relaxed);
        (packed as u16, (packed >> 16) as u16)
    }

    /// Sets both gains in one store, so readers never see a mixed pair.
    pub fn set_volume_lr(&self, left: u16, right: u16) {
        self.volume_lr
            .store((right as u32) << 16 | left as u32, Ordering::Relaxed);
    }

    /// Auxiliary send level in 4.12 fixed point.
    pub fn send_level(&self) -> u16 {
        self.send_level.load(Ordering::Relaxed) as u16
    }

    /// Sets the auxiliary send level.
    pub fn set_send_level(&self, level: u16) {
        self.send_level.store(level as u32, Ordering::Relaxed);
    }

    /// Advances the client cursor by `step_count` frames and returns it.
    ///
    /// For playback the first step after the server consumed its first buffer
    /// narrows the buffer timeout to [`MAX_RUN_TIMEOUT_MS`]. For capture the
    /// cursor is clamped so it never passes the server cursor, which can only
    /// happen if a reset raced with this step. Never takes the lock.
    pub fn step_user(&self, step_count: u32, frame_count: u32, direction: Direction) -> u32 {
        let mut u = self.user.load(Ordering::Relaxed).wrapping_add(step_count);
        match direction {
            Direction::Playback => {
                let _ = self.buffer_timeout_ms.compare_exchange(
                    MAX_STARTUP_TIMEOUT_MS - 1,
                    MAX_RUN_TIMEOUT_MS,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            Direction::Capture => {
                let s = self.server.load(Ordering::Acquire);
                if is_before(s, u) {
                    warn!("step_user occurred after reset (user {u}, server {s})");
                    u = s;
                }
            }
        }
        let base = rebase(u, self.user_base.load(Ordering::Relaxed), frame_count);
        self.user_base.store(base, Ordering::Relaxed);
        self.user.store(u, Ordering::Release);

        // New data was written or read, so the flow control error is over.
        if self.flags.load(Ordering::Relaxed) & flags::UNDERRUN != 0 {
            self.clear_flags(flags::UNDERRUN);
        }
        u
    }

    /// Advances the server cursor by `step_count` frames under the shared lock.
    ///
    /// The lock is taken with the bounded `policy`; if the peer holds it for
    /// too long the step is abandoned and the cursor left untouched. On a
    /// playback ring the server cursor never moves past the user cursor: an
    /// oversized step stops at it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn step_server(
        &self,
        step_count: u32,
        frame_count: u32,
        direction: Direction,
        policy: &LockRetryPolicy,
    ) -> Result<ServerStep> {
        let guard = match self.lock.lock_bounded(policy) {
            Ok(guard) => guard,
            Err(err) => {
                warn!("step_server() could not lock control block");
                return Err(err);
            }
        };

        let u = self.user.load(Ordering::Acquire);
        let mut s = self.server.load(Ordering::Relaxed);
        let flushed = s == u;
        s = s.wrapping_add(step_count);

        let mut reset_detected = false;
        if direction.is_out() {
            // The next user step switches to the running timeout.
            let _ = self.buffer_timeout_ms.compare_exchange(
                MAX_STARTUP_TIMEOUT_MS,
                MAX_STARTUP_TIMEOUT_MS - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
            // A flush reset both cursors while this buffer was being consumed.
            if flushed {
                warn!("step_server occurred after track reset (server {s}, user {u})");
                s = u;
                reset_detected = true;
            } else if is_before(u, s) {
                warn!("step_server: server {s} passed user {u}, clamping");
                s = u;
            }
        }

        let mut looped = false;
        let loop_end = self.loop_end.load(Ordering::Relaxed);
        if loop_end != NO_LOOP && !is_before(s, loop_end) {
            if s != loop_end {
                warn!("step_server: server {s} overshot loop end {loop_end}");
            }
            s = self.loop_start.load(Ordering::Relaxed);
            looped = true;
            let count = self.loop_count.load(Ordering::Relaxed);
            if count > 0 {
                self.loop_count.store(count - 1, Ordering::Relaxed);
                if count == 1 {
                    self.loop_start.store(NO_LOOP, Ordering::Relaxed);
                    self.loop_end.store(NO_LOOP, Ordering::Relaxed);
                }
            }
        }

        let base = rebase(s, self.server_base.load(Ordering::Relaxed), frame_count);
        self.server_base.store(base, Ordering::Relaxed);
        self.server.store(s, Ordering::Release);

        if self.flags.load(Ordering::Relaxed) & flags::INVALID == 0 {
            self.cv.signal();
        }
        drop(guard);

        Ok(ServerStep {
            position: s,
            reset_detected,
            looped,
        })
    }

    /// Frames the producing side may write, taking the lock with `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn frames_available(
        &self,
        frame_count: u32,
        direction: Direction,
        policy: &LockRetryPolicy,
    ) -> Result<u32> {
        let guard = self.lock.lock_bounded(policy)?;
        Ok(self.frames_available_l(&guard, frame_count, direction))
    }

    /// Frames the producing side may write; the caller holds the lock.
    ///
    /// For playback the loop start, when it precedes the server cursor, is
    /// the effective end of the readable data.
    pub fn frames_available_l(
        &self,
        guard: &SharedMutexGuard<'_>,
        frame_count: u32,
        direction: Direction,
    ) -> u32 {
        debug_assert!(guard.guards(&self.lock), "guard belongs to another block");
        let u = self.user.load(Ordering::Relaxed);
        let s = self.server.load(Ordering::Acquire);
        match direction {
            Direction::Playback => {
                let loop_start = self.loop_start.load(Ordering::Relaxed);
                let limit = if loop_start != NO_LOOP && is_before(loop_start, s) {
                    loop_start
                } else {
                    s
                };
                limit.wrapping_add(frame_count).wrapping_sub(u)
            }
            Direction::Capture => frame_count.wrapping_add(u).wrapping_sub(s),
        }
    }

    /// Frames ready for the consuming side.
    ///
    /// The lock is only needed for a playback ring whose client has written
    /// through an active loop; it is taken with `policy` and a failure is
    /// reported as zero frames. An indefinite loop reports `u32::MAX`.
    pub fn frames_ready(&self, direction: Direction, policy: &LockRetryPolicy) -> u32 {
        let u = self.user.load(Ordering::Acquire);
        let s = self.server.load(Ordering::Acquire);
        match direction {
            Direction::Capture => s.wrapping_sub(u),
            Direction::Playback => {
                let loop_end = self.loop_end.load(Ordering::Relaxed);
                if loop_end == NO_LOOP || is_before(u, loop_end) {
                    return u.wrapping_sub(s);
                }
                // Never block on a mutex shared with the client.
                let Ok(_guard) = self.lock.lock_bounded(policy) else {
                    warn!("frames_ready() could not lock control block");
                    return 0;
                };
                let u = self.user.load(Ordering::Relaxed);
                let s = self.server.load(Ordering::Relaxed);
                let loop_count = self.loop_count.load(Ordering::Relaxed);
                if loop_count < 0 {
                    return u32::MAX;
                }
                let loop_start = self.loop_start.load(Ordering::Relaxed);
                let loop_end = self.loop_end.load(Ordering::Relaxed);
                let frames = loop_end.wrapping_sub(loop_start) as u64 * loop_count as u64
                    + u.wrapping_sub(s) as u64;
                frames.min(u32::MAX as u64) as u32
            }
        }
    }

    /// Configures the loop region.
    ///
    /// A `count` of zero clears the region. [`LOOP_FOREVER`] repeats until
    /// reconfigured.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if `start` is not before `end`, the region is
    ///   longer than the ring, or the server is already past `start`
    /// - [`Error::LockUnavailable`] if the lock could not be taken
    pub fn set_loop(
        &self,
        start: u32,
        end: u32,
        count: i32,
        policy: &LockRetryPolicy,
    ) -> Result<()> {
        let _guard = self.lock.lock_bounded(policy)?;
        if count == 0 {
            self.loop_start.store(NO_LOOP, Ordering::Relaxed);
            self.loop_end.store(NO_LOOP, Ordering::Relaxed);
            self.loop_count.store(0, Ordering::Relaxed);
            return Ok(());
        }
        let s = self.server.load(Ordering::Relaxed);
        if start == NO_LOOP
            || end == NO_LOOP
            || !is_before(start, end)
            || end.wrapping_sub(start) > self.frame_count()
            || is_before(start, s)
        {
            warn!("set_loop: invalid region {start}..{end} (server {s})");
            return Err(Error::InvalidArg);
        }
        self.loop_start.store(start, Ordering::Relaxed);
        self.loop_end.store(end, Ordering::Relaxed);
        self.loop_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes the ring: both cursors and bases return to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock could not be taken.
    pub fn reset(&self, policy: &LockRetryPolicy) -> Result<()> {
        let _guard = self.lock.lock_bounded(policy)?;
        self.user.store(0, Ordering::Release);
        self.server.store(0, Ordering::Release);
        self.user_base.store(0, Ordering::Relaxed);
        self.server_base.store(0, Ordering::Relaxed);
        self.clear_flags(flags::UNDERRUN);
        self.cv.signal();
        Ok(())
    }

    /// Marks the session invalid and wakes any waiting client.
    pub fn invalidate(&self) {
        self.set_flags(flags::INVALID);
        self.cv.signal();
    }
}
