// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Address-space independent mutex and condition variable.
//!
//! Both primitives are a single 32-bit atomic word, so they stay valid when
//! the control block is mapped by more than one process. None of the
//! acquisition paths block indefinitely: the lock may be held by a peer that
//! has crashed.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use tracing::warn;

use crate::{Error, Result, config::LockRetryPolicy};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Mutex word stored inline in the control block.
#[repr(C)]
#[derive(Debug)]
pub struct SharedMutex {
    state: AtomicU32,
}

impl SharedMutex {
    /// Creates an unlocked mutex.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Attempts to take the lock once, without waiting.
    pub fn try_lock(&self) -> Option<SharedMutexGuard<'_>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SharedMutexGuard { mutex: self })
    }

    /// Takes the lock following `policy`: one immediate attempt, then up to
    /// `policy.retries` attempts each preceded by a short sleep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] once the schedule is exhausted.
    pub fn lock_bounded(&self, policy: &LockRetryPolicy) -> Result<SharedMutexGuard<'_>> {
        if let Some(guard) = self.try_lock() {
            return Ok(guard);
        }
        for _ in 0..policy.retries {
            std::thread::sleep(policy.retry_delay());
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
        }
        Err(Error::LockUnavailable)
    }

    /// Returns `true` if some party currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == LOCKED
    }

    fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

impl Default for SharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard; the lock is released when the guard is dropped.
///
/// Leaking a guard with [`std::mem::forget`] leaves the mutex locked, which
/// is exactly what a crashed peer looks like from the other side.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl SharedMutexGuard<'_> {
    /// Returns `true` if this guard was produced by `mutex`.
    pub(crate) fn guards(&self, mutex: &SharedMutex) -> bool {
        std::ptr::eq(self.mutex, mutex)
    }
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Condition variable stored inline in the control block.
///
/// Implemented as a generation counter: [`Self::signal`] bumps it and waiters
/// poll for a change. Polling keeps the primitive free of any per-process
/// kernel object.
#[repr(C)]
#[derive(Debug)]
pub struct SharedCondvar {
    generation: AtomicU32,
}

impl SharedCondvar {
    /// Creates a condition variable with no pending signal.
    pub const fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
        }
    }

    /// Wakes every waiter.
    pub fn signal(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Releases `guard`, waits up to `timeout` for a signal, then re-acquires
    /// the lock with the bounded `policy`.
    ///
    /// Returns the re-acquired guard and `true` if the wait timed out without
    /// a signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockUnavailable`] if the lock cannot be re-acquired.
    pub fn wait_timeout<'a>(
        &self,
        guard: SharedMutexGuard<'a>,
        timeout: Duration,
        policy: &LockRetryPolicy,
    ) -> Result<(SharedMutexGuard<'a>, bool)> {
        let mutex = guard.mutex;
        let observed = self.generation.load(Ordering::Acquire);
        drop(guard);

        let deadline = Instant::now() + timeout;
        let mut timed_out = true;
        loop {
            if self.generation.load(Ordering::Acquire) != observed {
                timed_out = false;
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(policy.wait_poll().min(deadline - now));
        }

        match mutex.lock_bounded(policy) {
            Ok(guard) => Ok((guard, timed_out)),
            Err(err) => {
                warn!("Could not re-acquire control block lock after wait");
                Err(err)
            }
        }
    }
}

impl Default for SharedCondvar {
    fn default() -> Self {
        Self::new()
    }
}
