// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Reader role of the state queue.

use std::sync::atomic::{Ordering, fence};

use super::Shared;
use crate::config::DEFAULT_POLL_TRIES;

/// Observes the latest value published into a [`Shared`] slot.
///
/// There must be exactly one `Observer` per slot at a time. `poll` never
/// blocks; it is safe to call from a real-time thread.
///
/// # Examples
///
/// ```
/// # use mxl_transport::{Mutator, Observer, Shared};
/// let slot = Shared::new([0u8; 16]);
/// let mut observer = Observer::new(&slot).with_max_tries(3);
/// let mut snapshot = [0u8; 16];
/// // Nothing has been published yet.
/// assert!(!observer.poll(&mut snapshot));
/// Mutator::new(&slot).push([7u8; 16]);
/// assert!(observer.poll(&mut snapshot));
/// assert_eq!(snapshot, [7u8; 16]);
/// ```
pub struct Observer<'a, T: Copy> {
    shared: &'a Shared<T>,
    sequence: u32,
    max_tries: u32,
}

impl<'a, T: Copy> Observer<'a, T> {
    /// Attaches the reader role to `shared`, resuming after the last
    /// acknowledged sequence.
    pub fn new(shared: &'a Shared<T>) -> Self {
        Self {
            shared,
            sequence: shared.acknowledged(),
            max_tries: DEFAULT_POLL_TRIES,
        }
    }

    /// Sets how many copy attempts a single [`Self::poll`] makes (at least one).
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    /// Copies the newest stable value into `value`.
    ///
    /// Returns `false` without touching `value` if nothing new was published
    /// since the last successful poll, or if every attempt raced with the
    /// writer. On success the update is acknowledged back to the mutator.
    pub fn poll(&mut self, value: &mut T) -> bool {
        let shared = self.shared;
        let mut before = shared.sequence.load(Ordering::Acquire);
        if before == self.sequence {
            return false;
        }
        let mut tries = 0;
        loop {
            if before & 1 == 0 {
                let copy = shared.load_value();
                fence(Ordering::Acquire);
                // Acquire, since a mismatch makes this the guard of the next copy.
                let after = shared.sequence.load(Ordering::Acquire);
                if after == before {
                    // Safety: the same even sequence was observed on both
                    // sides of the copy, so no write overlapped it.
                    *value = unsafe { copy.assume_init() };
                    shared.ack.store(before, Ordering::Release);
                    self.sequence = before;
                    return true;
                }
                before = after;
            } else {
                std::hint::spin_loop();
                before = shared.sequence.load(Ordering::Acquire);
            }
            tries += 1;
            if tries >= self.max_tries {
                return false;
            }
        }
    }

    /// Returns the sequence of the last accepted value.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}
