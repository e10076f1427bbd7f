// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Writer role of the state queue.

use std::sync::atomic::Ordering;

use tracing::warn;

use super::Shared;

/// Publishes new values into a [`Shared`] slot.
///
/// There must be exactly one `Mutator` per slot at a time. It never blocks:
/// `push` always completes in constant time regardless of the observer.
pub struct Mutator<'a, T: Copy> {
    shared: &'a Shared<T>,
    sequence: u32,
}

impl<'a, T: Copy> Mutator<'a, T> {
    /// Attaches the writer role to `shared`, resuming from its published sequence.
    ///
    /// An odd sequence means a previous writer stopped in the middle of a
    /// push; the next push then starts from the following even number.
    pub fn new(shared: &'a Shared<T>) -> Self {
        let published = shared.sequence();
        if published & 1 == 1 {
            warn!(
                "State queue resumed from interrupted push at sequence {}",
                published
            );
        }
        Self {
            shared,
            sequence: published.wrapping_add(published & 1),
        }
    }

    /// Publishes `value` and returns the sequence number of this update.
    ///
    /// The returned number can later be passed to [`Self::ack_sequence`] to
    /// learn whether the observer has seen this update (or a newer one).
    pub fn push(&mut self, value: T) -> u32 {
        let odd = self.shared.begin_write(self.sequence);
        self.shared.store_value(value);
        self.sequence = self.shared.end_write(odd);
        self.sequence
    }

    /// Returns `true` if the observer has accepted the most recent push.
    pub fn ack(&self) -> bool {
        self.shared.ack.load(Ordering::Acquire) == self.sequence
    }

    /// Returns `true` if the observer has accepted `sequence` or anything newer.
    ///
    /// Relies on modular arithmetic so a wrapped sequence counter still
    /// compares correctly.
    pub fn ack_sequence(&self, sequence: u32) -> bool {
        let acked = self.shared.ack.load(Ordering::Acquire);
        acked.wrapping_sub(sequence) as i32 >= 0
    }

    /// Returns the sequence of the most recent push.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}
