// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Single-element state queue.
//!
//! Publishes the latest snapshot of some plain-data state from exactly one
//! writer thread to exactly one reader thread. Neither side ever takes a
//! lock: the writer brackets each update with an odd ("in progress") and an
//! even ("stable") sequence number, and the reader accepts a copy only when it
//! read the same even sequence before and after copying.
//!
//! A reader that cannot get a clean copy within a few attempts reports "no new
//! data" and keeps its previous value, so it never stalls behind a writer.
//!
//! # Key Types
//!
//! - [`Shared`]: the slot itself, usable inside a shared memory region
//! - [`Mutator`]: writer role
//! - [`Observer`]: reader role
//!
//! # Examples
//!
//! ```
//! use mxl_transport::{Mutator, Observer, Shared};
//!
//! let slot = Shared::new(0u32);
//! let mut mutator = Mutator::new(&slot);
//! let mut observer = Observer::new(&slot);
//!
//! let sequence = mutator.push(42);
//! let mut value = 0;
//! assert!(observer.poll(&mut value));
//! assert_eq!(value, 42);
//! assert!(mutator.ack_sequence(sequence));
//! assert!(!observer.poll(&mut value));
//! ```

pub mod mutator;
pub mod observer;

use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicU32, Ordering},
};

/// The slot shared between a [`Mutator`](mutator::Mutator) and an
/// [`Observer`](observer::Observer).
///
/// The layout is fixed so the slot can be placed in memory mapped by two
/// processes, provided `T` itself has a fixed layout and no pointers.
#[repr(C)]
pub struct Shared<T: Copy> {
    /// Last sequence the observer accepted.
    ack: AtomicU32,
    /// Odd while a write is in progress, even when stable.
    sequence: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

// Safety: the payload is only written by the single mutator and only
// accepted by the observer after sequence validation; torn copies are
// discarded as `MaybeUninit` without ever being read as `T`.
unsafe impl<T: Copy + Send> Sync for Shared<T> {}

impl<T: Copy> Shared<T> {
    /// Creates a slot holding `initial` at sequence zero.
    pub fn new(initial: T) -> Self {
        Self {
            ack: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            value: UnsafeCell::new(MaybeUninit::new(initial)),
        }
    }

    /// Formats a slot in place, e.g. inside a mapped region.
    ///
    /// Exactly one side of the channel calls this, before either role attaches.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes, properly aligned, and must outlive
    /// every reference handed out for `'a`.
    pub unsafe fn init_at<'a>(slot: *mut Self, initial: T) -> &'a Self {
        unsafe {
            ptr::write(slot, Self::new(initial));
            &*slot
        }
    }

    /// Returns the currently published sequence.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Returns the last sequence acknowledged by the observer.
    pub fn acknowledged(&self) -> u32 {
        self.ack.load(Ordering::Acquire)
    }

    /// Marks the slot as being written and returns the odd sequence.
    fn begin_write(&self, sequence: u32) -> u32 {
        let odd = sequence.wrapping_add(1);
        self.sequence.swap(odd, Ordering::Acquire);
        std::sync::atomic::fence(Ordering::Release);
        odd
    }

    /// Stores the payload. Writer-only.
    fn store_value(&self, value: T) {
        // Safety: only the mutator writes the payload; a concurrent observer
        // copies it as `MaybeUninit` and discards torn copies.
        unsafe { ptr::write_volatile(self.value.get(), MaybeUninit::new(value)) };
    }

    /// Publishes the even sequence that follows `odd`.
    fn end_write(&self, odd: u32) -> u32 {
        let even = odd.wrapping_add(1);
        self.sequence.store(even, Ordering::Release);
        even
    }

    /// Copies the payload without validation.
    fn load_value(&self) -> MaybeUninit<T> {
        // Safety: see `store_value`; the copy is not assumed initialized here.
        unsafe { ptr::read_volatile(self.value.get()) }
    }
}

impl<T: Copy + Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub use mutator::Mutator;
pub use observer::Observer;
