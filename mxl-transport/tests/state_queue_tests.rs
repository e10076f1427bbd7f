// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the single-element state queue.

mod common;

use std::{
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use common::setup_logging;
use mxl_transport::{Mutator, Observer, Shared};

#[test]
fn push_then_poll_once() {
    setup_logging();
    let slot = Shared::new(0u32);
    let mut mutator = Mutator::new(&slot);
    let mut observer = Observer::new(&slot);

    let sequence = mutator.push(42);
    assert_eq!(sequence % 2, 0);
    let mut value = 0;
    assert!(observer.poll(&mut value));
    assert_eq!(value, 42);

    value = 7;
    assert!(!observer.poll(&mut value));
    assert_eq!(value, 7, "a failed poll must leave the value untouched");
}

#[test]
fn acknowledgements_track_the_observer() {
    setup_logging();
    let slot = Shared::new(0u64);
    let mut mutator = Mutator::new(&slot);
    let mut observer = Observer::new(&slot);

    let first = mutator.push(1);
    assert!(!mutator.ack());
    assert!(!mutator.ack_sequence(first));

    let mut value = 0;
    assert!(observer.poll(&mut value));
    assert!(mutator.ack());
    assert!(mutator.ack_sequence(first));

    let second = mutator.push(2);
    assert!(!mutator.ack());
    assert!(mutator.ack_sequence(first));
    assert!(!mutator.ack_sequence(second));

    // Only the newest value is observed.
    let third = mutator.push(3);
    assert!(observer.poll(&mut value));
    assert_eq!(value, 3);
    assert!(mutator.ack_sequence(second));
    assert!(mutator.ack_sequence(third));
    assert_eq!(slot.acknowledged(), third);
}

#[test]
fn roles_resume_from_shared_state() {
    setup_logging();
    let slot = Shared::new([0u8; 4]);
    Mutator::new(&slot).push([1, 2, 3, 4]);

    let mut value = [0u8; 4];
    assert!(Observer::new(&slot).poll(&mut value));
    assert_eq!(value, [1, 2, 3, 4]);

    // A re-created observer does not report an already acknowledged value.
    assert!(!Observer::new(&slot).poll(&mut value));

    // A re-created mutator continues the sequence.
    let mut mutator = Mutator::new(&slot);
    assert_eq!(mutator.sequence(), slot.sequence());
    let sequence = mutator.push([5, 6, 7, 8]);
    assert_eq!(sequence, slot.sequence());
    assert!(Observer::new(&slot).poll(&mut value));
    assert_eq!(value, [5, 6, 7, 8]);
    assert!(mutator.ack());
}

#[test]
fn slot_formatted_in_place() {
    setup_logging();
    let mut region = Box::new(MaybeUninit::<Shared<u32>>::uninit());
    let slot = unsafe { Shared::init_at(region.as_mut_ptr(), 5) };
    assert_eq!(slot.sequence(), 0);
    assert_eq!(slot.acknowledged(), 0);

    Mutator::new(slot).push(6);
    let mut value = 0;
    assert!(Observer::new(slot).poll(&mut value));
    assert_eq!(value, 6);
}

/// Writer that stopped between its two sequence stores: the word is left odd.
#[test]
fn writer_recovers_from_interrupted_push() {
    setup_logging();
    let slot = Shared::new(0u32);
    // `Shared` is `repr(C)`: the ack word, then the sequence word.
    let words = &slot as *const Shared<u32> as *const AtomicU32;
    unsafe { (*words.add(1)).store(1, Ordering::Release) };
    assert_eq!(slot.sequence(), 1);

    let mut observer = Observer::new(&slot);
    let mut value = 0;
    assert!(!observer.poll(&mut value));

    let mut mutator = Mutator::new(&slot);
    assert_eq!(mutator.sequence(), 2);
    let sequence = mutator.push(42);
    assert_eq!(sequence, 4);
    assert_eq!(slot.sequence(), 4);
    assert!(observer.poll(&mut value));
    assert_eq!(value, 42);
    assert!(mutator.ack());

    let sequence = mutator.push(43);
    assert_eq!(sequence % 2, 0);
    assert!(observer.poll(&mut value));
    assert_eq!(value, 43);
}

fn assert_no_torn_reads(max_tries: u32) {
    const PUSHES: u64 = 200_000;
    let slot = Shared::new([0u64; 8]);
    let done = AtomicBool::new(false);

    let accepted = std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut mutator = Mutator::new(&slot);
            for i in 1..=PUSHES {
                mutator.push([i; 8]);
            }
            done.store(true, Ordering::Release);
        });

        let mut observer = Observer::new(&slot).with_max_tries(max_tries);
        let mut value = [0u64; 8];
        let mut last = 0;
        let mut accepted = 0u64;
        loop {
            let finished = done.load(Ordering::Acquire);
            if observer.poll(&mut value) {
                assert!(
                    value.iter().all(|v| *v == value[0]),
                    "torn value observed: {value:?}"
                );
                assert!(value[0] > last, "values must only move forward");
                last = value[0];
                accepted += 1;
            }
            if finished && last == PUSHES {
                break;
            }
        }
        assert_eq!(last, PUSHES);
        accepted
    });
    assert!(accepted > 0);
}

#[test]
fn no_torn_reads_under_contention() {
    setup_logging();
    assert_no_torn_reads(3);
}

/// Two tries per poll, so a copy that raced is retried against the
/// sequence read after it.
#[test]
fn retried_copies_are_never_torn() {
    setup_logging();
    assert_no_torn_reads(2);
}
