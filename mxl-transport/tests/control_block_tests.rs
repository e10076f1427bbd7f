// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the shared ring control block and its proxies.
//!
//! # Test Coverage
//!
//! - Cursor stepping, availability and base bookkeeping across 2^32 wraparound
//! - Flush detection, capture clamping and the buffer timeout transitions
//! - Loop regions: rewinding, counting down and clearing
//! - Bounded behavior when the peer died holding the lock
//! - Condition variable wakeups, timeouts and invalidation
//! - Binary layout and attaching to formatted and unformatted memory

mod common;

use std::{
    mem::MaybeUninit,
    time::{Duration, Instant},
};

use common::{fast_policy, setup_logging};
use mxl_transport::{
    CONTROL_BLOCK_MAGIC, ClientProxy, ControlBlock, Direction, Error, LOOP_FOREVER,
    MAX_RUN_TIMEOUT_MS, MAX_STARTUP_TIMEOUT_MS, NO_LOOP, ServerProxy, UNITY_GAIN, flags,
};

fn playback(cblk: &ControlBlock) -> (ClientProxy<'_>, ServerProxy<'_>) {
    (
        ClientProxy::new(cblk, Direction::Playback, fast_policy()),
        ServerProxy::new(cblk, Direction::Playback, fast_policy()),
    )
}

fn capture(cblk: &ControlBlock) -> (ClientProxy<'_>, ServerProxy<'_>) {
    (
        ClientProxy::new(cblk, Direction::Capture, fast_policy()),
        ServerProxy::new(cblk, Direction::Capture, fast_policy()),
    )
}

/// Asserts `position - base < frame_count` for both cursors.
fn assert_bases(cblk: &ControlBlock) {
    let fc = cblk.frame_count();
    assert!(cblk.user().wrapping_sub(cblk.user_base()) < fc);
    assert!(cblk.server().wrapping_sub(cblk.server_base()) < fc);
}

#[test]
fn playback_steps_and_availability() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    assert_eq!(client.frames_available().unwrap(), 16);
    assert_eq!(client.step(10), 10);
    assert_eq!(client.frames_available().unwrap(), 6);
    assert_eq!(server.frames_ready(), 10);

    let step = server.step(4).unwrap();
    assert_eq!(step.position, 4);
    assert!(!step.reset_detected);
    assert!(!step.looped);
    assert_eq!(server.frames_ready(), 6);
    assert_eq!(client.frames_available().unwrap(), 10);
    assert_bases(&cblk);
}

#[test]
fn buffer_timeout_narrows_once_running() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    assert_eq!(cblk.buffer_timeout_ms(), MAX_STARTUP_TIMEOUT_MS);
    client.step(8);
    assert_eq!(cblk.buffer_timeout_ms(), MAX_STARTUP_TIMEOUT_MS);
    server.step(4).unwrap();
    assert_eq!(cblk.buffer_timeout_ms(), MAX_STARTUP_TIMEOUT_MS - 1);
    client.step(4);
    assert_eq!(cblk.buffer_timeout_ms(), MAX_RUN_TIMEOUT_MS);
    assert_eq!(
        client.buffer_timeout(),
        Duration::from_millis(MAX_RUN_TIMEOUT_MS as u64)
    );
}

#[test]
fn cursors_stay_consistent_across_u32_wraparound() {
    setup_logging();
    let frame_count = 1u32 << 20;
    let cblk = ControlBlock::new(frame_count);
    let (client, mut server) = playback(&cblk);

    let mut total = 0u64;
    let mut i = 0u64;
    while total <= u32::MAX as u64 + frame_count as u64 {
        let step = ((i * 7919) % frame_count as u64) as u32 + 1;
        client.step(step);
        assert_eq!(server.frames_ready(), step);
        assert_eq!(client.frames_available().unwrap(), frame_count - step);
        assert_bases(&cblk);

        let outcome = server.step(step).unwrap();
        assert!(!outcome.reset_detected);
        assert_eq!(server.frames_ready(), 0);
        assert_bases(&cblk);

        total += step as u64;
        i += 1;
    }
    assert_eq!(cblk.user(), total as u32);
    assert_eq!(cblk.server(), total as u32);
    assert!(cblk.user() < frame_count * 2, "cursor did not wrap");
}

#[test]
fn step_after_reset_is_detected_and_corrected() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    client.step(8);
    server.reset().unwrap();
    assert_eq!((cblk.user(), cblk.server()), (0, 0));

    // The server releases a buffer it obtained before the flush.
    let step = server.step(8).unwrap();
    assert!(step.reset_detected);
    assert_eq!(step.position, 0);
    assert_eq!(cblk.server(), 0);
    assert_bases(&cblk);
}

#[test]
fn capture_client_never_passes_server() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = capture(&cblk);

    assert_eq!(server.frames_available().unwrap(), 16);
    server.step(8).unwrap();
    assert_eq!(client.frames_ready(), 8);

    assert_eq!(client.step(12), 8);
    assert_eq!(client.frames_ready(), 0);
    assert_eq!(server.frames_available().unwrap(), 16);
}

#[test]
fn playback_server_never_passes_client() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    client.step(5);
    let step = server.step(10).unwrap();
    assert!(!step.reset_detected);
    assert_eq!(step.position, 5);
    assert_eq!(cblk.server(), cblk.user());
    assert_eq!(server.frames_ready(), 0);
    assert_eq!(client.frames_available().unwrap(), 16);
    assert_bases(&cblk);

    // Stepping resumes normally once the client produces again.
    client.step(3);
    assert_eq!(server.frames_ready(), 3);
    assert_eq!(server.step(3).unwrap().position, 8);
}

#[test]
fn zero_frame_count_leaves_bases_alone() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let policy = fast_policy();

    assert_eq!(cblk.step_user(1, 0, Direction::Playback), 1);
    assert_eq!(cblk.user_base(), 0);
    let step = cblk
        .step_server(1, 0, Direction::Playback, &policy)
        .unwrap();
    assert_eq!(step.position, 1);
    assert_eq!(cblk.server_base(), 0);
    assert_bases(&cblk);
}

#[test]
fn underrun_is_flagged_and_cleared() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    let region = server.get_next_buffer(4);
    assert!(region.is_empty());
    assert!(server.is_underrun());
    assert!(cblk.has_flags(flags::UNDERRUN));

    client.step(4);
    assert!(!server.is_underrun());
    let region = server.get_next_buffer(8);
    assert_eq!((region.offset, region.frames), (0, 4));
}

#[test]
fn loop_region_rewinds_and_terminates() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    client.step(16);
    client.set_loop(4, 12, 2).unwrap();
    assert_eq!(server.frames_ready(), 8 * 2 + 16);

    let step = server.step(12).unwrap();
    assert!(step.looped);
    assert_eq!(step.position, 4);
    assert_eq!(cblk.loop_count(), 1);

    // The region in front of the server ends at the loop end.
    let region = server.get_next_buffer(100);
    assert_eq!((region.offset, region.frames), (4, 8));
    assert_bases(&cblk);

    let step = server.release_buffer(region.frames).unwrap();
    assert!(step.looped);
    assert_eq!(step.position, 4);
    assert_eq!(cblk.loop_count(), 0);
    assert_eq!(cblk.loop_start(), NO_LOOP);
    assert_eq!(cblk.loop_end(), NO_LOOP);

    // Loop exhausted: the old loop end is no longer a rewind point.
    let step = server.step(8).unwrap();
    assert!(!step.looped);
    assert_eq!(step.position, 12);
    assert_eq!(server.frames_ready(), 4);
    assert_bases(&cblk);
}

#[test]
fn infinite_loop_reports_unbounded_frames() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    client.step(16);
    client.set_loop(0, 16, LOOP_FOREVER).unwrap();
    assert_eq!(server.frames_ready(), u32::MAX);
    for _ in 0..10 {
        let step = server.step(16).unwrap();
        assert!(step.looped);
        assert_eq!(step.position, 0);
    }
    assert_eq!(cblk.loop_count(), LOOP_FOREVER);
}

#[test]
fn invalid_loop_regions_are_rejected() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);

    assert!(matches!(client.set_loop(8, 8, 1), Err(Error::InvalidArg)));
    assert!(matches!(client.set_loop(10, 4, 1), Err(Error::InvalidArg)));
    assert!(matches!(client.set_loop(0, 17, 1), Err(Error::InvalidArg)));

    client.step(16);
    server.step(6).unwrap();
    assert!(matches!(client.set_loop(4, 12, 1), Err(Error::InvalidArg)));

    client.set_loop(8, 12, 1).unwrap();
    assert_eq!(cblk.loop_end(), 12);
    client.set_loop(0, 0, 0).unwrap();
    assert_eq!(cblk.loop_start(), NO_LOOP);
    assert_eq!(cblk.loop_end(), NO_LOOP);
}

#[test]
fn dead_peer_holding_lock_never_hangs() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);
    client.step(16);
    client.set_loop(4, 12, LOOP_FOREVER).unwrap();

    // A peer that crashed inside the critical section never unlocks.
    std::mem::forget(cblk.mutex().try_lock().unwrap());
    assert!(cblk.mutex().is_locked());

    let start = Instant::now();
    assert!(matches!(server.step(4), Err(Error::LockUnavailable)));
    assert_eq!(server.frames_ready(), 0);
    assert!(server.get_next_buffer(4).is_empty());
    assert!(matches!(
        client.obtain_buffer(4, Some(Duration::from_millis(5))),
        Err(Error::LockUnavailable)
    ));
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_eq!(server.pending_step(), 4);
    assert_eq!(cblk.server(), 0);
}

#[test]
fn failed_server_step_is_retried() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);
    client.step(8);

    let guard = cblk.mutex().try_lock().unwrap();
    assert!(server.step(4).is_err());
    assert_eq!(server.pending_step(), 4);
    drop(guard);

    let region = server.get_next_buffer(16);
    assert_eq!(server.pending_step(), 0);
    assert_eq!(cblk.server(), 4);
    assert_eq!((region.offset, region.frames), (4, 4));
}

#[test]
fn obtain_buffer_waits_for_server() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, mut server) = playback(&cblk);
    client.step(16);

    let region = std::thread::scope(|scope| {
        let waiter =
            scope.spawn(|| client.obtain_buffer(4, Some(Duration::from_secs(5))).unwrap());
        std::thread::sleep(Duration::from_millis(20));
        server.step(4).unwrap();
        waiter.join().unwrap()
    });
    assert_eq!(region.position, 16);
    assert_eq!((region.offset, region.frames), (0, 4));
}

#[test]
fn obtain_buffer_times_out_and_sees_invalidation() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, server) = playback(&cblk);
    client.step(16);

    let start = Instant::now();
    assert!(matches!(
        client.obtain_buffer(4, Some(Duration::from_millis(20))),
        Err(Error::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(20));

    server.invalidate();
    assert!(client.is_invalid());
    assert!(matches!(
        client.obtain_buffer(4, Some(Duration::from_millis(20))),
        Err(Error::Invalidated)
    ));
}

#[test]
fn threaded_playback_conserves_frames() {
    setup_logging();
    const TOTAL: u64 = 200_000;
    let cblk = ControlBlock::new(256);
    let (client, mut server) = playback(&cblk);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut produced = 0u64;
            while produced < TOTAL {
                let want = (TOTAL - produced).min(97) as u32;
                let region = client
                    .obtain_buffer(want, Some(Duration::from_secs(5)))
                    .unwrap();
                assert!(region.frames > 0);
                client.release_buffer(region.frames);
                produced += region.frames as u64;
            }
        });

        let mut consumed = 0u64;
        while consumed < TOTAL {
            let region = server.get_next_buffer(61);
            assert!(region.frames <= 256);
            if region.is_empty() {
                std::thread::yield_now();
                continue;
            }
            let step = server.release_buffer(region.frames).unwrap();
            assert!(!step.reset_detected);
            consumed += region.frames as u64;
        }
        assert_eq!(consumed, TOTAL);
    });
    assert_eq!(cblk.user(), TOTAL as u32);
    assert_eq!(cblk.server(), TOTAL as u32);
}

#[test]
fn metadata_round_trips_between_proxies() {
    setup_logging();
    let cblk = ControlBlock::new(16);
    let (client, server) = playback(&cblk);

    assert_eq!(server.volume(), (UNITY_GAIN, UNITY_GAIN));
    client.set_volume(0x0800, UNITY_GAIN);
    client.set_send_level(0x0400);
    client.set_sample_rate(44100);
    assert_eq!(server.volume(), (0x0800, UNITY_GAIN));
    assert_eq!(server.send_level(), 0x0400);
    assert_eq!(server.sample_rate(), 44100);
}

#[test]
fn formats_and_attaches_raw_memory() {
    setup_logging();
    assert_eq!(size_of::<ControlBlock>(), 128);

    let mut region = Box::new(MaybeUninit::<ControlBlock>::zeroed());
    let ptr = region.as_mut_ptr();

    let err = unsafe { ControlBlock::attach(ptr) }.unwrap_err();
    assert!(matches!(err, Error::InvalidLayout(_)));

    let misaligned = unsafe { (ptr as *const u8).add(8) } as *const ControlBlock;
    assert!(matches!(
        unsafe { ControlBlock::attach(misaligned) },
        Err(Error::InvalidLayout(_))
    ));
    assert!(matches!(
        unsafe { ControlBlock::init_at(ptr, 0) },
        Err(Error::InvalidArg)
    ));

    let server_side = unsafe { ControlBlock::init_at(ptr, 480) }.unwrap();
    let client_side = unsafe { ControlBlock::attach(ptr) }.unwrap();
    assert_eq!(client_side.frame_count(), 480);

    let header = unsafe { std::slice::from_raw_parts(ptr as *const u8, 4) };
    assert_eq!(header, b"MXLC");
    assert_eq!(u32::from_le_bytes(*b"MXLC"), CONTROL_BLOCK_MAGIC);

    let client = ClientProxy::new(client_side, Direction::Playback, fast_policy());
    let mut server = ServerProxy::new(server_side, Direction::Playback, fast_policy());
    client.step(100);
    assert_eq!(server.get_next_buffer(480).frames, 100);
}
