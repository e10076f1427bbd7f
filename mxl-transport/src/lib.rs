// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # MXL Transport - real-time audio transport primitives
//!
//! Lock-free building blocks for moving audio frames and small state
//! snapshots between one producer and one consumer, across threads or across
//! processes sharing a memory region, without ever blocking the real-time
//! side indefinitely.
//!
//! ## Overview
//!
//! The crate holds three independent primitives:
//!
//! - **Control block** ([`ControlBlock`]): a fixed-layout cursor pair over an
//!   externally allocated ring of frames, with an optional loop region and an
//!   inline mutex and condition variable that stay valid in shared memory.
//!   Clients and servers use it through [`ClientProxy`] and [`ServerProxy`].
//! - **State queue** ([`Shared`], [`Mutator`], [`Observer`]): publishes the
//!   latest value of some plain-data state from one writer to one reader
//!   without locks; the reader never sees a torn value and never waits.
//! - **Pipe** ([`MonoPipe`], [`MonoPipeReader`]): a power-of-two ring of
//!   frames with acquire/release cursors, optional write throttling that
//!   emulates a draining device, and a timestamp sideband from the reader.
//!
//! Every lock taken on memory that a peer process may also use is taken with a
//! bounded retry schedule ([`LockRetryPolicy`]). A dead peer shows up as
//! [`Error::LockUnavailable`] or "zero frames ready", never as a hang.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐
//! Client ───►│ ControlBlock │◄─── Server          (cursors over a shared ring)
//!            └──────────────┘
//!
//! Mutator ──► Shared<T> ──► Observer                (latest-value snapshot)
//!
//! MonoPipe ──► ring ──► MonoPipeReader              (frames)
//!     ▲                        │
//!     └─── AudioTimestamp ◄────┘                    (Shared<AudioTimestamp>)
//! ```
//!
//! ## Examples
//!
//! ### Stepping a playback ring
//!
//! ```
//! use mxl_transport::{ClientProxy, ControlBlock, Direction, LockRetryPolicy, ServerProxy};
//!
//! # fn main() -> Result<(), mxl_transport::Error> {
//! let cblk = ControlBlock::new(480);
//! let policy = LockRetryPolicy::default();
//! let client = ClientProxy::new(&cblk, Direction::Playback, policy);
//! let mut server = ServerProxy::new(&cblk, Direction::Playback, policy);
//!
//! client.step(240);
//! let region = server.get_next_buffer(480);
//! assert_eq!(region.frames, 240);
//! server.release_buffer(region.frames)?;
//! assert_eq!(cblk.server(), 240);
//! # Ok(())
//! # }
//! ```
//!
//! ### Publishing state
//!
//! ```
//! use mxl_transport::{Mutator, Observer, Shared};
//!
//! let slot = Shared::new((0u32, 0u32));
//! Mutator::new(&slot).push((48000, 2));
//! let mut latest = (0, 0);
//! assert!(Observer::new(&slot).poll(&mut latest));
//! assert_eq!(latest, (48000, 2));
//! ```
//!
//! ## Thread Safety
//!
//! - [`ControlBlock`] and [`Shared`] are `Sync`; each side of a session should
//!   hold its own proxy or role wrapper
//! - Every primitive assumes exactly one producer and one consumer at a time
//! - [`MonoPipe`] and [`MonoPipeReader`] are `Send` and meant to live on
//!   different threads

mod control;
mod error;
mod format;
mod pipe;
mod state_queue;

pub mod config;

pub use config::{LockRetryPolicy, PipeConfig, ThrottleConfig, TransportConfig};
pub use control::{
    block::{
        CONTROL_BLOCK_MAGIC, CONTROL_BLOCK_VERSION, ControlBlock, Direction, LOOP_FOREVER,
        MAX_RUN_TIMEOUT_MS, MAX_STARTUP_TIMEOUT_MS, NO_LOOP, ServerStep, UNITY_GAIN, flags,
    },
    lock::{SharedCondvar, SharedMutex, SharedMutexGuard},
    proxy::{BufferRegion, ClientProxy, ServerProxy},
};
pub use error::{Error, Result};
pub use format::{Format, MAX_CHANNELS, SUPPORTED_SAMPLE_RATES, SampleFormat};
pub use pipe::{
    Port, Sink, Source,
    reader::MonoPipeReader,
    throttle,
    timestamp::{AudioTimestamp, now_ns},
    writer::{MAX_PIPE_FRAMES, MonoPipe, ShutdownHandle},
};
pub use state_queue::{Mutator, Observer, Shared};
