// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Shared ring control block.
//!
//! A [`ControlBlock`] tracks how far a producer and a consumer have advanced
//! through an externally allocated circular frame buffer. It is usable within
//! one process or placed in a region mapped by two, and it stays usable when
//! the peer on the other side has crashed while holding the shared lock.
//!
//! # Key Types
//!
//! - [`ControlBlock`]: fixed-layout cursors, loop region, flags and lock
//! - [`SharedMutex`] / [`SharedCondvar`]: address-space independent sync words
//! - [`ClientProxy`] / [`ServerProxy`]: the two roles of a session
//!
//! ```text
//!  client (user cursor)            server (server cursor)
//!  ClientProxy ──step_user──► ┌──────────────┐ ◄──step_server── ServerProxy
//!                             │ ControlBlock │
//!  obtain_buffer ◄── signal ──│  lock / cv   │
//!                             └──────────────┘
//! ```

pub mod block;
pub mod lock;
pub mod proxy;
