// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for transport operations.
//!
//! Every failure in this crate is local and non-fatal: a primitive either
//! retries within its bound or hands one of these variants to its immediate
//! caller. Conditions that are recorded as state rather than raised (stale
//! resets, underruns) are not represented here.

use crate::Format;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when using the transport primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The data format has not been agreed yet, or no offered format matched.
    ///
    /// The caller must (re)negotiate before retrying. When the port has a
    /// fixed format it is returned as `counter_offer`.
    #[error("Negotiation required (counter offer: {counter_offer:?})")]
    Negotiate {
        /// The format the port would accept, if it has one.
        counter_offer: Option<Format>,
    },

    /// A bounded attempt to take the shared control block lock failed.
    ///
    /// The peer holding the lock is slow or dead. A sustained run of these is
    /// a signal for a supervisor to tear the session down.
    #[error("Shared lock unavailable")]
    LockUnavailable,

    /// A bounded wait on the shared condition variable expired.
    #[error("Timeout")]
    Timeout,

    /// The control block was invalidated by the server side.
    #[error("Control block invalidated")]
    Invalidated,

    /// An argument passed to a transport function was invalid.
    #[error("Invalid argument")]
    InvalidArg,

    /// A resource conflict occurred (e.g., attaching a second pipe reader).
    #[error("Conflict")]
    Conflict,

    /// A memory region does not hold a valid control block.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Failed to parse a configuration document.
    #[error("Configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Failed to read a configuration file.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A generic error for failures not covered by the other variants.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Returns `true` if the caller should renegotiate the format before retrying.
    pub fn is_negotiate(&self) -> bool {
        matches!(self, Error::Negotiate { .. })
    }
}
