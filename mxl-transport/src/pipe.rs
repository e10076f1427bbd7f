// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Bounded single-producer single-consumer audio pipe.
//!
//! A [`MonoPipe`] owns a power-of-two ring of frames. The producer publishes
//! `rear` and the consumer publishes `front`, each with release ordering, and
//! each reads the other's cursor with acquire ordering. No lock is taken on
//! either path.
//!
//! Both ends are [`Port`]s and must agree on a [`Format`] through
//! [`Port::negotiate`] before any data moves; until then every I/O call fails
//! with [`Error::Negotiate`].
//!
//! # Examples
//!
//! ```
//! use mxl_transport::{Format, MonoPipe, Port, SampleFormat, Sink, Source};
//!
//! # fn main() -> Result<(), mxl_transport::Error> {
//! let format = Format::new(48000, 1, SampleFormat::I16);
//! let mut pipe = MonoPipe::new(10, format, false)?;
//! let mut reader = pipe.reader()?;
//! pipe.negotiate(&[format])?;
//! reader.negotiate(&[format])?;
//!
//! assert_eq!(pipe.max_frames(), 16);
//! assert_eq!(pipe.write(&[1u8; 10], 5)?, 5);
//! assert_eq!(reader.available_to_read()?, 5);
//!
//! let mut out = [0u8; 10];
//! assert_eq!(reader.read(&mut out, 5)?, 5);
//! assert_eq!(out, [1u8; 10]);
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod throttle;
pub mod timestamp;
pub mod writer;

use tracing::debug;

use crate::{Error, Format, Result};

/// An endpoint that exchanges frames in a negotiated format.
pub trait Port {
    /// The format this port is fixed to.
    fn format(&self) -> Format;

    /// Returns `true` once [`Self::negotiate`] succeeded.
    fn is_negotiated(&self) -> bool;

    /// Picks this port's format among `offers` and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiate`] carrying the fixed format as a counter
    /// offer when none of `offers` matches.
    fn negotiate(&mut self, offers: &[Format]) -> Result<usize>;
}

/// The producing end of a pipe.
pub trait Sink: Port {
    /// Frames that can be written without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiate`] before negotiation.
    fn available_to_write(&self) -> Result<usize>;

    /// Writes up to `count` frames taken from the front of `buffer`.
    ///
    /// Returns the number of frames written, which may be less than `count`.
    ///
    /// # Errors
    ///
    /// - [`Error::Negotiate`] before negotiation
    /// - [`Error::InvalidArg`] if `buffer` holds fewer than `count` frames
    fn write(&mut self, buffer: &[u8], count: usize) -> Result<usize>;

    /// Total frames written since creation.
    fn frames_written(&self) -> u64;
}

/// The consuming end of a pipe.
pub trait Source: Port {
    /// Frames that can be read without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiate`] before negotiation.
    fn available_to_read(&self) -> Result<usize>;

    /// Reads up to `count` frames into the front of `buffer`.
    ///
    /// Returns the number of frames read, which may be less than `count`.
    ///
    /// # Errors
    ///
    /// - [`Error::Negotiate`] before negotiation
    /// - [`Error::InvalidArg`] if `buffer` cannot hold `count` frames
    fn read(&mut self, buffer: &mut [u8], count: usize) -> Result<usize>;

    /// Total frames read since creation.
    fn frames_read(&self) -> u64;
}

/// Negotiation for a port whose format never changes.
fn negotiate_fixed(port: &str, fixed: Format, offers: &[Format]) -> Result<usize> {
    match offers.iter().position(|offer| *offer == fixed) {
        Some(index) => {
            debug!("{port}: negotiated {:?} (offer {index})", fixed);
            Ok(index)
        }
        None => {
            debug!(
                "{port}: none of {} offers matched, counter-offering {:?}",
                offers.len(),
                fixed
            );
            Err(Error::Negotiate {
                counter_offer: Some(fixed),
            })
        }
    }
}

/// Byte length of `count` frames, checked against a caller buffer of `len` bytes.
fn checked_bytes(count: usize, frame_size: usize, len: usize) -> Result<usize> {
    match count.checked_mul(frame_size) {
        Some(bytes) if bytes <= len => Ok(bytes),
        _ => Err(Error::InvalidArg),
    }
}

fn not_negotiated() -> Error {
    Error::Negotiate {
        counter_offer: None,
    }
}
