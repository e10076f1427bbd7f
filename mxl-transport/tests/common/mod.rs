// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use mxl_transport::{Format, LockRetryPolicy, SampleFormat};

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

/// Initializes logging (respects the `RUST_LOG` environment variable).
pub fn setup_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });
}

/// A lock schedule short enough to keep dead-peer tests fast.
pub fn fast_policy() -> LockRetryPolicy {
    LockRetryPolicy {
        retries: 1,
        retry_delay_us: 200,
        wait_poll_us: 100,
    }
}

/// 48 kHz mono 16-bit, two bytes per frame.
pub fn mono_i16() -> Format {
    Format::new(48000, 1, SampleFormat::I16)
}

/// 48 kHz stereo float, eight bytes per frame.
pub fn stereo_f32() -> Format {
    Format::new(48000, 2, SampleFormat::F32)
}
