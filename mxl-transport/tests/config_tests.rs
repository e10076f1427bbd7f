// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Tests for loading tuning parameters from JSON.

mod common;

use std::{io::Write, time::Duration};

use common::setup_logging;
use mxl_transport::{
    Error, Format, LockRetryPolicy, MonoPipe, SampleFormat, ThrottleConfig, TransportConfig,
    config::{DEFAULT_POLL_TRIES, ThrottleBand},
};

#[test]
fn empty_document_yields_defaults() {
    setup_logging();
    let config = TransportConfig::from_json_str("{}").unwrap();
    assert_eq!(config, TransportConfig::default());
    assert_eq!(config.poll_tries, DEFAULT_POLL_TRIES);
    assert_eq!(config.lock.retries, 1);
    assert_eq!(config.lock.retry_delay(), Duration::from_millis(1));
    assert!(config.pipe.is_none());
}

#[test]
fn partial_sections_fill_in_defaults() {
    setup_logging();
    let json = r#"{
        "lock": { "retries": 3 },
        "pipe": {
            "requested_frames": 1024,
            "format": { "sample_rate": 44100, "channel_count": 2, "sample_format": "i24_packed" },
            "write_can_block": true,
            "throttle": { "bands": [ { "max_fill_permille": 1000, "pace_percent": 100 } ] }
        }
    }"#;
    let config = TransportConfig::from_json_str(json).unwrap();
    assert_eq!(
        config.lock,
        LockRetryPolicy {
            retries: 3,
            ..LockRetryPolicy::default()
        }
    );
    assert_eq!(config.lock.budget(), Duration::from_millis(3));

    let pipe_config = config.pipe.unwrap();
    assert_eq!(
        pipe_config.format,
        Format::new(44100, 2, SampleFormat::I24Packed)
    );
    assert_eq!(pipe_config.format.frame_size(), 6);
    assert_eq!(pipe_config.setpoint_frames, None);
    assert_eq!(
        pipe_config.throttle.bands,
        vec![ThrottleBand {
            max_fill_permille: 1000,
            pace_percent: 100
        }]
    );
    assert_eq!(
        pipe_config.throttle.saturated_pace_percent,
        ThrottleConfig::default().saturated_pace_percent
    );

    let pipe = MonoPipe::from_config(&pipe_config).unwrap();
    assert_eq!(pipe.max_frames(), 1024);
    assert_eq!(pipe.avg_frames(), 704);
}

#[test]
fn malformed_documents_are_config_errors() {
    setup_logging();
    assert!(matches!(
        TransportConfig::from_json_str("{ \"lock\": 5 }"),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        TransportConfig::from_json_str(r#"{ "pipe": { "requested_frames": 16 } }"#),
        Err(Error::Config(_))
    ));
}

#[test]
fn loads_from_file() {
    setup_logging();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "poll_tries": 9 }"#).unwrap();
    file.flush().unwrap();
    let config = TransportConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.poll_tries, 9);

    let path = file.path().to_path_buf();
    file.close().unwrap();
    assert!(matches!(
        TransportConfig::from_json_file(path),
        Err(Error::Io(_))
    ));
}
