//! Common test utilities for the forwarder integration tests

#![allow(dead_code)]

pub mod mock_stream;

use std::io::Write;
use stream_forwarder::helpers::load_config::{DeliveryConfig, StreamConfig};
use tempfile::NamedTempFile;

pub const STREAM: &str = "gatekeeper-access";

/// Stream settings pointing at `endpoint`, with fast readiness polling.
pub fn stream_config(endpoint: String) -> StreamConfig {
    StreamConfig {
        region: "us-east-1".to_string(),
        name: STREAM.to_string(),
        endpoint,
        connect_timeout_ms: 500,
        request_timeout_ms: 2_000,
        readiness_max_attempts: 3,
        readiness_backoff_ms: 10,
    }
}

/// Retry settings with millisecond delays and no jitter.
pub fn fast_delivery(max_attempts: u32) -> DeliveryConfig {
    DeliveryConfig {
        max_attempts,
        initial_retry_delay_ms: 5,
        max_retry_delay_ms: 20,
        backoff_factor: 2.0,
        retry_jitter: 0.0,
    }
}

/// A temporary log file holding `contents`.
pub fn log_file(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp log file");
    file.write_all(contents).expect("Failed to write temp log file");
    file.flush().expect("Failed to flush temp log file");
    file
}

/// Append `contents` to an open temporary log file.
pub fn append(file: &mut NamedTempFile, contents: &[u8]) {
    file.write_all(contents).expect("Failed to append to temp log file");
    file.flush().expect("Failed to flush temp log file");
}
