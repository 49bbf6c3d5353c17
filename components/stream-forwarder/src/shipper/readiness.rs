//! Startup gate: wait until the target stream reports ACTIVE.
//!
//! The stream is described up to `max_attempts` times with a fixed pause
//! between attempts. A describe error counts as a failed attempt. A stream in
//! DELETING will never become ACTIVE, so that state ends the wait at once.

// Local crates
use crate::helpers::load_config::StreamConfig;
use crate::shipper::stream_client::{StreamClient, StreamClientError, StreamStatus};

// External crates
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::instrument;

/// Anything that can report the status of a named stream.
pub trait StreamStatusSource: Send + Sync {
    fn describe_status(
        &self,
        stream: &str,
    ) -> impl Future<Output = Result<StreamStatus, StreamClientError>> + Send;
}

impl StreamStatusSource for StreamClient {
    async fn describe_status(&self, stream: &str) -> Result<StreamStatus, StreamClientError> {
        self.describe_stream_status(stream).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl ReadinessPolicy {
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            max_attempts: config.readiness_max_attempts,
            backoff: Duration::from_millis(config.readiness_backoff_ms),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamUnavailableError {
    #[error("stream {stream} is being deleted")]
    Deleting { stream: String },

    #[error(
        "stream {stream} not active after {attempts} attempt(s) (last status: {}, last error: {})",
        .last_status.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
        .last_error.as_deref().unwrap_or("none")
    )]
    NotActive {
        stream: String,
        attempts: u32,
        last_status: Option<StreamStatus>,
        last_error: Option<String>,
    },
}

/// Poll `source` until `stream` is ACTIVE.
#[instrument(
    name = "forwarder_readiness::wait_for_stream",
    target = "shipper::readiness",
    skip(source, policy),
    fields(max_attempts = policy.max_attempts)
)]
pub async fn wait_for_stream<S: StreamStatusSource>(
    source: &S,
    stream: &str,
    policy: ReadinessPolicy,
) -> Result<StreamStatus, StreamUnavailableError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_status = None;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match source.describe_status(stream).await {
            Ok(StreamStatus::Active) => {
                tracing::info!(attempt, "Stream is active");
                return Ok(StreamStatus::Active);
            }
            Ok(StreamStatus::Deleting) => {
                tracing::error!("Stream is being deleted");
                return Err(StreamUnavailableError::Deleting {
                    stream: stream.to_string(),
                });
            }
            Ok(status) => {
                tracing::info!(attempt, %status, "Stream not active yet");
                last_status = Some(status);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Describe stream failed");
                last_error = Some(e.to_string());
            }
        }

        if attempt < max_attempts {
            sleep(policy.backoff).await;
        }
    }

    Err(StreamUnavailableError::NotActive {
        stream: stream.to_string(),
        attempts: max_attempts,
        last_status,
        last_error,
    })
}
