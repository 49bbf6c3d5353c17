//! Shipper - delivers flushed batches to the remote stream.
//!
//! `StreamSink` is the production `Sink`. For every batch it:
//! - splits the records into `PutRecords` requests of at most 500 records,
//! - retries only the records that failed (whole-request errors, timeouts, or
//! per-record error codes in a partial-failure response),
//! - sleeps an exponential backoff with jitter between attempts,
//! - gives up after `delivery.max_attempts` and reports how many records were
//! left undelivered, so the Batcher can account for exactly what was dropped.
//!
//! Requests that cannot succeed on a retry (missing stream, malformed
//! request) stop the retry loop immediately.

// Local crates
use crate::buffer_batcher::models::{Batch, Record};
use crate::helpers::load_config::DeliveryConfig;
use crate::metrics::metrics::DELIVERY_FAILURES_TOTAL;
use crate::shipper::backoff::Backoff;
use crate::shipper::sink::{DeliveryError, DeliveryProgress, Sink};
use crate::shipper::stream_client::StreamClient;

// External crates
use tokio::time::sleep;
use tracing::instrument;

/// Upper bound on records per `PutRecords` request imposed by the service.
pub const MAX_RECORDS_PER_REQUEST: usize = 500;

/// `Sink` that puts records into a named stream through a `StreamClient`.
#[derive(Debug, Clone)]
pub struct StreamSink {
    client: StreamClient,
    stream_name: String,
    delivery: DeliveryConfig,
}

impl StreamSink {
    #[must_use]
    pub fn new(client: StreamClient, stream_name: impl Into<String>, delivery: &DeliveryConfig) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
            delivery: delivery.clone(),
        }
    }

    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Deliver one request-sized chunk, retrying the failed subset.
    async fn deliver_chunk(
        &self,
        chunk: &[Record],
        progress: &DeliveryProgress,
    ) -> Result<(), DeliveryError> {
        let mut pending: Vec<&Record> = chunk.iter().collect();
        let mut backoff = Backoff::from_config(&self.delivery);
        let max_attempts = self.delivery.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (last_error, retryable) =
                match self.client.put_records(&self.stream_name, &pending).await {
                    Ok(outcome) => {
                        let failed: Vec<usize> = outcome.failed_indices().collect();
                        if failed.is_empty() && outcome.failed_record_count == 0 {
                            progress.record(pending.len());
                            if attempt > 1 {
                                tracing::info!(attempt, count = pending.len(), "Retried records accepted by stream");
                            }
                            return Ok(());
                        }

                        let error = outcome.first_error().unwrap_or_else(|| {
                            format!("{} record(s) failed", outcome.failed_record_count)
                        });

                        // Without per-record codes every record is treated as failed.
                        if !failed.is_empty() {
                            progress.record(pending.len() - failed.len());
                            let still_pending: Vec<&Record> =
                                failed.into_iter().map(|i| pending[i]).collect();
                            pending = still_pending;
                        }
                        (error, true)
                    }
                    Err(e) => (e.to_string(), e.is_retryable()),
                };

            DELIVERY_FAILURES_TOTAL.inc();

            if !retryable || attempt >= max_attempts {
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt,
                    undelivered: pending.len(),
                    last_error,
                });
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                attempt,
                remaining = pending.len(),
                delay = ?delay,
                error = %last_error,
                "Put records to stream failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

impl Sink for StreamSink {
    #[instrument(
        name = "forwarder_shipper::deliver",
        target = "shipper::shipper",
        skip_all,
        fields(stream = %self.stream_name, count = batch.len()),
        level = "debug"
    )]
    async fn deliver(&self, batch: &Batch, progress: &DeliveryProgress) -> Result<(), DeliveryError> {
        let mut undelivered = 0;
        let mut attempts = 0;
        let mut last_error = None;

        for chunk in batch.records().chunks(MAX_RECORDS_PER_REQUEST) {
            match self.deliver_chunk(chunk, progress).await {
                Ok(()) => {}
                Err(DeliveryError::RetriesExhausted {
                    attempts: a,
                    undelivered: n,
                    last_error: e,
                }) => {
                    undelivered += n;
                    attempts = attempts.max(a);
                    last_error = Some(e);
                }
                Err(e) => {
                    undelivered += chunk.len();
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            None => Ok(()),
            Some(last_error) => Err(DeliveryError::RetriesExhausted {
                attempts,
                undelivered,
                last_error,
            }),
        }
    }
}
