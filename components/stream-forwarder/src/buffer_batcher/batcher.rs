//! Batcher - turns followed lines into size/time bounded batches.
//!
//! The Batcher drives the whole read side in one cooperative loop:
//! 1. Ask the `Follower` for the next complete line.
//! 2. Line -> wrap it as a `Record` and append it to the open `Batch`.
//! 3. Not ready -> sleep `poll_interval` (or wake early on cancellation); the
//! batch timer keeps running.
//! 4. Evaluate the flush condition, count first, then time. On a trigger the
//! batch is handed to the `Sink` and the loop waits for the delivery to finish
//! before reading again.
//!
//! Delivery failures never stop the loop; the failed batch is logged, counted
//! and dropped. Only a follower error or cancellation ends `run`.

// Local crates
use crate::buffer_batcher::models::{
    Batch, BatchPolicy, BatcherError, FlushTrigger, Record, RunSummary,
};
use crate::metrics::metrics::{
    BATCH_SIZE_RECORDS, BATCHES_FLUSHED_TOTAL, DELIVERY_DURATION_SECONDS, DROPPED_RECORDS_TOTAL,
    RECORDS_DELIVERED_TOTAL, observe_duration,
};
use crate::shipper::sink::{DeliveryError, DeliveryProgress, Sink};
use crate::tailer::models::{Follower, ReadOutcome};

// External crates
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Accumulates records from a `Follower` and flushes them into a `Sink`.
#[derive(Debug)]
pub struct Batcher<S> {
    policy: BatchPolicy,
    sink: Option<S>,
    batch: Batch,
    summary: RunSummary,
}

impl<S: Sink> Batcher<S> {
    /// Create a Batcher with no sink registered.
    #[must_use]
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            sink: None,
            batch: Batch::default(),
            summary: RunSummary::default(),
        }
    }

    /// Register the delivery sink, returning the one it replaces.
    pub fn set_sink(&mut self, sink: S) -> Option<S> {
        self.sink.replace(sink)
    }

    /// The policy this Batcher flushes by.
    #[must_use]
    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// The batch currently being accumulated.
    #[must_use]
    pub fn pending(&self) -> &Batch {
        &self.batch
    }

    /// Follow, batch and flush until `cancel` fires or the follower fails.
    ///
    /// On exit the in-flight batch is flushed (trigger `Shutdown`) when the
    /// policy asks for it, otherwise it is discarded.
    #[instrument(
        name = "forwarder_batcher::run",
        target = "buffer_batcher::batcher",
        skip_all,
        fields(
            path = %follower.path().display(),
            max_count = self.policy.max_count,
            max_interval_ms = self.policy.max_interval.as_millis() as u64,
        ),
        level = "info"
    )]
    pub async fn run(
        &mut self,
        follower: &mut Follower,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, BatcherError> {
        if self.sink.is_none() {
            return Err(BatcherError::SinkNotRegistered);
        }

        self.summary = RunSummary::default();
        tracing::info!("Batcher follow loop started");

        while !cancel.is_cancelled() {
            match follower.next_line().await {
                Ok(ReadOutcome::Line(data)) => {
                    self.summary.lines_read += 1;
                    self.batch.push(Record::new(data), Instant::now());
                }
                Ok(ReadOutcome::NotReady) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sleep(self.policy.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Follower failed, stopping follow loop");
                    self.finish().await;
                    return Err(e.into());
                }
            }

            if let Some(trigger) = self.batch.flush_trigger(&self.policy, Instant::now()) {
                self.flush(trigger).await;
            }
        }

        tracing::info!(offset = follower.position().offset, "Batcher follow loop cancelled");
        self.finish().await;

        tracing::info!(summary = ?self.summary, "Batcher follow loop stopped");
        Ok(self.summary)
    }

    /// Deal with the in-flight batch when the loop stops.
    async fn finish(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        if self.policy.flush_on_shutdown {
            self.flush(FlushTrigger::Shutdown).await;
        } else {
            let discarded = self.batch.take();
            tracing::warn!(
                count = discarded.len(),
                "Discarding in-flight batch on shutdown"
            );
            self.summary.batches_dropped += 1;
            self.summary.records_dropped += discarded.len() as u64;
            DROPPED_RECORDS_TOTAL.inc_by(discarded.len() as f64);
        }
    }

    /// Hand the current batch to the sink and reset it, whatever the outcome.
    ///
    /// Without a registered sink the batch is left in place.
    async fn flush(&mut self, trigger: FlushTrigger) {
        let Some(sink) = self.sink.as_ref() else {
            tracing::warn!(
                count = self.batch.len(),
                trigger = %trigger,
                "No sink registered, keeping batch"
            );
            return;
        };

        let batch = self.batch.take();
        let count = batch.len();

        tracing::info!(count, trigger = %trigger, "Accumulated {count} records to be put");

        let progress = DeliveryProgress::default();
        let start = std::time::Instant::now();
        let result = match timeout(self.policy.delivery_timeout, sink.deliver(&batch, &progress)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::TimedOut(self.policy.delivery_timeout)),
        };
        observe_duration(&DELIVERY_DURATION_SECONDS, start);

        BATCHES_FLUSHED_TOTAL
            .with_label_values(&[trigger.as_str()])
            .inc();
        BATCH_SIZE_RECORDS.observe(count as f64);
        self.summary.batches_flushed += 1;

        match result {
            Ok(()) => {
                tracing::debug!(count, "Batch delivered");
                self.summary.records_delivered += count as u64;
                RECORDS_DELIVERED_TOTAL.inc_by(count as f64);
            }
            Err(e) => {
                let lost = e.undelivered(count, &progress);
                let delivered = count - lost;

                tracing::error!(
                    error = %e,
                    count,
                    dropped = lost,
                    trigger = %trigger,
                    "Batch delivery failed, dropping undelivered records"
                );

                self.summary.records_delivered += delivered as u64;
                self.summary.batches_dropped += 1;
                self.summary.records_dropped += lost as u64;
                RECORDS_DELIVERED_TOTAL.inc_by(delivered as f64);
                DROPPED_RECORDS_TOTAL.inc_by(lost as f64);
            }
        }
    }
}
