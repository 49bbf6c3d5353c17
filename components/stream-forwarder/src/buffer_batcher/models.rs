// Local crates
use crate::helpers::{load_config::BatchConfig, partition_key::partition_key};
use crate::tailer::models::FollowerError;

// External crates
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One log line plus the key used to spread it across the stream's shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(serialize_with = "lossy_utf8")]
    data: Bytes,
    partition_key: String,
}

impl Record {
    /// Wrap a line, deriving its partition key from the line content.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        let partition_key = partition_key(&data);
        Self {
            data,
            partition_key,
        }
    }

    /// Raw line bytes, without the newline terminator.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Derived partition key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }
}

fn lossy_utf8<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

/// Ordered records accumulated between two flushes.
///
/// The batch opens when its first record is appended and closes when it is
/// taken for a flush; the open instant drives the time trigger.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    records: Vec<Record>,
    opened_at: Option<Instant>,
}

impl Batch {
    /// Append a record, opening the batch if it was empty.
    pub fn push(&mut self, record: Record, now: Instant) {
        if self.records.is_empty() {
            self.opened_at = Some(now);
        }
        self.records.push(record);
    }

    /// Decide whether the batch must be flushed at `now`.
    ///
    /// The count trigger wins over the time trigger, and an empty batch never
    /// triggers.
    #[must_use]
    pub fn flush_trigger(&self, policy: &BatchPolicy, now: Instant) -> Option<FlushTrigger> {
        if self.records.len() >= policy.max_count {
            return Some(FlushTrigger::Count);
        }

        match self.opened_at {
            Some(opened_at) if now.saturating_duration_since(opened_at) > policy.max_interval => {
                Some(FlushTrigger::Interval)
            }
            _ => None,
        }
    }

    /// Move the accumulated records out, leaving an empty, unopened batch.
    pub fn take(&mut self) -> Batch {
        std::mem::take(self)
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in append order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// When the first record of this batch was appended.
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }
}

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached `max_count` records.
    Count,
    /// The batch stayed open longer than `max_interval`.
    Interval,
    /// The follow loop is shutting down.
    Shutdown,
}

impl FlushTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Count => "count",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated batching parameters.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Flush as soon as the batch holds this many records.
    pub max_count: usize,
    /// Flush a non-empty batch once it has been open longer than this.
    pub max_interval: Duration,
    /// Pause after a `NotReady` read.
    pub poll_interval: Duration,
    /// Upper bound on a single `Sink::deliver` call.
    pub delivery_timeout: Duration,
    /// Flush the in-flight batch on shutdown instead of discarding it.
    pub flush_on_shutdown: bool,
}

impl BatchPolicy {
    /// Build a policy from a record count and an interval in whole seconds;
    /// both must be at least 1.
    pub fn new(max_count: usize, max_interval_secs: u64) -> Result<Self, BatcherError> {
        if max_count == 0 {
            return Err(BatcherError::InvalidPolicy("max_count must be >= 1"));
        }
        if max_interval_secs == 0 {
            return Err(BatcherError::InvalidPolicy("max_interval_secs must be >= 1"));
        }

        Ok(Self {
            max_count,
            max_interval: Duration::from_secs(max_interval_secs),
            poll_interval: Duration::from_millis(100),
            delivery_timeout: Duration::from_secs(75),
            flush_on_shutdown: true,
        })
    }

    /// Policy from the `[batch]` section plus the source poll interval.
    pub fn from_config(batch: &BatchConfig, poll_interval_ms: u64) -> Result<Self, BatcherError> {
        let mut policy = Self::new(batch.max_count, batch.max_interval_secs)?;
        policy.poll_interval = Duration::from_millis(poll_interval_ms.max(1));
        policy.delivery_timeout = Duration::from_millis(batch.delivery_timeout_ms.max(1));
        policy.flush_on_shutdown = batch.flush_on_shutdown;
        Ok(policy)
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    #[must_use]
    pub fn with_flush_on_shutdown(mut self, flush_on_shutdown: bool) -> Self {
        self.flush_on_shutdown = flush_on_shutdown;
        self
    }
}

/// Counters reported when the follow loop stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Complete lines taken from the follower.
    pub lines_read: u64,
    /// Batches handed to the sink, whatever the outcome.
    pub batches_flushed: u64,
    /// Records the sink reported as accepted.
    pub records_delivered: u64,
    /// Batches that lost at least one record.
    pub batches_dropped: u64,
    /// Records lost to delivery failures or a shutdown discard.
    pub records_dropped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    #[error("invalid batch policy: {0}")]
    InvalidPolicy(&'static str),
    #[error("no sink registered, call `set_sink` before `run`")]
    SinkNotRegistered,
    #[error(transparent)]
    Follower(#[from] FollowerError),
}
