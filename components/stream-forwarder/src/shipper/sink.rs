// Local crates
use crate::buffer_batcher::models::Batch;

// External crates
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Delivery capability the Batcher flushes into.
///
/// Implementations must return (with an error) instead of blocking forever;
/// the Batcher additionally bounds every call with its delivery timeout.
pub trait Sink: Send + Sync {
    /// Attempt to deliver every record of `batch`, in order.
    ///
    /// Records are reported to `progress` as soon as the destination has
    /// accepted them, so a delivery cut short by the Batcher's timeout still
    /// accounts for what already went out.
    fn deliver(
        &self,
        batch: &Batch,
        progress: &DeliveryProgress,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Count of records of one batch the destination has accepted so far.
#[derive(Debug, Default)]
pub struct DeliveryProgress {
    delivered: AtomicUsize,
}

impl DeliveryProgress {
    /// Report `count` more records as accepted.
    pub fn record(&self, count: usize) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Records accepted so far.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Delivery failures. None of them stop the follow loop.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{undelivered} record(s) undelivered after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        undelivered: usize,
        last_error: String,
    },
    #[error("delivery did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("i/o error during delivery: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Records lost to this failure, given the size of the batch it hit and
    /// the progress reported before it.
    #[must_use]
    pub fn undelivered(&self, batch_len: usize, progress: &DeliveryProgress) -> usize {
        let lost = match self {
            DeliveryError::RetriesExhausted { undelivered, .. } => *undelivered,
            _ => batch_len.saturating_sub(progress.delivered()),
        };
        lost.min(batch_len)
    }
}
