// External crates
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec, register_gauge,
    register_histogram,
};
use std::time::Instant;

/// Helper to observe histogram duration
pub fn observe_duration(hist: &Histogram, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    hist.observe(elapsed);
}

lazy_static! {
    // ======== Follower Metrics ========
    pub static ref LINES_READ_TOTAL: Counter = register_counter!(
        "forwarder_lines_read_total",
        "Total number of complete lines read from the followed file"
    ).expect("forwarder_lines_read_total registers once");

    pub static ref FOLLOW_OFFSET_BYTES: Gauge = register_gauge!(
        "forwarder_follow_offset_bytes",
        "Committed byte offset into the followed file"
    ).expect("forwarder_follow_offset_bytes registers once");

    // ======== Batcher Metrics ========
    pub static ref BATCHES_FLUSHED_TOTAL: CounterVec = register_counter_vec!(
        "forwarder_batches_flushed_total",
        "Number of batches handed to the sink, by flush trigger",
        &["trigger"]
    ).expect("forwarder_batches_flushed_total registers once");

    pub static ref BATCH_SIZE_RECORDS: Histogram = register_histogram!(
        "forwarder_batch_size_records",
        "Number of records per flushed batch",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0]
    ).expect("forwarder_batch_size_records registers once");

    pub static ref DROPPED_RECORDS_TOTAL: Counter = register_counter!(
        "forwarder_dropped_records_total",
        "Total number of records dropped after delivery failed"
    ).expect("forwarder_dropped_records_total registers once");

    // ======== Delivery Metrics ========
    pub static ref RECORDS_DELIVERED_TOTAL: Counter = register_counter!(
        "forwarder_records_delivered_total",
        "Total number of records accepted by the stream"
    ).expect("forwarder_records_delivered_total registers once");

    pub static ref DELIVERY_FAILURES_TOTAL: Counter = register_counter!(
        "forwarder_delivery_failures_total",
        "Total number of failed delivery attempts (including retried ones)"
    ).expect("forwarder_delivery_failures_total registers once");

    pub static ref DELIVERY_DURATION_SECONDS: Histogram = register_histogram!(
        "forwarder_delivery_duration_seconds",
        "Histogram of batch delivery durations (seconds)",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).expect("forwarder_delivery_duration_seconds registers once");
}
