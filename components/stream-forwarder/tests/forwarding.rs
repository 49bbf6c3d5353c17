//! Follow -> batch -> deliver, end to end against a mock stream endpoint.

mod common;

use common::mock_stream::{MockResponse, MockStream};
use common::{STREAM, fast_delivery, log_file, stream_config};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stream_forwarder::buffer_batcher::batcher::Batcher;
use stream_forwarder::buffer_batcher::models::{BatchPolicy, RunSummary};
use stream_forwarder::shipper::shipper::StreamSink;
use stream_forwarder::shipper::stream_client::StreamClient;
use stream_forwarder::tailer::models::{Follower, InitialPosition};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn policy(max_count: usize, max_interval: Duration) -> BatchPolicy {
    let mut policy = BatchPolicy::new(max_count, 60)
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    policy.max_interval = max_interval;
    policy
}

/// Run a Batcher over `path` into `server` and stop it after `run_for`.
async fn forward(
    server: &MockStream,
    path: PathBuf,
    policy: BatchPolicy,
    max_attempts: u32,
    run_for: Duration,
) -> RunSummary {
    let client = StreamClient::new(&stream_config(server.url())).unwrap();
    let mut batcher = Batcher::new(policy);
    batcher.set_sink(StreamSink::new(client, STREAM, &fast_delivery(max_attempts)));

    let mut follower = Follower::open(&path, InitialPosition::Beginning)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(run_for).await;
        trigger.cancel();
    });

    batcher.run(&mut follower, &cancel).await.unwrap()
}

/// Append `contents` to `path` after `delay`.
fn append_later(path: PathBuf, delay: Duration, contents: &'static [u8]) {
    tokio::spawn(async move {
        sleep(delay).await;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
    });
}

#[tokio::test]
async fn count_trigger_preserves_line_order_across_batches() {
    let server = MockStream::healthy().await;
    let file = log_file(b"1\n2\n3\n4\n5\n");

    let summary = forward(
        &server,
        file.path().to_path_buf(),
        policy(2, Duration::from_secs(60)),
        1,
        Duration::from_millis(300),
    )
    .await;

    assert_eq!(
        server.put_batches(),
        vec![vec!["1", "2"], vec!["3", "4"], vec!["5"]]
    );
    assert_eq!(summary.lines_read, 5);
    assert_eq!(summary.records_delivered, 5);
    assert_eq!(summary.records_dropped, 0);
}

#[tokio::test]
async fn time_trigger_flushes_small_batches_and_never_sends_partial_lines() {
    let server = MockStream::healthy().await;
    let file = log_file(b"a\nb\n");
    append_later(file.path().to_path_buf(), Duration::from_millis(500), b"c\npartial");

    let summary = forward(
        &server,
        file.path().to_path_buf(),
        policy(10, Duration::from_millis(200)),
        1,
        Duration::from_millis(1_000),
    )
    .await;

    assert_eq!(server.put_batches(), vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(summary.lines_read, 3);
    assert_eq!(summary.batches_flushed, 2);
}

#[tokio::test]
async fn idle_file_sends_nothing() {
    let server = MockStream::healthy().await;
    let file = log_file(b"");

    let summary = forward(
        &server,
        file.path().to_path_buf(),
        policy(2, Duration::from_millis(50)),
        1,
        Duration::from_millis(300),
    )
    .await;

    assert!(server.get_requests().is_empty());
    assert_eq!(summary, RunSummary::default());
}

#[tokio::test]
async fn failed_batch_is_dropped_and_following_continues() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = MockStream::start(move |req| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            MockResponse::error(500, "InternalFailure", "try again later")
        } else {
            MockResponse::accept_all(req)
        }
    })
    .await;
    let file = log_file(b"a\nb\nc\nd\n");

    let summary = forward(
        &server,
        file.path().to_path_buf(),
        policy(2, Duration::from_secs(60)),
        1,
        Duration::from_millis(300),
    )
    .await;

    assert_eq!(server.put_batches(), vec![vec!["a", "b"], vec!["c", "d"]]);
    assert_eq!(summary.batches_flushed, 2);
    assert_eq!(summary.batches_dropped, 1);
    assert_eq!(summary.records_dropped, 2);
    assert_eq!(summary.records_delivered, 2);
}

#[tokio::test]
async fn delivery_timeout_credits_chunks_the_stream_already_accepted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = MockStream::start(move |req| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            MockResponse::accept_all(req)
        } else {
            MockResponse::error(500, "InternalFailure", "try again later")
        }
    })
    .await;

    let contents: String = (0..501).map(|i| format!("line-{i}\n")).collect();
    let file = log_file(contents.as_bytes());

    let summary = forward(
        &server,
        file.path().to_path_buf(),
        policy(501, Duration::from_secs(60)).with_delivery_timeout(Duration::from_millis(300)),
        10_000,
        Duration::from_millis(800),
    )
    .await;

    let batches = server.put_batches();
    assert_eq!(batches[0].len(), 500);
    assert!(batches[1..].iter().all(|b| b == &vec!["line-500"]));
    assert_eq!(summary.lines_read, 501);
    assert_eq!(summary.batches_flushed, 1);
    assert_eq!(summary.batches_dropped, 1);
    assert_eq!(summary.records_delivered, 500);
    assert_eq!(summary.records_dropped, 1);
}
