// Local crates
use crate::{
    buffer_batcher::{
        batcher::Batcher,
        models::{BatchPolicy, RunSummary},
    },
    helpers::{
        load_config::{Config, Overrides},
        shutdown::Shutdown,
    },
    instrumentation::tracing::{init_panic_handler, init_tracing},
    metrics::http::start_metrics_server,
    shipper::{
        readiness::{ReadinessPolicy, wait_for_stream},
        shipper::StreamSink,
        sink::Sink,
        stdout::StdoutSink,
        stream_client::StreamClient,
    },
    tailer::models::Follower,
};

// External crates
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Load, override and validate the configuration at `config_path`.
pub fn load_config(config_path: &Path, overrides: Overrides) -> Result<Config> {
    let config = Config::load(config_path)?.with_overrides(overrides);
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", config_path))?;
    Ok(config)
}

/// Run the forwarder until a shutdown signal arrives or a fatal error occurs.
///
/// Startup order:
/// 1. Configuration and logging.
/// 2. Open the source file (a missing or unreadable file is fatal).
/// 3. Unless `dry_run`, wait for the stream to become ACTIVE (fatal on failure).
/// 4. Follow, batch and deliver until cancelled.
pub async fn run_forwarder(
    config_path: PathBuf,
    overrides: Overrides,
    dry_run: bool,
) -> Result<RunSummary> {
    let config = load_config(&config_path, overrides)?;

    let _guard = init_tracing(&config.logging)?;
    init_panic_handler();

    tracing::info!(
        config = %config_path.display(),
        file = %config.source.log_path.display(),
        stream = %config.stream.name,
        region = %config.stream.region,
        dry_run,
        "Starting stream forwarder"
    );

    let mut follower = Follower::open(&config.source.log_path, config.source.initial_position)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Failed to open source file"))?;

    let policy = BatchPolicy::from_config(&config.batch, config.source.poll_interval_ms)?;

    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr;
        let cancel = shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(addr, cancel).await {
                tracing::error!(error = %e, "Metrics server failed");
            }
        });
    }

    let result = if dry_run {
        tracing::info!("Dry run, records are printed to stdout");
        forward(StdoutSink, policy, &mut follower, &shutdown.token()).await
    } else {
        match connect(&config, &shutdown.token()).await {
            Ok(Some(sink)) => forward(sink, policy, &mut follower, &shutdown.token()).await,
            Ok(None) => Ok(RunSummary::default()),
            Err(e) => Err(e),
        }
    };

    shutdown.trigger();
    signals.abort();

    match &result {
        Ok(summary) => tracing::info!(
            lines_read = summary.lines_read,
            batches_flushed = summary.batches_flushed,
            records_delivered = summary.records_delivered,
            records_dropped = summary.records_dropped,
            "Stream forwarder stopped"
        ),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "Stream forwarder failed"),
    }

    result
}

/// Build the stream sink once the stream is ACTIVE. `None` when shutdown was
/// requested while waiting.
async fn connect(config: &Config, cancel: &CancellationToken) -> Result<Option<StreamSink>> {
    let client = StreamClient::new(&config.stream).context("Failed to create stream client")?;

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("Shutdown requested while waiting for stream");
            Ok(None)
        }
        status = wait_for_stream(&client, &config.stream.name, ReadinessPolicy::from_config(&config.stream)) => {
            status.with_context(|| format!("Stream {} is not available", config.stream.name))?;
            Ok(Some(StreamSink::new(client, config.stream.name.clone(), &config.delivery)))
        }
    }
}

async fn forward<S: Sink>(
    sink: S,
    policy: BatchPolicy,
    follower: &mut Follower,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let mut batcher = Batcher::new(policy);
    batcher.set_sink(sink);
    let summary = batcher.run(follower, cancel).await?;
    Ok(summary)
}
