// Local crates
use crate::helpers::load_config::{LogRotation, LoggingConfig};

// External crates
use anyhow::{Context, Result};
use std::panic;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{Directive, EnvFilter},
    fmt,
    prelude::*,
    registry::Registry,
};

fn configured_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level {level:?}"))
}

/// Build the `EnvFilter`: `RUST_LOG` wins, otherwise the configured level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => configured_filter(&config.level)?,
    };

    // Keep dependency chatter out of debug logs.
    for noisy in ["hyper=info", "hyper_util=info"] {
        if let Ok(directive) = noisy.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    Ok(filter)
}

/// Install the global subscriber.
///
/// Records always go to the rolling file under `config.directory`, as text or
/// JSON. With `config.stdout` a human readable copy is also written to
/// stdout. The returned guard flushes the file writer on drop, so keep it
/// alive for the lifetime of the process.
pub fn init_tracing(config: &LoggingConfig) -> Result<WorkerGuard> {
    let file_appender = match config.rotation {
        LogRotation::Never => rolling::never(&config.directory, &config.file_name),
        LogRotation::Daily => rolling::daily(&config.directory, &config.file_name),
        LogRotation::Hourly => rolling::hourly(&config.directory, &config.file_name),
        LogRotation::Minutely => rolling::minutely(&config.directory, &config.file_name),
    };
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = build_filter(config)?;

    let fmt_layer = (!config.json).then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking_writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let stdout_layer = config.stdout.then(|| {
        fmt::layer()
            .with_ansi(true)
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let error_layer = ErrorLayer::default();

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(stdout_layer)
        .with(error_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    Ok(guard)
}

pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => (*s).to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Unknown panic".to_string(),
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Forwarder panicked!"
        );
    }));
}
