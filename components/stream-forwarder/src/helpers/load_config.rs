// Local crates
use crate::shipper::shipper::MAX_RECORDS_PER_REQUEST;
use crate::tailer::models::InitialPosition;

// External crates
use anyhow::{Context, Result};
use hyper::Uri;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Immutable forwarder configuration, built once at startup and passed by
/// reference into each component.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    pub stream: StreamConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Validation failures for an otherwise well-formed configuration file.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be a positive integer")]
    NotPositive { field: &'static str },
    #[error("`stream.name` must not be empty")]
    EmptyStreamName,
    #[error("`stream.endpoint` `{0}` is not a valid http:// endpoint")]
    InvalidEndpoint(String),
    #[error("`delivery.backoff_factor` must be >= 1.0, got {0}")]
    InvalidBackoffFactor(f64),
    #[error("`delivery.retry_jitter` must be within [0.0, 1.0), got {0}")]
    InvalidJitter(f64),
    #[error(
        "`batch.delivery_timeout_ms` ({configured_ms}) is shorter than the retry budget of a full batch ({required_ms} ms)"
    )]
    DeliveryTimeoutTooShort { configured_ms: u64, required_ms: u64 },
}

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub stream_name: Option<String>,
    pub log_path: Option<PathBuf>,
    pub region: Option<String>,
}

impl Config {
    /// Load and parse the configuration file
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Loading forwarder configuration file"
        );

        let config_str = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file at {:?}", path_ref))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse TOML from {:?}", path_ref))?;

        tracing::trace!(configuration_file_path = %path_ref.display(), "Forwarder configuration file loaded successfully");
        Ok(config)
    }

    /// Apply command-line overrides, returning the final configuration.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(name) = overrides.stream_name {
            self.stream.name = name;
        }
        if let Some(path) = overrides.log_path {
            self.source.log_path = path;
        }
        if let Some(region) = overrides.region.filter(|r| !r.is_empty()) {
            self.stream.region = region;
        }
        self
    }

    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("source.poll_interval_ms", self.source.poll_interval_ms)?;
        positive("batch.max_count", self.batch.max_count as u64)?;
        positive("batch.max_interval_secs", self.batch.max_interval_secs)?;
        positive("batch.delivery_timeout_ms", self.batch.delivery_timeout_ms)?;
        positive("stream.readiness_max_attempts", self.stream.readiness_max_attempts as u64)?;
        positive("stream.request_timeout_ms", self.stream.request_timeout_ms)?;
        positive("delivery.max_attempts", self.delivery.max_attempts as u64)?;

        if self.stream.name.trim().is_empty() {
            return Err(ConfigError::EmptyStreamName);
        }

        let endpoint: Uri = self
            .stream
            .endpoint
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(self.stream.endpoint.clone()))?;
        if endpoint.scheme_str() != Some("http") || endpoint.host().is_none() {
            return Err(ConfigError::InvalidEndpoint(self.stream.endpoint.clone()));
        }

        if self.delivery.backoff_factor.is_nan() || self.delivery.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidBackoffFactor(self.delivery.backoff_factor));
        }
        if !(0.0..1.0).contains(&self.delivery.retry_jitter) {
            return Err(ConfigError::InvalidJitter(self.delivery.retry_jitter));
        }

        let required_ms = self.required_delivery_timeout_ms();
        if self.batch.delivery_timeout_ms < required_ms {
            return Err(ConfigError::DeliveryTimeoutTooShort {
                configured_ms: self.batch.delivery_timeout_ms,
                required_ms,
            });
        }

        Ok(())
    }

    /// Worst-case time to deliver a full batch: every request chunk spends
    /// all of its attempts at the request timeout, with the longest jittered
    /// backoff between them.
    #[must_use]
    pub fn required_delivery_timeout_ms(&self) -> u64 {
        let chunks = self.batch.max_count.div_ceil(MAX_RECORDS_PER_REQUEST).max(1) as u64;
        let attempts = u64::from(self.delivery.max_attempts.max(1));
        let longest_delay_ms =
            (self.delivery.max_retry_delay_ms as f64 * (1.0 + self.delivery.retry_jitter)).round() as u64;

        let per_chunk = attempts
            .saturating_mul(self.stream.request_timeout_ms)
            .saturating_add((attempts - 1).saturating_mul(longest_delay_ms));
        chunks.saturating_mul(per_chunk)
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub log_path: PathBuf,
    #[serde(default)]
    pub initial_position: InitialPosition,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_interval_secs: default_max_interval_secs(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            flush_on_shutdown: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_readiness_max_attempts")]
    pub readiness_max_attempts: u32,
    #[serde(default = "default_readiness_backoff_ms")]
    pub readiness_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

/// How often the forwarder's own log file is rolled over.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
    Minutely,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_name: default_log_file_name(),
            rotation: LogRotation::default(),
            level: default_log_level(),
            json: false,
            stdout: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_max_count() -> usize {
    2
}
fn default_max_interval_secs() -> u64 {
    1
}
fn default_delivery_timeout_ms() -> u64 {
    75_000
}
fn default_true() -> bool {
    true
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_readiness_max_attempts() -> u32 {
    10
}
fn default_readiness_backoff_ms() -> u64 {
    3_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_retry_delay_ms() -> u64 {
    200
}
fn default_max_retry_delay_ms() -> u64 {
    5_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_retry_jitter() -> f64 {
    0.2
}
fn default_log_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_file_name() -> String {
    "producer.log".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}
