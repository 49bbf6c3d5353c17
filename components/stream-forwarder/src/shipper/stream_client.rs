//! Minimal client for a Kinesis-compatible stream endpoint.
//!
//! Only the two actions the forwarder needs are spoken, both over the
//! `application/x-amz-json-1.1` protocol:
//! - `DescribeStream`, to gate startup on the stream being ACTIVE.
//! - `PutRecords`, to deliver a batch, with per-record failure reporting.
//!
//! Request signing and TLS are not handled; the client targets plain `http://`
//! endpoints such as a local Kinesis emulator or an authenticating proxy.

// Local crates
use crate::buffer_batcher::models::Record;
use crate::helpers::load_config::StreamConfig;

// External crates
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, StatusCode, Uri,
    header::CONTENT_TYPE,
    http::uri::{InvalidUri, InvalidUriParts, PathAndQuery},
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "Kinesis_20131202";
const TARGET_HEADER: &str = "x-amz-target";

/// Stream lifecycle states reported by `DescribeStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Creating,
    Deleting,
    Active,
    Updating,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Creating => "CREATING",
            StreamStatus::Deleting => "DELETING",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Updating => "UPDATING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(#[from] InvalidUri),
    #[error("invalid stream endpoint parts: {0}")]
    InvalidEndpointParts(#[from] InvalidUriParts),
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("http transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("stream service returned {status}: {error_type}: {message}")]
    Service {
        status: StatusCode,
        error_type: String,
        message: String,
    },
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl StreamClientError {
    /// Whether repeating the same request may succeed.
    ///
    /// Throttling is reported by the service as a 400 with a specific error
    /// type, so it is matched by name.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamClientError::Transport(_)
            | StreamClientError::Body(_)
            | StreamClientError::Timeout(_) => true,
            StreamClientError::Service {
                status, error_type, ..
            } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || matches!(
                        error_type.as_str(),
                        "ProvisionedThroughputExceededException"
                            | "LimitExceededException"
                            | "KMSThrottlingException"
                    )
            }
            StreamClientError::InvalidEndpoint(_)
            | StreamClientError::InvalidEndpointParts(_)
            | StreamClientError::Request(_)
            | StreamClientError::Json(_)
            | StreamClientError::UnexpectedResponse(_) => false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamRequest<'a> {
    stream_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamResponse {
    stream_description: StreamDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDescription {
    stream_status: StreamStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequest<'a> {
    stream_name: &'a str,
    records: Vec<PutRecordsRequestEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequestEntry<'a> {
    data: String,
    partition_key: &'a str,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Per-record result of a `PutRecords` call, in request order.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordsResultEntry {
    pub sequence_number: Option<String>,
    pub shard_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PutRecordsResultEntry {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error_code.is_some()
    }
}

/// Outcome of a `PutRecords` call that reached the service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordsOutcome {
    #[serde(default)]
    pub failed_record_count: usize,
    pub records: Vec<PutRecordsResultEntry>,
}

impl PutRecordsOutcome {
    /// Request indices of the records the stream rejected.
    pub fn failed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_failure())
            .map(|(i, _)| i)
    }

    /// First per-record error, for logging.
    #[must_use]
    pub fn first_error(&self) -> Option<String> {
        self.records.iter().find(|e| e.is_failure()).map(|e| {
            format!(
                "{}: {}",
                e.error_code.as_deref().unwrap_or_default(),
                e.error_message.as_deref().unwrap_or_default()
            )
        })
    }
}

/// HTTP/JSON client for the stream service.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    region: String,
    request_timeout: Duration,
}

impl StreamClient {
    /// Build a client for the configured endpoint. No connection is made
    /// until the first request.
    pub fn new(config: &StreamConfig) -> Result<Self, StreamClientError> {
        let endpoint: Uri = config.endpoint.parse()?;
        let mut parts = endpoint.into_parts();
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        let endpoint = Uri::from_parts(parts)?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);

        let http = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            http,
            endpoint,
            region: config.region.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Current status of `stream`.
    #[instrument(
        name = "forwarder_stream_client::describe_stream",
        target = "shipper::stream_client",
        skip(self),
        level = "debug"
    )]
    pub async fn describe_stream_status(
        &self,
        stream: &str,
    ) -> Result<StreamStatus, StreamClientError> {
        let response: DescribeStreamResponse = self
            .call("DescribeStream", &DescribeStreamRequest { stream_name: stream })
            .await?;
        Ok(response.stream_description.stream_status)
    }

    /// Put `records` into `stream` in a single request.
    ///
    /// A returned outcome may still contain per-record failures; see
    /// [`PutRecordsOutcome::failed_indices`].
    #[instrument(
        name = "forwarder_stream_client::put_records",
        target = "shipper::stream_client",
        skip(self, records),
        fields(count = records.len()),
        level = "debug"
    )]
    pub async fn put_records(
        &self,
        stream: &str,
        records: &[&Record],
    ) -> Result<PutRecordsOutcome, StreamClientError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let request = PutRecordsRequest {
            stream_name: stream,
            records: records
                .iter()
                .map(|r| PutRecordsRequestEntry {
                    data: engine.encode(r.data()),
                    partition_key: r.partition_key(),
                })
                .collect(),
        };

        let outcome: PutRecordsOutcome = self.call("PutRecords", &request).await?;

        if outcome.records.len() != records.len() {
            return Err(StreamClientError::UnexpectedResponse(format!(
                "sent {} records, got {} results",
                records.len(),
                outcome.records.len()
            )));
        }

        Ok(outcome)
    }

    async fn call<Req, Resp>(&self, action: &str, body: &Req) -> Result<Resp, StreamClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, AMZ_JSON)
            .header(TARGET_HEADER, format!("{TARGET_PREFIX}.{action}"))
            .body(Full::new(Bytes::from(payload)))?;

        let exchange = async {
            let response = self.http.request(request).await?;
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, StreamClientError>((status, body))
        };

        let (status, body) = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| StreamClientError::Timeout(self.request_timeout))??;

        tracing::trace!(action, status = %status, body_len = body.len(), "Stream service responded");

        if !status.is_success() {
            let error = serde_json::from_slice::<ServiceErrorBody>(&body).unwrap_or_else(|_| {
                ServiceErrorBody {
                    error_type: String::new(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                }
            });
            let error_type = error
                .error_type
                .rsplit('#')
                .next()
                .unwrap_or_default()
                .to_string();
            return Err(StreamClientError::Service {
                status,
                error_type,
                message: error.message,
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_records_request_uses_kinesis_field_names() {
        let record = Record::new(Bytes::from_static(b"hello"));
        let request = PutRecordsRequest {
            stream_name: "gatekeeper",
            records: vec![PutRecordsRequestEntry {
                data: base64::engine::general_purpose::STANDARD.encode(record.data()),
                partition_key: record.partition_key(),
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["StreamName"], "gatekeeper");
        assert_eq!(json["Records"][0]["Data"], "aGVsbG8=");
        assert_eq!(json["Records"][0]["PartitionKey"], record.partition_key());
    }

    #[test]
    fn partial_failure_response_reports_failed_indices() {
        let body = r#"{
            "FailedRecordCount": 1,
            "Records": [
                {"SequenceNumber": "1", "ShardId": "shardId-000000000000"},
                {"ErrorCode": "ProvisionedThroughputExceededException", "ErrorMessage": "Rate exceeded"},
                {"SequenceNumber": "2", "ShardId": "shardId-000000000000"}
            ]
        }"#;
        let outcome: PutRecordsOutcome = serde_json::from_str(body).unwrap();

        assert_eq!(outcome.failed_record_count, 1);
        assert_eq!(outcome.failed_indices().collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            outcome.first_error().as_deref(),
            Some("ProvisionedThroughputExceededException: Rate exceeded")
        );
    }

    #[test]
    fn describe_response_parses_status() {
        let body = r#"{"StreamDescription": {"StreamName": "s", "StreamStatus": "UPDATING", "Shards": []}}"#;
        let response: DescribeStreamResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.stream_description.stream_status, StreamStatus::Updating);
        assert_eq!(StreamStatus::Updating.to_string(), "UPDATING");
    }

    #[test]
    fn throttling_is_retryable_but_missing_stream_is_not() {
        let throttled = StreamClientError::Service {
            status: StatusCode::BAD_REQUEST,
            error_type: "ProvisionedThroughputExceededException".into(),
            message: "Rate exceeded for shard".into(),
        };
        let missing = StreamClientError::Service {
            status: StatusCode::BAD_REQUEST,
            error_type: "ResourceNotFoundException".into(),
            message: "Stream gatekeeper not found".into(),
        };
        let unavailable = StreamClientError::Service {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error_type: String::new(),
            message: String::new(),
        };

        assert!(throttled.is_retryable());
        assert!(!missing.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(StreamClientError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn endpoint_without_path_gets_root_path() {
        let config: StreamConfig = toml::from_str(
            r#"
            name = "s"
            endpoint = "http://127.0.0.1:4566"
            "#,
        )
        .unwrap();

        let client = StreamClient::new(&config).unwrap();
        assert_eq!(client.endpoint().path(), "/");
        assert_eq!(client.region(), "us-east-1");
    }
}
