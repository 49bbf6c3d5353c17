//! Mock Kinesis-style stream endpoint for exercising the stream client.
//!
//! Every request is captured with its `x-amz-target` action and JSON body.
//! Responses come from a caller supplied responder, so each test scripts the
//! exact service behavior it needs (throttling, partial failures, states).

use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, body::Incoming};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub content_type: String,
    /// Action part of `x-amz-target`, e.g. `PutRecords`.
    pub action: String,
    pub body: Value,
}

impl ReceivedRequest {
    /// Decoded `Data` of every entry of a `PutRecords` body, in order.
    pub fn record_data(&self) -> Vec<String> {
        let engine = base64::engine::general_purpose::STANDARD;
        self.body["Records"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .map(|r| {
                        let raw = engine
                            .decode(r["Data"].as_str().unwrap_or_default())
                            .expect("record data is not base64");
                        String::from_utf8_lossy(&raw).into_owned()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `PartitionKey` of every entry of a `PutRecords` body, in order.
    pub fn partition_keys(&self) -> Vec<String> {
        self.body["Records"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .map(|r| r["PartitionKey"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub body: Value,
}

impl MockResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Service error in the `__type` / `message` shape.
    pub fn error(status: u16, error_type: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({ "__type": error_type, "message": message }),
        }
    }

    pub fn stream_status(status: &str) -> Self {
        Self::ok(json!({
            "StreamDescription": {
                "StreamName": super::STREAM,
                "StreamStatus": status,
                "Shards": [],
                "HasMoreShards": false
            }
        }))
    }

    /// Accept every record of `request`.
    pub fn accept_all(request: &ReceivedRequest) -> Self {
        Self::put_records_result(request, &[])
    }

    /// Reject the records at `failed` indices of `request`, accept the rest.
    pub fn put_records_result(request: &ReceivedRequest, failed: &[usize]) -> Self {
        let count = request.body["Records"].as_array().map_or(0, Vec::len);
        let records: Vec<Value> = (0..count)
            .map(|i| {
                if failed.contains(&i) {
                    json!({
                        "ErrorCode": "ProvisionedThroughputExceededException",
                        "ErrorMessage": "Rate exceeded for shard shardId-000000000000"
                    })
                } else {
                    json!({
                        "SequenceNumber": format!("4959{i:020}"),
                        "ShardId": "shardId-000000000000"
                    })
                }
            })
            .collect();

        Self::ok(json!({
            "FailedRecordCount": failed.iter().filter(|i| **i < count).count(),
            "Records": records
        }))
    }
}

type Responder = dyn Fn(&ReceivedRequest) -> MockResponse + Send + Sync;

#[derive(Clone)]
pub struct MockStream {
    pub addr: SocketAddr,
    pub received_requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl MockStream {
    /// Start a mock stream endpoint on a random port.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock stream");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = received_requests.clone();
        let responder: Arc<Responder> = Arc::new(responder);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let requests = requests_clone.clone();
                let responder = responder.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let requests = requests.clone();
                        let responder = responder.clone();
                        async move {
                            let method = req.method().to_string();
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .unwrap_or_default()
                                    .to_string()
                            };
                            let content_type = header("content-type");
                            let action = header("x-amz-target")
                                .rsplit('.')
                                .next()
                                .unwrap_or_default()
                                .to_string();

                            let body_bytes = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();
                            let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

                            let received = ReceivedRequest {
                                method,
                                content_type,
                                action,
                                body,
                            };
                            let reply = responder(&received);
                            requests.lock().unwrap().push(received);

                            Response::builder()
                                .status(reply.status)
                                .header("content-type", "application/x-amz-json-1.1")
                                .body(Full::new(Bytes::from(reply.body.to_string())))
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockStream {
            addr,
            received_requests,
        }
    }

    /// Endpoint that accepts every record and reports the stream ACTIVE.
    pub async fn healthy() -> Self {
        Self::start(|req| match req.action.as_str() {
            "DescribeStream" => MockResponse::stream_status("ACTIVE"),
            _ => MockResponse::accept_all(req),
        })
        .await
    }

    /// Base URL of the mock endpoint.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get_requests(&self) -> Vec<ReceivedRequest> {
        self.received_requests.lock().unwrap().clone()
    }

    /// Requests for a single action, in arrival order.
    pub fn get_requests_for_action(&self, action: &str) -> Vec<ReceivedRequest> {
        self.received_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.action == action)
            .cloned()
            .collect()
    }

    /// Decoded record data of every `PutRecords` request, one vec per request.
    pub fn put_batches(&self) -> Vec<Vec<String>> {
        self.get_requests_for_action("PutRecords")
            .iter()
            .map(ReceivedRequest::record_data)
            .collect()
    }
}
