//! Prometheus metrics and the optional `/metrics` endpoint.

pub mod http;
#[allow(clippy::module_inception)]
pub mod metrics;
