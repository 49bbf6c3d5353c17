//! Delivery side of the forwarder: the `Sink` seam, the stream client, and
//! the startup readiness gate.

pub mod backoff;
pub mod readiness;
#[allow(clippy::module_inception)]
pub mod shipper;
pub mod sink;
pub mod stdout;
pub mod stream_client;
