//! Stream forwarder: follows a growing log file, groups its lines into
//! size/time bounded batches and delivers each batch to a remote data stream.
//!
//! Pipeline: [`tailer`] -> [`buffer_batcher`] -> [`shipper`].

pub mod buffer_batcher;
pub mod cli;
pub mod helpers;
pub mod instrumentation;
pub mod metrics;
pub mod runtime;
pub mod shipper;
pub mod tailer;
