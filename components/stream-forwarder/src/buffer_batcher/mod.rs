//! Record/batch model and the size/time triggered Batcher.

pub mod batcher;
pub mod models;
