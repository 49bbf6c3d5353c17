//! Follows a single growing log file and yields complete lines.

pub mod follower;
pub mod models;
