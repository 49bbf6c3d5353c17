//! Small shared helpers: configuration loading, shutdown coordination and
//! partition key derivation.

pub mod load_config;
pub mod partition_key;
pub mod shutdown;
