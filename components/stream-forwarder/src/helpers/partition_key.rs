// External crates
use sha2::{Digest, Sha256};

/// Derive the partition key for a line: the lowercase hex SHA-256 digest of
/// its raw bytes.
///
/// The key only spreads records across the stream's shards. It is stable
/// across runs and hosts, but it is not a uniqueness guarantee: identical
/// lines share a key.
#[must_use]
pub fn partition_key(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
