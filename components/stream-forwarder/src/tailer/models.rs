// External crates
use bytes::Bytes;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::BufReader;

/// Where a freshly opened `Follower` starts reading.
///
/// `TRIM_HORIZON` and `LATEST` are accepted as aliases so configurations
/// written for stream consumers keep their meaning at the file level.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    /// Offset 0.
    #[default]
    #[serde(alias = "TRIM_HORIZON")]
    Beginning,
    /// The file length at open time; only new lines are followed.
    #[serde(alias = "LATEST")]
    End,
    /// An explicit byte offset, at most the file length.
    Offset(u64),
}

/// The committed byte offset into the followed file. Everything before it has
/// been handed out as complete lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowPosition {
    /// Bytes from the start of the file.
    pub offset: u64,
}

/// Result of a single read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminator stripped.
    Line(Bytes),
    /// No newline-terminated data past the committed offset yet.
    NotReady,
}

/// Follows a single growing file, one complete line at a time.
///
/// ```text
/// open(path) -> next_line() -> Line | NotReady(rewind to committed offset)
/// ```
///
/// The Follower never blocks waiting for data; the caller decides how long to
/// back off after a `NotReady`.
#[derive(Debug)]
pub struct Follower {
    pub(crate) path: PathBuf,
    pub(crate) reader: BufReader<File>,
    pub(crate) position: FollowPosition,
    pub(crate) scratch: Vec<u8>,
}

/// Follower failures. All of them are fatal to the follow loop.
#[derive(Debug, thiserror::Error)]
pub enum FollowerError {
    #[error("file `{0}` does not exist")]
    NotFound(PathBuf),
    #[error("file `{0}` is not readable")]
    PermissionDenied(PathBuf),
    #[error("`{0}` is a directory, not a file")]
    NotAFile(PathBuf),
    #[error("start offset {offset} is past the end of `{path}` ({len} bytes)")]
    OffsetOutOfRange { path: PathBuf, offset: u64, len: u64 },
    #[error("i/o error while following `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
