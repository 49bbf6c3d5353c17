// Local crates
use crate::metrics::metrics::{FOLLOW_OFFSET_BYTES, LINES_READ_TOTAL};
use crate::tailer::models::{FollowPosition, Follower, FollowerError, InitialPosition, ReadOutcome};

// External crates
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::instrument;

const READ_BUFFER_SIZE: usize = 16384;

impl Follower {
    /// Open `path` for following and position the read cursor according to
    /// `initial`.
    #[instrument(
        name = "forwarder_tailer::open",
        target = "tailer::follower",
        skip_all,
        fields(path = %path.as_ref().display()),
        level = "debug"
    )]
    pub async fn open(
        path: impl AsRef<Path>,
        initial: InitialPosition,
    ) -> Result<Self, FollowerError> {
        let path = path.as_ref().to_path_buf();

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| classify_open_error(&path, e))?;

        if !metadata.is_file() {
            return Err(FollowerError::NotAFile(path));
        }

        let mut file = File::open(&path)
            .await
            .map_err(|e| classify_open_error(&path, e))?;

        let len = metadata.len();
        let offset = match initial {
            InitialPosition::Beginning => 0,
            InitialPosition::End => len,
            InitialPosition::Offset(offset) if offset <= len => offset,
            InitialPosition::Offset(offset) => {
                return Err(FollowerError::OffsetOutOfRange { path, offset, len });
            }
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|source| FollowerError::Io {
                    path: path.clone(),
                    source,
                })?;
        }

        tracing::info!(offset, file_len = len, "Following file");
        FOLLOW_OFFSET_BYTES.set(offset as f64);

        Ok(Self {
            path,
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            position: FollowPosition { offset },
            scratch: Vec::with_capacity(256),
        })
    }

    /// Attempt to read the next complete line.
    ///
    /// A line is only handed out once its `\n` terminator is on disk. When the
    /// file currently ends in a partial line (or at the committed offset) the
    /// cursor is rewound to the committed offset and `NotReady` is returned, so
    /// the partial bytes are read again in full on a later attempt.
    pub async fn next_line(&mut self) -> Result<ReadOutcome, FollowerError> {
        self.scratch.clear();

        let n = self
            .reader
            .read_until(b'\n', &mut self.scratch)
            .await
            .map_err(|source| FollowerError::Io {
                path: self.path.clone(),
                source,
            })?;

        if n == 0 {
            return Ok(ReadOutcome::NotReady);
        }

        if self.scratch.last() != Some(&b'\n') {
            tracing::trace!(
                partial_bytes = n,
                offset = self.position.offset,
                "Partial line at end of file, rewinding to committed offset"
            );
            self.reader
                .seek(SeekFrom::Start(self.position.offset))
                .await
                .map_err(|source| FollowerError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            return Ok(ReadOutcome::NotReady);
        }

        self.position.offset += n as u64;
        self.scratch.pop();

        LINES_READ_TOTAL.inc();
        FOLLOW_OFFSET_BYTES.set(self.position.offset as f64);

        Ok(ReadOutcome::Line(Bytes::copy_from_slice(&self.scratch)))
    }

    /// Committed position; everything before it has been returned as lines.
    #[must_use]
    pub fn position(&self) -> FollowPosition {
        self.position
    }

    /// The followed path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn classify_open_error(path: &Path, e: std::io::Error) -> FollowerError {
    let path: PathBuf = path.to_path_buf();
    match e.kind() {
        ErrorKind::NotFound => FollowerError::NotFound(path),
        ErrorKind::PermissionDenied => FollowerError::PermissionDenied(path),
        ErrorKind::IsADirectory => FollowerError::NotAFile(path),
        _ => FollowerError::Io { path, source: e },
    }
}
