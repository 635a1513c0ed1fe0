//! Incremental raw-byte log tailer.
//!
//! Reads newly appended byte ranges from the output log as it grows.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Errors that can occur while mirroring the log.
#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    /// The log file does not exist.
    #[error("log file missing: {0}")]
    FileMissing(PathBuf),

    /// Permission denied accessing the log file.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Event channel closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental log reader that tracks its read position.
///
/// The offset only moves forward, except on detected truncation
/// (file shrank below the offset), where it jumps to the new end of the
/// file without replaying anything.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
}

impl LogTailer {
    /// Create a tailer starting at the beginning of the file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Create a tailer starting at a specific byte offset.
    #[must_use]
    pub fn with_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// The current byte offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the offset to the current end of the file.
    ///
    /// A missing file counts as empty. Used at mirror startup so only
    /// output appended afterwards is replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub async fn seek_to_end(&mut self) -> Result<u64, MirrorError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => self.offset = meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.offset = 0,
            Err(e) => return Err(MirrorError::Io(e)),
        }
        Ok(self.offset)
    }

    /// Read the byte range appended since the last read.
    ///
    /// Returns `None` when the file has not grown. If the file shrank
    /// (external truncation), the offset is reset to the new length and
    /// nothing is replayed.
    ///
    /// # Errors
    ///
    /// Returns `FileMissing` or `PermissionDenied` when the file cannot be
    /// opened, or `Io` for other read failures.
    pub async fn read_new_chunk(&mut self) -> Result<Option<String>, MirrorError> {
        let file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MirrorError::FileMissing(self.path.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(MirrorError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(MirrorError::Io(e)),
        };

        let len = file.metadata().await?.len();

        if len < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                old_offset = self.offset,
                new_len = len,
                "log truncated, skipping to new end"
            );
            self.offset = len;
            return Ok(None);
        }

        if len == self.offset {
            return Ok(None);
        }

        let mut file = file;
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;

        let mut buf = Vec::new();
        file.take(len - self.offset).read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}
