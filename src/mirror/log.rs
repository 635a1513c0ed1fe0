//! Durable raw output log.
//!
//! The supervisor appends every raw chunk here before classification, so a
//! separate process can replay output it was not connected to see. Only raw
//! text is persisted; classified events are never written.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Append-only log of raw process output.
#[derive(Debug, Clone)]
pub struct OutputLog {
    path: PathBuf,
}

impl OutputLog {
    /// Create a log handle for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log file (and parent directories) if absent.
    ///
    /// Never truncates an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn ensure_exists(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    /// Append a raw chunk to the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub async fn append(&self, chunk: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(())
    }
}
