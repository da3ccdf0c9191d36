use std::collections::BTreeMap;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SstashError>;

#[derive(Debug, Error)]
pub enum SstashError {
    #[error("object not found: '{0}'")]
    NotFound(String),

    #[error("file changed during operation: {0}")]
    Changed(String),

    #[error("file changes detected between selected manifests")]
    ChangesDetected,

    #[error("no backups found for host")]
    NoBackupsFound,

    #[error("no snapshots found for host")]
    NoSnapshotsFound,

    #[error("an incomplete backup overlaps the selected range")]
    IncompleteBackup,

    #[error("short write: copied {copied} of {expected} bytes")]
    ShortWrite { copied: u64, expected: u64 },

    #[error("digest mismatch: expected {expected}, observed {observed}")]
    DigestMismatch { expected: String, observed: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("restore failed for {} file(s)", .0.len())]
    FileErrors(BTreeMap<String, String>),

    #[error("{0}")]
    Other(String),
}

impl SstashError {
    /// True for "the object does not exist" outcomes, including filesystem
    /// NotFound. The object-store abstraction requires this to be
    /// distinguishable from transport failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            SstashError::NotFound(_) => true,
            SstashError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True for failures worth retrying: transport-level storage errors and
    /// connection-shaped I/O errors.
    pub fn is_transient(&self) -> bool {
        match self {
            SstashError::Transient(_) => true,
            SstashError::Io(e) => is_retryable_io(e),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SstashError::Cancelled)
    }
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}
