// src/error.rs
//
// Error types for the blob disk: what a backend reports (StoreError) and
// what callers of the disk see (DiskError).

use thiserror::Error;

/// Failure reported by a [`BlobContainer`](crate::blob_store::BlobContainer) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    /// A hiccup on an otherwise healthy connection; the same request may succeed.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// The download stream died; a fresh ranged request is needed.
    #[error("download stream broken: {0}")]
    StreamBroken(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the read path may spend retry budget on this error.
    pub fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            StoreError::Transient(_) | StoreError::StreamBroken(_) => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                ErrorKind::Interrupted
                    | ErrorKind::TimedOut
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Errors that leave an open stream usable for a re-issued request of
    /// the same range, as opposed to a stream that has to be reopened.
    pub fn is_transient_read(&self) -> bool {
        matches!(self, StoreError::Transient(_))
            || matches!(self, StoreError::Io(e) if e.kind() == std::io::ErrorKind::Interrupted)
    }
}

/// Error surfaced by disk operations.
#[derive(Error, Debug)]
pub enum DiskError {
    /// A remote operation failed or acknowledged something unexpected.
    #[error("blob storage {op} failed for '{key}': {source}")]
    StorageProtocol {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// A retryable failure kept recurring until the budget ran out.
    #[error("blob storage {op} for '{key}' gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: &'static str,
        key: String,
        attempts: usize,
        #[source]
        source: StoreError,
    },

    /// Batch deletion stopped at `key`; `remaining` were never attempted.
    #[error(
        "failed to delete '{key}' at position {position} of the batch \
         ({} keys not attempted): {source}",
        .remaining.len()
    )]
    BatchDelete {
        key: String,
        position: usize,
        remaining: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error("invalid disk settings: {0}")]
    Configuration(String),

    #[error("metadata error for '{path}': {source}")]
    Metadata {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("writer for blob '{key}' is closed")]
    WriterClosed { key: String },

    #[error("read pool task failed: {0}")]
    Executor(String),
}

impl DiskError {
    pub(crate) fn storage(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        DiskError::StorageProtocol { op, key: key.into(), source }
    }

    pub(crate) fn metadata(path: impl Into<String>, source: anyhow::Error) -> Self {
        DiskError::Metadata { path: path.into(), source }
    }

    /// True for the storage-protocol family: remote failures, exhausted
    /// retries and interrupted batch deletions.
    pub fn is_storage_protocol(&self) -> bool {
        matches!(
            self,
            DiskError::StorageProtocol { .. }
                | DiskError::RetriesExhausted { .. }
                | DiskError::BatchDelete { .. }
        )
    }
}

impl From<DiskError> for std::io::Error {
    fn from(e: DiskError) -> Self {
        std::io::Error::other(e)
    }
}
