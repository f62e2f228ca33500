//! Error types for the DSE storage layer.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob not found by content hash.
    #[error("blob not found: {hash}")]
    BlobNotFound { hash: String },

    /// Artifact row not found.
    #[error("artifact not found: {signature_id}/{compiled_id}")]
    ArtifactNotFound {
        signature_id: String,
        compiled_id: String,
    },

    /// Artifact row already exists under this key.
    #[error("artifact already exists: {signature_id}/{compiled_id}")]
    ArtifactExists {
        signature_id: String,
        compiled_id: String,
    },

    /// Conditional pointer update lost the race.
    #[error("active pointer conflict for {signature_id}: expected {expected:?}, found {found:?}")]
    PointerConflict {
        signature_id: String,
        expected: Option<String>,
        found: Option<String>,
    },

    /// No pointer history to roll back to.
    #[error("no previous active pointer for {signature_id}")]
    NoPreviousPointer { signature_id: String },

    /// Receipt not found by run id.
    #[error("receipt not found: {run_id}")]
    ReceiptNotFound { run_id: String },

    /// Content hash string failed validation.
    #[error("invalid content hash: {hash}")]
    InvalidHash { hash: String },

    /// Serialization failure.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
