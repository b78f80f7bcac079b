//! Upload error taxonomy.

use lanvan_cipher::CipherError;
use lanvan_core::{SessionId, UploadStatus};
use lanvan_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a session or reject a file at admission.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Bad filename, disallowed path, or refused by an admission check.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("received {received} bytes, more than the declared {declared}")]
    Overflow { declared: u64, received: u64 },

    #[error("no chunk received within {0:?}")]
    Timeout(Duration),

    #[error("upload aborted")]
    Aborted,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session no longer accepts chunks: {0}")]
    SessionClosed(SessionId),
}

impl UploadError {
    /// Stable tag used in reports and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Io(_) => "io",
            Self::Storage(StorageError::Io(_)) => "io",
            Self::Storage(StorageError::InvalidName(_)) => "validation",
            Self::Storage(_) => "storage",
            Self::Cipher(CipherError::Decryption(_)) => "decryption",
            Self::Cipher(_) => "cipher",
            Self::SizeMismatch { .. } | Self::HashMismatch { .. } | Self::Overflow { .. } => {
                "integrity"
            }
            Self::Timeout(_) => "timeout",
            Self::Aborted => "aborted",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SessionNotFound(_) => "not_found",
            Self::SessionClosed(_) => "closed",
        }
    }
}

impl From<lanvan_core::Error> for UploadError {
    fn from(e: lanvan_core::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Result type for upload operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
