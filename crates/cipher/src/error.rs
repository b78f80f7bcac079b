//! Cipher error types.

use thiserror::Error;

/// Encryption and decryption errors.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid cipher metadata: {0}")]
    InvalidMetadata(String),

    /// Ciphertext is truncated, misaligned, or carries bad padding.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cipher operations.
pub type CipherResult<T> = std::result::Result<T, CipherError>;
