//! Streaming AES-256-CBC for upload artifacts.
//!
//! This crate provides:
//! - [`StreamCipher`], which encrypts or decrypts chunk by chunk with PKCS7
//!   padding applied only at the end of the stream
//! - PBKDF2-HMAC-SHA256 key derivation and random session keys
//! - The [`CipherMetadata`] record stored next to encrypted artifacts

pub mod error;
pub mod key;
pub mod metadata;
pub mod stream;

pub use error::{CipherError, CipherResult};
pub use key::{CipherKey, random_iv, random_salt};
pub use metadata::{CipherMetadata, KeyDerivation};
pub use stream::{
    StreamCipher, decrypt_bytes, decrypt_stream, decrypt_with_password, encrypt_bytes,
    encrypt_with_password, padded_len,
};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Salt length for password-derived keys.
pub const SALT_LEN: usize = 16;

/// CBC initialization vector length.
pub const IV_LEN: usize = 16;

/// Algorithm name recorded in cipher metadata.
pub const ALGORITHM: &str = "AES-256-CBC";
