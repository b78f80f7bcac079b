//! Core domain types and shared logic for the LANVan upload pipeline.
//!
//! This crate defines the data model used across all other crates:
//! - Upload session identifiers, states, and file descriptors
//! - SHA-256 content hashing
//! - Filename sanitization
//! - Chunk staging and adaptive pacing
//! - Configuration types

pub mod buffer;
pub mod config;
pub mod error;
pub mod filename;
pub mod hash;
pub mod pacer;
pub mod upload;

pub use buffer::ChunkBuffer;
pub use error::{Error, Result};
pub use filename::sanitize_filename;
pub use hash::{ContentHash, ContentHasher};
pub use pacer::{AdaptivePacer, FixedFallbackProbe, Load, RealProbe, ResourceProbe};
pub use upload::{EncryptionRequest, FileDescriptor, SessionId, UploadStatus};

/// Smallest chunk size tier: 256 KiB
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Largest chunk size tier: 32 MiB
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Chunk size cap used when available memory cannot be measured: 1 MiB
pub const CONSERVATIVE_CHUNK_SIZE: usize = 1024 * 1024;

/// Suffix carried by every in-flight temp file.
pub const TEMP_SUFFIX: &str = ".part";
