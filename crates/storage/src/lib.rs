//! Upload directory storage for LANVan.
//!
//! This crate provides:
//! - Exclusive per-session temp files
//! - Collision-free publish by hard link, never replacing an existing name
//! - Listings that never show in-flight uploads
//! - Path traversal and symlink escape protection

pub mod directory;
pub mod error;

pub use directory::{StagedFile, UploadDirectory, VisibleFile, numbered_name};
pub use error::{StorageError, StorageResult};
