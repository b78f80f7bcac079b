//! Per-file outcome records.

use crate::error::UploadError;
use crate::session::UploadSession;
use lanvan_cipher::CipherMetadata;
use lanvan_core::{SessionId, UploadStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Outcome of one file, reported independently of its siblings.
#[derive(Clone, Debug, Serialize)]
pub struct UploadReport {
    pub session_id: SessionId,
    pub success: bool,
    pub status: UploadStatus,
    /// Name the file was published under, or the sanitized name if it never was.
    pub filename: String,
    /// Plaintext bytes received.
    pub size: u64,
    /// Bytes on disk; larger than `size` for encrypted files.
    pub stored_size: u64,
    /// SHA-256 of the plaintext, when the upload got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Parameters needed to decrypt the stored file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<CipherMetadata>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(skip)]
    pub final_path: Option<PathBuf>,
}

impl UploadReport {
    /// Report for a session that was published at `final_path`.
    pub fn committed(session: &UploadSession, final_path: &Path) -> Self {
        let filename = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| session.filename().to_string());
        Self {
            session_id: session.id(),
            success: true,
            status: UploadStatus::Committed,
            filename,
            size: session.bytes_received(),
            stored_size: session.bytes_stored(),
            sha256_hash: session.digest().map(|h| h.to_hex()),
            error: None,
            error_kind: None,
            encryption: session.encryption().cloned(),
            completed_at: OffsetDateTime::now_utc(),
            final_path: Some(final_path.to_path_buf()),
        }
    }

    /// Report for a session that ended in `Failed` or `Aborted`.
    pub fn failed(session: &UploadSession, error: &UploadError) -> Self {
        Self {
            session_id: session.id(),
            success: false,
            status: session.status(),
            filename: session.filename().to_string(),
            size: session.bytes_received(),
            stored_size: 0,
            sha256_hash: session.digest().map(|h| h.to_hex()),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            encryption: None,
            completed_at: OffsetDateTime::now_utc(),
            final_path: None,
        }
    }
}

/// Point-in-time view of a live session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub filename: String,
    pub status: UploadStatus,
    pub bytes_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
}
