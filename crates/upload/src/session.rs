//! Per-file upload session state machine.

use crate::error::{UploadError, UploadResult};
use lanvan_cipher::{CipherKey, CipherMetadata, StreamCipher};
use lanvan_core::{
    ContentHash, ContentHasher, EncryptionRequest, FileDescriptor, SessionId, UploadStatus,
};
use lanvan_storage::{StagedFile, UploadDirectory};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::instrument;

/// Cipher state for a session that stores ciphertext.
pub struct EncryptionSetup {
    pub cipher: StreamCipher,
    pub metadata: CipherMetadata,
    /// Set for random-key sessions; handed to the uploader once.
    pub random_key: Option<CipherKey>,
}

impl EncryptionSetup {
    /// Build the cipher for a request. Password derivation is CPU-bound.
    pub fn prepare(request: &EncryptionRequest, kdf_iterations: u32) -> UploadResult<Self> {
        match request {
            EncryptionRequest::Password { password } => {
                if password.is_empty() {
                    return Err(UploadError::Validation(
                        "encryption password is empty".to_string(),
                    ));
                }
                let metadata = CipherMetadata::for_password(kdf_iterations);
                let key = metadata.derive_key(password)?;
                Ok(Self {
                    cipher: StreamCipher::encryptor(&key, &metadata.iv),
                    metadata,
                    random_key: None,
                })
            }
            EncryptionRequest::RandomKey => {
                let metadata = CipherMetadata::for_random_key();
                let key = CipherKey::generate();
                Ok(Self {
                    cipher: StreamCipher::encryptor(&key, &metadata.iv),
                    metadata,
                    random_key: Some(key),
                })
            }
        }
    }
}

/// One file moving from admission to a terminal state.
///
/// Owned and mutated by a single task; nothing here is shared.
pub struct UploadSession {
    id: SessionId,
    declared_filename: String,
    filename: String,
    expected_size: Option<u64>,
    expected_hash: Option<ContentHash>,
    bytes_received: u64,
    bytes_stored: u64,
    hasher: Option<ContentHasher>,
    digest: Option<ContentHash>,
    cipher: Option<StreamCipher>,
    encryption: Option<CipherMetadata>,
    staged: Option<StagedFile>,
    temp_path: Option<PathBuf>,
    final_path: Option<PathBuf>,
    status: UploadStatus,
    created_at: OffsetDateTime,
}

impl UploadSession {
    /// New `Pending` session for a sanitized filename.
    pub fn new(
        id: SessionId,
        descriptor: &FileDescriptor,
        filename: String,
        expected_hash: Option<ContentHash>,
    ) -> Self {
        Self {
            id,
            declared_filename: descriptor.filename.clone(),
            filename,
            expected_size: descriptor.declared_size,
            expected_hash,
            bytes_received: 0,
            bytes_stored: 0,
            hasher: Some(ContentHasher::new()),
            digest: None,
            cipher: None,
            encryption: None,
            staged: None,
            temp_path: None,
            final_path: None,
            status: UploadStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Store ciphertext produced by `cipher` instead of the plaintext.
    pub fn with_cipher(mut self, cipher: StreamCipher, metadata: CipherMetadata) -> Self {
        self.cipher = Some(cipher);
        self.encryption = Some(metadata);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn declared_filename(&self) -> &str {
        &self.declared_filename
    }

    /// Sanitized name the file will be published under (before collision numbering).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn expected_hash(&self) -> Option<&ContentHash> {
        self.expected_hash.as_ref()
    }

    /// Plaintext bytes accepted so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes written to the temp file (ciphertext length when encrypting).
    pub fn bytes_stored(&self) -> u64 {
        self.bytes_stored
    }

    /// Plaintext SHA-256, available once the session reaches `Finalizing`.
    pub fn digest(&self) -> Option<&ContentHash> {
        self.digest.as_ref()
    }

    pub fn encryption(&self) -> Option<&CipherMetadata> {
        self.encryption.as_ref()
    }

    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    pub fn final_path(&self) -> Option<&Path> {
        self.final_path.as_deref()
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Fail if accepting `additional` more bytes would pass the declared size.
    pub fn ensure_capacity(&self, additional: u64) -> UploadResult<()> {
        let received = self.bytes_received.saturating_add(additional);
        match self.expected_size {
            Some(declared) if received > declared => {
                Err(UploadError::Overflow { declared, received })
            }
            _ => Ok(()),
        }
    }

    /// `Pending -> Receiving`: open the temp file for exclusive writing.
    #[instrument(skip(self, directory), fields(session_id = %self.id, filename = %self.filename))]
    pub async fn begin(&mut self, directory: &UploadDirectory) -> UploadResult<()> {
        if self.status != UploadStatus::Pending {
            return Err(UploadError::InvalidTransition {
                from: self.status,
                to: UploadStatus::Receiving,
            });
        }
        let staged = directory
            .create_temp(&self.filename, &self.id.to_string())
            .await?;
        self.temp_path = Some(staged.path().to_path_buf());
        self.staged = Some(staged);
        self.status = UploadStatus::Receiving;
        tracing::debug!("Upload receiving");
        Ok(())
    }

    /// `Receiving -> Receiving`: hash, encrypt if configured, and write a chunk.
    pub async fn append(&mut self, chunk: &[u8]) -> UploadResult<()> {
        self.check_transition(UploadStatus::Receiving)?;
        self.ensure_capacity(chunk.len() as u64)?;

        let status = self.status;
        let missing = || UploadError::InvalidTransition {
            from: status,
            to: UploadStatus::Receiving,
        };
        let hasher = self.hasher.as_mut().ok_or_else(missing)?;
        let staged = self.staged.as_mut().ok_or_else(missing)?;

        hasher.update(chunk);
        match self.cipher.as_mut() {
            Some(cipher) => staged.write(&cipher.update(chunk)?).await?,
            None => staged.write(chunk).await?,
        }
        self.bytes_stored = staged.bytes_written();
        self.bytes_received += chunk.len() as u64;
        Ok(())
    }

    /// `Receiving -> Finalizing`: write the last chunk, finish the cipher and
    /// hash exactly once, then flush and close the temp file.
    #[instrument(skip(self, chunk), fields(session_id = %self.id, len = chunk.len()))]
    pub async fn append_last(&mut self, chunk: &[u8]) -> UploadResult<()> {
        self.check_transition(UploadStatus::Finalizing)?;
        self.ensure_capacity(chunk.len() as u64)?;

        let status = self.status;
        let missing = || UploadError::InvalidTransition {
            from: status,
            to: UploadStatus::Finalizing,
        };
        let mut hasher = self.hasher.take().ok_or_else(missing)?;
        let mut staged = self.staged.take().ok_or_else(missing)?;

        hasher.update(chunk);
        match self.cipher.take() {
            Some(cipher) => staged.write(&cipher.finalize(chunk)?).await?,
            None => staged.write(chunk).await?,
        }
        self.bytes_stored = staged.bytes_written();
        self.bytes_received += chunk.len() as u64;

        self.temp_path = Some(staged.sync_and_close().await?);
        self.digest = Some(hasher.finalize());
        self.status = UploadStatus::Finalizing;
        tracing::debug!(bytes = self.bytes_received, "Upload finalizing");
        Ok(())
    }

    /// `Finalizing -> Committed`, recording where the file landed.
    pub(crate) fn mark_committed(&mut self, final_path: PathBuf) -> UploadResult<()> {
        self.check_transition(UploadStatus::Committed)?;
        self.status = UploadStatus::Committed;
        self.temp_path = None;
        self.final_path = Some(final_path);
        Ok(())
    }

    /// Move to `Failed` and delete the temp file.
    pub async fn fail(
        &mut self,
        directory: &UploadDirectory,
        error: &UploadError,
    ) -> UploadResult<()> {
        self.check_transition(UploadStatus::Failed)?;
        self.status = UploadStatus::Failed;
        self.cleanup(directory).await;
        tracing::warn!(
            session_id = %self.id,
            filename = %self.filename,
            kind = error.kind(),
            error = %error,
            "Upload failed"
        );
        Ok(())
    }

    /// Move `Pending` or `Receiving` to `Aborted` and delete the temp file.
    pub async fn abort(&mut self, directory: &UploadDirectory) -> UploadResult<()> {
        self.check_transition(UploadStatus::Aborted)?;
        self.status = UploadStatus::Aborted;
        self.cleanup(directory).await;
        tracing::info!(session_id = %self.id, filename = %self.filename, "Upload aborted");
        Ok(())
    }

    fn check_transition(&self, next: UploadStatus) -> UploadResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(UploadError::InvalidTransition {
                from: self.status,
                to: next,
            })
        }
    }

    async fn cleanup(&mut self, directory: &UploadDirectory) {
        // Close before unlinking
        self.staged = None;
        self.cipher = None;
        self.hasher = None;
        if let Some(temp) = self.temp_path.take()
            && let Err(e) = directory.discard(&temp).await
        {
            tracing::warn!(
                session_id = %self.id,
                path = %temp.display(),
                error = %e,
                "Failed to remove temp file"
            );
        }
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("status", &self.status)
            .field("bytes_received", &self.bytes_received)
            .field("expected_size", &self.expected_size)
            .field("encrypted", &self.encryption.is_some())
            .finish()
    }
}
