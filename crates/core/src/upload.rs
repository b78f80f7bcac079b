//! Upload session identifiers, states, and inbound descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidSessionId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session state.
///
/// ```text
/// Pending -> Receiving -> Finalizing -> Committed
///    |           |             |
///    +-----------+-------------+--> Failed
///    +-----------+--> Aborted
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Admitted, waiting for the first chunk or a worker slot.
    Pending,
    /// Temp file open; chunks are being written as they arrive.
    Receiving,
    /// All bytes received; cipher, hash, and temp file are being closed out.
    Finalizing,
    /// Published under its final name.
    Committed,
    /// Terminated by an error; temp file removed.
    Failed,
    /// Cancelled by the caller; temp file removed.
    Aborted,
}

impl UploadStatus {
    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::Aborted)
    }

    /// Check whether moving to `next` is a legal edge.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Receiving)
                | (Receiving, Receiving)
                | (Receiving, Finalizing)
                | (Finalizing, Committed)
                | (Pending, Failed)
                | (Receiving, Failed)
                | (Finalizing, Failed)
                | (Pending, Aborted)
                | (Receiving, Aborted)
        )
    }

    /// Lowercase name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Receiving => "receiving",
            Self::Finalizing => "finalizing",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the stored artifact should be encrypted.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EncryptionRequest {
    /// Derive the key from a password and a fresh salt.
    Password { password: String },
    /// Generate a random key for this session only.
    RandomKey,
}

impl fmt::Debug for EncryptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            Self::RandomKey => f.write_str("RandomKey"),
        }
    }
}

/// Initial descriptor for one file of a multi-file upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Filename as declared by the client.
    pub filename: String,
    /// Declared size in bytes, if the client knows it up front.
    #[serde(default, alias = "size")]
    pub declared_size: Option<u64>,
    /// Client-declared SHA-256 of the plaintext (hex).
    #[serde(default, alias = "sha256")]
    pub expected_sha256: Option<String>,
    /// Encryption to apply before writing to disk.
    #[serde(default)]
    pub encryption: Option<EncryptionRequest>,
}

impl FileDescriptor {
    /// Plain descriptor with a known size.
    pub fn new(filename: impl Into<String>, declared_size: Option<u64>) -> Self {
        Self {
            filename: filename.into(),
            declared_size,
            expected_sha256: None,
            encryption: None,
        }
    }

    /// Attach a client-declared SHA-256 (hex).
    pub fn with_sha256(mut self, hex: impl Into<String>) -> Self {
        self.expected_sha256 = Some(hex.into());
        self
    }

    /// Request encryption of the stored artifact.
    pub fn with_encryption(mut self, encryption: EncryptionRequest) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_status_flags() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Receiving,
            UploadStatus::Finalizing,
        ] {
            assert!(!status.is_terminal());
        }
        for status in [
            UploadStatus::Committed,
            UploadStatus::Failed,
            UploadStatus::Aborted,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_transitions() {
        use UploadStatus::*;
        assert!(Pending.can_transition_to(Receiving));
        assert!(Receiving.can_transition_to(Finalizing));
        assert!(Finalizing.can_transition_to(Committed));
        assert!(Receiving.can_transition_to(Aborted));

        assert!(!Pending.can_transition_to(Committed));
        assert!(!Finalizing.can_transition_to(Aborted));
        assert!(!Committed.can_transition_to(Failed));
        assert!(!Aborted.can_transition_to(Receiving));
    }

    #[test]
    fn test_descriptor_deserialize_aliases() {
        let json = r#"{"filename":"a.txt","size":11,"sha256":"00","encryption":{"mode":"random_key"}}"#;
        let desc: FileDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.declared_size, Some(11));
        assert_eq!(desc.expected_sha256.as_deref(), Some("00"));
        assert!(matches!(desc.encryption, Some(EncryptionRequest::RandomKey)));
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let req = EncryptionRequest::Password {
            password: "hunter2".to_string(),
        };
        let rendered = format!("{req:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
