//! Verification and publication of finished sessions.

use crate::error::{UploadError, UploadResult};
use crate::session::UploadSession;
use lanvan_core::UploadStatus;
use lanvan_storage::UploadDirectory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

/// Turns a `Finalizing` session into a visible file, or into nothing.
///
/// A file only becomes visible under its final name after its size and hash
/// check out. Any failure deletes the temp file and marks the session failed.
#[derive(Clone)]
pub struct AtomicFinalizer {
    directory: Arc<UploadDirectory>,
}

impl AtomicFinalizer {
    pub fn new(directory: Arc<UploadDirectory>) -> Self {
        Self { directory }
    }

    /// Verify and publish. Committing a committed session returns its path again.
    #[instrument(skip(self, session), fields(session_id = %session.id(), filename = %session.filename()))]
    pub async fn commit(&self, session: &mut UploadSession) -> UploadResult<PathBuf> {
        if session.status() == UploadStatus::Committed
            && let Some(path) = session.final_path()
        {
            return Ok(path.to_path_buf());
        }
        if session.status() != UploadStatus::Finalizing {
            return Err(UploadError::InvalidTransition {
                from: session.status(),
                to: UploadStatus::Committed,
            });
        }

        if let Err(error) = verify(session) {
            session.fail(&self.directory, &error).await?;
            return Err(error);
        }

        let temp = match session.temp_path() {
            Some(temp) => temp.to_path_buf(),
            None => {
                let error = UploadError::InvalidTransition {
                    from: session.status(),
                    to: UploadStatus::Committed,
                };
                session.fail(&self.directory, &error).await?;
                return Err(error);
            }
        };

        match self.directory.publish(&temp, session.filename()).await {
            Ok(final_path) => {
                session.mark_committed(final_path.clone())?;
                tracing::info!(
                    path = %final_path.display(),
                    bytes = session.bytes_received(),
                    "Upload committed"
                );
                Ok(final_path)
            }
            Err(e) => {
                let error = UploadError::from(e);
                session.fail(&self.directory, &error).await?;
                Err(error)
            }
        }
    }
}

fn verify(session: &UploadSession) -> UploadResult<()> {
    if let Some(expected) = session.expected_size()
        && expected != session.bytes_received()
    {
        return Err(UploadError::SizeMismatch {
            expected,
            actual: session.bytes_received(),
        });
    }
    if let Some(expected) = session.expected_hash() {
        let actual = session.digest().ok_or(UploadError::InvalidTransition {
            from: session.status(),
            to: UploadStatus::Committed,
        })?;
        if actual != expected {
            return Err(UploadError::HashMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanvan_core::{ContentHash, FileDescriptor, SessionId};

    async fn setup() -> (tempfile::TempDir, Arc<UploadDirectory>) {
        let temp = tempfile::tempdir().unwrap();
        let directory = Arc::new(UploadDirectory::new(temp.path()).await.unwrap());
        (temp, directory)
    }

    async fn finished(
        directory: &UploadDirectory,
        name: &str,
        declared: Option<u64>,
        expected: Option<ContentHash>,
        body: &[u8],
    ) -> UploadSession {
        let descriptor = FileDescriptor::new(name, declared);
        let mut session = UploadSession::new(SessionId::new(), &descriptor, name.into(), expected);
        session.begin(directory).await.unwrap();
        session.append_last(body).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_commit_publishes_and_is_idempotent() {
        let (_temp, directory) = setup().await;
        let finalizer = AtomicFinalizer::new(directory.clone());
        let hash = ContentHash::compute(b"payload");
        let mut session = finished(&directory, "p.bin", Some(7), Some(hash), b"payload").await;
        let temp = session.temp_path().unwrap().to_path_buf();

        let path = finalizer.commit(&mut session).await.unwrap();
        assert_eq!(path, directory.root().join("p.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert!(!temp.exists());
        assert_eq!(session.status(), UploadStatus::Committed);

        let again = finalizer.commit(&mut session).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(directory.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_nothing_visible() {
        let (_temp, directory) = setup().await;
        let finalizer = AtomicFinalizer::new(directory.clone());
        let wrong = ContentHash::compute(b"something else");
        let mut session = finished(&directory, "p.bin", None, Some(wrong), b"payload").await;
        let temp = session.temp_path().unwrap().to_path_buf();

        assert!(matches!(
            finalizer.commit(&mut session).await,
            Err(UploadError::HashMismatch { .. })
        ));
        assert_eq!(session.status(), UploadStatus::Failed);
        assert!(!temp.exists());
        assert!(directory.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_fails() {
        let (_temp, directory) = setup().await;
        let finalizer = AtomicFinalizer::new(directory.clone());
        let mut session = finished(&directory, "short.bin", Some(10), None, b"four").await;

        assert!(matches!(
            finalizer.commit(&mut session).await,
            Err(UploadError::SizeMismatch {
                expected: 10,
                actual: 4
            })
        ));
        assert!(directory.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_requires_finalizing() {
        let (_temp, directory) = setup().await;
        let finalizer = AtomicFinalizer::new(directory.clone());
        let descriptor = FileDescriptor::new("x", None);
        let mut session = UploadSession::new(SessionId::new(), &descriptor, "x".into(), None);
        session.begin(&directory).await.unwrap();

        assert!(matches!(
            finalizer.commit(&mut session).await,
            Err(UploadError::InvalidTransition {
                from: UploadStatus::Receiving,
                ..
            })
        ));
        assert_eq!(session.status(), UploadStatus::Receiving);
    }
}
