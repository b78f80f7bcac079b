//! Pluggable pre-admission checks.

use async_trait::async_trait;
use lanvan_core::FileDescriptor;

/// Inspects a file before a session is created for it.
///
/// Runs only for files whose declared size is unknown or at most
/// `upload.admission_scan_threshold_bytes`. Returning `Err` rejects the file
/// with a validation error carrying the message.
#[async_trait]
pub trait AdmissionCheck: Send + Sync {
    async fn check(&self, descriptor: &FileDescriptor, filename: &str) -> Result<(), String>;
}

/// Refuses files by extension.
#[derive(Clone, Debug, Default)]
pub struct BlockedExtensions {
    extensions: Vec<String>,
}

impl BlockedExtensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

#[async_trait]
impl AdmissionCheck for BlockedExtensions {
    async fn check(&self, _descriptor: &FileDescriptor, filename: &str) -> Result<(), String> {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Ok(());
        };
        let ext = ext.to_ascii_lowercase();
        if self.extensions.iter().any(|blocked| *blocked == ext) {
            return Err(format!("files with extension .{ext} are not accepted"));
        }
        Ok(())
    }
}
