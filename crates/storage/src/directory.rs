//! The upload directory: in-flight temp files and published uploads side by side.

use crate::error::{StorageError, StorageResult};
use dashmap::DashSet;
use lanvan_core::TEMP_SUFFIX;
use lanvan_core::filename::MAX_FILENAME_BYTES;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Attempts at finding a free `name (n).ext` before giving up.
const MAX_COLLISION_ATTEMPTS: u32 = 10_000;

/// Longest slice of the final name embedded in a temp name, in bytes.
/// Keeps `.{name}.{uuid}.part` under the common 255-byte name limit.
const TEMP_NAME_STEM_BYTES: usize = 200;

/// A file visible to listing and read APIs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibleFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
}

/// Exclusive temp file receiving one session's bytes.
#[derive(Debug)]
pub struct StagedFile {
    file: fs::File,
    path: PathBuf,
    bytes_written: u64,
}

impl StagedFile {
    pub async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush to disk and close, returning the temp path for publishing.
    pub async fn sync_and_close(mut self) -> StorageResult<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        Ok(self.path)
    }
}

/// Flat directory holding published uploads and their in-flight temp files.
///
/// Temp files are named `.{name}.{session}.part` and never appear in
/// [`UploadDirectory::list`] or through [`UploadDirectory::open`].
pub struct UploadDirectory {
    root: PathBuf,
    /// Final names claimed by a publish that has not finished renaming yet.
    reserved: DashSet<String>,
}

impl UploadDirectory {
    /// Open (creating if needed) the directory at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            reserved: DashSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `name` is an in-flight temp file name.
    pub fn is_temp_name(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
    }

    /// Temp file name for `name` owned by `session`.
    pub fn temp_name(name: &str, session: &str) -> String {
        format!(".{}.{session}{TEMP_SUFFIX}", truncated(name, TEMP_NAME_STEM_BYTES))
    }

    /// Create the temp file for a session. Fails if it already exists.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn create_temp(&self, name: &str, session: &str) -> StorageResult<StagedFile> {
        let temp_name = Self::temp_name(name, session);
        let path = self.entry_path(&temp_name).await?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists(temp_name.clone())
                } else {
                    StorageError::Io(e)
                }
            })?;
        tracing::debug!(path = %path.display(), "Created temp file");
        Ok(StagedFile {
            file,
            path,
            bytes_written: 0,
        })
    }

    /// Move a closed temp file to `name`, or `name (n).ext` if taken.
    ///
    /// Never overwrites a visible file or a name another publish is claiming.
    #[instrument(skip(self, temp), fields(temp = %temp.display()))]
    pub async fn publish(&self, temp: &Path, name: &str) -> StorageResult<PathBuf> {
        Self::validate_name(name)?;
        if temp.parent() != Some(self.root.as_path()) {
            return Err(StorageError::InvalidName(format!(
                "temp file is outside the upload directory: {}",
                temp.display()
            )));
        }

        for attempt in 0..MAX_COLLISION_ATTEMPTS {
            let candidate = numbered_name(name, attempt);
            if !self.reserved.insert(candidate.clone()) {
                continue;
            }
            let result = self.link_if_free(temp, &candidate).await;
            self.reserved.remove(&candidate);
            match result? {
                Some(path) => {
                    tracing::info!(name = %candidate, "Published upload");
                    return Ok(path);
                }
                None => continue,
            }
        }

        Err(StorageError::AlreadyExists(format!(
            "no free name for {name} after {MAX_COLLISION_ATTEMPTS} attempts"
        )))
    }

    /// Link the temp file at `candidate` and drop the temp name. Linking fails
    /// if anything already sits at `candidate`, so a file created outside this
    /// process between attempts is never replaced.
    async fn link_if_free(&self, temp: &Path, candidate: &str) -> StorageResult<Option<PathBuf>> {
        let path = self.entry_path(candidate).await?;
        match fs::hard_link(temp, &path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        }
        // The upload is already visible. A temp name left behind here is
        // removed by the next startup sweep.
        if let Err(e) = fs::remove_file(temp).await {
            tracing::warn!(temp = %temp.display(), error = %e, "Failed to remove linked temp file");
        }
        Ok(Some(path))
    }

    /// Remove a temp file. Missing files are not an error.
    pub async fn discard(&self, temp: &Path) -> StorageResult<()> {
        match fs::remove_file(temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Visible files, sorted by name. Temp files, directories and symlinks are skipped.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn list(&self) -> StorageResult<Vec<VisibleFile>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            // file_type() does not follow symlinks
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if Self::is_temp_name(&name) {
                continue;
            }
            // Removed between read_dir and stat
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            files.push(VisibleFile {
                name,
                size: meta.len(),
                modified: meta.modified().ok().map(OffsetDateTime::from),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Open a visible file for reading, returning it with its size.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn open(&self, name: &str) -> StorageResult<(fs::File, u64)> {
        Self::validate_name(name)?;
        if Self::is_temp_name(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let path = self.entry_path(name).await?;
        let meta = fs::symlink_metadata(&path).await.map_err(|e| not_found(e, name))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let file = fs::File::open(&path).await.map_err(|e| not_found(e, name))?;
        Ok((file, meta.len()))
    }

    /// Delete temp files left behind by a previous process.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn remove_orphaned_temp_files(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_str().is_some_and(Self::is_temp_name) {
                self.discard(&entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed orphaned temp files");
        }
        Ok(removed)
    }

    /// Verify the root directory exists and is accessible.
    pub async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("upload directory not accessible: {e}"),
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("upload directory is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }

    /// A visible or temp name must be exactly one normal path component.
    fn validate_name(name: &str) -> StorageResult<()> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
            _ => Err(StorageError::InvalidName(format!(
                "not a single file name: {name:?}"
            ))),
        }
    }

    /// Resolve `name` inside the root, off the async runtime.
    async fn entry_path(&self, name: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || Self::entry_path_sync(&root, &name))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Existing entries (including symlinks) must resolve inside the root.
    fn entry_path_sync(root: &Path, name: &str) -> StorageResult<PathBuf> {
        Self::validate_name(name)?;
        let path = root.join(name);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidName(format!(
                            "symlink target missing or invalid: {name}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidName(format!(
                        "resolved path escapes upload directory: {name}"
                    )));
                }
                Ok(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
            Err(e) => Err(StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to stat path: {e}"),
            ))),
        }
    }
}

/// `name` for attempt 0, otherwise `stem (n).ext`.
///
/// The stem is shortened when needed so the result stays within
/// [`MAX_FILENAME_BYTES`]. An extension too long to keep is dropped.
pub fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let suffix = format!(" ({attempt})");
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && suffix.len() + ext.len() + 1 < MAX_FILENAME_BYTES =>
        {
            let room = MAX_FILENAME_BYTES - suffix.len() - ext.len() - 1;
            format!("{}{suffix}.{ext}", truncated(stem, room))
        }
        _ => format!("{}{suffix}", truncated(name, MAX_FILENAME_BYTES - suffix.len())),
    }
}

/// Longest prefix of `s` within `max` bytes, cut at a char boundary.
fn truncated(s: &str, max: usize) -> &str {
    let mut cut = s.len().min(max);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

fn not_found(e: std::io::Error, name: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(e)
    }
}
