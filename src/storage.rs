//! Filesystem layout for raw uploads and saved artifacts.
//!
//! Two flat directories: `upload_dir` keeps the bytes exactly as received,
//! `saved_dir` keeps the indented JSON of each parse result under the same
//! file name. A marker file in `saved_dir` records which artifact was written
//! last, so retrieval never depends on directory listing order.
//!
//! Writes go straight to their final path and are not coordinated across
//! concurrent requests.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::{ConflictPolicy, StorageConfig};
use crate::models::ParsedContent;

/// Name of the marker file holding the most recently written artifact name.
pub const LATEST_MARKER: &str = ".latest";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file already exists: {0}")]
    Conflict(String),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize content: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A bare file name: no path separators, not a dot entry, and not the
/// latest marker.
pub fn is_plain_name(name: &str) -> bool {
    !matches!(name, "" | "." | ".." | LATEST_MARKER)
        && !name.contains(|c: char| c == '/' || c == '\\')
}

#[derive(Debug, Clone)]
pub struct Storage {
    upload_dir: PathBuf,
    saved_dir: PathBuf,
    on_conflict: ConflictPolicy,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            saved_dir: config.saved_dir.clone(),
            on_conflict: config.on_conflict,
        }
    }

    /// Creates both directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [&self.upload_dir, &self.saved_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }
        Ok(())
    }

    async fn is_taken(&self, name: &str) -> Result<bool, StorageError> {
        for dir in [&self.upload_dir, &self.saved_dir] {
            let path = dir.join(name);
            if tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Applies the conflict policy to `file_name` and returns the name used
    /// for both the raw upload and the artifact.
    pub async fn resolve_name(&self, file_name: &str) -> Result<String, StorageError> {
        match self.on_conflict {
            ConflictPolicy::Overwrite => Ok(file_name.to_string()),
            ConflictPolicy::Reject => {
                if self.is_taken(file_name).await? {
                    Err(StorageError::Conflict(file_name.to_string()))
                } else {
                    Ok(file_name.to_string())
                }
            }
            ConflictPolicy::Version => {
                if !self.is_taken(file_name).await? {
                    return Ok(file_name.to_string());
                }
                let (stem, ext) = match file_name.rsplit_once('.') {
                    Some((stem, ext)) => (stem, format!(".{}", ext)),
                    None => (file_name, String::new()),
                };
                let mut n = 1u32;
                loop {
                    let candidate = format!("{}-{}{}", stem, n, ext);
                    if !self.is_taken(&candidate).await? {
                        return Ok(candidate);
                    }
                    n += 1;
                }
            }
        }
    }

    /// Writes the raw upload, replacing any file of the same name.
    pub async fn save_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(io_error(&self.upload_dir))?;
        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, bytes).await.map_err(io_error(&path))?;
        Ok(path)
    }

    /// Writes the artifact for `name` and marks it as the latest one.
    pub async fn write_artifact(
        &self,
        name: &str,
        content: &ParsedContent,
    ) -> Result<PathBuf, StorageError> {
        let text = content.to_pretty_json()?;
        tokio::fs::create_dir_all(&self.saved_dir)
            .await
            .map_err(io_error(&self.saved_dir))?;
        let path = self.saved_dir.join(name);
        tokio::fs::write(&path, text).await.map_err(io_error(&path))?;

        let marker = self.saved_dir.join(LATEST_MARKER);
        tokio::fs::write(&marker, name)
            .await
            .map_err(io_error(&marker))?;
        Ok(path)
    }

    /// Path of the most recently written artifact, if any.
    ///
    /// Uses the marker when it names an existing artifact; otherwise the
    /// newest file by modification time, ties going to the greater name.
    pub async fn latest_artifact(&self) -> Result<Option<PathBuf>, StorageError> {
        let marker = self.saved_dir.join(LATEST_MARKER);
        match tokio::fs::read_to_string(&marker).await {
            Ok(name) => {
                let name = name.trim();
                if is_plain_name(name) {
                    let path = self.saved_dir.join(name);
                    if tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
                        return Ok(Some(path));
                    }
                }
                tracing::warn!(marker = %marker.display(), "stale latest marker, scanning directory");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&marker)(e)),
        }
        self.newest_by_mtime().await
    }

    async fn newest_by_mtime(&self) -> Result<Option<PathBuf>, StorageError> {
        let dir = &self.saved_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(dir)(e)),
        };

        let mut newest: Option<(SystemTime, String)> = None;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_plain_name(&name) {
                continue;
            }
            let path = entry.path();
            let meta = entry.metadata().await.map_err(io_error(&path))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(io_error(&path))?;
            let candidate = (modified, name);
            if newest.as_ref().map_or(true, |best| candidate > *best) {
                newest = Some(candidate);
            }
        }
        Ok(newest.map(|(_, name)| dir.join(name)))
    }
}
