//! Retrieval of the most recently saved artifact.
//!
//! Used by both the `upharness latest` CLI command and `GET /api/data`.

use serde_json::Value;
use std::path::PathBuf;

use crate::storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("no data available")]
    NoData,
    #[error("failed to read saved data: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to read saved data: {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The latest artifact and its decoded JSON.
#[derive(Debug, Clone)]
pub struct SavedData {
    pub path: PathBuf,
    pub data: Value,
}

pub async fn latest_saved_data(storage: &Storage) -> Result<SavedData, RetrieveError> {
    let path = storage.latest_artifact().await?.ok_or(RetrieveError::NoData)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
    let data: Value = serde_json::from_slice(&bytes).map_err(|source| RetrieveError::Decode {
        path: path.clone(),
        source,
    })?;

    tracing::debug!(path = %path.display(), "served latest artifact");
    Ok(SavedData { path, data })
}
