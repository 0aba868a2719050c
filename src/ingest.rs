//! Upload ingestion.
//!
//! Validates the uploaded file name, stores the raw bytes, parses them by
//! file kind, and persists the parsed content as a JSON artifact. The two
//! writes are not transactional: a parse failure leaves the raw upload on
//! disk. Rejected uploads (missing name, bad name, unsupported type) write
//! nothing.

use std::path::PathBuf;

use crate::extract::{parse_content, ExtractError};
use crate::models::{FileKind, ParsedContent};
use crate::storage::{is_plain_name, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no file provided")]
    MissingFile,
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("unsupported file type")]
    UnsupportedType(String),
    #[error("file already exists: {0}")]
    Conflict(String),
    #[error("failed to save file: {0}")]
    Save(StorageError),
    #[error("failed to read file content: {0}")]
    Parse(ExtractError),
    #[error("failed to save parsed data: {0}")]
    WriteBack(StorageError),
}

impl IngestError {
    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::MissingFile
                | IngestError::InvalidName(_)
                | IngestError::UnsupportedType(_)
                | IngestError::Conflict(_)
        )
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Name the upload was stored under (differs from the request only under
    /// the `version` conflict policy).
    pub file_name: String,
    pub kind: FileKind,
    pub original_file_path: PathBuf,
    pub saved_file_path: PathBuf,
    pub content: ParsedContent,
}

pub async fn ingest_upload(
    storage: &Storage,
    file_name: Option<&str>,
    bytes: &[u8],
) -> Result<IngestOutcome, IngestError> {
    let file_name = file_name
        .filter(|name| !name.is_empty())
        .ok_or(IngestError::MissingFile)?;

    if !is_plain_name(file_name) {
        return Err(IngestError::InvalidName(file_name.to_string()));
    }
    let kind = FileKind::from_file_name(file_name)
        .ok_or_else(|| IngestError::UnsupportedType(file_name.to_string()))?;

    tracing::info!(file = file_name, bytes = bytes.len(), %kind, "received upload");

    let stored_name = storage.resolve_name(file_name).await.map_err(|e| match e {
        StorageError::Conflict(name) => IngestError::Conflict(name),
        other => IngestError::Save(other),
    })?;
    if stored_name != file_name {
        tracing::info!(file = file_name, stored_as = %stored_name, "name taken, storing new version");
    }

    let original_file_path = storage
        .save_upload(&stored_name, bytes)
        .await
        .map_err(IngestError::Save)?;
    tracing::debug!(path = %original_file_path.display(), "raw upload saved");

    let content = parse_content(kind, bytes).map_err(IngestError::Parse)?;

    let saved_file_path = storage
        .write_artifact(&stored_name, &content)
        .await
        .map_err(IngestError::WriteBack)?;
    tracing::info!(path = %saved_file_path.display(), "parsed data saved");

    Ok(IngestOutcome {
        file_name: stored_name,
        kind,
        original_file_path,
        saved_file_path,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictPolicy, StorageConfig};
    use serde_json::json;
    use tempfile::TempDir;

    fn storage(tmp: &TempDir, on_conflict: ConflictPolicy) -> Storage {
        Storage::new(&StorageConfig {
            upload_dir: tmp.path().join("uploads"),
            saved_dir: tmp.path().join("saved_data"),
            on_conflict,
        })
    }

    fn saved_entries(tmp: &TempDir) -> usize {
        match std::fs::read_dir(tmp.path().join("saved_data")) {
            Ok(dir) => dir.count(),
            Err(_) => 0,
        }
    }

    #[tokio::test]
    async fn ingests_csv_into_records() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let outcome = ingest_upload(&store, Some("t.csv"), b"a,b\n1,2\n")
            .await
            .unwrap();
        assert_eq!(outcome.kind, FileKind::Csv);
        assert_eq!(outcome.content.to_value(), json!([{"a": 1, "b": 2}]));
        assert_eq!(outcome.original_file_path, tmp.path().join("uploads/t.csv"));
        assert_eq!(
            std::fs::read(&outcome.original_file_path).unwrap(),
            b"a,b\n1,2\n"
        );
        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.saved_file_path).unwrap()).unwrap();
        assert_eq!(saved, json!([{"a": 1, "b": 2}]));
    }

    #[tokio::test]
    async fn missing_or_empty_name_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let err = ingest_upload(&store, None, b"x").await.unwrap_err();
        assert!(matches!(err, IngestError::MissingFile));
        let err = ingest_upload(&store, Some(""), b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "no file provided");
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn unsupported_type_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let err = ingest_upload(&store, Some("paper.pdf"), b"%PDF")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported file type");
        assert!(!tmp.path().join("uploads").exists());
        assert_eq!(saved_entries(&tmp), 0);
    }

    #[tokio::test]
    async fn path_like_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let err = ingest_upload(&store, Some("../escape.json"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidName(_)));
        assert!(!tmp.path().join("escape.json").exists());
    }

    #[tokio::test]
    async fn dot_prefixed_names_are_stored() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let body = b"{\"id\": 123456789012345678901234567890}";
        let outcome = ingest_upload(&store, Some(".env.json"), body).await.unwrap();
        assert_eq!(outcome.saved_file_path, tmp.path().join("saved_data/.env.json"));
        assert_eq!(
            store.latest_artifact().await.unwrap(),
            Some(outcome.saved_file_path.clone())
        );
        let saved = std::fs::read_to_string(&outcome.saved_file_path).unwrap();
        assert!(saved.contains("123456789012345678901234567890"));

        let err = ingest_upload(&store, Some(".latest"), b"x").await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidName(_)));
    }

    #[tokio::test]
    async fn parse_failure_keeps_raw_upload() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        let err = ingest_upload(&store, Some("bad.json"), b"{oops")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert!(!err.is_client_error());
        assert!(err.to_string().starts_with("failed to read file content: "));
        assert!(tmp.path().join("uploads/bad.json").exists());
        assert_eq!(saved_entries(&tmp), 0);
    }

    #[tokio::test]
    async fn reupload_overwrites_both_files() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Overwrite);

        ingest_upload(&store, Some("n.txt"), b"old\nlines\n").await.unwrap();
        let outcome = ingest_upload(&store, Some("n.txt"), b"new\n").await.unwrap();

        assert_eq!(outcome.file_name, "n.txt");
        assert_eq!(std::fs::read(&outcome.original_file_path).unwrap(), b"new\n");
        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.saved_file_path).unwrap()).unwrap();
        assert_eq!(saved, json!(["new"]));
    }

    #[tokio::test]
    async fn reject_policy_reports_conflict() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Reject);

        ingest_upload(&store, Some("a.json"), b"1").await.unwrap();
        let err = ingest_upload(&store, Some("a.json"), b"2").await.unwrap_err();
        assert!(matches!(err, IngestError::Conflict(_)));

        let saved = std::fs::read_to_string(tmp.path().join("saved_data/a.json")).unwrap();
        assert_eq!(saved, "1");
    }

    #[tokio::test]
    async fn version_policy_stores_alongside() {
        let tmp = TempDir::new().unwrap();
        let store = storage(&tmp, ConflictPolicy::Version);

        ingest_upload(&store, Some("a.json"), b"1").await.unwrap();
        let outcome = ingest_upload(&store, Some("a.json"), b"2").await.unwrap();
        assert_eq!(outcome.file_name, "a-1.json");
        assert_eq!(outcome.saved_file_path, tmp.path().join("saved_data/a-1.json"));
    }
}
