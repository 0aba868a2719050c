//! Core data models shared by ingestion, storage, and retrieval.
//!
//! Uploads are identified by file name only; the name's suffix picks a
//! [`FileKind`], and parsing produces one [`ParsedContent`] variant per kind.

use serde::Serialize;
use std::fmt;

/// One row of tabular data: column name → cell value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Upload formats understood by the parser, keyed by file-name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Json,
    Csv,
    Txt,
    Xlsx,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [FileKind::Json, FileKind::Csv, FileKind::Txt, FileKind::Xlsx];

    /// Suffix (including the dot) that selects this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            FileKind::Json => ".json",
            FileKind::Csv => ".csv",
            FileKind::Txt => ".txt",
            FileKind::Xlsx => ".xlsx",
        }
    }

    /// Detects the kind from a file name. Matching is case-sensitive, so
    /// `data.CSV` is not a CSV upload.
    pub fn from_file_name(name: &str) -> Option<FileKind> {
        Self::ALL.into_iter().find(|k| name.ends_with(k.suffix()))
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix()[1..])
    }
}

/// Normalized result of parsing an upload.
///
/// Serialized untagged: records and lines become JSON arrays, a JSON document
/// is emitted as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParsedContent {
    /// Tabular sources (CSV, XLSX).
    Records(Vec<Record>),
    /// A JSON upload, verbatim.
    Document(serde_json::Value),
    /// A plain-text upload, one entry per line.
    Lines(Vec<String>),
}

impl ParsedContent {
    /// Renders the artifact text: JSON indented with four spaces.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        // serde_json only ever writes valid UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn to_value(&self) -> serde_json::Value {
        match self {
            ParsedContent::Records(rows) => serde_json::Value::Array(
                rows.iter()
                    .cloned()
                    .map(serde_json::Value::Object)
                    .collect(),
            ),
            ParsedContent::Document(value) => value.clone(),
            ParsedContent::Lines(lines) => serde_json::Value::Array(
                lines
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        }
    }
}
