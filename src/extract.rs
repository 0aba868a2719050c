//! Format-specific parsing of uploaded bytes into [`ParsedContent`].
//!
//! Dispatch is by [`FileKind`]. JSON is decoded verbatim, text is split into
//! lines, and tabular sources (CSV here, XLSX in [`crate::xlsx`]) become
//! ordered records keyed by a normalized header row.

use serde_json::Value;
use std::collections::HashSet;

use crate::models::{FileKind, ParsedContent, Record};

/// Cell texts read as missing values in CSV input.
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Parsing error. The message carries the underlying cause and ends up in
/// the HTTP error body.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
    #[error("XLSX extraction failed: {0}")]
    Xlsx(String),
}

/// Parses `bytes` according to the kind implied by `file_name`.
pub fn parse_named(file_name: &str, bytes: &[u8]) -> Result<ParsedContent, ExtractError> {
    let kind = FileKind::from_file_name(file_name)
        .ok_or_else(|| ExtractError::UnsupportedFileType(file_name.to_string()))?;
    parse_content(kind, bytes)
}

pub fn parse_content(kind: FileKind, bytes: &[u8]) -> Result<ParsedContent, ExtractError> {
    match kind {
        FileKind::Json => parse_json(bytes),
        FileKind::Csv => parse_csv(bytes),
        FileKind::Txt => parse_txt(bytes),
        FileKind::Xlsx => crate::xlsx::read_first_sheet(bytes).map(ParsedContent::Records),
    }
}

fn parse_json(bytes: &[u8]) -> Result<ParsedContent, ExtractError> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(ParsedContent::Document(value))
}

fn parse_txt(bytes: &[u8]) -> Result<ParsedContent, ExtractError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(ParsedContent::Lines(split_lines(text)))
}

fn is_line_boundary(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Splits text on universal line boundaries. `\r\n` counts as one boundary
/// and a final terminator does not produce a trailing empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_line_boundary(c) {
            continue;
        }
        lines.push(text[start..i].to_string());
        start = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                chars.next();
                start = j + 1;
            }
        }
    }
    if start < text.len() {
        lines.push(text[start..].to_string());
    }
    lines
}

/// Turns raw header cells into unique column names. Blank cells become
/// `Unnamed: <index>`; repeats get `.1`, `.2`, ... suffixes.
pub(crate) fn header_names<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut used: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    for (i, cell) in raw.into_iter().enumerate() {
        let base = match cell {
            Some(name) if !name.is_empty() => name,
            _ => format!("Unnamed: {}", i),
        };
        let mut candidate = base.clone();
        let mut n = 0;
        while used.contains(&candidate) {
            n += 1;
            candidate = format!("{}.{}", base, n);
        }
        used.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnType {
    /// Picks the narrowest type every present cell of a column fits.
    fn infer<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> ColumnType {
        let mut present = Vec::new();
        let mut has_missing = false;
        for cell in cells {
            match cell {
                Some(s) => present.push(s.trim()),
                None => has_missing = true,
            }
        }
        if present.is_empty() {
            return ColumnType::Text;
        }
        if present.iter().all(|s| s.parse::<i64>().is_ok()) {
            return if has_missing {
                ColumnType::Float
            } else {
                ColumnType::Int
            };
        }
        if present.iter().all(|s| parse_finite(s).is_some()) {
            return ColumnType::Float;
        }
        if present.iter().all(|s| parse_bool(s).is_some()) {
            return ColumnType::Bool;
        }
        ColumnType::Text
    }

    fn convert(self, cell: Option<&str>) -> Value {
        let Some(raw) = cell else {
            return Value::Null;
        };
        let trimmed = raw.trim();
        let converted = match self {
            ColumnType::Int => trimmed.parse::<i64>().ok().map(Value::from),
            ColumnType::Float => parse_finite(trimmed)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ColumnType::Bool => parse_bool(trimmed).map(Value::Bool),
            ColumnType::Text => None,
        };
        converted.unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn csv_error(e: csv::Error) -> ExtractError {
    ExtractError::Csv(e.to_string())
}

fn parse_csv(bytes: &[u8]) -> Result<ParsedContent, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers().map_err(csv_error)?.clone();
    if headers.is_empty() {
        return Err(ExtractError::Csv("no columns to parse from file".to_string()));
    }
    let columns = header_names(headers.iter().map(|h| Some(h.to_string())));
    let width = columns.len();

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(ExtractError::Csv(format!(
                "expected {} fields in line {}, saw {}",
                width,
                line,
                record.len()
            )));
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|cell| (!MISSING_TOKENS.contains(&cell)).then(|| cell.to_string()))
            .collect();
        row.resize(width, None);
        rows.push(row);
    }

    let types: Vec<ColumnType> = (0..width)
        .map(|col| ColumnType::infer(rows.iter().map(|row| row[col].as_deref())))
        .collect();

    let records = rows
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .zip(&types)
                .zip(row)
                .map(|((name, ty), cell)| (name.clone(), ty.convert(cell.as_deref())))
                .collect::<Record>()
        })
        .collect();

    Ok(ParsedContent::Records(records))
}
