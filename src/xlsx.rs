//! XLSX reading: first worksheet of a workbook as header-keyed records.
//!
//! The workbook is opened as a ZIP archive and its OOXML parts are streamed
//! with `quick-xml`. Only the parts needed for cell values are read: the
//! workbook (sheet order), its relationships (sheet part paths), the shared
//! string table, and the first worksheet.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;
use std::io::{Cursor, Read};

use crate::extract::{header_names, ExtractError};
use crate::models::Record;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells to read from the sheet, and to expand into records.
const MAX_CELLS: usize = 1_000_000;
/// Worksheet grid limits (`XFD1048576`).
const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn xlsx_error(e: impl ToString) -> ExtractError {
    ExtractError::Xlsx(e.to_string())
}

/// Reads the first worksheet. The first non-empty row is the header; every
/// following row becomes one record.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Record>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(xlsx_error)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet = first_sheet_path(&mut archive)?;
    let xml = read_entry(&mut archive, &sheet)?
        .ok_or_else(|| xlsx_error(format!("worksheet {} not found", sheet)))?;
    let rows = read_sheet_rows(&xml, &shared_strings)?;
    rows_to_records(rows)
}

/// Reads a ZIP entry with a size cap. `Ok(None)` when the entry is absent.
fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(xlsx_error(e)),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(xlsx_error)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(xlsx_error(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(Some(out))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Shared string table. Rich-text runs of one entry are concatenated and
/// phonetic hints are dropped. Workbooks without any text cells have no
/// table at all.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let Some(xml) = read_entry(archive, "xl/sharedStrings.xml")? else {
        return Ok(Vec::new());
    };
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(xlsx_error)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Resolves the part path of the first sheet in workbook order, falling back
/// to the lowest-numbered `xl/worksheets/sheetN.xml`.
fn first_sheet_path(archive: &mut Archive<'_>) -> Result<String, ExtractError> {
    if let Some(path) = first_sheet_from_workbook(archive)? {
        if archive.file_names().any(|n| n == path) {
            return Ok(path);
        }
    }
    list_worksheet_names(archive)
        .into_iter()
        .next()
        .ok_or_else(|| xlsx_error("workbook contains no worksheets"))
}

fn first_sheet_from_workbook(archive: &mut Archive<'_>) -> Result<Option<String>, ExtractError> {
    let Some(workbook) = read_entry(archive, "xl/workbook.xml")? else {
        return Ok(None);
    };
    let Some(rel_id) = first_element_attr(&workbook, b"sheet", b"id", None)? else {
        return Ok(None);
    };
    let Some(rels) = read_entry(archive, "xl/_rels/workbook.xml.rels")? else {
        return Ok(None);
    };
    let target = first_element_attr(
        &rels,
        b"Relationship",
        b"Target",
        Some((b"Id".as_slice(), rel_id.as_str())),
    )?;
    Ok(target.map(|t| match t.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", t),
    }))
}

/// Value of attribute `key` on the first `element` (optionally also
/// matching `filter = (attr, value)`).
fn first_element_attr(
    xml: &[u8],
    element: &[u8],
    key: &[u8],
    filter: Option<(&[u8], &str)>,
) -> Result<Option<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == element => {
                let matches = match filter {
                    Some((k, v)) => attr(&e, k).as_deref() == Some(v),
                    None => true,
                };
                if matches {
                    if let Some(value) = attr(&e, key) {
                        return Ok(Some(value));
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Zero-based column index of a cell reference such as `AB12`. `Ok(None)`
/// when the reference has no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractError> {
    let mut n = 0usize;
    let mut seen = false;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        n = n * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        if n > MAX_COLUMNS {
            return Err(xlsx_error(format!("cell reference {} is out of range", reference)));
        }
        seen = true;
    }
    Ok(seen.then(|| n - 1))
}

/// Zero-based row index from a row's `r` attribute. `Ok(None)` when the
/// attribute is not a row number.
fn row_index(r: &str) -> Result<Option<usize>, ExtractError> {
    if r.is_empty() || !r.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match r.parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(n) if n <= MAX_ROWS => Ok(Some(n - 1)),
        _ => Err(xlsx_error(format!("row {} is out of range", r))),
    }
}

fn ref_attr<T>(
    e: &BytesStart<'_>,
    parse: fn(&str) -> Result<Option<T>, ExtractError>,
) -> Result<Option<T>, ExtractError> {
    Ok(attr(e, b"r").as_deref().map(parse).transpose()?.flatten())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    Number,
    SharedString,
    Text,
    Bool,
}

impl CellType {
    fn from_attr(t: Option<&str>) -> CellType {
        match t {
            Some("s") => CellType::SharedString,
            Some("inlineStr") | Some("str") | Some("e") | Some("d") => CellType::Text,
            Some("b") => CellType::Bool,
            _ => CellType::Number,
        }
    }

    fn value(self, text: &str, shared_strings: &[String]) -> Result<Value, ExtractError> {
        Ok(match self {
            CellType::SharedString => {
                let idx: usize = text
                    .trim()
                    .parse()
                    .map_err(|_| xlsx_error(format!("invalid shared string index '{}'", text)))?;
                let s = shared_strings
                    .get(idx)
                    .ok_or_else(|| xlsx_error(format!("shared string index {} out of range", idx)))?;
                Value::String(s.clone())
            }
            CellType::Text => Value::String(text.to_string()),
            CellType::Bool => Value::Bool(text.trim() == "1"),
            CellType::Number => number_value(text.trim()),
        })
    }
}

fn number_value(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

type Grid = Vec<Vec<Option<Value>>>;

fn place(rows: &mut Grid, row: usize, col: usize, value: Value) -> Result<(), ExtractError> {
    if row >= MAX_ROWS || col >= MAX_COLUMNS {
        return Err(xlsx_error(format!(
            "cell at row {}, column {} is outside the sheet",
            row + 1,
            col + 1
        )));
    }
    if rows.len() <= row {
        rows.resize_with(row + 1, Vec::new);
    }
    let cells = &mut rows[row];
    if cells.len() <= col {
        cells.resize(col + 1, None);
    }
    cells[col] = Some(value);
    Ok(())
}

/// Reads cell values into a row-major grid positioned by cell references.
fn read_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Grid, ExtractError> {
    let mut rows: Grid = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row = 0usize;
    let mut next_row = 0usize;
    let mut next_col = 0usize;
    let mut col = 0usize;
    let mut cell_type = CellType::Number;
    let mut text = String::new();
    let mut has_value = false;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row = ref_attr(&e, row_index)?.unwrap_or(next_row);
                    next_row = row + 1;
                    next_col = 0;
                }
                b"c" => {
                    col = ref_attr(&e, column_index)?.unwrap_or(next_col);
                    next_col = col + 1;
                    cell_type = CellType::from_attr(attr(&e, b"t").as_deref());
                    text.clear();
                    has_value = false;
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    row = ref_attr(&e, row_index)?.unwrap_or(next_row);
                    next_row = row + 1;
                }
                b"c" => {
                    next_col = ref_attr(&e, column_index)?.unwrap_or(next_col) + 1;
                }
                _ => {}
            },
            Event::Text(te) if in_value => {
                text.push_str(&te.unescape().map_err(xlsx_error)?);
                has_value = true;
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" if has_value => {
                    cell_count += 1;
                    if cell_count > MAX_CELLS {
                        return Err(xlsx_error(format!(
                            "sheet exceeds {} cells",
                            MAX_CELLS
                        )));
                    }
                    let value = cell_type.value(&text, shared_strings)?;
                    place(&mut rows, row, col, value)?;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn header_text(cell: &Option<Value>) -> Option<String> {
    match cell {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn is_blank(row: &[Option<Value>]) -> bool {
    row.iter().all(|c| c.is_none())
}

fn rows_to_records(mut rows: Grid) -> Result<Vec<Record>, ExtractError> {
    while rows.last().is_some_and(|r| is_blank(r)) {
        rows.pop();
    }
    let Some(header_at) = rows.iter().position(|r| !is_blank(r)) else {
        return Ok(Vec::new());
    };
    let width = rows[header_at..].iter().map(Vec::len).max().unwrap_or(0);
    let grid = (rows.len() - header_at).saturating_mul(width);
    if grid > MAX_CELLS {
        return Err(xlsx_error(format!(
            "sheet spans {} rows by {} columns, over the {} cell limit",
            rows.len() - header_at,
            width,
            MAX_CELLS
        )));
    }

    let header = &rows[header_at];
    let columns = header_names((0..width).map(|i| header.get(i).and_then(header_text)));

    Ok(rows[header_at + 1..]
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = row.get(i).cloned().flatten().unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect::<Record>()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const WORKBOOK_TWO_SHEETS: &str = r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId2"/><sheet name="Other" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
    const RELS_TWO_SHEETS: &str = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="worksheet" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;

    fn sheet(rows: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
            rows
        )
    }

    fn build_xlsx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in parts {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn reads_typed_cells_under_header() {
        let shared = r#"<sst><si><t>name</t></si><si><t>qty</t></si><si><r><t>wid</t></r><r><t>get</t></r></si></sst>"#;
        let data = sheet(
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>ok</t></is></c></row>
               <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>3</v></c><c r="C2" t="b"><v>1</v></c></row>
               <row r="3"><c r="A3" t="str"><f>A2</f><v>widget</v></c><c r="B3"><v>2.5</v></c></row>"#,
        );
        let bytes = build_xlsx(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", &data),
        ]);
        let records = read_first_sheet(&bytes).unwrap();
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([
                {"name": "widget", "qty": 3, "ok": true},
                {"name": "widget", "qty": 2.5, "ok": null}
            ])
        );
    }

    #[test]
    fn first_sheet_follows_workbook_order() {
        let first = sheet(r#"<row r="1"><c r="A1" t="inlineStr"><is><t>h</t></is></c></row><row r="2"><c r="A2"><v>2</v></c></row>"#);
        let other = sheet(r#"<row r="1"><c r="A1" t="inlineStr"><is><t>h</t></is></c></row><row r="2"><c r="A2"><v>1</v></c></row>"#);
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", WORKBOOK_TWO_SHEETS),
            ("xl/_rels/workbook.xml.rels", RELS_TWO_SHEETS),
            ("xl/worksheets/sheet1.xml", &other),
            ("xl/worksheets/sheet2.xml", &first),
        ]);
        let records = read_first_sheet(&bytes).unwrap();
        assert_eq!(serde_json::to_value(&records).unwrap(), json!([{"h": 2}]));
    }

    #[test]
    fn gaps_become_null_and_blank_header_is_unnamed() {
        let data = sheet(
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>a</t></is></c><c r="C1" t="inlineStr"><is><t>c</t></is></c></row>
               <row r="3"><c r="C3"><v>7</v></c></row>"#,
        );
        let bytes = build_xlsx(&[("xl/worksheets/sheet1.xml", &data)]);
        let records = read_first_sheet(&bytes).unwrap();
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([
                {"a": null, "Unnamed: 1": null, "c": null},
                {"a": null, "Unnamed: 1": null, "c": 7}
            ])
        );
    }

    #[test]
    fn empty_sheet_has_no_records() {
        let bytes = build_xlsx(&[("xl/worksheets/sheet1.xml", &sheet(""))]);
        assert!(read_first_sheet(&bytes).unwrap().is_empty());
    }

    #[test]
    fn workbook_without_sheets_is_an_error() {
        let bytes = build_xlsx(&[("docProps/app.xml", "<Properties/>")]);
        let err = read_first_sheet(&bytes).unwrap_err();
        assert!(err.to_string().contains("no worksheets"));
    }

    #[test]
    fn out_of_range_shared_string_is_an_error() {
        let data = sheet(r#"<row r="1"><c r="A1" t="s"><v>5</v></c></row>"#);
        let bytes = build_xlsx(&[("xl/worksheets/sheet1.xml", &data)]);
        assert!(matches!(
            read_first_sheet(&bytes).unwrap_err(),
            ExtractError::Xlsx(_)
        ));
    }

    #[test]
    fn cell_references() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("Z9").unwrap(), Some(25));
        assert_eq!(column_index("AA10").unwrap(), Some(26));
        assert_eq!(column_index("XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index("12").unwrap(), None);
        assert!(column_index("XFE1").is_err());
        assert!(column_index("AAAAAAAAAAAAAAAA1").is_err());
        assert_eq!(row_index("1").unwrap(), Some(0));
        assert_eq!(row_index("1048576").unwrap(), Some(1_048_575));
        assert_eq!(row_index("0").unwrap(), None);
        assert_eq!(row_index("x").unwrap(), None);
        assert!(row_index("1048577").is_err());
        assert!(row_index("99999999999999999999999").is_err());
    }

    #[test]
    fn overlong_column_reference_is_an_error() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="AAAAAAAAAAAAAAAA1"><v>1</v></c></row></sheetData></worksheet>"#;
        let err = read_sheet_rows(xml, &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Xlsx(msg) if msg.contains("out of range")));
    }

    #[test]
    fn row_past_sheet_end_is_an_error() {
        let xml = br#"<worksheet><sheetData><row r="4000000000"><c><v>1</v></c></row></sheetData></worksheet>"#;
        let err = read_sheet_rows(xml, &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Xlsx(msg) if msg.contains("out of range")));
    }

    #[test]
    fn implicit_columns_stop_at_sheet_edge() {
        let cells = "<c><v>1</v></c>".repeat(MAX_COLUMNS + 1);
        let xml = format!("<worksheet><sheetData><row>{}</row></sheetData></worksheet>", cells);
        let err = read_sheet_rows(xml.as_bytes(), &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Xlsx(msg) if msg.contains("outside the sheet")));
    }

    #[test]
    fn sparse_sheet_over_cell_limit_is_an_error() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c><c r="XFD1"><v>2</v></c></row><row r="1048576"><c r="A1048576"><v>3</v></c></row></sheetData></worksheet>"#;
        let rows = read_sheet_rows(xml, &[]).unwrap();
        let err = rows_to_records(rows).unwrap_err();
        assert!(matches!(err, ExtractError::Xlsx(msg) if msg.contains("cell limit")));
    }

    #[test]
    fn sparse_sheet_within_limit_is_read() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>n</t></is></c></row><row r="5000"><c r="A5000"><v>7</v></c></row></sheetData></worksheet>"#;
        let rows = read_sheet_rows(xml, &[]).unwrap();
        let records = rows_to_records(rows).unwrap();
        assert_eq!(records.len(), 4999);
        assert_eq!(records[4998]["n"], json!(7));
        assert_eq!(records[0]["n"], Value::Null);
    }
}
