//! Dataset handles, snapshot naming and the record codec.
//!
//! Records are stored as JSON Lines. Downloads may also arrive as a JSON
//! array of objects or as CSV with a header row.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::types::Record;

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A bucket/container plus an object key inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetLocation {
    pub bucket: String,
    pub key: String,
}

impl DatasetLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Render as `<scheme>://<bucket>/<key>`.
    pub fn uri(&self, scheme: &str) -> String {
        format!("{scheme}://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

const SNAPSHOT_STAMP: &str = "%Y%m%d_%H%M%S";

/// Key of a timestamped snapshot: `data.jsonl` under `raw/` at 12:00:00 on
/// 2026-10-19 becomes `raw/data_20261019_120000.jsonl`.
pub fn snapshot_key(prefix: &str, file_name: &str, at: DateTime<Utc>) -> String {
    let (stem, ext) = split_file_name(file_name);
    format!("{prefix}{stem}_{}{ext}", at.format(SNAPSHOT_STAMP))
}

/// Newest snapshot key among `keys` for `prefix` and `file_name`.
///
/// Keys that do not carry a well-formed timestamp are ignored.
pub fn latest_snapshot<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    prefix: &str,
    file_name: &str,
) -> Option<&'a str> {
    let (stem, ext) = split_file_name(file_name);
    keys.into_iter()
        .filter_map(|key| {
            let stamp = key
                .strip_prefix(prefix)?
                .strip_prefix(stem)?
                .strip_prefix('_')?
                .strip_suffix(ext)?;
            let at = NaiveDateTime::parse_from_str(stamp, SNAPSHOT_STAMP).ok()?;
            Some((at, key))
        })
        .max_by_key(|(at, _)| *at)
        .map(|(_, key)| key)
}

fn split_file_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name.split_at(dot),
        _ => (file_name, ""),
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Column layout of a dataset.
///
/// For raw data `field_mappings` is empty and `fields` lists columns in
/// order of first appearance. For processed data `fields` is the projected
/// column list and `field_mappings` the source-to-canonical mapping used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub fields: Vec<String>,
    pub field_mappings: BTreeMap<String, String>,
}

impl SchemaDescriptor {
    /// Infer a raw schema from the records themselves.
    pub fn infer(records: &[Record]) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !fields.iter().any(|f| f == key) {
                    fields.push(key.clone());
                }
            }
        }
        Self {
            fields,
            field_mappings: BTreeMap::new(),
        }
    }
}

/// Raw or processed data at a storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetHandle {
    pub location: DatasetLocation,
    pub schema: SchemaDescriptor,
    pub records: Vec<Record>,
}

impl DatasetHandle {
    /// Build a raw handle, inferring the schema from `records`.
    pub fn raw(location: DatasetLocation, records: Vec<Record>) -> Self {
        Self {
            schema: SchemaDescriptor::infer(&records),
            location,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DatasetFormatError {
    #[error("Line {line}: invalid JSON: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: expected a JSON object")]
    NotAnObject { line: usize },

    #[error("Line {line}: invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { line: usize, offset: usize },

    #[error("Line {line}: invalid CSV: {source}")]
    InvalidCsv {
        line: usize,
        #[source]
        source: csv::Error,
    },
}

/// Serialize records as JSON Lines (one object per line).
pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        // A Map of Values always serializes.
        if let Ok(line) = serde_json::to_vec(record) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    out
}

/// Parse JSON Lines, a single JSON array of objects, or CSV with a header
/// row.
///
/// The format is picked from the first non-blank character: `[` for an
/// array, `{` for JSON Lines, anything else for CSV. Blank lines are
/// ignored. Bytes must be valid UTF-8.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, DatasetFormatError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        let offset = e.valid_up_to();
        DatasetFormatError::InvalidUtf8 {
            line: bytes[..offset].iter().filter(|b| **b == b'\n').count() + 1,
            offset,
        }
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let trimmed = text.trim_start();

    match trimmed.chars().next() {
        None => Ok(Vec::new()),
        Some('[') => decode_array(trimmed),
        Some('{') => decode_json_lines(text),
        Some(_) => decode_csv(text),
    }
}

fn decode_array(text: &str) -> Result<Vec<Record>, DatasetFormatError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|source| DatasetFormatError::InvalidJson { line: 1, source })?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(obj) => Ok(obj),
                _ => Err(DatasetFormatError::NotAnObject { line: i + 1 }),
            })
            .collect(),
        _ => Err(DatasetFormatError::NotAnObject { line: 1 }),
    }
}

fn decode_json_lines(text: &str) -> Result<Vec<Record>, DatasetFormatError> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => records.push(obj),
            Ok(_) => return Err(DatasetFormatError::NotAnObject { line: line_no }),
            Err(source) => {
                return Err(DatasetFormatError::InvalidJson {
                    line: line_no,
                    source,
                })
            }
        }
    }
    Ok(records)
}

fn decode_csv(text: &str) -> Result<Vec<Record>, DatasetFormatError> {
    let csv_error = |source: csv::Error, fallback: usize| {
        let line = source
            .position()
            .and_then(|p| usize::try_from(p.line()).ok())
            .unwrap_or(fallback);
        DatasetFormatError::InvalidCsv { line, source }
    };

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| csv_error(e, 1))?.clone();

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| csv_error(e, idx + 2))?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.to_string(), csv_value(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Type a CSV cell: integers and finite floats become numbers, `true` and
/// `false` booleans, the usual missing-value markers `null`.
fn csv_value(cell: &str) -> Value {
    let cell = cell.trim();
    if matches!(cell, "" | "NA" | "N/A" | "NaN" | "nan" | "null" | "NULL") {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn decode_json_lines_skips_blank_lines() {
        let bytes = b"{\"a\":1}\n\n{\"a\":2}\n";
        let records = decode_records(bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);
    }

    #[test]
    fn decode_json_array() {
        let records = decode_records(b"[{\"a\":1},{\"b\":2}]").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decode_rejects_non_object_line() {
        assert_matches!(
            decode_records(b"{\"a\":1}\n[1,2]\n"),
            Err(DatasetFormatError::NotAnObject { line: 2 })
        );
    }

    #[test]
    fn decode_reports_line_of_bad_json() {
        assert_matches!(
            decode_records(b"{\"a\":1}\n{oops\n"),
            Err(DatasetFormatError::InvalidJson { line: 2, .. })
        );
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_matches!(
            decode_records(b"{\"id\":1}\n{\"name\":\"caf\xff\"}\n"),
            Err(DatasetFormatError::InvalidUtf8 { line: 2, offset: 21 })
        );
    }

    #[test]
    fn decode_empty_input_is_empty() {
        assert!(decode_records(b"").unwrap().is_empty());
        assert!(decode_records(b"\n  \n").unwrap().is_empty());
    }

    #[test]
    fn decode_csv_types_cells() {
        let bytes = b"\xef\xbb\xbfid,price,label,active,note\n1,2.5,up,true,\n2,NaN,down,False,late\n";
        let records = decode_records(bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            Value::Object(records[0].clone()),
            json!({ "id": 1, "price": 2.5, "label": "up", "active": true, "note": null })
        );
        assert_eq!(records[1]["price"], Value::Null);
        assert_eq!(records[1]["active"], false);
        assert_eq!(records[1]["note"], "late");
        let columns: Vec<&String> = records[0].keys().collect();
        assert_eq!(columns, ["id", "price", "label", "active", "note"]);
    }

    #[test]
    fn decode_csv_reports_ragged_row() {
        assert_matches!(
            decode_records(b"a,b\n1,2\n3\n"),
            Err(DatasetFormatError::InvalidCsv { line: 3, .. })
        );
    }

    #[test]
    fn snapshot_keys_carry_a_sortable_timestamp() {
        let at = "2026-10-19T12:00:05Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            snapshot_key("raw/", "data.jsonl", at),
            "raw/data_20261019_120005.jsonl"
        );
        assert_eq!(snapshot_key("raw/", "data", at), "raw/data_20261019_120005");
    }

    #[test]
    fn latest_snapshot_picks_newest_well_formed_key() {
        let keys = [
            "raw/data_20261018_235959.jsonl",
            "raw/data_20261019_080000.jsonl",
            "raw/data.jsonl",
            "raw/data_latest.jsonl",
            "raw/data_20261019_080000.jsonl.tmp",
            "raw/other_20271231_000000.jsonl",
        ];
        assert_eq!(
            latest_snapshot(keys, "raw/", "data.jsonl"),
            Some("raw/data_20261019_080000.jsonl")
        );
        assert_eq!(latest_snapshot(["raw/data.jsonl"], "raw/", "data.jsonl"), None);
    }

    #[test]
    fn encode_preserves_column_order() {
        let r = record(json!({ "z": 1, "a": 2 }));
        let bytes = encode_records(&[r]);
        assert_eq!(String::from_utf8(bytes).unwrap(), "{\"z\":1,\"a\":2}\n");
    }

    #[test]
    fn schema_infer_keeps_first_appearance_order() {
        let records = vec![record(json!({ "b": 1, "a": 2 })), record(json!({ "c": 3, "a": 4 }))];
        let schema = SchemaDescriptor::infer(&records);
        assert_eq!(schema.fields, vec!["b", "a", "c"]);
    }

    #[test]
    fn location_uri() {
        let loc = DatasetLocation::new("bucket", "raw/data.jsonl");
        assert_eq!(loc.uri("s3"), "s3://bucket/raw/data.jsonl");
    }
}
