//! Raw row sources: CSV files and JSON webhook payloads.

use log::warn;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;

/// One input row as `column -> trimmed value`, blank cells dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub row_number: usize,
    pub fields: BTreeMap<String, String>,
    /// Columns whose bytes were not valid UTF-8; their values are stored
    /// lossily and the row must fail validation.
    pub unreadable: BTreeSet<String>,
}

impl RawRow {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            fields: BTreeMap::new(),
            unreadable: BTreeSet::new(),
        }
    }

    /// Adds one cell; blank values are not stored.
    pub fn with(mut self, column: &str, value: impl AsRef<str>) -> Self {
        self.insert(column, value.as_ref());
        self
    }

    pub fn insert(&mut self, column: &str, value: &str) {
        let column = column.trim().to_ascii_lowercase();
        let value = value.trim();
        if column.is_empty() || value.is_empty() {
            return;
        }
        self.fields.insert(column, value.to_string());
    }

    /// Adds one raw cell, remembering the column when it is not UTF-8.
    pub fn insert_bytes(&mut self, column: &str, value: &[u8]) {
        match std::str::from_utf8(value) {
            Ok(text) => self.insert(column, text),
            Err(_) => {
                self.insert(column, &String::from_utf8_lossy(value));
                self.unreadable.insert(column.trim().to_ascii_lowercase());
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// First column that could not be decoded, if any.
    pub fn unreadable_column(&self) -> Option<&str> {
        self.unreadable.iter().next().map(String::as_str)
    }
}

/// Source file or payload that cannot be read as rows at all.
#[derive(Debug)]
pub enum SourceError {
    Csv(csv::Error),
    Json(serde_json::Error),
    /// Payload parsed but has the wrong overall shape.
    Shape(String),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(err) => write!(f, "unreadable csv: {err}"),
            Self::Json(err) => write!(f, "unreadable json payload: {err}"),
            Self::Shape(message) => write!(f, "unexpected payload shape: {message}"),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Csv(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Shape(_) => None,
        }
    }
}

impl From<csv::Error> for SourceError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Reads every data row of a headed CSV document.
///
/// Rows with fewer or more cells than the header are accepted; missing
/// cells read as absent and surplus cells are dropped. A cell that is not
/// UTF-8 marks only its own row as unreadable.
pub fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<RawRow>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    if headers.iter().all(|header| header.trim().is_empty()) {
        return Err(SourceError::Shape("csv header row is empty".to_string()));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.byte_records().enumerate() {
        let record = record?;
        let mut row = RawRow::new(index + 1);
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert_bytes(header, value);
        }
        if let Some(column) = row.unreadable_column() {
            warn!(
                "event=csv_row module=ingest status=error row={} column={} reason=invalid_utf8",
                row.row_number, column
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Converts one webhook JSON object into a raw row.
///
/// Scalars are stringified, nulls and nested values are ignored.
pub fn row_from_webhook_json(row_number: usize, payload: &str) -> Result<RawRow, SourceError> {
    let value: Value = serde_json::from_str(payload)?;
    let Value::Object(object) = value else {
        return Err(SourceError::Shape(
            "webhook payload must be a JSON object".to_string(),
        ));
    };

    let mut row = RawRow::new(row_number);
    for (key, value) in &object {
        match value {
            Value::String(text) => row.insert(key, text),
            Value::Number(number) => row.insert(key, &number.to_string()),
            Value::Bool(flag) => row.insert(key, if *flag { "true" } else { "false" }),
            Value::Null | Value::Array(_) | Value::Object(_) => {}
        }
    }
    Ok(row)
}
