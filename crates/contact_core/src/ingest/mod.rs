//! Input adapters.
//!
//! # Responsibility
//! - Turn CSV files and webhook payloads into raw, row-numbered records.
//! - Parse raw records into typed import and validation records.
//!
//! # Invariants
//! - Unknown columns are ignored; header names are matched
//!   case-insensitively after trimming.
//! - Row numbers are 1-based over data rows (the header is not counted).

pub mod import_record;
pub mod source;
pub mod validation_record;

pub use import_record::ImportRecord;
pub use source::{read_csv_rows, row_from_webhook_json, RawRow, SourceError};
pub use validation_record::{ContactReference, ValidationRecord};
