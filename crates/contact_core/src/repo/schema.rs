//! Connection readiness checks and row decoding helpers shared by repositories.

use crate::db::migrations::latest_version;
use crate::model::contact::{AddressType, ContactId};
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Verifies schema version and table presence before a repository is built.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn parse_contact_id(value: &str, column: &'static str) -> RepoResult<ContactId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_address_type(value: &str, column: &'static str) -> RepoResult<AddressType> {
    AddressType::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid address type `{value}` in {column}"))
    })
}

pub(crate) fn parse_iso_date(value: &str, column: &'static str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, ISO_DATE_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn format_iso_date(value: NaiveDate) -> String {
    value.format(ISO_DATE_FORMAT).to_string()
}

pub(crate) fn parse_flag(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
