//! Address validation and NCOA move persistence.
//!
//! # Invariants
//! - One validation row per `(contact_id, address_type)`; writes are upserts
//!   that leave identical rows untouched.
//! - Move records are append-only and deduplicated on
//!   `(contact_id, address_type, move_date, new_line1)`.

use crate::model::contact::{AddressType, ContactId};
use crate::model::validation::{
    AddressValidationResult, DpvMatchCode, MoveType, MovedAddress, NcoaMove, Rdi,
};
use crate::repo::schema::{
    bool_to_int, ensure_connection_ready, format_iso_date, parse_address_type, parse_contact_id,
    parse_flag, parse_iso_date,
};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;

/// Effect of one validation upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub trait ValidationRepository {
    fn upsert_validation(&self, result: &AddressValidationResult) -> RepoResult<UpsertOutcome>;
    /// Returns `false` when the same move was already recorded.
    fn record_move(&self, record: &NcoaMove) -> RepoResult<bool>;
    fn validations_for(
        &self,
        contact_id: ContactId,
    ) -> RepoResult<BTreeMap<AddressType, AddressValidationResult>>;
    fn moves_for(&self, contact_id: ContactId) -> RepoResult<Vec<NcoaMove>>;
}

pub struct SqliteValidationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteValidationRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["address_validations", "address_moves"])?;
        Ok(Self { conn })
    }
}

impl ValidationRepository for SqliteValidationRepository<'_> {
    fn upsert_validation(&self, result: &AddressValidationResult) -> RepoResult<UpsertOutcome> {
        let existing = self.validations_for(result.contact_id)?;
        match existing.get(&result.address_type) {
            Some(current) if current == result => return Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                self.conn.execute(
                    "UPDATE address_validations
                     SET
                        dpv_match_code = ?3,
                        vacant = ?4,
                        rdi = ?5,
                        validated_at = ?6,
                        provider = ?7,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE contact_id = ?1 AND address_type = ?2;",
                    validation_params(result),
                )?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO address_validations (
                        contact_id, address_type, dpv_match_code, vacant, rdi, validated_at, provider
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                    validation_params(result),
                )?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn record_move(&self, record: &NcoaMove) -> RepoResult<bool> {
        let new_address = record.new_address.as_ref();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO address_moves (
                contact_id, address_type, move_date, move_type,
                new_line1, new_line2, new_city, new_state, new_postal_code, provider
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                record.contact_id.to_string(),
                record.address_type.as_str(),
                format_iso_date(record.move_date),
                record.move_type.map(MoveType::code),
                new_address.map_or("", |address| address.line1.as_str()),
                new_address.and_then(|address| address.line2.as_deref()),
                new_address.and_then(|address| address.city.as_deref()),
                new_address.and_then(|address| address.state.as_deref()),
                new_address.and_then(|address| address.postal_code.as_deref()),
                record.provider.as_str(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn validations_for(
        &self,
        contact_id: ContactId,
    ) -> RepoResult<BTreeMap<AddressType, AddressValidationResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, address_type, dpv_match_code, vacant, rdi, validated_at, provider
             FROM address_validations
             WHERE contact_id = ?1;",
        )?;
        let mut rows = stmt.query([contact_id.to_string()])?;
        let mut results = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let result = parse_validation_row(row)?;
            results.insert(result.address_type, result);
        }
        Ok(results)
    }

    fn moves_for(&self, contact_id: ContactId) -> RepoResult<Vec<NcoaMove>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, address_type, move_date, move_type,
                    new_line1, new_line2, new_city, new_state, new_postal_code, provider
             FROM address_moves
             WHERE contact_id = ?1
             ORDER BY address_type ASC, move_date ASC, id ASC;",
        )?;
        let mut rows = stmt.query([contact_id.to_string()])?;
        let mut moves = Vec::new();
        while let Some(row) = rows.next()? {
            moves.push(parse_move_row(row)?);
        }
        Ok(moves)
    }
}

fn validation_params(result: &AddressValidationResult) -> [rusqlite::types::Value; 7] {
    use rusqlite::types::Value;
    [
        Value::Text(result.contact_id.to_string()),
        Value::Text(result.address_type.as_str().to_string()),
        Value::Text(result.dpv_match_code.code().to_string()),
        Value::Integer(bool_to_int(result.vacant)),
        result
            .rdi
            .map_or(Value::Null, |rdi| Value::Text(rdi.code().to_string())),
        Value::Text(format_iso_date(result.validated_at)),
        Value::Text(result.provider.clone()),
    ]
}

fn parse_validation_row(row: &Row<'_>) -> RepoResult<AddressValidationResult> {
    let contact_text: String = row.get("contact_id")?;
    let type_text: String = row.get("address_type")?;
    let dpv_text: String = row.get("dpv_match_code")?;
    let validated_text: String = row.get("validated_at")?;
    let rdi = match row.get::<_, Option<String>>("rdi")? {
        Some(value) => Some(Rdi::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid rdi `{value}` in address_validations.rdi"))
        })?),
        None => None,
    };

    Ok(AddressValidationResult {
        contact_id: parse_contact_id(&contact_text, "address_validations.contact_id")?,
        address_type: parse_address_type(&type_text, "address_validations.address_type")?,
        dpv_match_code: DpvMatchCode::parse(&dpv_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid dpv code `{dpv_text}` in address_validations.dpv_match_code"
            ))
        })?,
        vacant: parse_flag(row.get("vacant")?, "address_validations.vacant")?,
        rdi,
        validated_at: parse_iso_date(&validated_text, "address_validations.validated_at")?,
        provider: row.get("provider")?,
    })
}

fn parse_move_row(row: &Row<'_>) -> RepoResult<NcoaMove> {
    let contact_text: String = row.get("contact_id")?;
    let type_text: String = row.get("address_type")?;
    let date_text: String = row.get("move_date")?;
    let move_type = match row.get::<_, Option<String>>("move_type")? {
        Some(value) => Some(MoveType::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid move type `{value}` in address_moves.move_type"
            ))
        })?),
        None => None,
    };
    let line1: String = row.get("new_line1")?;
    let new_address = if line1.is_empty() {
        None
    } else {
        Some(MovedAddress {
            line1,
            line2: row.get("new_line2")?,
            city: row.get("new_city")?,
            state: row.get("new_state")?,
            postal_code: row.get("new_postal_code")?,
        })
    };

    Ok(NcoaMove {
        contact_id: parse_contact_id(&contact_text, "address_moves.contact_id")?,
        address_type: parse_address_type(&type_text, "address_moves.address_type")?,
        move_date: parse_iso_date(&date_text, "address_moves.move_date")?,
        move_type,
        new_address,
        provider: row.get("provider")?,
    })
}
