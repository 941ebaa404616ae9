//! Typed address validation record parsed from a provider result row.

use crate::error::ConsolidationError;
use crate::ingest::import_record::parse_date;
use crate::ingest::source::RawRow;
use crate::model::contact::{AddressType, ContactId};
use crate::model::normalize::{is_valid_email, normalize_email};
use crate::model::validation::{DpvMatchCode, MoveType, MovedAddress, Rdi};
use chrono::NaiveDate;
use uuid::Uuid;

/// How a provider row points back at a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactReference {
    Id(ContactId),
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub row_number: usize,
    pub reference: ContactReference,
    pub address_type: AddressType,
    pub dpv_match_code: DpvMatchCode,
    pub vacant: bool,
    pub rdi: Option<Rdi>,
    pub validated_at: NaiveDate,
    /// First day of the reported move month.
    pub move_date: Option<NaiveDate>,
    pub move_type: Option<MoveType>,
    pub new_address: Option<MovedAddress>,
}

impl ValidationRecord {
    pub fn parse(row: &RawRow) -> Result<Self, ConsolidationError> {
        if let Some(column) = row.unreadable_column() {
            return Err(ConsolidationError::validation(column, "cell is not valid UTF-8"));
        }
        let reference = parse_reference(required(row, "contact_reference")?)?;
        let address_type = AddressType::parse(required(row, "address_type")?).ok_or_else(|| {
            ConsolidationError::validation("address_type", "expected billing or shipping")
        })?;
        let dpv_match_code = DpvMatchCode::parse(required(row, "dpv_match_code")?)
            .ok_or_else(|| ConsolidationError::validation("dpv_match_code", "expected Y, N, S or D"))?;
        let vacant = match row.get("vacant").map(str::to_ascii_uppercase).as_deref() {
            None | Some("N") => false,
            Some("Y") => true,
            Some(_) => return Err(ConsolidationError::validation("vacant", "expected Y or N")),
        };
        let rdi = row
            .get("rdi")
            .map(|value| {
                Rdi::parse(value)
                    .ok_or_else(|| ConsolidationError::validation("rdi", "expected R or C"))
            })
            .transpose()?;
        let validated_at = parse_date(required(row, "validated_at")?).ok_or_else(|| {
            ConsolidationError::validation("validated_at", "expected YYYY-MM-DD or YYYYMMDD")
        })?;

        let move_date = row.get("move_date").map(parse_move_month).transpose()?;
        let (move_type, new_address) = match move_date {
            Some(_) => (
                row.get("move_type")
                    .map(|value| {
                        MoveType::parse(value).ok_or_else(|| {
                            ConsolidationError::validation("move_type", "expected I, F or B")
                        })
                    })
                    .transpose()?,
                parse_new_address(row),
            ),
            None => (None, None),
        };

        Ok(Self {
            row_number: row.row_number,
            reference,
            address_type,
            dpv_match_code,
            vacant,
            rdi,
            validated_at,
            move_date,
            move_type,
            new_address,
        })
    }

    /// Reference as supplied, for row context in summaries.
    pub fn reference_key(&self) -> String {
        match &self.reference {
            ContactReference::Id(id) => id.to_string(),
            ContactReference::Email(email) => email.clone(),
        }
    }
}

fn required<'a>(row: &'a RawRow, column: &str) -> Result<&'a str, ConsolidationError> {
    row.get(column)
        .ok_or_else(|| ConsolidationError::validation(column, "required field is missing"))
}

fn parse_reference(value: &str) -> Result<ContactReference, ConsolidationError> {
    if let Ok(id) = Uuid::parse_str(value) {
        return Ok(ContactReference::Id(id));
    }
    if is_valid_email(value) {
        return Ok(ContactReference::Email(normalize_email(value)));
    }
    Err(ConsolidationError::validation(
        "contact_reference",
        "expected a contact id or an email address",
    ))
}

/// `YYYYMM` to the first day of that month.
fn parse_move_month(value: &str) -> Result<NaiveDate, ConsolidationError> {
    let invalid = || ConsolidationError::validation("move_date", "expected YYYYMM");
    if value.len() != 6 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let year: i32 = value[..4].parse().map_err(|_| invalid())?;
    let month: u32 = value[4..].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

fn parse_new_address(row: &RawRow) -> Option<MovedAddress> {
    let owned = |column: &str| row.get(column).map(str::to_string);
    Some(MovedAddress {
        line1: owned("new_address1")?,
        line2: owned("new_address2"),
        city: owned("new_city"),
        state: owned("new_state"),
        postal_code: owned("new_postal_code"),
    })
}
