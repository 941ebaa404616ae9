//! Typed import record parsed from a raw source row.
//!
//! # Invariants
//! - `external_id` and `source_system` are always present.
//! - A present email is well formed; a present transaction carries both a
//!   date and an amount.

use crate::config::TagMapping;
use crate::error::ConsolidationError;
use crate::ingest::source::RawRow;
use crate::model::contact::{AddressType, PostalAddress, TransactionRecord};
use crate::model::normalize::{is_valid_email, normalize_source_system};
use crate::service::identity_registry::IdentitySeed;
use crate::service::merge_resolver::ContactPatch;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-)?(\d+)(?:\.(\d{1,2}))?$").expect("valid amount regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub row_number: usize,
    /// Normalized (trimmed, lowercase).
    pub source_system: String,
    pub external_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub addresses: Vec<PostalAddress>,
    pub transaction: Option<TransactionRecord>,
    /// Source labels as supplied; mapped to tags by `to_patch`.
    pub labels: Vec<String>,
}

impl ImportRecord {
    pub fn parse(row: &RawRow) -> Result<Self, ConsolidationError> {
        if let Some(column) = row.unreadable_column() {
            return Err(ConsolidationError::validation(column, "cell is not valid UTF-8"));
        }
        let external_id = required(row, "external_id")?;
        let source_system = normalize_source_system(required(row, "source_system")?);

        let email = row.get("email").map(str::to_string);
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                return Err(ConsolidationError::validation("email", "malformed address"));
            }
        }

        let full_name = row.get("full_name").map(str::to_string).or_else(|| {
            let parts: Vec<&str> = ["first_name", "last_name"]
                .iter()
                .filter_map(|column| row.get(column))
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });

        let mut addresses = Vec::new();
        for address_type in AddressType::ALL {
            if let Some(address) = parse_address(row, address_type)? {
                addresses.push(address);
            }
        }

        let transaction = parse_transaction(row, &source_system, external_id)?;

        let labels = row
            .get("tags")
            .map(|value| {
                value
                    .split([';', ','])
                    .map(str::trim)
                    .filter(|label| !label.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            row_number: row.row_number,
            source_system,
            external_id: external_id.to_string(),
            email,
            full_name,
            phone: row.get("phone").map(str::to_string),
            addresses,
            transaction,
            labels,
        })
    }

    pub fn seed(&self) -> IdentitySeed {
        IdentitySeed {
            email: self.email.clone(),
        }
    }

    /// Merge patch with labels mapped through the run's tag mapping.
    pub fn to_patch(&self, tags: &TagMapping) -> ContactPatch {
        ContactPatch {
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            addresses: self.addresses.clone(),
            tags: self
                .labels
                .iter()
                .filter_map(|label| tags.map_label(label))
                .collect(),
        }
    }
}

fn required<'a>(row: &'a RawRow, column: &str) -> Result<&'a str, ConsolidationError> {
    row.get(column)
        .ok_or_else(|| ConsolidationError::validation(column, "required field is missing"))
}

fn parse_address(
    row: &RawRow,
    address_type: AddressType,
) -> Result<Option<PostalAddress>, ConsolidationError> {
    let prefix = address_type.as_str();
    let field = |name: &str| row.get(&format!("{prefix}_{name}")).map(str::to_string);

    let line1 = field("address1");
    let rest = [
        field("address2"),
        field("city"),
        field("state"),
        field("postal_code"),
        field("country"),
    ];
    let Some(line1) = line1 else {
        if rest.iter().any(Option::is_some) {
            return Err(ConsolidationError::validation(
                format!("{prefix}_address1"),
                "required when other address fields are present",
            ));
        }
        return Ok(None);
    };

    let [line2, city, state, postal_code, country] = rest;
    Ok(Some(PostalAddress {
        address_type,
        line1,
        line2,
        city,
        state,
        postal_code,
        country,
    }))
}

fn parse_transaction(
    row: &RawRow,
    source_system: &str,
    external_id: &str,
) -> Result<Option<TransactionRecord>, ConsolidationError> {
    let amount = row.get("transaction_amount");
    let date = row.get("transaction_date");
    let (amount, date) = match (amount, date) {
        (None, None) => {
            if row.get("transaction_id").is_some() {
                return Err(ConsolidationError::validation(
                    "transaction_amount",
                    "required when transaction_id is present",
                ));
            }
            return Ok(None);
        }
        (Some(_), None) => {
            return Err(ConsolidationError::validation(
                "transaction_date",
                "required when transaction_amount is present",
            ))
        }
        (None, Some(_)) => {
            return Err(ConsolidationError::validation(
                "transaction_amount",
                "required when transaction_date is present",
            ))
        }
        (Some(amount), Some(date)) => (amount, date),
    };

    let amount_cents = parse_amount_cents(amount).ok_or_else(|| {
        ConsolidationError::validation("transaction_amount", "not a monetary amount")
    })?;
    let transaction_date = parse_date(date)
        .ok_or_else(|| ConsolidationError::validation("transaction_date", "unrecognized date"))?;
    let transaction_id = row
        .get("transaction_id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{external_id}:{transaction_date}:{amount_cents}"));

    Ok(Some(TransactionRecord {
        source_system: source_system.to_string(),
        transaction_id,
        amount_cents,
        transaction_date,
    }))
}

/// Parses `"$1,234.5"`-style amounts into cents.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let captures = AMOUNT_RE.captures(&cleaned)?;
    let whole: i64 = captures.get(2)?.as_str().parse().ok()?;
    let fraction = captures.get(3).map_or("00", |m| m.as_str());
    let fraction: i64 = format!("{fraction:0<2}").parse().ok()?;
    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if captures.get(1).is_some() { -cents } else { cents })
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD` and `MM/DD/YYYY`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let value = value.split(['T', ' ']).next().unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

#[cfg(test)]
mod tests {
    use super::{parse_amount_cents, parse_date, ImportRecord};
    use crate::config::TagMapping;
    use crate::error::IssueKind;
    use crate::ingest::source::RawRow;
    use chrono::NaiveDate;

    fn base_row() -> RawRow {
        RawRow::new(7)
            .with("external_id", "cus_7")
            .with("source_system", " Shopify ")
    }

    #[test]
    fn amounts_parse_to_cents() {
        assert_eq!(parse_amount_cents("$1,234.5"), Some(123_450));
        assert_eq!(parse_amount_cents("19.99"), Some(1_999));
        assert_eq!(parse_amount_cents("-5"), Some(-500));
        assert_eq!(parse_amount_cents("12.345"), None);
        assert_eq!(parse_amount_cents("abc"), None);
    }

    #[test]
    fn dates_accept_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9);
        assert_eq!(parse_date("2024-03-09"), expected);
        assert_eq!(parse_date("20240309"), expected);
        assert_eq!(parse_date("03/09/2024"), expected);
        assert_eq!(parse_date("2024-03-09T10:00:00Z"), expected);
        assert_eq!(parse_date("March 9"), None);
    }

    #[test]
    fn missing_required_field_is_a_validation_error() {
        let row = RawRow::new(3).with("external_id", "cus_3");
        let err = ImportRecord::parse(&row).unwrap_err();
        assert_eq!(err.issue_kind(), Some(IssueKind::Validation));
        assert!(err.to_string().contains("source_system"));
    }

    #[test]
    fn full_record_is_parsed() {
        let row = base_row()
            .with("email", "rita@example.com")
            .with("first_name", "Rita")
            .with("last_name", "Fox")
            .with("billing_address1", "12 Elm St")
            .with("billing_postal_code", "62701")
            .with("transaction_amount", "$25.00")
            .with("transaction_date", "2024-05-01")
            .with("tags", "Course Buyer; VIP,");

        let record = ImportRecord::parse(&row).unwrap();
        assert_eq!(record.source_system, "shopify");
        assert_eq!(record.full_name.as_deref(), Some("Rita Fox"));
        assert_eq!(record.addresses.len(), 1);
        let transaction = record.transaction.as_ref().unwrap();
        assert_eq!(transaction.amount_cents, 2_500);
        assert_eq!(transaction.transaction_id, "cus_7:2024-05-01:2500");

        let mapping = TagMapping::new(
            "v1",
            vec![("course buyer".to_string(), "customer".to_string())],
        )
        .unwrap();
        assert_eq!(record.to_patch(&mapping).tags, vec!["customer", "vip"]);
    }

    #[test]
    fn partial_address_without_street_is_rejected() {
        let row = base_row().with("shipping_city", "Springfield");
        let err = ImportRecord::parse(&row).unwrap_err();
        assert!(err.to_string().contains("shipping_address1"));
    }

    #[test]
    fn malformed_email_is_rejected() {
        let row = base_row().with("email", "rita.example.com");
        assert!(ImportRecord::parse(&row).is_err());
    }
}
