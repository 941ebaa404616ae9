//! Contact aggregate.
//!
//! # Responsibility
//! - Define the canonical contact record consolidated from every source.
//! - Provide read helpers used by merge, matching and scoring.
//!
//! # Invariants
//! - `id` is stable and never reused for another contact.
//! - Exactly one email is flagged primary whenever the contact has emails.
//! - At most one address per `AddressType` is flagged primary.
//! - `external_ids` holds at most one external id per source system.

use crate::model::normalize::{address_fragment_key, normalize_email, phone_digits, postal_prefix};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable internal identifier of a canonical contact.
pub type ContactId = Uuid;

/// Which postal address of a contact a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Billing,
    Shipping,
}

impl AddressType {
    /// Both address types, billing first. Billing wins score ties.
    pub const ALL: [AddressType; 2] = [AddressType::Billing, AddressType::Shipping];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::Shipping => "shipping",
        }
    }

    /// Parses `billing|shipping`, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "billing" => Some(Self::Billing),
            "shipping" => Some(Self::Shipping),
            _ => None,
        }
    }
}

impl Display for AddressType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailEntry {
    pub address: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneEntry {
    /// Phone as supplied by the source, trimmed.
    pub number: String,
    pub is_primary: bool,
}

impl PhoneEntry {
    pub fn digits(&self) -> String {
        phone_digits(&self.number)
    }
}

/// Postal address fields as supplied by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub address_type: AddressType,
    pub line1: String,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl PostalAddress {
    /// Comparison key: street lines plus 5-character postal prefix.
    ///
    /// Two addresses with the same key are the same mail drop; case,
    /// punctuation and ZIP+4 suffixes do not create new entries.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            address_fragment_key(&self.line1),
            self.line2
                .as_deref()
                .map(address_fragment_key)
                .unwrap_or_default(),
            self.postal_code
                .as_deref()
                .map(postal_prefix)
                .unwrap_or_default()
        )
    }
}

/// Stored address plus provenance metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: PostalAddress,
    pub is_primary: bool,
    /// Source system that first supplied this address.
    pub source_system: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// Canonical contact consolidated from every upstream system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    /// Protected identity field; changes are always audited.
    pub full_name: Option<String>,
    pub emails: Vec<EmailEntry>,
    pub phones: Vec<PhoneEntry>,
    pub addresses: Vec<AddressRecord>,
    /// `source_system -> external_id`.
    pub external_ids: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    /// Sum of recorded transactions, in cents.
    pub total_spent_cents: i64,
    pub last_transaction_date: Option<NaiveDate>,
    /// Source system that caused the contact to be created.
    pub created_by: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl Contact {
    /// Creates an empty contact with a generated stable ID.
    pub fn new(created_by: impl Into<String>, now_ms: i64) -> Self {
        Self::with_id(Uuid::new_v4(), created_by, now_ms)
    }

    /// Creates an empty contact with a caller-provided ID.
    pub fn with_id(id: ContactId, created_by: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id,
            full_name: None,
            emails: Vec::new(),
            phones: Vec::new(),
            addresses: Vec::new(),
            external_ids: BTreeMap::new(),
            tags: BTreeSet::new(),
            total_spent_cents: 0,
            last_transaction_date: None,
            created_by: created_by.into(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .find(|entry| entry.is_primary)
            .map(|entry| entry.address.as_str())
    }

    /// Case-insensitive membership check.
    pub fn has_email(&self, email: &str) -> bool {
        let wanted = normalize_email(email);
        self.emails
            .iter()
            .any(|entry| normalize_email(&entry.address) == wanted)
    }

    pub fn has_phone_digits(&self, digits: &str) -> bool {
        self.phones.iter().any(|entry| entry.digits() == digits)
    }

    pub fn primary_address(&self, address_type: AddressType) -> Option<&AddressRecord> {
        self.addresses
            .iter()
            .find(|record| record.is_primary && record.address.address_type == address_type)
    }

    /// Checks structural invariants before persistence.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.created_by.trim().is_empty() {
            return Err(ContactValidationError::MissingCreatedBy);
        }

        let mut seen = BTreeSet::new();
        for entry in &self.emails {
            let normalized = normalize_email(&entry.address);
            if normalized.is_empty() {
                return Err(ContactValidationError::BlankEmail);
            }
            if !seen.insert(normalized.clone()) {
                return Err(ContactValidationError::DuplicateEmail(normalized));
            }
        }

        let primaries = self.emails.iter().filter(|entry| entry.is_primary).count();
        match (self.emails.is_empty(), primaries) {
            (true, _) | (false, 1) => {}
            (false, 0) => return Err(ContactValidationError::MissingPrimaryEmail),
            (false, _) => return Err(ContactValidationError::MultiplePrimaryEmails),
        }

        for address_type in AddressType::ALL {
            let count = self
                .addresses
                .iter()
                .filter(|record| record.is_primary && record.address.address_type == address_type)
                .count();
            if count > 1 {
                return Err(ContactValidationError::MultiplePrimaryAddresses(
                    address_type,
                ));
            }
        }

        if self.created_at > self.updated_at {
            return Err(ContactValidationError::UpdatedBeforeCreated);
        }

        Ok(())
    }
}

/// Mapping of one upstream record key onto a canonical contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub contact_id: ContactId,
    pub source_system: String,
    pub external_id: String,
}

/// One purchase reported by a source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub source_system: String,
    /// Unique within `source_system`.
    pub transaction_id: String,
    pub amount_cents: i64,
    pub transaction_date: NaiveDate,
}

/// Structural invariant violations of a `Contact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    MissingCreatedBy,
    BlankEmail,
    DuplicateEmail(String),
    MissingPrimaryEmail,
    MultiplePrimaryEmails,
    MultiplePrimaryAddresses(AddressType),
    UpdatedBeforeCreated,
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCreatedBy => write!(f, "contact created_by must not be blank"),
            Self::BlankEmail => write!(f, "contact email must not be blank"),
            Self::DuplicateEmail(email) => write!(f, "contact lists email twice: {email}"),
            Self::MissingPrimaryEmail => write!(f, "contact has emails but none is primary"),
            Self::MultiplePrimaryEmails => write!(f, "contact has more than one primary email"),
            Self::MultiplePrimaryAddresses(address_type) => write!(
                f,
                "contact has more than one primary {address_type} address"
            ),
            Self::UpdatedBeforeCreated => write!(f, "contact updated_at precedes created_at"),
        }
    }
}

impl Error for ContactValidationError {}

#[cfg(test)]
mod tests {
    use super::{AddressType, Contact, ContactValidationError, EmailEntry, PostalAddress};

    fn address(line1: &str, postal: &str) -> PostalAddress {
        PostalAddress {
            address_type: AddressType::Billing,
            line1: line1.to_string(),
            line2: None,
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            postal_code: Some(postal.to_string()),
            country: None,
        }
    }

    #[test]
    fn address_key_is_insensitive_to_formatting() {
        assert_eq!(
            address("12 Main St.", "62701-1234").key(),
            address("12 MAIN ST", "62701").key()
        );
        assert_ne!(
            address("12 Main St", "62701").key(),
            address("14 Main St", "62701").key()
        );
    }

    #[test]
    fn validate_requires_exactly_one_primary_email() {
        let mut contact = Contact::new("stripe", 1_000);
        contact.validate().unwrap();

        contact.emails.push(EmailEntry {
            address: "a@example.com".to_string(),
            is_primary: false,
        });
        assert_eq!(
            contact.validate().unwrap_err(),
            ContactValidationError::MissingPrimaryEmail
        );

        contact.emails[0].is_primary = true;
        contact.emails.push(EmailEntry {
            address: "b@example.com".to_string(),
            is_primary: true,
        });
        assert_eq!(
            contact.validate().unwrap_err(),
            ContactValidationError::MultiplePrimaryEmails
        );
    }

    #[test]
    fn has_email_is_case_insensitive() {
        let mut contact = Contact::new("stripe", 1_000);
        contact.emails.push(EmailEntry {
            address: "Rita@Example.com".to_string(),
            is_primary: true,
        });
        assert!(contact.has_email(" rita@example.COM "));
        assert_eq!(contact.primary_email(), Some("Rita@Example.com"));
    }

    #[test]
    fn address_type_parse_roundtrip() {
        for address_type in AddressType::ALL {
            assert_eq!(AddressType::parse(address_type.as_str()), Some(address_type));
        }
        assert_eq!(AddressType::parse("SHIPPING"), Some(AddressType::Shipping));
        assert_eq!(AddressType::parse("home"), None);
    }
}
