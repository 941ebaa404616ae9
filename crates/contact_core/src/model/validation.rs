//! Address validation and NCOA move records.
//!
//! # Responsibility
//! - Model USPS DPV results attached to one contact address.
//! - Model NCOA relocations as records distinct from the live address.
//!
//! # Invariants
//! - One validation result per `(contact_id, address_type)`.
//! - A move never rewrites the contact's stored address.

use crate::model::contact::{AddressType, ContactId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// USPS Delivery Point Validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DpvMatchCode {
    /// `Y`: address confirmed down to the delivery point.
    Confirmed,
    /// `N`: address could not be confirmed.
    NotConfirmed,
    /// `S`: confirmed after dropping secondary (unit) information.
    SecondaryIgnored,
    /// `D`: primary number confirmed, secondary number missing.
    SecondaryMissing,
}

impl DpvMatchCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::Confirmed => "Y",
            Self::NotConfirmed => "N",
            Self::SecondaryIgnored => "S",
            Self::SecondaryMissing => "D",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "Y" => Some(Self::Confirmed),
            "N" => Some(Self::NotConfirmed),
            "S" => Some(Self::SecondaryIgnored),
            "D" => Some(Self::SecondaryMissing),
            _ => None,
        }
    }

    /// `S` and `D` confirm the building but not the unit.
    pub fn is_partial(self) -> bool {
        matches!(self, Self::SecondaryIgnored | Self::SecondaryMissing)
    }
}

/// Residential Delivery Indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rdi {
    Residential,
    Commercial,
}

impl Rdi {
    pub fn code(self) -> &'static str {
        match self {
            Self::Residential => "R",
            Self::Commercial => "C",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "R" | "RESIDENTIAL" => Some(Self::Residential),
            "C" | "COMMERCIAL" => Some(Self::Commercial),
            _ => None,
        }
    }
}

/// NCOA move scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveType {
    Individual,
    Family,
    Business,
}

impl MoveType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Individual => "I",
            Self::Family => "F",
            Self::Business => "B",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "I" => Some(Self::Individual),
            "F" => Some(Self::Family),
            "B" => Some(Self::Business),
            _ => None,
        }
    }
}

/// Latest validation result for one contact address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressValidationResult {
    pub contact_id: ContactId,
    pub address_type: AddressType,
    pub dpv_match_code: DpvMatchCode,
    pub vacant: bool,
    pub rdi: Option<Rdi>,
    pub validated_at: NaiveDate,
    /// Validation provider that produced the result file.
    pub provider: String,
}

/// Forwarding address reported by NCOA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

/// NCOA relocation signal for one contact address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcoaMove {
    pub contact_id: ContactId,
    pub address_type: AddressType,
    /// First day of the reported move month.
    pub move_date: NaiveDate,
    pub move_type: Option<MoveType>,
    pub new_address: Option<MovedAddress>,
    pub provider: String,
}
