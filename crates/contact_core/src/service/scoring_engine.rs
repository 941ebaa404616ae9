//! Address confidence scoring engine.
//!
//! # Responsibility
//! - Turn validation, move and recency signals into a 0..=100
//!   deliverability score and tier for one contact address.
//!
//! # Invariants
//! - Pure and deterministic: the same profile, address type and `as_of`
//!   date always produce the same result. Nothing is persisted.
//! - Disqualifiers short-circuit to 0 before any other signal is read.
//! - Bonuses apply only on a non-zero base, so an unvalidated address can
//!   never reach a mailable tier.
//! - A validation confirmed within a year reaches `High` on its own.

use crate::clock::{days_between, epoch_ms_to_date};
use crate::model::contact::{AddressType, ContactId};
use crate::model::profile::ContactProfile;
use crate::model::validation::DpvMatchCode;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

const MAX_SCORE: u8 = 100;

/// Discretized score bucket, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            75.. => Self::VeryHigh,
            60..=74 => Self::High,
            45..=59 => Self::Medium,
            30..=44 => Self::Low,
            _ => Self::VeryLow,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "very_low" => Some(Self::VeryLow),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "very_high" => Some(Self::VeryHigh),
            _ => None,
        }
    }
}

impl Display for ConfidenceTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition that forces a score of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disqualifier {
    NcoaMove,
    Vacant,
    ValidationFailed,
    MissingAddress,
}

impl Disqualifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NcoaMove => "ncoa_move",
            Self::Vacant => "vacant",
            Self::ValidationFailed => "validation_failed",
            Self::MissingAddress => "missing_address",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub contact_id: ContactId,
    pub address_type: AddressType,
    pub score: u8,
    pub tier: ConfidenceTier,
    pub disqualified: Option<Disqualifier>,
}

impl ScoreResult {
    fn disqualified(contact_id: ContactId, address_type: AddressType, reason: Disqualifier) -> Self {
        Self {
            contact_id,
            address_type,
            score: 0,
            tier: ConfidenceTier::VeryLow,
            disqualified: Some(reason),
        }
    }

    pub fn is_disqualified(&self) -> bool {
        self.disqualified.is_some()
    }
}

/// Deliverability scorer.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    trusted_sources: BTreeSet<String>,
}

impl ScoringEngine {
    /// `trusted_sources` earn the trusted-source bonus for addresses they
    /// supplied.
    pub fn new(trusted_sources: BTreeSet<String>) -> Self {
        Self { trusted_sources }
    }

    /// Scores one address of a contact as of `as_of`.
    pub fn score(
        &self,
        profile: &ContactProfile,
        address_type: AddressType,
        as_of: NaiveDate,
    ) -> ScoreResult {
        let contact = &profile.contact;
        let Some(address) = contact.primary_address(address_type) else {
            return ScoreResult::disqualified(contact.id, address_type, Disqualifier::MissingAddress);
        };

        let validation = profile.validation(address_type);
        if profile.moves_for(address_type).next().is_some() {
            return ScoreResult::disqualified(contact.id, address_type, Disqualifier::NcoaMove);
        }
        if validation.is_some_and(|result| result.vacant) {
            return ScoreResult::disqualified(contact.id, address_type, Disqualifier::Vacant);
        }
        if validation.is_some_and(|result| result.dpv_match_code == DpvMatchCode::NotConfirmed) {
            return ScoreResult::disqualified(
                contact.id,
                address_type,
                Disqualifier::ValidationFailed,
            );
        }

        let base: u8 = match validation {
            None => 0,
            Some(result) if result.dpv_match_code.is_partial() => 50,
            Some(result) => match age_in_days(result.validated_at, as_of) {
                0..=90 => 70,
                91..=365 => 65,
                _ => 60,
            },
        };

        let mut score = u32::from(base);
        if base > 0 {
            score += contact
                .last_transaction_date
                .map_or(0, |date| transaction_bonus(age_in_days(date, as_of)));
            score += epoch_ms_to_date(address.updated_at)
                .map_or(0, |date| address_update_bonus(age_in_days(date, as_of)));
            if self.trusted_sources.contains(&address.source_system) {
                score += 5;
            }
        }

        let score = score.min(u32::from(MAX_SCORE)) as u8;
        ScoreResult {
            contact_id: contact.id,
            address_type,
            score,
            tier: ConfidenceTier::from_score(score),
            disqualified: None,
        }
    }

    /// Scores billing and shipping, billing first.
    pub fn score_all(&self, profile: &ContactProfile, as_of: NaiveDate) -> [ScoreResult; 2] {
        AddressType::ALL.map(|address_type| self.score(profile, address_type, as_of))
    }
}

/// Days between `date` and `as_of`; future dates count as today.
fn age_in_days(date: NaiveDate, as_of: NaiveDate) -> i64 {
    days_between(date, as_of).max(0)
}

fn transaction_bonus(age_days: i64) -> u32 {
    match age_days {
        0..=30 => 20,
        31..=90 => 15,
        91..=180 => 10,
        181..=365 => 5,
        _ => 0,
    }
}

fn address_update_bonus(age_days: i64) -> u32 {
    match age_days {
        0..=30 => 10,
        31..=90 => 5,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfidenceTier, ScoringEngine};
    use crate::model::contact::{AddressRecord, AddressType, Contact, PostalAddress};
    use crate::model::profile::ContactProfile;
    use crate::model::validation::{AddressValidationResult, DpvMatchCode};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn profile_with(dpv: DpvMatchCode, validated_at: NaiveDate) -> ContactProfile {
        let mut contact = Contact::new("shopify", 0);
        contact.addresses.push(AddressRecord {
            address: PostalAddress {
                address_type: AddressType::Billing,
                line1: "12 Elm St".to_string(),
                line2: None,
                city: Some("Springfield".to_string()),
                state: Some("IL".to_string()),
                postal_code: Some("62701".to_string()),
                country: Some("US".to_string()),
            },
            is_primary: true,
            source_system: "shopify".to_string(),
            created_at: 0,
            updated_at: 0,
        });
        let mut profile = ContactProfile::unvalidated(contact);
        profile.validations.insert(
            AddressType::Billing,
            AddressValidationResult {
                contact_id: profile.contact.id,
                address_type: AddressType::Billing,
                dpv_match_code: dpv,
                vacant: false,
                rdi: None,
                validated_at,
                provider: "usps".to_string(),
            },
        );
        profile
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(ConfidenceTier::from_score(100), ConfidenceTier::VeryHigh);
        assert_eq!(ConfidenceTier::from_score(75), ConfidenceTier::VeryHigh);
        assert_eq!(ConfidenceTier::from_score(74), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(60), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(59), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(45), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(30), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(29), ConfidenceTier::VeryLow);
        assert!(ConfidenceTier::High > ConfidenceTier::Medium);
    }

    #[test]
    fn base_score_decays_with_validation_age() {
        let engine = ScoringEngine::default();
        let as_of = day(2024, 12, 31);
        let cases = [
            (day(2024, 12, 1), 70),
            (day(2024, 6, 1), 65),
            (day(2022, 1, 1), 60),
        ];
        for (validated_at, expected) in cases {
            let profile = profile_with(DpvMatchCode::Confirmed, validated_at);
            assert_eq!(engine.score(&profile, AddressType::Billing, as_of).score, expected);
        }

        let partial = profile_with(DpvMatchCode::SecondaryMissing, day(2024, 12, 1));
        let result = engine.score(&partial, AddressType::Billing, as_of);
        assert_eq!((result.score, result.tier), (50, ConfidenceTier::Medium));
    }

    #[test]
    fn bonuses_stack_and_cap_at_one_hundred() {
        let as_of = day(2024, 12, 31);
        let mut profile = profile_with(DpvMatchCode::Confirmed, day(2024, 12, 20));
        profile.contact.last_transaction_date = Some(day(2024, 12, 25));
        profile.contact.addresses[0].updated_at =
            day(2024, 12, 30).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();

        let trusted: BTreeSet<String> = ["shopify".to_string()].into_iter().collect();
        let result = ScoringEngine::new(trusted).score(&profile, AddressType::Billing, as_of);
        assert_eq!(result.score, 100);
        assert_eq!(result.tier, ConfidenceTier::VeryHigh);
    }

    #[test]
    fn no_validation_means_no_bonus() {
        let as_of = day(2024, 12, 31);
        let mut profile = profile_with(DpvMatchCode::Confirmed, as_of);
        profile.validations.clear();
        profile.contact.last_transaction_date = Some(as_of);

        let result = ScoringEngine::default().score(&profile, AddressType::Billing, as_of);
        assert_eq!(result.score, 0);
        assert_eq!(result.tier, ConfidenceTier::VeryLow);
        assert!(!result.is_disqualified());
    }
}
