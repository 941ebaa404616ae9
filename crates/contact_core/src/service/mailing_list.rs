//! Mailing list assembler.
//!
//! # Invariants
//! - One entry per contact at most, using its better-scoring address;
//!   billing wins ties.
//! - Disqualified addresses are never selected.
//! - Order is score descending, then contact id ascending.

use crate::model::contact::{AddressType, ContactId, PostalAddress};
use crate::model::profile::ContactProfile;
use crate::repo::profile_repo::load_contact_profiles;
use crate::repo::RepoResult;
use crate::service::scoring_engine::{ConfidenceTier, ScoreResult, ScoringEngine};
use chrono::NaiveDate;
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailingListEntry {
    pub contact_id: ContactId,
    pub full_name: Option<String>,
    pub address_type_used: AddressType,
    pub address: PostalAddress,
    pub score: u8,
    pub tier: ConfidenceTier,
}

pub struct MailingListAssembler {
    engine: ScoringEngine,
}

impl MailingListAssembler {
    pub fn new(engine: ScoringEngine) -> Self {
        Self { engine }
    }

    /// Ranks mailable contacts at or above `min_tier`.
    pub fn assemble(
        &self,
        profiles: &[ContactProfile],
        min_tier: ConfidenceTier,
        as_of: NaiveDate,
    ) -> Vec<MailingListEntry> {
        let mut entries: Vec<MailingListEntry> = profiles
            .iter()
            .filter_map(|profile| self.best_entry(profile, as_of))
            .filter(|entry| entry.tier >= min_tier)
            .collect();
        entries.sort_by(|left, right| {
            right
                .score
                .cmp(&left.score)
                .then_with(|| left.contact_id.cmp(&right.contact_id))
        });
        entries
    }

    /// Loads every profile from the store and assembles the list.
    pub fn assemble_from_store(
        &self,
        conn: &Connection,
        min_tier: ConfidenceTier,
        as_of: NaiveDate,
    ) -> RepoResult<Vec<MailingListEntry>> {
        let profiles = load_contact_profiles(conn)?;
        let entries = self.assemble(&profiles, min_tier, as_of);
        info!(
            "event=mailing_list module=export status=ok contacts={} entries={} min_tier={}",
            profiles.len(),
            entries.len(),
            min_tier
        );
        Ok(entries)
    }

    fn best_entry(&self, profile: &ContactProfile, as_of: NaiveDate) -> Option<MailingListEntry> {
        let mut best: Option<ScoreResult> = None;
        for result in self.engine.score_all(profile, as_of) {
            if result.is_disqualified() {
                continue;
            }
            // Strictly greater keeps billing on ties.
            if best.map_or(true, |current| result.score > current.score) {
                best = Some(result);
            }
        }

        let best = best?;
        let address = profile.contact.primary_address(best.address_type)?;
        Some(MailingListEntry {
            contact_id: profile.contact.id,
            full_name: profile.contact.full_name.clone(),
            address_type_used: best.address_type,
            address: address.address.clone(),
            score: best.score,
            tier: best.tier,
        })
    }
}
