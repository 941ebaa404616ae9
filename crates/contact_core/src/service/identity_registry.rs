//! Identity registry use-case service.
//!
//! # Responsibility
//! - Resolve `(source_system, external_id)` keys to canonical contacts.
//! - Create contacts for keys that match nothing.
//!
//! # Invariants
//! - A key resolves to exactly one contact across the registry lifetime.
//! - Two writers racing to create the same key converge on one contact;
//!   the loser discards its empty contact and adopts the winner.
//! - Email is only a hint for keys that are not mapped yet. It never
//!   re-points an existing mapping.

use crate::error::ConsolidationError;
use crate::model::contact::{Contact, ContactId, EmailEntry, ExternalIdentity};
use crate::model::normalize::{is_valid_email, non_blank, normalize_source_system};
use crate::repo::contact_repo::ContactRepository;
use crate::repo::identity_repo::{IdentityInsert, IdentityRepository};
use log::{debug, info, warn};

/// Hints supplied alongside an external key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySeed {
    pub email: Option<String>,
}

/// How a key was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// Key was already mapped.
    ExistingKey,
    /// Key was new and attached to the contact owning the seed email.
    EmailMatch,
    /// Key was new and a fresh contact was created for it.
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub contact_id: ContactId,
    pub resolved_by: ResolvedBy,
}

impl Resolution {
    pub fn created(&self) -> bool {
        self.resolved_by == ResolvedBy::Created
    }
}

/// Maps upstream record keys onto canonical contacts.
pub struct IdentityRegistry<C: ContactRepository, I: IdentityRepository> {
    contacts: C,
    identities: I,
}

impl<C: ContactRepository, I: IdentityRepository> IdentityRegistry<C, I> {
    pub fn new(contacts: C, identities: I) -> Self {
        Self {
            contacts,
            identities,
        }
    }

    pub fn contacts(&self) -> &C {
        &self.contacts
    }

    /// Returns the contact bound to the key, creating it when unknown.
    ///
    /// # Contract
    /// - Repeated calls with the same key return the same contact.
    /// - A created contact carries only the seed email; every other field
    ///   arrives through the merge resolver.
    /// - Fails with `IdentityConflict` when the key and the seed email point
    ///   at different contacts, or when the email-matched contact already
    ///   holds a different id for the same source.
    pub fn resolve_or_create(
        &self,
        source_system: &str,
        external_id: &str,
        seed: &IdentitySeed,
        now_ms: i64,
    ) -> Result<Resolution, ConsolidationError> {
        let source_system = normalize_source_system(source_system);
        if source_system.is_empty() {
            return Err(ConsolidationError::validation(
                "source_system",
                "must not be blank",
            ));
        }
        let external_id = non_blank(external_id)
            .ok_or_else(|| ConsolidationError::validation("external_id", "must not be blank"))?;
        let email = seed.email.as_deref().and_then(non_blank);
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                return Err(ConsolidationError::validation("email", "malformed address"));
            }
        }

        let email_owner = match email.as_deref() {
            Some(email) => self.contacts.find_contact_by_email(email)?,
            None => None,
        };

        if let Some(mapped) = self.identities.lookup(&source_system, &external_id)? {
            return match email_owner {
                Some(owner) if owner != mapped => Err(ConsolidationError::IdentityConflict {
                    source_system,
                    external_id,
                    recorded_contact: mapped,
                    candidate_contact: owner,
                    detail: "email belongs to another contact",
                }),
                _ => Ok(Resolution {
                    contact_id: mapped,
                    resolved_by: ResolvedBy::ExistingKey,
                }),
            };
        }

        if let Some(owner) = email_owner {
            return self.attach_to_email_owner(owner, source_system, external_id);
        }

        let mut contact = Contact::new(source_system.as_str(), now_ms);
        if let Some(email) = email {
            contact.emails.push(EmailEntry {
                address: email,
                is_primary: true,
            });
        }
        self.contacts.insert_contact(&contact)?;

        let identity = ExternalIdentity {
            contact_id: contact.id,
            source_system,
            external_id,
        };
        match self.identities.insert(&identity)? {
            IdentityInsert::Inserted => {
                info!(
                    "event=identity_resolve module=identity status=created source={} contact_id={}",
                    identity.source_system, contact.id
                );
                Ok(Resolution {
                    contact_id: contact.id,
                    resolved_by: ResolvedBy::Created,
                })
            }
            IdentityInsert::AlreadyMapped(winner) => {
                self.contacts.delete_unreferenced_contact(contact.id)?;
                warn!(
                    "event=identity_resolve module=identity status=race_lost source={} contact_id={}",
                    identity.source_system, winner
                );
                Ok(Resolution {
                    contact_id: winner,
                    resolved_by: ResolvedBy::ExistingKey,
                })
            }
        }
    }

    fn attach_to_email_owner(
        &self,
        owner: ContactId,
        source_system: String,
        external_id: String,
    ) -> Result<Resolution, ConsolidationError> {
        if let Some(held) = self.identities.external_id_for(owner, &source_system)? {
            if held != external_id {
                return Err(ConsolidationError::IdentityConflict {
                    source_system,
                    external_id,
                    recorded_contact: owner,
                    candidate_contact: owner,
                    detail: "contact already holds another id for this source",
                });
            }
        }

        let identity = ExternalIdentity {
            contact_id: owner,
            source_system,
            external_id,
        };
        match self.identities.insert(&identity)? {
            IdentityInsert::Inserted => {
                debug!(
                    "event=identity_resolve module=identity status=email_match source={} contact_id={}",
                    identity.source_system, owner
                );
                Ok(Resolution {
                    contact_id: owner,
                    resolved_by: ResolvedBy::EmailMatch,
                })
            }
            IdentityInsert::AlreadyMapped(winner) if winner == owner => Ok(Resolution {
                contact_id: owner,
                resolved_by: ResolvedBy::ExistingKey,
            }),
            IdentityInsert::AlreadyMapped(winner) => Err(ConsolidationError::IdentityConflict {
                source_system: identity.source_system,
                external_id: identity.external_id,
                recorded_contact: winner,
                candidate_contact: owner,
                detail: "key was mapped concurrently to another contact",
            }),
        }
    }
}
