//! Field merge resolver.
//!
//! # Responsibility
//! - Fold one incoming record into a canonical contact.
//! - Decide per field whether to fill, append, overwrite or refuse.
//!
//! # Invariants
//! - Pure: no storage access, the caller persists `MergeOutcome`.
//! - Emails, phones, addresses and tags are only ever added.
//! - The protected `full_name` field is filled when empty, overwritten only
//!   under `trusted_overwrite`, and every change or refusal is audited.
//! - Merging the same patch twice yields no changes the second time, and
//!   `updated_at` only moves when something changed.

use crate::error::ConsolidationError;
use crate::model::audit::{AuditDisposition, AuditRecord, ProtectedField};
use crate::model::contact::{
    AddressRecord, AddressType, Contact, ContactId, EmailEntry, PhoneEntry, PostalAddress,
};
use crate::model::normalize::{non_blank, normalize_tag, phone_digits};
use std::collections::BTreeSet;

/// Field values an incoming record wants to contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub addresses: Vec<PostalAddress>,
    pub tags: Vec<String>,
}

/// Per-write permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    pub source_system: String,
    /// Allows replacing a non-empty protected field.
    pub trusted_overwrite: bool,
    /// Epoch milliseconds used for audit and `updated_at`.
    pub now_ms: i64,
}

impl MergePolicy {
    /// Policy for a source, trusted when listed in `trusted_sources`.
    pub fn for_source(source_system: &str, trusted_sources: &BTreeSet<String>, now_ms: i64) -> Self {
        Self {
            trusted_overwrite: trusted_sources.contains(source_system),
            source_system: source_system.to_string(),
            now_ms,
        }
    }
}

/// One applied change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    FullName {
        old: Option<String>,
        new: String,
    },
    EmailAdded(String),
    PhoneAdded(String),
    AddressAdded {
        address_type: AddressType,
        primary: bool,
    },
    TagAdded(String),
}

/// One refused protected-field overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    pub field: ProtectedField,
    pub current: String,
    pub incoming: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub contact: Contact,
    pub changes: Vec<FieldChange>,
    /// Applied and rejected audit entries, in field order.
    pub audit: Vec<AuditRecord>,
    pub conflicts: Vec<FieldConflict>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    /// Error describing the first refused overwrite, if any.
    pub fn conflict_error(&self) -> Option<ConsolidationError> {
        self.conflicts
            .first()
            .map(|conflict| ConsolidationError::MergeConflict {
                contact_id: self.contact.id,
                field: conflict.field,
            })
    }

    pub fn rejected_audit(&self) -> impl Iterator<Item = &AuditRecord> {
        self.audit
            .iter()
            .filter(|record| record.disposition == AuditDisposition::Rejected)
    }
}

/// Merges `incoming` into a copy of `current`.
pub fn merge(current: &Contact, incoming: &ContactPatch, policy: &MergePolicy) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        contact: current.clone(),
        changes: Vec::new(),
        audit: Vec::new(),
        conflicts: Vec::new(),
    };

    merge_full_name(&mut outcome, incoming.full_name.as_deref(), policy);

    if let Some(email) = incoming.email.as_deref().and_then(non_blank) {
        if !outcome.contact.has_email(&email) {
            let is_primary = outcome.contact.emails.is_empty();
            outcome.contact.emails.push(EmailEntry {
                address: email.clone(),
                is_primary,
            });
            outcome.changes.push(FieldChange::EmailAdded(email));
        }
    }

    if let Some(phone) = incoming.phone.as_deref().and_then(non_blank) {
        let digits = phone_digits(&phone);
        if !digits.is_empty() && !outcome.contact.has_phone_digits(&digits) {
            let is_primary = outcome.contact.phones.is_empty();
            outcome.contact.phones.push(PhoneEntry {
                number: phone.clone(),
                is_primary,
            });
            outcome.changes.push(FieldChange::PhoneAdded(phone));
        }
    }

    for address in &incoming.addresses {
        merge_address(&mut outcome, address, policy);
    }

    for tag in incoming.tags.iter().filter_map(|tag| normalize_tag(tag)) {
        if outcome.contact.tags.insert(tag.clone()) {
            outcome.changes.push(FieldChange::TagAdded(tag));
        }
    }

    if !outcome.changes.is_empty() {
        outcome.contact.updated_at = outcome.contact.updated_at.max(policy.now_ms);
    }

    outcome
}

fn merge_full_name(outcome: &mut MergeOutcome, incoming: Option<&str>, policy: &MergePolicy) {
    let Some(incoming) = incoming.and_then(non_blank) else {
        return;
    };
    let incoming = collapse_whitespace(&incoming);
    let current = outcome.contact.full_name.clone();

    match current.as_deref() {
        None => {}
        Some(existing) if same_name(existing, &incoming) => return,
        Some(existing) if !policy.trusted_overwrite => {
            let record = audit_record(
                outcome.contact.id,
                Some(existing.to_string()),
                Some(incoming.clone()),
                policy,
                AuditDisposition::Rejected,
            );
            outcome.audit.push(record);
            outcome.conflicts.push(FieldConflict {
                field: ProtectedField::FullName,
                current: existing.to_string(),
                incoming,
            });
            return;
        }
        Some(_) => {}
    }

    let record = audit_record(
        outcome.contact.id,
        current.clone(),
        Some(incoming.clone()),
        policy,
        AuditDisposition::Applied,
    );
    outcome.audit.push(record);
    outcome.contact.full_name = Some(incoming.clone());
    outcome.changes.push(FieldChange::FullName {
        old: current,
        new: incoming,
    });
}

fn merge_address(outcome: &mut MergeOutcome, address: &PostalAddress, policy: &MergePolicy) {
    if address.line1.trim().is_empty() {
        return;
    }
    let key = address.key();
    let addresses = &mut outcome.contact.addresses;
    if addresses
        .iter()
        .any(|record| record.address.address_type == address.address_type && record.address.key() == key)
    {
        return;
    }

    let primary = !addresses
        .iter()
        .any(|record| record.is_primary && record.address.address_type == address.address_type);
    addresses.push(AddressRecord {
        address: address.clone(),
        is_primary: primary,
        source_system: policy.source_system.clone(),
        created_at: policy.now_ms,
        updated_at: policy.now_ms,
    });
    outcome.changes.push(FieldChange::AddressAdded {
        address_type: address.address_type,
        primary,
    });
}

fn audit_record(
    contact_id: ContactId,
    old_value: Option<String>,
    new_value: Option<String>,
    policy: &MergePolicy,
    disposition: AuditDisposition,
) -> AuditRecord {
    AuditRecord {
        contact_id,
        field: ProtectedField::FullName,
        old_value,
        new_value,
        changed_by: policy.source_system.clone(),
        changed_at: policy.now_ms,
        disposition,
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn same_name(left: &str, right: &str) -> bool {
    collapse_whitespace(left).to_lowercase() == collapse_whitespace(right).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{merge, ContactPatch, FieldChange, MergePolicy};
    use crate::model::audit::AuditDisposition;
    use crate::model::contact::{AddressType, Contact, PostalAddress};
    use std::collections::BTreeSet;

    fn policy(trusted: bool) -> MergePolicy {
        MergePolicy {
            source_system: "shopify".to_string(),
            trusted_overwrite: trusted,
            now_ms: 2_000,
        }
    }

    fn named(name: &str) -> Contact {
        let mut contact = Contact::new("shopify", 1_000);
        contact.full_name = Some(name.to_string());
        contact
    }

    fn billing(line1: &str, postal: &str) -> PostalAddress {
        PostalAddress {
            address_type: AddressType::Billing,
            line1: line1.to_string(),
            line2: None,
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            postal_code: Some(postal.to_string()),
            country: Some("US".to_string()),
        }
    }

    #[test]
    fn empty_name_is_filled_and_audited() {
        let contact = Contact::new("shopify", 1_000);
        let patch = ContactPatch {
            full_name: Some("  Rita   Fox ".to_string()),
            ..ContactPatch::default()
        };

        let outcome = merge(&contact, &patch, &policy(false));
        assert_eq!(outcome.contact.full_name.as_deref(), Some("Rita Fox"));
        assert_eq!(outcome.audit.len(), 1);
        assert_eq!(outcome.audit[0].disposition, AuditDisposition::Applied);
        assert_eq!(outcome.audit[0].old_value, None);
        assert_eq!(outcome.contact.updated_at, 2_000);
    }

    #[test]
    fn untrusted_overwrite_is_refused_and_recorded() {
        let contact = named("Rita Fox");
        let patch = ContactPatch {
            full_name: Some("R. Fox-Smith".to_string()),
            email: Some("rita@example.com".to_string()),
            ..ContactPatch::default()
        };

        let outcome = merge(&contact, &patch, &policy(false));
        assert_eq!(outcome.contact.full_name.as_deref(), Some("Rita Fox"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert!(outcome.conflict_error().is_some());
        assert_eq!(outcome.rejected_audit().count(), 1);
        assert_eq!(
            outcome.changes,
            vec![FieldChange::EmailAdded("rita@example.com".to_string())]
        );
    }

    #[test]
    fn email_keeps_spelling_and_matches_case_insensitively() {
        let contact = named("Rita Fox");
        let added = merge(
            &contact,
            &ContactPatch {
                email: Some("  Rita.Fox@Example.COM ".to_string()),
                ..ContactPatch::default()
            },
            &policy(false),
        );
        assert_eq!(added.contact.primary_email(), Some("Rita.Fox@Example.COM"));

        let again = merge(
            &added.contact,
            &ContactPatch {
                email: Some("rita.fox@example.com".to_string()),
                ..ContactPatch::default()
            },
            &policy(false),
        );
        assert!(again.is_noop());
        assert_eq!(again.contact.emails.len(), 1);
    }

    #[test]
    fn trusted_overwrite_replaces_name_with_audit() {
        let contact = named("Rita Fox");
        let patch = ContactPatch {
            full_name: Some("Rita Fox-Smith".to_string()),
            ..ContactPatch::default()
        };

        let outcome = merge(&contact, &patch, &policy(true));
        assert_eq!(outcome.contact.full_name.as_deref(), Some("Rita Fox-Smith"));
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.audit[0].old_value.as_deref(), Some("Rita Fox"));
        assert_eq!(outcome.audit[0].disposition, AuditDisposition::Applied);
    }

    #[test]
    fn case_only_name_difference_is_not_a_conflict() {
        let outcome = merge(
            &named("Rita Fox"),
            &ContactPatch {
                full_name: Some("RITA FOX".to_string()),
                ..ContactPatch::default()
            },
            &policy(false),
        );
        assert!(outcome.is_noop());
        assert!(outcome.audit.is_empty());
    }

    #[test]
    fn collections_are_additive_and_first_entry_is_primary() {
        let patch = ContactPatch {
            email: Some("Rita@Example.com".to_string()),
            phone: Some("(555) 201-3344".to_string()),
            addresses: vec![billing("12 Elm St", "62701")],
            tags: vec!["VIP".to_string(), " vip ".to_string()],
            ..ContactPatch::default()
        };
        let first = merge(&Contact::new("shopify", 1_000), &patch, &policy(false));
        assert_eq!(first.contact.primary_email(), Some("rita@example.com"));
        assert!(first.contact.phones[0].is_primary);
        assert!(first.contact.addresses[0].is_primary);
        assert_eq!(first.contact.tags.len(), 1);

        let second_patch = ContactPatch {
            email: Some("rita.fox@work.example".to_string()),
            addresses: vec![billing("99 Oak Ave", "62702")],
            ..ContactPatch::default()
        };
        let second = merge(&first.contact, &second_patch, &policy(false));
        assert_eq!(second.contact.emails.len(), 2);
        assert_eq!(second.contact.primary_email(), Some("rita@example.com"));
        assert_eq!(second.contact.addresses.len(), 2);
        assert!(!second.contact.addresses[1].is_primary);
    }

    #[test]
    fn merging_same_patch_twice_is_idempotent() {
        let patch = ContactPatch {
            full_name: Some("Rita Fox".to_string()),
            email: Some("rita@example.com".to_string()),
            phone: Some("555-201-3344".to_string()),
            addresses: vec![billing("12 Elm St.", "62701-1234")],
            tags: vec!["vip".to_string()],
        };
        let first = merge(&Contact::new("shopify", 1_000), &patch, &policy(false));

        let mut again_patch = patch.clone();
        again_patch.addresses = vec![billing("12 ELM ST", "62701")];
        let later = MergePolicy {
            now_ms: 9_000,
            ..policy(false)
        };
        let second = merge(&first.contact, &again_patch, &later);
        assert!(second.is_noop());
        assert!(second.audit.is_empty());
        assert_eq!(second.contact, first.contact);
    }

    #[test]
    fn policy_trust_follows_configured_sources() {
        let trusted: BTreeSet<String> = ["crm".to_string()].into_iter().collect();
        assert!(MergePolicy::for_source("crm", &trusted, 0).trusted_overwrite);
        assert!(!MergePolicy::for_source("shopify", &trusted, 0).trusted_overwrite);
    }
}
