//! CSV exports for downstream mailing and manual merge review.
//!
//! # Invariants
//! - Column order is fixed; consumers read these files by position.
//! - The merge worklist is advisory and never fed back into the store.

use crate::model::contact::{Contact, ContactId};
use crate::service::duplicate_matcher::DuplicateCandidateGroup;
use crate::service::mailing_list::MailingListEntry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;

const SAMPLE_SEPARATOR: &str = " | ";

#[derive(Debug)]
pub enum ExportError {
    Csv(csv::Error),
    Io(std::io::Error),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(err) => write!(f, "csv export failed: {err}"),
            Self::Io(err) => write!(f, "export write failed: {err}"),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Csv(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<csv::Error> for ExportError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Serialize)]
struct MailingListRow<'a> {
    contact_id: String,
    full_name: &'a str,
    address_type_used: &'static str,
    address1: &'a str,
    address2: &'a str,
    city: &'a str,
    state: &'a str,
    postal_code: &'a str,
    score: u8,
    confidence_tier: &'static str,
}

#[derive(Serialize)]
struct WorklistRow {
    group_id: String,
    contact_ids: String,
    match_key_type: &'static str,
    confidence: &'static str,
    sample_names: String,
    sample_emails: String,
    sample_phones: String,
}

/// Writes the ranked mailing list with a header row.
pub fn write_mailing_list<W: Write>(
    writer: W,
    entries: &[MailingListEntry],
) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    for entry in entries {
        let address = &entry.address;
        csv.serialize(MailingListRow {
            contact_id: entry.contact_id.to_string(),
            full_name: entry.full_name.as_deref().unwrap_or_default(),
            address_type_used: entry.address_type_used.as_str(),
            address1: &address.line1,
            address2: address.line2.as_deref().unwrap_or_default(),
            city: address.city.as_deref().unwrap_or_default(),
            state: address.state.as_deref().unwrap_or_default(),
            postal_code: address.postal_code.as_deref().unwrap_or_default(),
            score: entry.score,
            confidence_tier: entry.tier.as_str(),
        })?;
    }
    if entries.is_empty() {
        csv.write_record([
            "contact_id",
            "full_name",
            "address_type_used",
            "address1",
            "address2",
            "city",
            "state",
            "postal_code",
            "score",
            "confidence_tier",
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes candidate groups for human review, with sample fields from
/// `contacts` to help the reviewer decide.
pub fn write_merge_worklist<W: Write>(
    writer: W,
    groups: &[DuplicateCandidateGroup],
    contacts: &[Contact],
) -> Result<(), ExportError> {
    let by_id: BTreeMap<ContactId, &Contact> =
        contacts.iter().map(|contact| (contact.id, contact)).collect();

    let mut csv = csv::Writer::from_writer(writer);
    for group in groups {
        let members: Vec<&Contact> = group
            .contact_ids
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        csv.serialize(WorklistRow {
            group_id: group.group_id.clone(),
            contact_ids: group
                .contact_ids
                .iter()
                .map(ContactId::to_string)
                .collect::<Vec<_>>()
                .join(";"),
            match_key_type: group.match_key_type.as_str(),
            confidence: group.confidence.as_str(),
            sample_names: join_samples(members.iter().filter_map(|c| c.full_name.as_deref())),
            sample_emails: join_samples(members.iter().filter_map(|c| c.primary_email())),
            sample_phones: join_samples(
                members
                    .iter()
                    .filter_map(|c| c.phones.first().map(|phone| phone.number.as_str())),
            ),
        })?;
    }
    if groups.is_empty() {
        csv.write_record([
            "group_id",
            "contact_ids",
            "match_key_type",
            "confidence",
            "sample_names",
            "sample_emails",
            "sample_phones",
        ])?;
    }
    csv.flush()?;
    Ok(())
}

fn join_samples<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(SAMPLE_SEPARATOR)
}
