//! Address validation batch importer.
//!
//! # Responsibility
//! - Attach provider DPV results and NCOA moves to known contacts.
//!
//! # Invariants
//! - Re-ingesting the same batch leaves the store unchanged.
//! - Rows referencing unknown contacts are skipped and counted, never fatal.
//! - A move is stored as its own record; the live address is not touched.
//! - The batch commits as a whole; an infrastructure failure leaves the
//!   store as it was before the call.

use crate::error::{ConsolidationError, RowIssue};
use crate::ingest::source::RawRow;
use crate::ingest::validation_record::{ContactReference, ValidationRecord};
use crate::model::contact::ContactId;
use crate::model::normalize::normalize_source_system;
use crate::model::validation::{AddressValidationResult, NcoaMove};
use crate::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use crate::repo::validation_repo::{
    SqliteValidationRepository, UpsertOutcome, ValidationRepository,
};
use crate::repo::RepoError;
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// One provider result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationBatch {
    /// Provider name stored with every result, e.g. `usps`.
    pub provider: String,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationImportSummary {
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub moves_recorded: usize,
    /// Rows referencing contacts the store does not know.
    pub skipped: Vec<RowIssue>,
    /// Rows that could not be parsed.
    pub errors: Vec<RowIssue>,
}

#[derive(Debug)]
pub enum ValidationImportError {
    Infrastructure(RepoError),
}

impl Display for ValidationImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infrastructure(err) => write!(f, "validation import aborted: {err}"),
        }
    }
}

impl Error for ValidationImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Infrastructure(err) => Some(err),
        }
    }
}

impl From<RepoError> for ValidationImportError {
    fn from(value: RepoError) -> Self {
        Self::Infrastructure(value)
    }
}

impl From<rusqlite::Error> for ValidationImportError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Infrastructure(value.into())
    }
}

/// Effect of one successfully applied row.
struct RowEffect {
    upsert: UpsertOutcome,
    move_recorded: bool,
}

/// Ingests provider batches into the validation tables.
#[derive(Debug, Default)]
pub struct ValidationImporter;

impl ValidationImporter {
    pub fn new() -> Self {
        Self
    }

    pub fn ingest(
        &self,
        conn: &mut Connection,
        batch: &ValidationBatch,
    ) -> Result<ValidationImportSummary, ValidationImportError> {
        let started_at = Instant::now();
        let provider = normalize_source_system(&batch.provider);
        info!(
            "event=validation_import module=validation status=start provider={} rows={}",
            provider,
            batch.rows.len()
        );

        let mut summary = ValidationImportSummary {
            total_rows: batch.rows.len(),
            ..ValidationImportSummary::default()
        };

        let tx = conn.transaction()?;
        {
            let contacts = SqliteContactRepository::try_new(&tx)?;
            let validations = SqliteValidationRepository::try_new(&tx)?;

            for row in &batch.rows {
                let record = match ValidationRecord::parse(row) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(
                            "event=validation_row module=validation status=error row={} error={}",
                            row.row_number, err
                        );
                        summary.errors.extend(RowIssue::from_error(
                            row.row_number,
                            row.get("contact_reference"),
                            &err,
                        ));
                        continue;
                    }
                };

                match apply_record(&contacts, &validations, &record, &provider) {
                    Ok(effect) => {
                        match effect.upsert {
                            UpsertOutcome::Inserted => summary.inserted += 1,
                            UpsertOutcome::Updated => summary.updated += 1,
                            UpsertOutcome::Unchanged => summary.unchanged += 1,
                        }
                        if effect.move_recorded {
                            summary.moves_recorded += 1;
                        }
                    }
                    Err(ConsolidationError::Infrastructure(err)) => {
                        error!(
                            "event=validation_import module=validation status=error row={} error={}",
                            record.row_number, err
                        );
                        return Err(ValidationImportError::Infrastructure(err));
                    }
                    Err(err) => {
                        warn!(
                            "event=validation_row module=validation status=skip row={} error={}",
                            record.row_number, err
                        );
                        let issue = RowIssue::from_error(
                            record.row_number,
                            Some(&record.reference_key()),
                            &err,
                        );
                        match err {
                            ConsolidationError::ProviderData { .. } => {
                                summary.skipped.extend(issue)
                            }
                            _ => summary.errors.extend(issue),
                        }
                    }
                }
            }
        }
        tx.commit()?;

        info!(
            "event=validation_import module=validation status=ok provider={} inserted={} updated={} unchanged={} moves={} skipped={} errors={} duration_ms={}",
            provider,
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.moves_recorded,
            summary.skipped.len(),
            summary.errors.len(),
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }
}

fn apply_record<C: ContactRepository, V: ValidationRepository>(
    contacts: &C,
    validations: &V,
    record: &ValidationRecord,
    provider: &str,
) -> Result<RowEffect, ConsolidationError> {
    let contact_id = resolve_reference(contacts, &record.reference)?.ok_or_else(|| {
        ConsolidationError::ProviderData {
            reference: record.reference_key(),
            message: "no contact matches this reference".to_string(),
        }
    })?;

    let upsert = validations.upsert_validation(&AddressValidationResult {
        contact_id,
        address_type: record.address_type,
        dpv_match_code: record.dpv_match_code,
        vacant: record.vacant,
        rdi: record.rdi,
        validated_at: record.validated_at,
        provider: provider.to_string(),
    })?;

    let move_recorded = match record.move_date {
        Some(move_date) => validations.record_move(&NcoaMove {
            contact_id,
            address_type: record.address_type,
            move_date,
            move_type: record.move_type,
            new_address: record.new_address.clone(),
            provider: provider.to_string(),
        })?,
        None => false,
    };

    Ok(RowEffect {
        upsert,
        move_recorded,
    })
}

fn resolve_reference<C: ContactRepository>(
    contacts: &C,
    reference: &ContactReference,
) -> Result<Option<ContactId>, ConsolidationError> {
    match reference {
        ContactReference::Id(id) => Ok(contacts.get_contact(*id)?.map(|contact| contact.id)),
        ContactReference::Email(email) => Ok(contacts.find_contact_by_email(email)?),
    }
}
