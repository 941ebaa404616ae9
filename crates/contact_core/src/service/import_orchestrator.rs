//! Import/merge orchestrator.
//!
//! # Responsibility
//! - Drive a source batch through validate, resolve identity, merge and
//!   commit.
//! - Report per-row outcomes so that no row disappears silently.
//!
//! # Invariants
//! - The whole batch is parsed before the first write; a batch whose
//!   invalid-row share exceeds `max_error_rate` is rejected untouched.
//! - Each row runs inside its own savepoint. A row-level failure rolls back
//!   that row only; an infrastructure failure rolls back the whole batch.
//! - `DryRun` and `Execute` share one code path; dry runs roll back at the
//!   very end.
//! - Re-running an applied batch reports zero creates and updates.

use crate::config::{AppConfig, ImportSettings, TagMapping};
use crate::error::{ConsolidationError, IssueKind, RowIssue};
use crate::ingest::import_record::ImportRecord;
use crate::ingest::source::RawRow;
use crate::model::audit::AuditRecord;
use crate::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use crate::repo::identity_repo::SqliteIdentityRepository;
use crate::repo::RepoError;
use crate::service::identity_registry::{IdentityRegistry, ResolvedBy};
use crate::service::merge_resolver::{merge, MergePolicy};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Execute,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Execute => "execute",
        }
    }
}

/// Rows from one source file or webhook delivery window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBatch {
    /// Human-readable origin used in logs, e.g. the file name.
    pub label: String,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub mode: RunMode,
    pub total_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows skipped on identity or merge conflicts.
    pub skipped: Vec<RowIssue>,
    /// Rows rejected as invalid input.
    pub errors: Vec<RowIssue>,
}

impl ImportSummary {
    fn new(mode: RunMode, total_rows: usize) -> Self {
        Self {
            mode,
            total_rows,
            created: 0,
            updated: 0,
            unchanged: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Rows applied without issue, including no-op rows.
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

#[derive(Debug)]
pub enum ImportRunError {
    /// Too many invalid rows; nothing was written.
    BatchRejected {
        total_rows: usize,
        invalid_rows: usize,
        max_error_rate: f64,
        issues: Vec<RowIssue>,
    },
    /// Storage failure; the whole batch was rolled back.
    Infrastructure(RepoError),
}

impl ImportRunError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl Display for ImportRunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchRejected {
                total_rows,
                invalid_rows,
                max_error_rate,
                ..
            } => write!(
                f,
                "batch rejected: {invalid_rows} of {total_rows} rows invalid, limit is {:.1}%",
                max_error_rate * 100.0
            ),
            Self::Infrastructure(err) => write!(f, "batch aborted and rolled back: {err}"),
        }
    }
}

impl Error for ImportRunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BatchRejected { .. } => None,
            Self::Infrastructure(err) => Some(err),
        }
    }
}

impl From<RepoError> for ImportRunError {
    fn from(value: RepoError) -> Self {
        Self::Infrastructure(value)
    }
}

impl From<rusqlite::Error> for ImportRunError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Infrastructure(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Row failure plus the rejection audit it still has to leave behind.
struct RowFailure {
    error: ConsolidationError,
    rejected_audit: Vec<AuditRecord>,
}

impl From<ConsolidationError> for RowFailure {
    fn from(error: ConsolidationError) -> Self {
        Self {
            error,
            rejected_audit: Vec::new(),
        }
    }
}

impl From<RepoError> for RowFailure {
    fn from(value: RepoError) -> Self {
        ConsolidationError::from(value).into()
    }
}

/// Batch import driver bound to one run's configuration.
pub struct ImportOrchestrator<'cfg> {
    settings: &'cfg ImportSettings,
    tags: &'cfg TagMapping,
}

impl<'cfg> ImportOrchestrator<'cfg> {
    pub fn new(settings: &'cfg ImportSettings, tags: &'cfg TagMapping) -> Self {
        Self { settings, tags }
    }

    pub fn from_config(config: &'cfg AppConfig) -> Self {
        Self::new(&config.import, &config.tag_mapping)
    }

    /// Runs one batch.
    ///
    /// # Contract
    /// - Returns `BatchRejected` before any write when too many rows are
    ///   invalid.
    /// - Returns `Infrastructure` after rolling back every row on storage
    ///   failure.
    /// - Otherwise commits (or, for `DryRun`, rolls back) and reports
    ///   per-row outcomes.
    pub fn run(
        &self,
        conn: &mut Connection,
        batch: &ImportBatch,
        mode: RunMode,
        now_ms: i64,
    ) -> Result<ImportSummary, ImportRunError> {
        let started_at = Instant::now();
        info!(
            "event=import_run module=import status=start batch={} mode={} rows={} tag_mapping={}",
            batch.label,
            mode.as_str(),
            batch.rows.len(),
            self.tags.version()
        );

        let mut summary = ImportSummary::new(mode, batch.rows.len());
        let mut records = Vec::with_capacity(batch.rows.len());
        for row in &batch.rows {
            match ImportRecord::parse(row) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        "event=import_row module=import status=error row={} external_id={} error={}",
                        row.row_number,
                        row.get("external_id").unwrap_or("-"),
                        err
                    );
                    summary.errors.extend(RowIssue::from_error(
                        row.row_number,
                        row.get("external_id"),
                        &err,
                    ));
                }
            }
        }
        self.check_error_rate(&summary)?;

        let mut tx = conn.transaction()?;
        for record in &records {
            let mut savepoint = tx.savepoint()?;
            let result = self.process_record(&savepoint, record, now_ms);
            match result {
                Ok(outcome) => {
                    savepoint.commit()?;
                    match outcome {
                        RowOutcome::Created => summary.created += 1,
                        RowOutcome::Updated => summary.updated += 1,
                        RowOutcome::Unchanged => summary.unchanged += 1,
                    }
                }
                Err(RowFailure {
                    error: ConsolidationError::Infrastructure(err),
                    ..
                }) => {
                    error!(
                        "event=import_run module=import status=error batch={} row={} external_id={} error={}",
                        batch.label, record.row_number, record.external_id, err
                    );
                    return Err(ImportRunError::Infrastructure(err));
                }
                Err(failure) => {
                    savepoint.rollback()?;
                    if !failure.rejected_audit.is_empty() {
                        let contacts = SqliteContactRepository::try_new(&savepoint)?;
                        for audit in &failure.rejected_audit {
                            contacts.append_audit(audit)?;
                        }
                    }
                    savepoint.commit()?;
                    self.record_failure(&mut summary, record, &failure.error);
                }
            }
        }

        match mode {
            RunMode::DryRun => tx.rollback()?,
            RunMode::Execute => tx.commit()?,
        }

        info!(
            "event=import_run module=import status=ok batch={} mode={} created={} updated={} unchanged={} skipped={} errors={} duration_ms={}",
            batch.label,
            mode.as_str(),
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.skipped.len(),
            summary.errors.len(),
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    /// Runs a batch, re-running it after infrastructure failures with
    /// exponential backoff. Data errors are returned immediately.
    pub fn run_with_retry(
        &self,
        conn: &mut Connection,
        batch: &ImportBatch,
        mode: RunMode,
        now_ms: impl Fn() -> i64,
    ) -> Result<ImportSummary, ImportRunError> {
        let retry = &self.settings.retry;
        let mut attempt = 1;
        loop {
            match self.run(conn, batch, mode, now_ms()) {
                Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        "event=import_retry module=import status=retry batch={} attempt={} delay_ms={} error={}",
                        batch.label,
                        attempt,
                        delay.as_millis(),
                        err
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn check_error_rate(&self, summary: &ImportSummary) -> Result<(), ImportRunError> {
        let invalid_rows = summary.errors.len();
        if summary.total_rows == 0 || invalid_rows == 0 {
            return Ok(());
        }
        let rate = invalid_rows as f64 / summary.total_rows as f64;
        if rate <= self.settings.max_error_rate {
            return Ok(());
        }

        error!(
            "event=import_run module=import status=rejected rows={} invalid={} max_error_rate={}",
            summary.total_rows, invalid_rows, self.settings.max_error_rate
        );
        Err(ImportRunError::BatchRejected {
            total_rows: summary.total_rows,
            invalid_rows,
            max_error_rate: self.settings.max_error_rate,
            issues: summary.errors.clone(),
        })
    }

    fn process_record(
        &self,
        conn: &Connection,
        record: &ImportRecord,
        now_ms: i64,
    ) -> Result<RowOutcome, RowFailure> {
        let registry = IdentityRegistry::new(
            SqliteContactRepository::try_new(conn)?,
            SqliteIdentityRepository::try_new(conn)?,
        );
        let resolution = registry.resolve_or_create(
            &record.source_system,
            &record.external_id,
            &record.seed(),
            now_ms,
        )?;

        let contacts = registry.contacts();
        let contact = contacts
            .get_contact(resolution.contact_id)?
            .ok_or(RepoError::NotFound(resolution.contact_id))?;

        let policy =
            MergePolicy::for_source(&record.source_system, &self.settings.trusted_sources, now_ms);
        let outcome = merge(&contact, &record.to_patch(self.tags), &policy);
        if let Some(error) = outcome.conflict_error() {
            return Err(RowFailure {
                error,
                rejected_audit: outcome.rejected_audit().cloned().collect(),
            });
        }

        if !outcome.is_noop() {
            contacts.save_contact(&outcome.contact)?;
            for audit in &outcome.audit {
                contacts.append_audit(audit)?;
            }
        }

        let transaction_recorded = match &record.transaction {
            Some(transaction) => {
                contacts.record_transaction(resolution.contact_id, transaction, now_ms)?
            }
            None => false,
        };

        Ok(match resolution.resolved_by {
            ResolvedBy::Created => RowOutcome::Created,
            ResolvedBy::EmailMatch => RowOutcome::Updated,
            ResolvedBy::ExistingKey if !outcome.is_noop() || transaction_recorded => {
                RowOutcome::Updated
            }
            ResolvedBy::ExistingKey => RowOutcome::Unchanged,
        })
    }

    fn record_failure(
        &self,
        summary: &mut ImportSummary,
        record: &ImportRecord,
        error: &ConsolidationError,
    ) {
        warn!(
            "event=import_row module=import status=skip row={} external_id={} error={}",
            record.row_number, record.external_id, error
        );
        let Some(issue) =
            RowIssue::from_error(record.row_number, Some(&record.external_id), error)
        else {
            return;
        };
        match issue.kind {
            IssueKind::IdentityConflict | IssueKind::MergeConflict => summary.skipped.push(issue),
            IssueKind::Validation | IssueKind::ProviderData => summary.errors.push(issue),
        }
    }
}
