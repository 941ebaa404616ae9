//! Consolidation error taxonomy.
//!
//! # Responsibility
//! - Classify every failure the engine can raise while processing one
//!   record, and decide which of them abort a whole batch.
//! - Carry row context into batch summaries so nothing vanishes silently.
//!
//! # Invariants
//! - Only `Infrastructure` is retryable; data-quality errors need corrected
//!   source data.
//! - A SQLite constraint violation raised by one row is a row-level data
//!   error, every other storage failure is infrastructure.

use crate::model::audit::ProtectedField;
use crate::model::contact::ContactId;
use crate::repo::RepoError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ConsolidationError {
    /// Bad input value; the row is recorded and the batch continues.
    Validation { field: String, message: String },
    /// One external key would resolve to two different contacts.
    IdentityConflict {
        source_system: String,
        external_id: String,
        recorded_contact: ContactId,
        candidate_contact: ContactId,
        detail: &'static str,
    },
    /// Protected-field overwrite attempted without policy permission.
    MergeConflict {
        contact_id: ContactId,
        field: ProtectedField,
    },
    /// Provider result references something the store does not know.
    ProviderData { reference: String, message: String },
    /// Storage connectivity or integrity failure; aborts the batch.
    Infrastructure(RepoError),
}

impl ConsolidationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// Row-level issue category, `None` for batch-fatal errors.
    pub fn issue_kind(&self) -> Option<IssueKind> {
        match self {
            Self::Validation { .. } => Some(IssueKind::Validation),
            Self::IdentityConflict { .. } => Some(IssueKind::IdentityConflict),
            Self::MergeConflict { .. } => Some(IssueKind::MergeConflict),
            Self::ProviderData { .. } => Some(IssueKind::ProviderData),
            Self::Infrastructure(_) => None,
        }
    }
}

impl Display for ConsolidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { field, message } => write!(f, "invalid `{field}`: {message}"),
            Self::IdentityConflict {
                source_system,
                external_id,
                recorded_contact,
                candidate_contact,
                detail,
            } => write!(
                f,
                "identity conflict for {source_system}/{external_id}: recorded contact {recorded_contact}, candidate contact {candidate_contact} ({detail})"
            ),
            Self::MergeConflict { contact_id, field } => write!(
                f,
                "refused to overwrite protected field `{field}` on contact {contact_id}"
            ),
            Self::ProviderData { reference, message } => {
                write!(f, "provider row `{reference}` skipped: {message}")
            }
            Self::Infrastructure(err) => write!(f, "infrastructure failure: {err}"),
        }
    }
}

impl Error for ConsolidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Infrastructure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ConsolidationError {
    fn from(value: RepoError) -> Self {
        if value.is_constraint_violation() {
            return Self::Validation {
                field: "record".to_string(),
                message: format!("violates store constraint: {value}"),
            };
        }
        Self::Infrastructure(value)
    }
}

impl From<rusqlite::Error> for ConsolidationError {
    fn from(value: rusqlite::Error) -> Self {
        RepoError::from(value).into()
    }
}

/// Row-level issue categories reported in batch summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Validation,
    IdentityConflict,
    MergeConflict,
    ProviderData,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::IdentityConflict => "identity_conflict",
            Self::MergeConflict => "merge_conflict",
            Self::ProviderData => "provider_data_error",
        }
    }
}

/// One skipped or failed input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    /// 1-based data row number (header excluded).
    pub row_number: usize,
    /// `external_id` for imports, `contact_reference` for validation rows.
    pub key: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl RowIssue {
    /// Builds a row issue, or `None` when the error is batch-fatal.
    pub fn from_error(
        row_number: usize,
        key: Option<&str>,
        error: &ConsolidationError,
    ) -> Option<Self> {
        Some(Self {
            row_number,
            key: key.map(str::to_string),
            kind: error.issue_kind()?,
            message: error.to_string(),
        })
    }
}
