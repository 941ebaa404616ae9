//! Audit trail model for protected contact fields.
//!
//! # Invariants
//! - Records are immutable; storage is append-only.
//! - Every mutation of a protected field yields exactly one `Applied` record.
//! - A refused overwrite yields one `Rejected` record and leaves the stored
//!   value untouched.

use crate::model::contact::ContactId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identity fields that are never blind-replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedField {
    FullName,
}

impl ProtectedField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullName => "full_name",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full_name" => Some(Self::FullName),
            _ => None,
        }
    }
}

impl Display for ProtectedField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the audited change reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDisposition {
    Applied,
    Rejected,
}

impl AuditDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub contact_id: ContactId,
    pub field: ProtectedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Source system whose write triggered the change.
    pub changed_by: String,
    /// Epoch milliseconds.
    pub changed_at: i64,
    pub disposition: AuditDisposition,
}
