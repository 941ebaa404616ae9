//! Core domain logic for contact consolidation.
//! This crate is the single source of truth for identity, merge and
//! deliverability invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{AppConfig, ConfigError, TagMapping};
pub use db::{open_db, open_db_in_memory, DbError};
pub use error::{ConsolidationError, IssueKind, RowIssue};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::contact::{AddressType, Contact, ContactId, PostalAddress};
pub use model::profile::ContactProfile;
pub use repo::{RepoError, RepoResult};
pub use service::duplicate_matcher::{
    DuplicateCandidateGroup, DuplicateMatcher, MatchConfidence, MatchKeyType,
};
pub use service::identity_registry::{IdentityRegistry, IdentitySeed, Resolution, ResolvedBy};
pub use service::import_orchestrator::{
    ImportBatch, ImportOrchestrator, ImportRunError, ImportSummary, RunMode,
};
pub use service::mailing_list::{MailingListAssembler, MailingListEntry};
pub use service::merge_resolver::{merge, ContactPatch, MergeOutcome, MergePolicy};
pub use service::scoring_engine::{ConfidenceTier, Disqualifier, ScoreResult, ScoringEngine};
pub use service::validation_importer::{
    ValidationBatch, ValidationImportError, ValidationImportSummary, ValidationImporter,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
