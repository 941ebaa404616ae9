//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep pure decision logic (merge, matching, scoring) free of storage.

pub mod duplicate_matcher;
pub mod identity_registry;
pub mod import_orchestrator;
pub mod mailing_list;
pub mod merge_resolver;
pub mod scoring_engine;
pub mod validation_importer;
