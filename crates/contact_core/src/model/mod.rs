//! Canonical contact domain model.
//!
//! # Responsibility
//! - Define the data structures shared by identity resolution, merging,
//!   deduplication, validation import and scoring.
//! - Keep normalization rules in one place so every component keys values
//!   the same way.
//!
//! # Invariants
//! - Every contact is identified by a stable `ContactId`.
//! - A contact holds at most one primary email and at most one primary
//!   address per address type.
//! - Audit records are immutable once created.

pub mod audit;
pub mod contact;
pub mod normalize;
pub mod profile;
pub mod validation;
