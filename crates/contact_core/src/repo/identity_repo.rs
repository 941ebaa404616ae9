//! External identity repository.
//!
//! # Invariants
//! - `(source_system, external_id)` maps to at most one contact; the primary
//!   key is the concurrency-control primitive for racing inserts.
//! - A contact holds at most one external id per source system.

use crate::model::contact::{ContactId, ExternalIdentity};
use crate::repo::schema::{ensure_connection_ready, parse_contact_id};
use crate::repo::{RepoError, RepoResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

/// Result of attempting to record a new identity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityInsert {
    Inserted,
    /// Another writer mapped the key first; carries the winning contact.
    AlreadyMapped(ContactId),
}

/// Repository interface for `(source_system, external_id) -> contact_id`.
pub trait IdentityRepository {
    fn lookup(&self, source_system: &str, external_id: &str) -> RepoResult<Option<ContactId>>;
    fn insert(&self, identity: &ExternalIdentity) -> RepoResult<IdentityInsert>;
    /// External id the contact already holds for `source_system`, if any.
    fn external_id_for(
        &self,
        contact_id: ContactId,
        source_system: &str,
    ) -> RepoResult<Option<String>>;
    fn list_for_contact(&self, contact_id: ContactId) -> RepoResult<Vec<ExternalIdentity>>;
}

pub struct SqliteIdentityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteIdentityRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["contacts", "external_identities"])?;
        Ok(Self { conn })
    }
}

impl IdentityRepository for SqliteIdentityRepository<'_> {
    fn lookup(&self, source_system: &str, external_id: &str) -> RepoResult<Option<ContactId>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT contact_id
                 FROM external_identities
                 WHERE source_system = ?1 AND external_id = ?2;",
                params![source_system, external_id],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|text| parse_contact_id(&text, "external_identities.contact_id"))
            .transpose()
    }

    fn insert(&self, identity: &ExternalIdentity) -> RepoResult<IdentityInsert> {
        let result = self.conn.execute(
            "INSERT INTO external_identities (source_system, external_id, contact_id)
             VALUES (?1, ?2, ?3);",
            params![
                identity.source_system.as_str(),
                identity.external_id.as_str(),
                identity.contact_id.to_string(),
            ],
        );

        match result {
            Ok(_) => Ok(IdentityInsert::Inserted),
            Err(err) => {
                let err = RepoError::from(err);
                if !err.is_constraint_violation() {
                    return Err(err);
                }
                // Lost the race on the key: whoever won owns the mapping.
                match self.lookup(&identity.source_system, &identity.external_id)? {
                    Some(existing) => {
                        debug!(
                            "event=identity_insert module=repo status=skip reason=already_mapped source_system={}",
                            identity.source_system
                        );
                        Ok(IdentityInsert::AlreadyMapped(existing))
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn external_id_for(
        &self,
        contact_id: ContactId,
        source_system: &str,
    ) -> RepoResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT external_id
                 FROM external_identities
                 WHERE contact_id = ?1 AND source_system = ?2;",
                params![contact_id.to_string(), source_system],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn list_for_contact(&self, contact_id: ContactId) -> RepoResult<Vec<ExternalIdentity>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_system, external_id
             FROM external_identities
             WHERE contact_id = ?1
             ORDER BY source_system ASC, external_id ASC;",
        )?;
        let mut rows = stmt.query([contact_id.to_string()])?;
        let mut identities = Vec::new();
        while let Some(row) = rows.next()? {
            identities.push(ExternalIdentity {
                contact_id,
                source_system: row.get(0)?,
                external_id: row.get(1)?,
            });
        }
        Ok(identities)
    }
}
