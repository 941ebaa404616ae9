//! Contact repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist canonical contacts and their child collections.
//! - Own the append-only audit log write path.
//! - Record transactions idempotently and derive spend totals from them.
//!
//! # Invariants
//! - `save_contact` never deletes child rows; it inserts missing ones and
//!   keeps primary flags in sync.
//! - An email belongs to at most one contact; attaching a foreign-owned
//!   email surfaces as a constraint violation.
//! - Identical rejected audit records are stored once.

use crate::model::audit::{AuditDisposition, AuditRecord, ProtectedField};
use crate::model::contact::{
    AddressRecord, Contact, ContactId, EmailEntry, PhoneEntry, PostalAddress, TransactionRecord,
};
use crate::model::normalize::normalize_email;
use crate::repo::schema::{
    bool_to_int, ensure_connection_ready, format_iso_date, parse_address_type, parse_contact_id,
    parse_flag, parse_iso_date,
};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

const REQUIRED_TABLES: &[&str] = &[
    "contacts",
    "contact_emails",
    "contact_phones",
    "contact_addresses",
    "contact_tags",
    "external_identities",
    "audit_log",
    "contact_transactions",
];

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    full_name,
    total_spent_cents,
    last_transaction_date,
    created_by,
    created_at,
    updated_at
FROM contacts";

/// Repository interface for canonical contacts.
pub trait ContactRepository {
    fn insert_contact(&self, contact: &Contact) -> RepoResult<ContactId>;
    /// Writes scalar fields and additively syncs child collections.
    fn save_contact(&self, contact: &Contact) -> RepoResult<()>;
    /// Hard-deletes a contact that has no history yet.
    fn delete_unreferenced_contact(&self, id: ContactId) -> RepoResult<()>;
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// Lists all contacts ordered by id.
    fn list_contacts(&self) -> RepoResult<Vec<Contact>>;
    fn count_contacts(&self) -> RepoResult<u64>;
    /// Case-insensitive exact email lookup across all contacts.
    fn find_contact_by_email(&self, email: &str) -> RepoResult<Option<ContactId>>;
    /// Appends one audit record. Returns `false` when an identical rejected
    /// record already exists.
    fn append_audit(&self, record: &AuditRecord) -> RepoResult<bool>;
    fn list_audit(&self, id: ContactId) -> RepoResult<Vec<AuditRecord>>;
    /// Stores one transaction. Returns `false` when it was already known.
    fn record_transaction(
        &self,
        contact_id: ContactId,
        record: &TransactionRecord,
        now_ms: i64,
    ) -> RepoResult<bool>;
}

/// SQLite-backed contact repository.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn insert_contact(&self, contact: &Contact) -> RepoResult<ContactId> {
        contact.validate()?;

        self.conn.execute(
            "INSERT INTO contacts (
                id,
                full_name,
                primary_email,
                total_spent_cents,
                last_transaction_date,
                created_by,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                contact.id.to_string(),
                contact.full_name.as_deref(),
                contact.primary_email(),
                contact.total_spent_cents,
                contact.last_transaction_date.map(format_iso_date),
                contact.created_by.as_str(),
                contact.created_at,
                contact.updated_at,
            ],
        )?;
        sync_children(self.conn, contact)?;

        Ok(contact.id)
    }

    fn save_contact(&self, contact: &Contact) -> RepoResult<()> {
        contact.validate()?;

        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                full_name = ?2,
                primary_email = ?3,
                updated_at = ?4
             WHERE id = ?1;",
            params![
                contact.id.to_string(),
                contact.full_name.as_deref(),
                contact.primary_email(),
                contact.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(contact.id));
        }

        sync_children(self.conn, contact)
    }

    fn delete_unreferenced_contact(&self, id: ContactId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM contacts WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let mut contact = parse_contact_row(row)?;
            load_children(self.conn, &mut contact)?;
            return Ok(Some(contact));
        }
        Ok(None)
    }

    fn list_contacts(&self) -> RepoResult<Vec<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            let mut contact = parse_contact_row(row)?;
            load_children(self.conn, &mut contact)?;
            contacts.push(contact);
        }
        Ok(contacts)
    }

    fn count_contacts(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn find_contact_by_email(&self, email: &str) -> RepoResult<Option<ContactId>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT contact_id FROM contact_emails WHERE email = ?1 COLLATE NOCASE;",
                [normalize_email(email)],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|text| parse_contact_id(&text, "contact_emails.contact_id"))
            .transpose()
    }

    fn append_audit(&self, record: &AuditRecord) -> RepoResult<bool> {
        let inserted = match record.disposition {
            AuditDisposition::Applied => self.conn.execute(
                "INSERT INTO audit_log (
                    contact_id, field, old_value, new_value, changed_by, changed_at, disposition
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'applied');",
                params![
                    record.contact_id.to_string(),
                    record.field.as_str(),
                    record.old_value.as_deref(),
                    record.new_value.as_deref(),
                    record.changed_by.as_str(),
                    record.changed_at,
                ],
            )?,
            AuditDisposition::Rejected => self.conn.execute(
                "INSERT INTO audit_log (
                    contact_id, field, old_value, new_value, changed_by, changed_at, disposition
                 )
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'rejected'
                 WHERE NOT EXISTS (
                    SELECT 1
                    FROM audit_log
                    WHERE contact_id = ?1
                      AND field = ?2
                      AND old_value IS ?3
                      AND new_value IS ?4
                      AND changed_by = ?5
                      AND disposition = 'rejected'
                 );",
                params![
                    record.contact_id.to_string(),
                    record.field.as_str(),
                    record.old_value.as_deref(),
                    record.new_value.as_deref(),
                    record.changed_by.as_str(),
                    record.changed_at,
                ],
            )?,
        };
        Ok(inserted == 1)
    }

    fn list_audit(&self, id: ContactId) -> RepoResult<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, field, old_value, new_value, changed_by, changed_at, disposition
             FROM audit_log
             WHERE contact_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_audit_row(row)?);
        }
        Ok(records)
    }

    fn record_transaction(
        &self,
        contact_id: ContactId,
        record: &TransactionRecord,
        now_ms: i64,
    ) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO contact_transactions (
                source_system, transaction_id, contact_id, amount_cents, transaction_date
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                record.source_system.as_str(),
                record.transaction_id.as_str(),
                contact_id.to_string(),
                record.amount_cents,
                format_iso_date(record.transaction_date),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                total_spent_cents = (
                    SELECT COALESCE(SUM(amount_cents), 0)
                    FROM contact_transactions
                    WHERE contact_id = ?1
                ),
                last_transaction_date = (
                    SELECT MAX(transaction_date)
                    FROM contact_transactions
                    WHERE contact_id = ?1
                ),
                updated_at = MAX(updated_at, ?2)
             WHERE id = ?1;",
            params![contact_id.to_string(), now_ms],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(contact_id));
        }
        Ok(true)
    }
}

fn sync_children(conn: &Connection, contact: &Contact) -> RepoResult<()> {
    let id = contact.id.to_string();

    let owned_emails = load_email_keys(conn, &id)?;
    // Clear stale primaries first so the one-primary index never trips mid-sync.
    for entry in contact.emails.iter().filter(|entry| !entry.is_primary) {
        conn.execute(
            "UPDATE contact_emails SET is_primary = 0 WHERE email = ?1 AND contact_id = ?2;",
            params![entry.address.as_str(), id],
        )?;
    }
    for entry in &contact.emails {
        if owned_emails.contains(&normalize_email(&entry.address)) {
            conn.execute(
                "UPDATE contact_emails SET is_primary = ?3 WHERE email = ?1 AND contact_id = ?2;",
                params![entry.address.as_str(), id, bool_to_int(entry.is_primary)],
            )?;
        } else {
            conn.execute(
                "INSERT INTO contact_emails (email, contact_id, is_primary, created_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    entry.address.as_str(),
                    id,
                    bool_to_int(entry.is_primary),
                    contact.updated_at,
                ],
            )?;
        }
    }

    for entry in &contact.phones {
        conn.execute(
            "INSERT OR IGNORE INTO contact_phones (contact_id, digits, phone, is_primary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                id,
                entry.digits(),
                entry.number.as_str(),
                bool_to_int(entry.is_primary),
                contact.updated_at,
            ],
        )?;
    }

    for record in contact.addresses.iter().filter(|record| !record.is_primary) {
        conn.execute(
            "UPDATE contact_addresses
             SET is_primary = 0
             WHERE contact_id = ?1 AND address_type = ?2 AND address_key = ?3;",
            params![
                id,
                record.address.address_type.as_str(),
                record.address.key()
            ],
        )?;
    }
    for record in &contact.addresses {
        let address = &record.address;
        conn.execute(
            "INSERT INTO contact_addresses (
                contact_id, address_type, address_key, line1, line2, city, state,
                postal_code, country, is_primary, source_system, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (contact_id, address_type, address_key)
             DO UPDATE SET is_primary = excluded.is_primary;",
            params![
                id,
                address.address_type.as_str(),
                address.key(),
                address.line1.as_str(),
                address.line2.as_deref(),
                address.city.as_deref(),
                address.state.as_deref(),
                address.postal_code.as_deref(),
                address.country.as_deref(),
                bool_to_int(record.is_primary),
                record.source_system.as_str(),
                record.created_at,
                record.updated_at,
            ],
        )?;
    }

    for tag in &contact.tags {
        conn.execute(
            "INSERT OR IGNORE INTO contact_tags (contact_id, tag) VALUES (?1, ?2);",
            params![id, tag.as_str()],
        )?;
    }

    Ok(())
}

fn load_email_keys(conn: &Connection, contact_id: &str) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT email FROM contact_emails WHERE contact_id = ?1;")?;
    let mut rows = stmt.query([contact_id])?;
    let mut keys = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        keys.insert(normalize_email(&value));
    }
    Ok(keys)
}

fn load_children(conn: &Connection, contact: &mut Contact) -> RepoResult<()> {
    let id = contact.id.to_string();

    let mut stmt = conn.prepare(
        "SELECT email, is_primary
         FROM contact_emails
         WHERE contact_id = ?1
         ORDER BY is_primary DESC, created_at ASC, email ASC;",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    while let Some(row) = rows.next()? {
        contact.emails.push(EmailEntry {
            address: row.get(0)?,
            is_primary: parse_flag(row.get(1)?, "contact_emails.is_primary")?,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT phone, is_primary
         FROM contact_phones
         WHERE contact_id = ?1
         ORDER BY is_primary DESC, created_at ASC, digits ASC;",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    while let Some(row) = rows.next()? {
        contact.phones.push(PhoneEntry {
            number: row.get(0)?,
            is_primary: parse_flag(row.get(1)?, "contact_phones.is_primary")?,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT address_type, line1, line2, city, state, postal_code, country,
                is_primary, source_system, created_at, updated_at
         FROM contact_addresses
         WHERE contact_id = ?1
         ORDER BY address_type ASC, is_primary DESC, created_at ASC, address_key ASC;",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    while let Some(row) = rows.next()? {
        let type_text: String = row.get(0)?;
        contact.addresses.push(AddressRecord {
            address: PostalAddress {
                address_type: parse_address_type(&type_text, "contact_addresses.address_type")?,
                line1: row.get(1)?,
                line2: row.get(2)?,
                city: row.get(3)?,
                state: row.get(4)?,
                postal_code: row.get(5)?,
                country: row.get(6)?,
            },
            is_primary: parse_flag(row.get(7)?, "contact_addresses.is_primary")?,
            source_system: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        });
    }

    let mut stmt =
        conn.prepare("SELECT tag FROM contact_tags WHERE contact_id = ?1 ORDER BY tag ASC;")?;
    let mut rows = stmt.query([id.as_str()])?;
    while let Some(row) = rows.next()? {
        contact.tags.insert(row.get(0)?);
    }

    let mut stmt = conn.prepare(
        "SELECT source_system, external_id
         FROM external_identities
         WHERE contact_id = ?1
         ORDER BY source_system ASC;",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    let mut external_ids = BTreeMap::new();
    while let Some(row) = rows.next()? {
        external_ids.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
    }
    contact.external_ids = external_ids;

    Ok(())
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id_text: String = row.get("id")?;
    let id = parse_contact_id(&id_text, "contacts.id")?;
    let last_transaction_date = row
        .get::<_, Option<String>>("last_transaction_date")?
        .map(|value| parse_iso_date(&value, "contacts.last_transaction_date"))
        .transpose()?;

    let mut contact = Contact::with_id(id, row.get::<_, String>("created_by")?, 0);
    contact.full_name = row.get("full_name")?;
    contact.total_spent_cents = row.get("total_spent_cents")?;
    contact.last_transaction_date = last_transaction_date;
    contact.created_at = row.get("created_at")?;
    contact.updated_at = row.get("updated_at")?;
    Ok(contact)
}

fn parse_audit_row(row: &Row<'_>) -> RepoResult<AuditRecord> {
    let contact_text: String = row.get("contact_id")?;
    let field_text: String = row.get("field")?;
    let disposition_text: String = row.get("disposition")?;

    Ok(AuditRecord {
        contact_id: parse_contact_id(&contact_text, "audit_log.contact_id")?,
        field: ProtectedField::parse(&field_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid field `{field_text}` in audit_log.field"))
        })?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        changed_by: row.get("changed_by")?,
        changed_at: row.get("changed_at")?,
        disposition: AuditDisposition::parse(&disposition_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid disposition `{disposition_text}` in audit_log.disposition"
            ))
        })?,
    })
}
