//! Loads scoring read models.

use crate::model::contact::ContactId;
use crate::model::profile::ContactProfile;
use crate::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use crate::repo::validation_repo::{SqliteValidationRepository, ValidationRepository};
use crate::repo::RepoResult;
use rusqlite::Connection;

/// Loads one contact with its validation results and move records.
pub fn load_contact_profile(
    conn: &Connection,
    contact_id: ContactId,
) -> RepoResult<Option<ContactProfile>> {
    let contacts = SqliteContactRepository::try_new(conn)?;
    let validations = SqliteValidationRepository::try_new(conn)?;
    let Some(contact) = contacts.get_contact(contact_id)? else {
        return Ok(None);
    };
    Ok(Some(ContactProfile {
        validations: validations.validations_for(contact.id)?,
        moves: validations.moves_for(contact.id)?,
        contact,
    }))
}

/// Loads every contact profile, ordered by contact id.
pub fn load_contact_profiles(conn: &Connection) -> RepoResult<Vec<ContactProfile>> {
    let contacts = SqliteContactRepository::try_new(conn)?;
    let validations = SqliteValidationRepository::try_new(conn)?;
    contacts
        .list_contacts()?
        .into_iter()
        .map(|contact| {
            Ok(ContactProfile {
                validations: validations.validations_for(contact.id)?,
                moves: validations.moves_for(contact.id)?,
                contact,
            })
        })
        .collect()
}
