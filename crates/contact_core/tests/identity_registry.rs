use contact_core::db::open_db_in_memory;
use contact_core::model::contact::ExternalIdentity;
use contact_core::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use contact_core::repo::identity_repo::{IdentityInsert, IdentityRepository, SqliteIdentityRepository};
use contact_core::{ConsolidationError, IdentityRegistry, IdentitySeed, ResolvedBy};
use rusqlite::Connection;

type Registry<'conn> =
    IdentityRegistry<SqliteContactRepository<'conn>, SqliteIdentityRepository<'conn>>;

fn registry(conn: &Connection) -> Registry<'_> {
    IdentityRegistry::new(
        SqliteContactRepository::try_new(conn).unwrap(),
        SqliteIdentityRepository::try_new(conn).unwrap(),
    )
}

fn seed(email: &str) -> IdentitySeed {
    IdentitySeed {
        email: Some(email.to_string()),
    }
}

#[test]
fn unknown_key_creates_contact_once() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let first = registry
        .resolve_or_create("Shopify", "cus_1", &seed("rita@example.com"), 1_000)
        .unwrap();
    assert_eq!(first.resolved_by, ResolvedBy::Created);

    let second = registry
        .resolve_or_create("shopify", " cus_1 ", &seed("rita@example.com"), 2_000)
        .unwrap();
    assert_eq!(second.contact_id, first.contact_id);
    assert_eq!(second.resolved_by, ResolvedBy::ExistingKey);
    assert_eq!(registry.contacts().count_contacts().unwrap(), 1);

    let contact = registry.contacts().get_contact(first.contact_id).unwrap().unwrap();
    assert_eq!(contact.primary_email(), Some("rita@example.com"));
    assert_eq!(contact.created_by, "shopify");
    assert_eq!(contact.external_ids.get("shopify").map(String::as_str), Some("cus_1"));
}

#[test]
fn created_contact_keeps_email_spelling() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let created = registry
        .resolve_or_create("hubspot", "hs_7", &seed(" Rita.Fox@Example.com "), 1_000)
        .unwrap();
    let contact = registry.contacts().get_contact(created.contact_id).unwrap().unwrap();
    assert_eq!(contact.primary_email(), Some("Rita.Fox@Example.com"));
    assert_eq!(
        registry.contacts().find_contact_by_email("rita.fox@example.com").unwrap(),
        Some(created.contact_id)
    );
}

#[test]
fn new_key_attaches_to_contact_with_same_email() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let created = registry
        .resolve_or_create("shopify", "cus_1", &seed("rita@example.com"), 1_000)
        .unwrap();
    let matched = registry
        .resolve_or_create("stripe", "acct_9", &seed("RITA@example.COM"), 2_000)
        .unwrap();

    assert_eq!(matched.contact_id, created.contact_id);
    assert_eq!(matched.resolved_by, ResolvedBy::EmailMatch);
    assert_eq!(registry.contacts().count_contacts().unwrap(), 1);

    let keys: Vec<(String, String)> = SqliteIdentityRepository::try_new(&conn)
        .unwrap()
        .list_for_contact(created.contact_id)
        .unwrap()
        .into_iter()
        .map(|identity| (identity.source_system, identity.external_id))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("shopify".to_string(), "cus_1".to_string()),
            ("stripe".to_string(), "acct_9".to_string()),
        ]
    );
}

#[test]
fn mapped_key_with_foreign_email_is_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let rita = registry
        .resolve_or_create("shopify", "cus_1", &seed("rita@example.com"), 1_000)
        .unwrap();
    let emily = registry
        .resolve_or_create("shopify", "cus_2", &seed("emily@example.com"), 1_000)
        .unwrap();

    let err = registry
        .resolve_or_create("shopify", "cus_1", &seed("emily@example.com"), 2_000)
        .unwrap_err();
    match err {
        ConsolidationError::IdentityConflict {
            recorded_contact,
            candidate_contact,
            ..
        } => {
            assert_eq!(recorded_contact, rita.contact_id);
            assert_eq!(candidate_contact, emily.contact_id);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn second_id_from_same_source_is_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    registry
        .resolve_or_create("shopify", "cus_1", &seed("rita@example.com"), 1_000)
        .unwrap();
    let err = registry
        .resolve_or_create("shopify", "cus_77", &seed("rita@example.com"), 2_000)
        .unwrap_err();
    assert!(matches!(err, ConsolidationError::IdentityConflict { .. }));

    let identities = SqliteIdentityRepository::try_new(&conn).unwrap();
    assert_eq!(identities.lookup("shopify", "cus_77").unwrap(), None);
}

#[test]
fn key_without_email_creates_separate_contacts() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let a = registry
        .resolve_or_create("eventbrite", "att_1", &IdentitySeed::default(), 1_000)
        .unwrap();
    let b = registry
        .resolve_or_create("eventbrite", "att_2", &IdentitySeed::default(), 1_000)
        .unwrap();
    assert_ne!(a.contact_id, b.contact_id);
}

#[test]
fn blank_key_is_a_validation_error() {
    let conn = open_db_in_memory().unwrap();
    let err = registry(&conn)
        .resolve_or_create("shopify", "   ", &IdentitySeed::default(), 1_000)
        .unwrap_err();
    assert!(matches!(err, ConsolidationError::Validation { .. }));
}

#[test]
fn racing_insert_of_same_key_reports_winner() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);
    let winner = registry
        .resolve_or_create("shopify", "cus_1", &IdentitySeed::default(), 1_000)
        .unwrap();

    let loser = contact_core::Contact::new("shopify", 1_000);
    registry.contacts().insert_contact(&loser).unwrap();
    let identities = SqliteIdentityRepository::try_new(&conn).unwrap();
    let outcome = identities
        .insert(&ExternalIdentity {
            contact_id: loser.id,
            source_system: "shopify".to_string(),
            external_id: "cus_1".to_string(),
        })
        .unwrap();
    assert_eq!(outcome, IdentityInsert::AlreadyMapped(winner.contact_id));
}
