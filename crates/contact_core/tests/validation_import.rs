use chrono::NaiveDate;
use contact_core::db::open_db_in_memory;
use contact_core::ingest::{read_csv_rows, RawRow};
use contact_core::model::validation::DpvMatchCode;
use contact_core::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use contact_core::repo::identity_repo::{IdentityRepository, SqliteIdentityRepository};
use contact_core::repo::profile_repo::load_contact_profile;
use contact_core::{
    AddressType, AppConfig, ContactId, Disqualifier, ImportBatch, ImportOrchestrator, IssueKind,
    RunMode, ScoringEngine, ValidationBatch, ValidationImporter,
};
use rusqlite::Connection;

const NOW: i64 = 1_717_200_000_000;

const CUSTOMERS_CSV: &str = "\
external_id,source_system,email,full_name,billing_address1,billing_city,billing_state,billing_postal_code
cus_1,shopify,rita@example.com,Rita Fox,12 Elm St,Springfield,IL,62701
cus_2,shopify,emily@example.com,Emily Bamford,4 Oak Ave,Madison,WI,53703
";

fn seeded() -> (Connection, ContactId, ContactId) {
    let mut conn = open_db_in_memory().unwrap();
    let config = AppConfig::default();
    let batch = ImportBatch {
        label: "customers.csv".to_string(),
        rows: read_csv_rows(CUSTOMERS_CSV.as_bytes()).unwrap(),
    };
    let summary = ImportOrchestrator::from_config(&config)
        .run(&mut conn, &batch, RunMode::Execute, NOW)
        .unwrap();
    assert_eq!(summary.created, 2);

    let identities = SqliteIdentityRepository::try_new(&conn).unwrap();
    let rita = identities.lookup("shopify", "cus_1").unwrap().unwrap();
    let emily = identities.lookup("shopify", "cus_2").unwrap().unwrap();
    (conn, rita, emily)
}

fn validation_row(number: usize, reference: &str, dpv: &str) -> RawRow {
    RawRow::new(number)
        .with("contact_reference", reference)
        .with("address_type", "billing")
        .with("dpv_match_code", dpv)
        .with("vacant", "N")
        .with("rdi", "R")
        .with("validated_at", "2024-05-15")
}

fn usps(rows: Vec<RawRow>) -> ValidationBatch {
    ValidationBatch {
        provider: "USPS".to_string(),
        rows,
    }
}

#[test]
fn reingesting_same_batch_is_unchanged() {
    let (mut conn, rita, emily) = seeded();
    let batch = usps(vec![
        validation_row(1, &rita.to_string(), "Y"),
        validation_row(2, "emily@example.com", "S"),
    ]);
    let importer = ValidationImporter::new();

    let first = importer.ingest(&mut conn, &batch).unwrap();
    assert_eq!(first.total_rows, 2);
    assert_eq!(first.inserted, 2);
    assert!(first.skipped.is_empty());
    assert!(first.errors.is_empty());

    let second = importer.ingest(&mut conn, &batch).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 2);

    let profile = load_contact_profile(&conn, emily).unwrap().unwrap();
    let result = profile.validation(AddressType::Billing).unwrap();
    assert_eq!(result.dpv_match_code, DpvMatchCode::SecondaryIgnored);
    assert_eq!(result.provider, "usps");
}

#[test]
fn newer_result_replaces_previous_one() {
    let (mut conn, rita, _) = seeded();
    let importer = ValidationImporter::new();
    importer
        .ingest(&mut conn, &usps(vec![validation_row(1, "rita@example.com", "D")]))
        .unwrap();

    let summary = importer
        .ingest(
            &mut conn,
            &usps(vec![
                validation_row(1, "rita@example.com", "Y").with("validated_at", "2024-06-01")
            ]),
        )
        .unwrap();
    assert_eq!(summary.updated, 1);

    let profile = load_contact_profile(&conn, rita).unwrap().unwrap();
    let result = profile.validation(AddressType::Billing).unwrap();
    assert_eq!(result.dpv_match_code, DpvMatchCode::Confirmed);
    assert_eq!(result.validated_at, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
}

#[test]
fn unknown_reference_is_skipped_not_fatal() {
    let (mut conn, _, _) = seeded();
    let summary = ValidationImporter::new()
        .ingest(
            &mut conn,
            &usps(vec![
                validation_row(1, "ghost@example.com", "Y"),
                validation_row(2, "00000000-0000-4000-8000-000000000000", "Y"),
                validation_row(3, "rita@example.com", "Y"),
            ]),
        )
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.skipped.len(), 2);
    assert_eq!(summary.skipped[0].row_number, 1);
    assert_eq!(summary.skipped[0].kind, IssueKind::ProviderData);
    assert_eq!(summary.skipped[0].key.as_deref(), Some("ghost@example.com"));
    assert!(summary.errors.is_empty());
}

#[test]
fn malformed_row_is_reported_as_error() {
    let (mut conn, _, _) = seeded();
    let summary = ValidationImporter::new()
        .ingest(
            &mut conn,
            &usps(vec![
                validation_row(1, "rita@example.com", "Q"),
                validation_row(2, "emily@example.com", "Y"),
            ]),
        )
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].row_number, 1);
    assert_eq!(summary.errors[0].key.as_deref(), Some("rita@example.com"));
    assert_eq!(summary.errors[0].kind, IssueKind::Validation);
}

#[test]
fn move_is_recorded_without_touching_live_address() {
    let (mut conn, rita, _) = seeded();
    let row = validation_row(1, "rita@example.com", "Y")
        .with("move_date", "202405")
        .with("move_type", "I")
        .with("new_address1", "400 Lake Rd")
        .with("new_city", "Chicago");
    let batch = usps(vec![row]);
    let importer = ValidationImporter::new();

    let first = importer.ingest(&mut conn, &batch).unwrap();
    assert_eq!(first.moves_recorded, 1);
    let second = importer.ingest(&mut conn, &batch).unwrap();
    assert_eq!(second.moves_recorded, 0);
    assert_eq!(second.unchanged, 1);

    let contact = SqliteContactRepository::try_new(&conn)
        .unwrap()
        .get_contact(rita)
        .unwrap()
        .unwrap();
    let billing = contact.primary_address(AddressType::Billing).unwrap();
    assert_eq!(billing.address.line1, "12 Elm St");

    let profile = load_contact_profile(&conn, rita).unwrap().unwrap();
    assert_eq!(profile.moves.len(), 1);
    assert_eq!(
        profile.moves[0].move_date,
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    );
    assert_eq!(
        profile.moves[0].new_address.as_ref().unwrap().line1,
        "400 Lake Rd"
    );

    let result = ScoringEngine::default().score(
        &profile,
        AddressType::Billing,
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
    );
    assert_eq!(result.score, 0);
    assert_eq!(result.disqualified, Some(Disqualifier::NcoaMove));
}

#[test]
fn csv_result_file_is_ingested() {
    let (mut conn, _, emily) = seeded();
    let text = "\
contact_reference,address_type,dpv_match_code,vacant,rdi,validated_at
emily@example.com,billing,Y,Y,C,20240520
";
    let summary = ValidationImporter::new()
        .ingest(&mut conn, &usps(read_csv_rows(text.as_bytes()).unwrap()))
        .unwrap();
    assert_eq!(summary.inserted, 1);

    let profile = load_contact_profile(&conn, emily).unwrap().unwrap();
    assert!(profile.validation(AddressType::Billing).unwrap().vacant);
}
