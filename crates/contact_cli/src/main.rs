//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `contact_core` linkage, config loading and store bootstrap.
//! - Report how many stored contacts reach the configured mailing tier.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `contact_cli [config.toml]`

use contact_core::clock::today_utc;
use contact_core::db::migrations::current_user_version;
use contact_core::logging::init_from_settings;
use contact_core::repo::contact_repo::{ContactRepository, SqliteContactRepository};
use contact_core::{open_db, open_db_in_memory, AppConfig, MailingListAssembler, ScoringEngine};
use log::info;
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("contact_cli error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let file_logging = init_from_settings(&config.logging)?;

    let conn = match config.database_path.as_deref() {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let contacts = SqliteContactRepository::try_new(&conn)?.count_contacts()?;
    let engine = ScoringEngine::new(config.import.trusted_sources.clone());
    let mailable = MailingListAssembler::new(engine)
        .assemble_from_store(&conn, config.mailing.min_tier, today_utc())?
        .len();

    println!("contact_core ping={}", contact_core::ping());
    println!("contact_core version={}", contact_core::core_version());
    println!("schema_version={}", current_user_version(&conn)?);
    println!("contacts={contacts}");
    println!("mailable={mailable} min_tier={}", config.mailing.min_tier);
    println!(
        "tag_mapping_version={} labels={}",
        config.tag_mapping.version(),
        config.tag_mapping.len()
    );
    println!("file_logging={file_logging}");
    info!("event=cli_probe module=cli status=ok contacts={contacts}");
    Ok(())
}
