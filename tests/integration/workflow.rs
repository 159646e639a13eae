//! Library-level workflows over local `file://` releases.

use anyhow::Result;
use safeup_cli::config::UpdaterConfig;
use safeup_cli::core::{UpdateState, UpdateStatus};
use safeup_cli::test_utils::{ArchiveBuilder, InstallFixture};
use safeup_cli::update::UpdateEngine;
use serial_test::serial;

const SCHEMA: &str = "CREATE TABLE quotes (symbol TEXT PRIMARY KEY, price REAL);
                      INSERT INTO quotes VALUES ('ACME', 12.5);";

#[tokio::test]
async fn test_update_from_local_release() -> Result<()> {
    let fixture = InstallFixture::with_database("0.9.0", SCHEMA)?;
    fixture.write_file(".env", "SECRET=keep-me")?;

    let archive = ArchiveBuilder::new("app-main")
        .file("VERSION", "1.0.0\n")
        .file("app.py", "print('1.0.0')")
        .file(".env", "SECRET=from-release")
        .file("migrations/0001_add_watchlist.sql", "CREATE TABLE watchlist (symbol TEXT);");
    let url = fixture.publish(&archive, "1.0.0")?;

    let mut config = fixture.config(&url);
    config.protected.push(".env".to_string());
    let engine = UpdateEngine::from_config(&config)?;

    let check = engine.check().await?;
    assert!(check.update_available);

    let report = engine.perform(false).await?;
    assert_eq!(report.status, UpdateStatus::Updated, "{}", report.detail);
    assert_eq!(report.final_state, UpdateState::Committed);
    assert_eq!(fixture.read_file(".env").unwrap(), b"SECRET=keep-me");
    assert_eq!(fixture.read_file("app.py").unwrap(), b"print('1.0.0')");
    assert!(fixture.table_exists("watchlist")?);
    assert!(fixture.staging_is_empty());
    Ok(())
}

#[tokio::test]
async fn test_archive_without_top_directory_is_rejected() -> Result<()> {
    let fixture = InstallFixture::with_database("0.9.0", SCHEMA)?;
    fixture.write_file("app.py", "print('0.9.0')")?;
    let db_before = fixture.database_bytes();

    let archive = ArchiveBuilder::flat().file("VERSION", "1.0.0\n").file("app.py", "flat");
    let url = fixture.publish(&archive, "1.0.0")?;
    let engine = UpdateEngine::from_config(&fixture.config(&url))?;

    let report = engine.perform(false).await?;
    assert_eq!(report.status, UpdateStatus::FailedSafely, "{}", report.detail);
    assert_eq!(report.final_state, UpdateState::Failed);
    assert!(report.backup.is_none());
    assert!(fixture.backups()?.is_empty());
    assert_eq!(fixture.read_file("app.py").unwrap(), b"print('0.9.0')");
    assert_eq!(fixture.read_file("VERSION").unwrap(), b"0.9.0\n");
    assert_eq!(fixture.database_bytes(), db_before);
    assert!(fixture.staging_is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_release_fails_safely() -> Result<()> {
    let fixture = InstallFixture::with_database("0.9.0", SCHEMA)?;
    let url = fixture.publish(&ArchiveBuilder::new("app-main").file("VERSION", "1.0.0"), "1.0.0")?;
    std::fs::remove_file(fixture.temp.path().join("releases").join("app.zip"))?;
    let db_before = fixture.database_bytes();

    let engine = UpdateEngine::from_config(&fixture.config(&url))?;
    let report = engine.perform(false).await?;
    assert_eq!(report.status, UpdateStatus::FailedSafely);
    assert!(report.detail.contains("no changes were made"));
    assert_eq!(fixture.database_bytes(), db_before);
    assert!(fixture.backups()?.is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_config_found_in_working_directory() -> Result<()> {
    let fixture = InstallFixture::with_database("0.9.0", SCHEMA)?;
    let url = fixture.publish(&ArchiveBuilder::new("app-main").file("VERSION", "1.0.0"), "1.0.0")?;
    fixture.write_config(&fixture.config(&url))?;

    let previous = std::env::current_dir()?;
    std::env::set_current_dir(fixture.temp.path())?;
    let loaded = UpdaterConfig::load(None).await;
    std::env::set_current_dir(previous)?;

    let loaded = loaded?;
    assert_eq!(loaded.source.repository, url);
    assert!(loaded.install_root.ends_with("app"));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_explicit_config_must_exist() {
    let missing = std::env::temp_dir().join("safeup-missing").join("safeup.toml");
    let err = UpdaterConfig::load(Some(&missing)).await.unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}
