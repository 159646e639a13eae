use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use safeup_cli::test_utils::{ArchiveBuilder, InstallFixture};
use std::path::{Path, PathBuf};

const SCHEMA: &str = "CREATE TABLE quotes (symbol TEXT PRIMARY KEY, price REAL);
                      INSERT INTO quotes VALUES ('ACME', 12.5);";

fn release(version: &str) -> ArchiveBuilder {
    ArchiveBuilder::new("app-main")
        .file("VERSION", format!("{version}\n"))
        .file("app.py", format!("print('app {version}')"))
}

/// An installation at 1.2.0 with a published release and a written config.
fn setup(archive: &ArchiveBuilder, remote: &str) -> Result<(InstallFixture, PathBuf)> {
    let fixture = InstallFixture::with_database("1.2.0", SCHEMA)?;
    let url = fixture.publish(archive, remote)?;
    let config = fixture.write_config(&fixture.config(&url))?;
    Ok((fixture, config))
}

fn safeup(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("safeup").unwrap();
    cmd.arg("--quiet").arg("--config").arg(config).env_remove("RUST_LOG").env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_check_reports_available_update() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    safeup(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Current version: 1.2.0"))
        .stdout(predicate::str::contains("1.3.0"));
    Ok(())
}

#[test]
fn test_check_json() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    let output = safeup(&config).args(["check", "--json"]).output()?;
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["current_version"], "1.2.0");
    assert_eq!(json["remote_version"], "1.3.0");
    assert_eq!(json["update_available"], true);
    Ok(())
}

#[test]
fn test_update_then_up_to_date() -> Result<()> {
    let archive = release("1.3.0").file("migrations/0001_add_watchlist.sql", "CREATE TABLE watchlist (s TEXT);");
    let (fixture, config) = setup(&archive, "1.3.0")?;

    safeup(&config)
        .arg("update")
        .assert()
        .success()
        .stdout(predicate::str::contains("updated: Updated to version 1.3.0"))
        .stdout(predicate::str::contains("backup:"));

    assert_eq!(fixture.read_file("VERSION").unwrap(), b"1.3.0\n");
    assert_eq!(fixture.ledger_ids()?, vec![1]);
    assert_eq!(fixture.backups()?.len(), 1);

    safeup(&config).arg("update").assert().success().stdout(predicate::str::contains("up-to-date"));
    assert_eq!(fixture.backups()?.len(), 1);
    Ok(())
}

#[test]
fn test_update_json_report() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    let output = safeup(&config).args(["update", "--json"]).output()?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["status"], "updated");
    assert_eq!(report["final_state"], "committed");
    assert_eq!(report["to_version"], "1.3.0");
    Ok(())
}

#[test]
fn test_failed_migration_exits_nonzero() -> Result<()> {
    let archive = release("1.3.0").file("migrations/0001_broken.sql", "INSERT INTO missing VALUES (1);");
    let (fixture, config) = setup(&archive, "1.3.0")?;
    let db_before = fixture.database_bytes();

    safeup(&config)
        .arg("update")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("failed-restored"))
        .stdout(predicate::str::contains("failed:     migration 1"));

    assert_eq!(fixture.database_bytes(), db_before);
    Ok(())
}

#[test]
fn test_backups_create_list_restore() -> Result<()> {
    let (fixture, config) = setup(&release("1.3.0"), "1.3.0")?;
    let original = fixture.database_bytes();

    safeup(&config).args(["backups", "create"]).assert().success().stdout(predicate::str::contains("Backup created"));
    let backups = fixture.backups()?;
    assert_eq!(backups.len(), 1);
    let name = backups[0].file_name().unwrap().to_string_lossy().to_string();

    safeup(&config)
        .args(["backups", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&name))
        .stdout(predicate::str::contains("1.2.0"));

    fixture.execute("DELETE FROM quotes;")?;
    assert_ne!(fixture.database_bytes(), original);

    safeup(&config)
        .args(["backups", "restore", &name])
        .assert()
        .success()
        .stdout(predicate::str::contains("Database restored from"));
    assert_eq!(fixture.database_bytes(), original);
    Ok(())
}

#[test]
fn test_restore_unknown_backup_fails() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    safeup(&config)
        .args(["backups", "restore", "nope.db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a backup of"));
    Ok(())
}

#[test]
fn test_migrate_status_and_apply() -> Result<()> {
    let (fixture, config) = setup(&release("1.3.0"), "1.3.0")?;
    fixture.write_file("migrations/0001_add_notes.sql", "CREATE TABLE notes (body TEXT);")?;
    fixture.write_file("migrations/0002_add_alerts.sql", "CREATE TABLE alerts (id INTEGER);")?;

    safeup(&config)
        .args(["migrate", "--status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No migrations applied"))
        .stdout(predicate::str::contains("Pending: 1, 2"));
    assert!(fixture.ledger_ids()?.is_empty());

    safeup(&config).arg("migrate").assert().success().stdout(predicate::str::contains("Applied 2 migration(s)"));
    assert_eq!(fixture.ledger_ids()?, vec![1, 2]);

    safeup(&config)
        .args(["migrate", "--status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add_notes"))
        .stdout(predicate::str::contains("No pending migrations"));
    Ok(())
}

#[test]
fn test_restart_reports_outcome() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    safeup(&config).arg("restart").assert().success().stdout(predicate::str::is_empty().not());
    Ok(())
}

#[test]
fn test_missing_config_is_reported() {
    Command::cargo_bin("safeup")
        .unwrap()
        .args(["--config", "/nonexistent/safeup.toml", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_config_from_environment() -> Result<()> {
    let (_fixture, config) = setup(&release("1.3.0"), "1.3.0")?;

    Command::cargo_bin("safeup")?
        .env("SAFEUP_CONFIG", &config)
        .env_remove("RUST_LOG")
        .args(["--quiet", "check", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"update_available\": true"));
    Ok(())
}

#[test]
fn test_verbose_and_quiet_conflict() {
    Command::cargo_bin("safeup").unwrap().args(["-v", "-q", "check"]).assert().failure().code(2);
}
