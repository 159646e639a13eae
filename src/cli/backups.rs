//! `safeup backups`: inspect and manage database backups.
//!
//! Backups live next to the database as
//! `<name>_backup_<YYYYMMDDHHMMSS>.<ext>`. `create` and `restore` take the
//! update lock, so they never run underneath an update.

use crate::update::{BackupRecord, HttpTransport, UpdateEngine};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Manage database backups.
#[derive(Args, Debug)]
pub struct BackupsCommand {
    #[command(subcommand)]
    action: BackupsAction,
}

#[derive(Subcommand, Debug)]
enum BackupsAction {
    /// List backups, oldest first.
    List {
        /// Print the backups as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Copy the live database to a new backup.
    Create,

    /// Overwrite the live database with a backup.
    ///
    /// Stop the application first. Without FILE the newest backup is used.
    Restore {
        /// Backup file, either a path or a bare file name in the data directory.
        file: Option<PathBuf>,
    },
}

impl BackupsCommand {
    pub async fn execute<T: HttpTransport>(self, engine: &UpdateEngine<T>) -> Result<()> {
        match self.action {
            BackupsAction::List {
                json,
            } => list(engine, json),
            BackupsAction::Create => create(engine).await,
            BackupsAction::Restore {
                file,
            } => restore(engine, file.as_deref()).await,
        }
    }
}

fn list<T: HttpTransport>(engine: &UpdateEngine<T>, json: bool) -> Result<()> {
    let records = engine.backups().list()?;

    if json {
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize backups")?;
        println!("{json}");
        return Ok(());
    }

    if records.is_empty() {
        println!("No backups of {}", engine.backups().database_path().display());
        return Ok(());
    }

    for record in &records {
        let version = record.version.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
        println!(
            "{}  {:<10}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            version,
            record.path.display()
        );
    }
    println!("\n{} backup(s)", records.len());
    Ok(())
}

async fn create<T: HttpTransport>(engine: &UpdateEngine<T>) -> Result<()> {
    let version = engine.current_version()?;
    let record = engine.with_lock(|backups| backups.backup(version.as_ref())).await??;
    println!("{} {}", "Backup created:".green(), record.path.display());
    Ok(())
}

async fn restore<T: HttpTransport>(engine: &UpdateEngine<T>, file: Option<&Path>) -> Result<()> {
    let record = match file {
        Some(file) => Some(find_backup(engine, file)?),
        None => None,
    };

    let restored = engine.with_lock(|backups| backups.restore(record.as_ref())).await??;
    println!("{} {}", "Database restored from".green(), restored.path.display());
    Ok(())
}

fn find_backup<T: HttpTransport>(engine: &UpdateEngine<T>, file: &Path) -> Result<BackupRecord> {
    let bare_name = file.components().count() == 1;
    let canonical = file.canonicalize().ok();

    engine
        .backups()
        .list()?
        .into_iter()
        .find(|record| {
            record.path == file
                || (bare_name && record.path.file_name() == Some(file.as_os_str()))
                || (canonical.is_some() && record.path.canonicalize().ok() == canonical)
        })
        .with_context(|| {
            format!(
                "{} is not a backup of {}. Run `safeup backups list` to see available backups",
                file.display(),
                engine.backups().database_path().display()
            )
        })
}
