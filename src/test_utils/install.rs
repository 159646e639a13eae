//! A throwaway installation directory for engine and CLI tests.

use crate::config::UpdaterConfig;
use crate::constants::{BACKUP_INFIX, CONFIG_FILE_NAME};
use crate::test_utils::ArchiveBuilder;
use crate::migration::SchemaMigrationEngine;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An installation at `<temp>/app` with a `data/` directory and a staging
/// area at `<temp>/staging`.
pub struct InstallFixture {
    pub temp: TempDir,
    pub root: PathBuf,
    pub staging: PathBuf,
}

impl InstallFixture {
    pub fn new() -> Result<Self> {
        super::init_test_logging(None);

        let temp = TempDir::new()?;
        let root = temp.path().join("app");
        let staging = temp.path().join("staging");
        fs::create_dir_all(root.join("data"))?;
        fs::create_dir_all(&staging)?;

        Ok(Self {
            temp,
            root,
            staging,
        })
    }

    /// An installation at `version` with a database created by `schema`.
    pub fn with_database(version: &str, schema: &str) -> Result<Self> {
        let fixture = Self::new()?;
        fixture.write_version(version)?;
        fixture.execute(schema)?;
        Ok(fixture)
    }

    /// Configuration pointing at this installation, without retries or backoff.
    #[must_use]
    pub fn config(&self, repository: &str) -> UpdaterConfig {
        let mut config = UpdaterConfig {
            install_root: self.root.clone(),
            ..UpdaterConfig::default()
        };
        config.source.repository = repository.to_string();
        config.update.retries = 0;
        config.update.staging_dir = Some(self.staging.clone());
        config
    }

    /// Publish `archive` as a local release next to a `VERSION` file holding
    /// `version`. Returns the archive's `file://` URL, usable as a repository.
    pub fn publish(&self, archive: &ArchiveBuilder, version: &str) -> Result<String> {
        let releases = self.temp.path().join("releases");
        fs::create_dir_all(&releases)?;
        let path = releases.join("app.zip");
        archive.write_to(&path)?;
        fs::write(releases.join("VERSION"), format!("{version}\n"))?;
        Ok(Self::file_url(&path))
    }

    /// Write `config` as `<temp>/safeup.toml` and return its path.
    pub fn write_config(&self, config: &UpdaterConfig) -> Result<PathBuf> {
        let path = self.temp.path().join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(config).context("Failed to serialize test config")?;
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn write_version(&self, version: &str) -> Result<()> {
        self.write_file("VERSION", format!("{version}\n"))
    }

    pub fn write_file(&self, relative: &str, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    #[must_use]
    pub fn read_file(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.root.join(relative)).ok()
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.root.join("data/app.db")
    }

    /// Run `sql` against the live database, creating it if needed.
    pub fn execute(&self, sql: &str) -> Result<()> {
        let conn = Connection::open(self.database_path())?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    #[must_use]
    pub fn database_bytes(&self) -> Option<Vec<u8>> {
        fs::read(self.database_path()).ok()
    }

    /// Ids in the migration ledger, ascending.
    pub fn ledger_ids(&self) -> Result<Vec<i64>> {
        Ok(SchemaMigrationEngine::read_ledger(&self.database_path())?.into_iter().map(|r| r.id).collect())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = Connection::open(self.database_path())?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Backup files in the data directory, sorted by name.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        let mut found: Vec<PathBuf> = fs::read_dir(self.root.join("data"))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name().is_some_and(|n| {
                    let name = n.to_string_lossy();
                    name.contains(BACKUP_INFIX) && !name.ends_with(".meta.json")
                })
            })
            .collect();
        found.sort();
        Ok(found)
    }

    /// Whether nothing is left in the staging area.
    #[must_use]
    pub fn staging_is_empty(&self) -> bool {
        is_empty_dir(&self.staging)
    }

    /// `file://` URL of `path`.
    #[must_use]
    pub fn file_url(path: &Path) -> String {
        reqwest::Url::from_file_path(path).map_or_else(|()| format!("file://{}", path.display()), |u| u.to_string())
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}
