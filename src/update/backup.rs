//! Timestamped copies of the database file.
//!
//! A backup is taken before anything in the installation is mutated and is
//! the only thing the engine can roll back to. Backups live next to the live
//! database:
//!
//! ```text
//! data/app.db
//! data/app_backup_20261016093012.db
//! data/app_backup_20261016093012.db.meta.json   # originating version
//! data/app_backup_20261016093012_1.db           # second backup in the same second
//! ```
//!
//! The live file name is fixed, so a backup is never mistaken for it. If the
//! live database has a write-ahead log, it is copied as `<backup>-wal` so the
//! pair opens as a consistent database.

use crate::constants::{BACKUP_INFIX, BACKUP_TIMESTAMP_FORMAT};
use crate::core::UpdateError;
use crate::utils::fs::FileSystem;
use crate::version::VersionTag;
use chrono::{Local, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const META_SUFFIX: &str = ".meta.json";

/// One snapshot of the database file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
    /// Installation version the snapshot was taken from.
    pub version: Option<VersionTag>,
    /// Disambiguates backups taken within the same second.
    #[serde(default)]
    pub sequence: u32,
}

/// What to return to if a mutating step fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestorePoint {
    Snapshot(BackupRecord),
    /// There was no database; restoring means removing whatever was created.
    Absent,
}

impl RestorePoint {
    #[must_use]
    pub const fn record(&self) -> Option<&BackupRecord> {
        match self {
            Self::Snapshot(record) => Some(record),
            Self::Absent => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct BackupMeta {
    version: Option<VersionTag>,
    database: PathBuf,
}

/// Creates, lists, prunes and restores database backups.
#[derive(Debug, Clone)]
pub struct DatabaseBackupManager {
    database: PathBuf,
    fs: Arc<dyn FileSystem>,
    pattern: Regex,
}

impl DatabaseBackupManager {
    pub fn new(database: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self, UpdateError> {
        let database = database.into();
        let (stem, ext) = split_name(&database)
            .ok_or_else(|| UpdateError::config(format!("{} is not a file path", database.display())))?;

        let pattern = Regex::new(&format!(
            r"^{}{}(\d{{14}})(?:_(\d+))?{}$",
            regex::escape(&stem),
            regex::escape(BACKUP_INFIX),
            regex::escape(&ext)
        ))
        .map_err(|e| UpdateError::config(format!("invalid backup name pattern: {e}")))?;

        Ok(Self {
            database,
            fs,
            pattern,
        })
    }

    #[must_use]
    pub fn database_path(&self) -> &Path {
        &self.database
    }

    fn directory(&self) -> &Path {
        self.database.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Record a restore point, copying the database if it exists.
    pub fn snapshot(&self, version: Option<&VersionTag>) -> Result<RestorePoint, UpdateError> {
        if self.fs.exists(&self.database) {
            self.backup(version).map(RestorePoint::Snapshot)
        } else {
            info!("No database at {}; restore point is empty", self.database.display());
            Ok(RestorePoint::Absent)
        }
    }

    /// Copy the database to a new timestamped backup.
    ///
    /// # Errors
    ///
    /// Any failure is a backup error, and no partial backup is left behind.
    pub fn backup(&self, version: Option<&VersionTag>) -> Result<BackupRecord, UpdateError> {
        self.backup_at(Local::now().naive_local(), version)
    }

    fn backup_at(&self, now: NaiveDateTime, version: Option<&VersionTag>) -> Result<BackupRecord, UpdateError> {
        if !self.fs.exists(&self.database) {
            return Err(backup_error(format!("database {} does not exist", self.database.display())));
        }

        // Second precision in names
        let created_at = now.with_nanosecond(0).unwrap_or(now);
        let mut sequence = 0;
        let mut path = self.backup_path(created_at, sequence);
        while self.fs.exists(&path) {
            sequence += 1;
            path = self.backup_path(created_at, sequence);
        }

        debug!("Backing up {} to {}", self.database.display(), path.display());
        let result = self.write_backup(&path, version);
        if let Err(e) = result {
            self.remove_backup_files(&path);
            return Err(e);
        }

        let record = BackupRecord {
            path,
            created_at,
            version: version.cloned(),
            sequence,
        };
        info!("Database backup created at {}", record.path.display());
        Ok(record)
    }

    fn write_backup(&self, path: &Path, version: Option<&VersionTag>) -> Result<(), UpdateError> {
        self.fs.copy_file(&self.database, path).map_err(|e| backup_error(e.to_string()))?;

        let wal = sidecar(&self.database, "-wal");
        if self.fs.exists(&wal) {
            self.fs.copy_file(&wal, &sidecar(path, "-wal")).map_err(|e| backup_error(e.to_string()))?;
        }

        let meta = BackupMeta {
            version: version.cloned(),
            database: self.database.clone(),
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| backup_error(e.to_string()))?;
        self.fs.write(&sidecar(path, META_SUFFIX), &json).map_err(|e| backup_error(e.to_string()))
    }

    fn backup_path(&self, at: NaiveDateTime, sequence: u32) -> PathBuf {
        let (stem, ext) = split_name(&self.database).unwrap_or_default();
        let stamp = at.format(BACKUP_TIMESTAMP_FORMAT);
        let name = if sequence == 0 {
            format!("{stem}{BACKUP_INFIX}{stamp}{ext}")
        } else {
            format!("{stem}{BACKUP_INFIX}{stamp}_{sequence}{ext}")
        };
        self.directory().join(name)
    }

    /// All backups of this database, oldest first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, UpdateError> {
        let dir = self.directory();
        if !self.fs.is_dir(dir) {
            return Ok(Vec::new());
        }

        let mut records: Vec<BackupRecord> = self
            .fs
            .list_dir(dir)
            .map_err(|e| backup_error(e.to_string()))?
            .into_iter()
            .filter_map(|name| self.parse_name(&name).map(|(at, seq)| (name, at, seq)))
            .map(|(name, created_at, sequence)| {
                let path = dir.join(name);
                let version = self.read_version(&path);
                BackupRecord {
                    path,
                    created_at,
                    version,
                    sequence,
                }
            })
            .collect();

        records.sort_by(|a, b| (a.created_at, a.sequence).cmp(&(b.created_at, b.sequence)));
        Ok(records)
    }

    /// The most recent backup, if any.
    pub fn latest(&self) -> Result<Option<BackupRecord>, UpdateError> {
        Ok(self.list()?.pop())
    }

    fn parse_name(&self, name: &str) -> Option<(NaiveDateTime, u32)> {
        let captures = self.pattern.captures(name)?;
        let at = NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), BACKUP_TIMESTAMP_FORMAT).ok()?;
        let sequence = captures.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        Some((at, sequence))
    }

    fn read_version(&self, backup: &Path) -> Option<VersionTag> {
        let bytes = self.fs.read(&sidecar(backup, META_SUFFIX)).ok()?;
        serde_json::from_slice::<BackupMeta>(&bytes).ok()?.version
    }

    /// Overwrite the live database with a backup.
    ///
    /// Without a record the most recent backup is used. Restoring the same
    /// record twice leaves the same bytes.
    pub fn restore(&self, record: Option<&BackupRecord>) -> Result<BackupRecord, UpdateError> {
        let record = match record {
            Some(record) => record.clone(),
            None => self
                .latest()?
                .ok_or_else(|| backup_error(format!("no backups found for {}", self.database.display())))?,
        };

        if !self.fs.exists(&record.path) {
            return Err(backup_error(format!("backup {} does not exist", record.path.display())));
        }

        warn!("Restoring database from {}", record.path.display());
        let staged = sidecar(&self.database, ".restore.tmp");
        self.fs.copy_file(&record.path, &staged).map_err(|e| restore_error(&record.path, &e))?;

        self.remove_live_sidecars()?;
        let wal = sidecar(&record.path, "-wal");
        if self.fs.exists(&wal) {
            self.fs
                .copy_file(&wal, &sidecar(&self.database, "-wal"))
                .map_err(|e| restore_error(&record.path, &e))?;
        }

        self.fs.rename(&staged, &self.database).map_err(|e| {
            let _ = self.fs.remove_file(&staged);
            restore_error(&record.path, &e)
        })?;

        info!("Database restored from {}", record.path.display());
        Ok(record)
    }

    /// Return the database to a restore point.
    pub fn rollback(&self, point: &RestorePoint) -> Result<(), UpdateError> {
        match point {
            RestorePoint::Snapshot(record) => self.restore(Some(record)).map(|_| ()),
            RestorePoint::Absent => {
                self.remove_live_sidecars()?;
                if self.fs.exists(&self.database) {
                    warn!("Removing database {} created during the failed update", self.database.display());
                    self.fs
                        .remove_file(&self.database)
                        .map_err(|e| backup_error(format!("cannot remove {}: {e}", self.database.display())))?;
                }
                Ok(())
            }
        }
    }

    fn remove_live_sidecars(&self) -> Result<(), UpdateError> {
        for suffix in ["-wal", "-shm", "-journal"] {
            let path = sidecar(&self.database, suffix);
            if self.fs.exists(&path) {
                self.fs
                    .remove_file(&path)
                    .map_err(|e| backup_error(format!("cannot remove stale {}: {e}", path.display())))?;
            }
        }
        Ok(())
    }

    /// Delete all but the `keep` newest backups. Returns what was removed.
    pub fn prune(&self, keep: usize) -> Result<Vec<BackupRecord>, UpdateError> {
        let mut records = self.list()?;
        let excess = records.len().saturating_sub(keep);
        let removed: Vec<BackupRecord> = records.drain(..excess).collect();

        for record in &removed {
            debug!("Pruning backup {}", record.path.display());
            self.fs
                .remove_file(&record.path)
                .map_err(|e| backup_error(format!("cannot prune backup: {e}")))?;
            self.remove_backup_files(&record.path);
        }

        if !removed.is_empty() {
            info!("Pruned {} old backup(s), kept {}", removed.len(), records.len());
        }
        Ok(removed)
    }

    fn remove_backup_files(&self, backup: &Path) {
        for path in [backup.to_path_buf(), sidecar(backup, "-wal"), sidecar(backup, META_SUFFIX)] {
            if self.fs.exists(&path) {
                let _ = self.fs.remove_file(&path);
            }
        }
    }
}

fn split_name(path: &Path) -> Option<(String, String)> {
    let file_name = path.file_name()?.to_string_lossy().into_owned();
    Some(match file_name.rfind('.') {
        Some(dot) if dot > 0 => (file_name[..dot].to_string(), file_name[dot..].to_string()),
        _ => (file_name, String::new()),
    })
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn backup_error(reason: impl Into<String>) -> UpdateError {
    UpdateError::Backup {
        reason: reason.into(),
    }
}

fn restore_error(backup: &Path, error: &impl std::fmt::Display) -> UpdateError {
    backup_error(format!("restore from {} failed: {error}", backup.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::utils::fs::OsFileSystem;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> DatabaseBackupManager {
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        DatabaseBackupManager::new(temp.path().join("data/app.db"), Arc::new(OsFileSystem)).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_backup_naming_and_metadata() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.database_path(), b"db-v1").unwrap();

        let version = VersionTag::parse("1.2.0").unwrap();
        let record = manager.backup_at(at(9, 30, 12), Some(&version)).unwrap();

        assert_eq!(record.path, temp.path().join("data/app_backup_20261016093012.db"));
        assert_eq!(std::fs::read(&record.path).unwrap(), b"db-v1");
        assert!(temp.path().join("data/app_backup_20261016093012.db.meta.json").exists());

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version.as_ref().unwrap().to_string(), "1.2.0");
    }

    #[test]
    fn test_same_second_backups_get_suffix() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.database_path(), b"db").unwrap();

        let first = manager.backup_at(at(10, 0, 0), None).unwrap();
        let second = manager.backup_at(at(10, 0, 0), None).unwrap();
        assert_ne!(first.path, second.path);
        assert!(second.path.ends_with("app_backup_20261016100000_1.db"));

        assert_eq!(manager.latest().unwrap().unwrap().path, second.path);
    }

    #[test]
    fn test_backup_missing_database_is_backup_error() {
        let temp = TempDir::new().unwrap();
        let err = manager(&temp).backup(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backup);
    }

    #[test]
    fn test_round_trip_restores_identical_bytes() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.database_path(), b"before").unwrap();

        let record = manager.backup(None).unwrap();
        std::fs::write(manager.database_path(), b"after-mutation").unwrap();
        std::fs::write(temp.path().join("data/app.db-shm"), b"stale").unwrap();

        manager.restore(Some(&record)).unwrap();
        assert_eq!(std::fs::read(manager.database_path()).unwrap(), b"before");
        assert!(!temp.path().join("data/app.db-shm").exists());

        // Idempotent
        manager.restore(Some(&record)).unwrap();
        assert_eq!(std::fs::read(manager.database_path()).unwrap(), b"before");
    }

    #[test]
    fn test_restore_defaults_to_latest() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        std::fs::write(manager.database_path(), b"one").unwrap();
        manager.backup_at(at(8, 0, 0), None).unwrap();
        std::fs::write(manager.database_path(), b"two").unwrap();
        manager.backup_at(at(9, 0, 0), None).unwrap();
        std::fs::write(manager.database_path(), b"three").unwrap();

        let used = manager.restore(None).unwrap();
        assert_eq!(used.created_at, at(9, 0, 0));
        assert_eq!(std::fs::read(manager.database_path()).unwrap(), b"two");
    }

    #[test]
    fn test_restore_without_backups_fails() {
        let temp = TempDir::new().unwrap();
        let err = manager(&temp).restore(None).unwrap_err();
        assert!(err.to_string().contains("no backups found"));
    }

    #[test]
    fn test_absent_restore_point_removes_created_database() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let point = manager.snapshot(None).unwrap();
        assert_eq!(point, RestorePoint::Absent);

        std::fs::write(manager.database_path(), b"created by migration").unwrap();
        manager.rollback(&point).unwrap();
        assert!(!manager.database_path().exists());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.database_path(), b"db").unwrap();

        for hour in 1..=4 {
            manager.backup_at(at(hour, 0, 0), None).unwrap();
        }

        let removed = manager.prune(2).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].created_at, at(1, 0, 0));

        let left: Vec<_> = manager.list().unwrap().into_iter().map(|r| r.created_at).collect();
        assert_eq!(left, vec![at(3, 0, 0), at(4, 0, 0)]);
        assert!(!temp.path().join("data/app_backup_20261016010000.db.meta.json").exists());
    }

    #[test]
    fn test_unrelated_files_are_not_backups() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        for name in ["app.db", "other_backup_20261016010000.db", "app_backup_2026.db", "notes.txt"] {
            std::fs::write(temp.path().join("data").join(name), b"x").unwrap();
        }
        assert!(manager.list().unwrap().is_empty());
    }
}
