//! Persisted record of the last check and the last update.
//!
//! Stored as JSON at `<data_dir>/.safeup-history.json`. History is advisory:
//! a missing or unreadable file reads as empty, and failing to save it never
//! fails an update.

use crate::core::UpdateStatus;
use crate::utils::fs::{FileSystem, FsError};
use crate::version::{VersionCheck, VersionTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of the most recent `check()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub checked_at: DateTime<Utc>,
    pub current_version: Option<VersionTag>,
    pub remote_version: VersionTag,
    pub update_available: bool,
}

impl CheckRecord {
    #[must_use]
    pub fn from_check(check: &VersionCheck) -> Self {
        Self {
            checked_at: Utc::now(),
            current_version: check.current.clone(),
            remote_version: check.remote.clone(),
            update_available: check.update_available,
        }
    }

    /// Whether the record is younger than `max_age_secs`.
    #[must_use]
    pub fn is_fresh(&self, max_age_secs: u64) -> bool {
        let age = Utc::now() - self.checked_at;
        age.num_seconds() < i64::try_from(max_age_secs).unwrap_or(i64::MAX)
    }
}

/// Result of the most recent `perform()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub finished_at: DateTime<Utc>,
    pub status: UpdateStatus,
    pub detail: String,
    pub from_version: Option<VersionTag>,
    pub to_version: Option<VersionTag>,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<CheckRecord>,
    /// When an update last committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<OutcomeRecord>,
}

/// Loads and saves [`UpdateHistory`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    #[must_use]
    pub fn load(&self) -> UpdateHistory {
        if !self.fs.exists(&self.path) {
            return UpdateHistory::default();
        }

        match self.fs.read(&self.path).map(|bytes| serde_json::from_slice(&bytes)) {
            Ok(Ok(history)) => history,
            Ok(Err(e)) => {
                warn!("Ignoring unreadable update history {}: {e}", self.path.display());
                UpdateHistory::default()
            }
            Err(e) => {
                warn!("Ignoring update history: {e}");
                UpdateHistory::default()
            }
        }
    }

    pub fn save(&self, history: &UpdateHistory) -> Result<(), FsError> {
        let json = serde_json::to_vec_pretty(history)
            .map_err(|e| FsError::new(crate::utils::fs::FsOp::Write, &self.path, std::io::Error::other(e)))?;
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.write(&self.path, &json)?;
        debug!("Saved update history to {}", self.path.display());
        Ok(())
    }

    /// Load, apply `change`, save; failures are logged and swallowed.
    pub fn update(&self, change: impl FnOnce(&mut UpdateHistory)) {
        let mut history = self.load();
        change(&mut history);
        if let Err(e) = self.save(&history) {
            warn!("Could not save update history: {e}");
        }
    }
}
