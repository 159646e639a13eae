use crate::constants::{DEFAULT_BACKUP_RETENTION, DEFAULT_FETCH_RETRIES, DEFAULT_FETCH_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Policy settings for the update workflow.
///
/// Lives under the `[update]` table of `safeup.toml`. Every field has a
/// default, so an empty table (or no table at all) is valid.
///
/// ```toml
/// [update]
/// fetch_timeout_secs = 120
/// retries = 3
/// keep_backups = 5
/// verify_integrity = true
/// # expected_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// # staging_dir = "/var/tmp/safeup"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Upper bound for download plus extraction, in seconds.
    ///
    /// Expiry cancels extraction, removes the staging directory and fails the
    /// run with a network error before anything is mutated.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retries for transient transfer failures (connect errors, timeouts, 5xx, 429).
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Number of database backups kept after a committed update.
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,

    /// Run `PRAGMA integrity_check` on the database during verification.
    #[serde(default = "default_verify_integrity")]
    pub verify_integrity: bool,

    /// Pin the package archive to a known SHA-256 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sha256: Option<String>,

    /// Parent directory for staging. Defaults to the system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            retries: default_retries(),
            keep_backups: default_keep_backups(),
            verify_integrity: default_verify_integrity(),
            expected_sha256: None,
            staging_dir: None,
        }
    }
}

const fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

const fn default_retries() -> usize {
    DEFAULT_FETCH_RETRIES
}

const fn default_keep_backups() -> usize {
    DEFAULT_BACKUP_RETENTION
}

const fn default_verify_integrity() -> bool {
    true
}

impl UpdateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Whether every field still has its default value.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpdateConfig::new();
        assert_eq!(config.fetch_timeout(), DEFAULT_FETCH_TIMEOUT);
        assert_eq!(config.retries, 3);
        assert_eq!(config.keep_backups, 5);
        assert!(config.verify_integrity);
        assert!(config.expected_sha256.is_none());
        assert!(config.is_default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: UpdateConfig = toml::from_str("retries = 0\nkeep_backups = 2").unwrap();
        assert_eq!(config.retries, 0);
        assert_eq!(config.keep_backups, 2);
        assert_eq!(config.fetch_timeout_secs, 120);
        assert!(!config.is_default());
    }

    #[test]
    fn test_optional_fields_skipped_when_unset() {
        let rendered = toml::to_string(&UpdateConfig::default()).unwrap();
        assert!(!rendered.contains("expected_sha256"));
        assert!(!rendered.contains("staging_dir"));
    }
}
