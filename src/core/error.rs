//! Error handling for the update engine.
//!
//! Library components return [`UpdateError`], a typed error that carries its
//! [`ErrorKind`] and the [`UpdateState`] it originated in. The orchestrator maps
//! the kind to a [`Recovery`] action and from there to the user-visible
//! [`UpdateStatus`](crate::core::UpdateStatus).
//!
//! Application glue (the CLI, configuration loading) works with
//! `anyhow::Error`. [`user_friendly_error`] turns any such error into an
//! [`ErrorContext`] with a suggestion for the operator.
//!
//! # Error taxonomy
//!
//! | Kind | Trigger | Recovery |
//! |---|---|---|
//! | `Network` | fetch/transfer failure | abort clean, retryable |
//! | `Validation` | malformed archive or version tag | abort clean |
//! | `Backup` | backup copy could not be written | abort clean (hard gate) |
//! | `Merge` | partial file-tree replacement | restore database, degraded |
//! | `Migration` | step execution/commit failure | restore database |
//! | `Verify` | post-update health check failure | restore database |
//! | `Busy` | another update holds the lock | rejected before starting |
//! | `Config` | unreadable or invalid configuration | rejected before starting |
//! | `Restart` | the restart hook could not reach the process | reported after commit |

use crate::core::UpdateState;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Validation,
    Backup,
    Merge,
    Migration,
    Verify,
    Busy,
    Config,
    Restart,
}

/// What the orchestrator does after an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Nothing was mutated; clean up staging and report.
    AbortClean,
    /// Restore the database backup and report.
    RestoreAndReport,
    /// Restore the database backup and flag the tree for manual review.
    DegradeAndReport,
}

impl ErrorKind {
    #[must_use]
    pub const fn recovery(self) -> Recovery {
        match self {
            Self::Network | Self::Validation | Self::Backup | Self::Busy | Self::Config | Self::Restart => {
                Recovery::AbortClean
            }
            Self::Migration | Self::Verify => Recovery::RestoreAndReport,
            Self::Merge => Recovery::DegradeAndReport,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "NetworkError",
            Self::Validation => "ValidationError",
            Self::Backup => "BackupError",
            Self::Merge => "MergeError",
            Self::Migration => "MigrationError",
            Self::Verify => "VerifyError",
            Self::Busy => "Busy",
            Self::Config => "ConfigError",
            Self::Restart => "RestartError",
        };
        f.write_str(name)
    }
}

/// Errors produced by the update engine.
///
/// Each variant knows its [`kind`](Self::kind) and originating
/// [`step`](Self::step). The variants carry owned strings rather than source
/// errors so the error can be cloned into reports and history records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// A transfer failed or timed out. Nothing was mutated.
    #[error("Network error while {operation}: {reason}")]
    Network {
        step: UpdateState,
        operation: String,
        reason: String,
        retryable: bool,
    },

    /// Input had an unexpected shape (archive structure, version tag, checksum).
    #[error("Validation failed: {reason}")]
    Validation {
        step: UpdateState,
        reason: String,
    },

    /// The pre-mutation database backup could not be written.
    #[error("Database backup failed: {reason}")]
    Backup {
        reason: String,
    },

    /// The file tree was only partially replaced.
    #[error("Merge failed at '{entry}': {reason}")]
    Merge {
        entry: String,
        replaced: Vec<String>,
        reason: String,
    },

    /// A migration step failed; its transaction was rolled back.
    #[error("Migration {id} failed: {reason}")]
    Migration {
        id: i64,
        applied: Vec<i64>,
        reason: String,
    },

    /// A post-update health check failed.
    #[error("Post-update verification failed: {reason}")]
    Verify {
        reason: String,
    },

    /// Another update workflow holds the lock.
    #[error("Another update is already in progress (lock held at {lock_path})")]
    Busy {
        lock_path: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    /// The restart hook ran after a committed update but could not restart.
    #[error("Restart failed: {reason}")]
    Restart {
        reason: String,
    },
}

impl UpdateError {
    pub fn network(step: UpdateState, operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            step,
            operation: operation.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn validation(step: UpdateState, reason: impl Into<String>) -> Self {
        Self::Validation {
            step,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network {
                ..
            } => ErrorKind::Network,
            Self::Validation {
                ..
            } => ErrorKind::Validation,
            Self::Backup {
                ..
            } => ErrorKind::Backup,
            Self::Merge {
                ..
            } => ErrorKind::Merge,
            Self::Migration {
                ..
            } => ErrorKind::Migration,
            Self::Verify {
                ..
            } => ErrorKind::Verify,
            Self::Busy {
                ..
            } => ErrorKind::Busy,
            Self::Config {
                ..
            } => ErrorKind::Config,
            Self::Restart {
                ..
            } => ErrorKind::Restart,
        }
    }

    /// The workflow state the error originated in.
    #[must_use]
    pub const fn step(&self) -> UpdateState {
        match self {
            Self::Network {
                step,
                ..
            }
            | Self::Validation {
                step,
                ..
            } => *step,
            Self::Backup {
                ..
            } => UpdateState::BackingUp,
            Self::Merge {
                ..
            } => UpdateState::Merging,
            Self::Migration {
                ..
            } => UpdateState::Migrating,
            Self::Verify {
                ..
            } => UpdateState::Verifying,
            Self::Busy {
                ..
            }
            | Self::Config {
                ..
            } => UpdateState::Idle,
            Self::Restart {
                ..
            } => UpdateState::Committed,
        }
    }

    /// Whether running the same operation again may succeed without changes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network {
                retryable,
                ..
            } => *retryable,
            Self::Migration {
                ..
            }
            | Self::Busy {
                ..
            } => true,
            _ => false,
        }
    }
}

/// An error wrapped with operator-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion for the operator.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(update_error) = error.downcast_ref::<UpdateError>() {
        return create_error_context(update_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(error.to_string())
                    .with_suggestion("Run safeup as the user that owns the installation directory")
                    .with_details("The updater needs write access to the installation root and the data directory");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(error.to_string())
                    .with_suggestion("Check install_root and data_dir in safeup.toml");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(format!("Invalid configuration: {toml_error}"))
            .with_suggestion("Check the TOML syntax in safeup.toml. Verify quotes, brackets, and key names");
    }

    if error.downcast_ref::<rusqlite::Error>().is_some() {
        return ErrorContext::new(full_chain(&error))
            .with_suggestion("Make sure the application is stopped or not writing to the database, then retry");
    }

    ErrorContext::new(full_chain(&error))
}

fn full_chain(error: &anyhow::Error) -> String {
    let mut message = error.to_string();

    let chain: Vec<String> = error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    message
}

fn create_error_context(error: &UpdateError) -> ErrorContext {
    let context = ErrorContext::new(error.to_string())
        .with_details(format!("{} during {}", error.kind(), error.step()));

    match error {
        UpdateError::Network {
            ..
        } => context.with_suggestion(
            "Check your connection or configure a mirror prefix under [source] in safeup.toml, then retry",
        ),
        UpdateError::Validation {
            ..
        } => context.with_suggestion(
            "The downloaded package or version marker is malformed. Nothing was changed; verify the source repository and branch",
        ),
        UpdateError::Backup {
            ..
        } => context.with_suggestion(
            "Free disk space or fix permissions on the data directory. The update was aborted before any change",
        ),
        UpdateError::Merge {
            replaced,
            ..
        } => context.with_suggestion(format!(
            "The database was restored, but the application tree is partially updated ({} entries replaced). Inspect the installation manually before restarting",
            replaced.len()
        )),
        UpdateError::Migration {
            ..
        }
        | UpdateError::Verify {
            ..
        } => context.with_suggestion(
            "The database was restored from the pre-update backup. Fix the failing step and run 'safeup update' again",
        ),
        UpdateError::Busy {
            ..
        } => context.with_suggestion("Wait for the running update to finish, then retry"),
        UpdateError::Config {
            ..
        } => context.with_suggestion("Check safeup.toml or pass --config with the right path"),
        UpdateError::Restart {
            ..
        } => context.with_suggestion(
            "The update is committed. Restart the application manually so the new version takes effect",
        ),
    }
}
