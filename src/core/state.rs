//! Workflow states and user-visible outcomes of an update run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A state of the update workflow.
///
/// The orchestrator walks these in a fixed order:
///
/// ```text
/// Idle → CheckingVersion → Fetching → BackingUp → Merging → Migrating → Verifying
///                                                                    ↘ Committed
///                                                                    ↘ RolledBack
///                                                                    ↘ Failed
/// ```
///
/// Every [`UpdateError`](crate::core::UpdateError) is tagged with the state it
/// originated in, which is what decides the recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    Idle,
    CheckingVersion,
    Fetching,
    BackingUp,
    Merging,
    Migrating,
    Verifying,
    Committed,
    RolledBack,
    Failed,
}

impl UpdateState {
    /// Whether the workflow has finished in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    /// Whether a step in this state may already have mutated the installation.
    ///
    /// Everything from `BackingUp` onwards runs to completion once started.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Merging | Self::Migrating | Self::Verifying)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingVersion => "checking-version",
            Self::Fetching => "fetching",
            Self::BackingUp => "backing-up",
            Self::Merging => "merging",
            Self::Migrating => "migrating",
            Self::Verifying => "verifying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The user-visible result of `perform()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    /// Local version matches remote and no migrations are pending.
    UpToDate,
    /// Code tree replaced, migrations applied, verification passed.
    Updated,
    /// Failed before any mutation; nothing changed.
    FailedSafely,
    /// Database rolled back; the code tree may or may not have changed.
    FailedRestored,
    /// Manual inspection required.
    FailedDegraded,
}

impl UpdateStatus {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::UpToDate | Self::Updated)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UpToDate => "up-to-date",
            Self::Updated => "updated",
            Self::FailedSafely => "failed-safely",
            Self::FailedRestored => "failed-restored",
            Self::FailedDegraded => "failed-degraded",
        };
        f.write_str(name)
    }
}
