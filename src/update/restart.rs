//! Asking the host to restart after a committed update.
//!
//! Inside a container (the `/.dockerenv` marker exists) the supervisor brings
//! the service back when its process exits, so restarting means ending the
//! process: either signalling a given PID with `SIGTERM` or asking the caller
//! to exit. Outside a container there is no supervisor to rely on and the
//! operator has to restart by hand.

use crate::constants::CONTAINER_MARKER;
use crate::core::UpdateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RestartOutcome {
    /// `SIGTERM` was sent to `pid`.
    Signalled {
        pid: u32,
    },
    /// The calling process should exit so its supervisor restarts it.
    ExitRequested,
    /// No supervisor detected.
    ManualRequired,
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signalled {
                pid,
            } => write!(f, "Restart signal sent to process {pid}"),
            Self::ExitRequested => f.write_str("Exiting so the container supervisor restarts the service"),
            Self::ManualRequired => f.write_str("Please restart the application manually to apply the update"),
        }
    }
}

pub trait RestartHook: Send + Sync {
    fn restart(&self) -> Result<RestartOutcome, UpdateError>;
}

/// Restart through the container supervisor when there is one.
#[derive(Debug, Clone)]
pub struct SupervisedRestart {
    container_marker: PathBuf,
    signal_pid: Option<u32>,
}

impl Default for SupervisedRestart {
    fn default() -> Self {
        Self {
            container_marker: PathBuf::from(CONTAINER_MARKER),
            signal_pid: None,
        }
    }
}

impl SupervisedRestart {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminate this process instead of asking the caller to exit.
    #[must_use]
    pub const fn with_signal_pid(mut self, pid: u32) -> Self {
        self.signal_pid = Some(pid);
        self
    }

    #[must_use]
    pub fn with_container_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.container_marker = marker.into();
        self
    }

    fn in_container(&self) -> bool {
        self.container_marker.exists()
    }
}

impl RestartHook for SupervisedRestart {
    fn restart(&self) -> Result<RestartOutcome, UpdateError> {
        if !self.in_container() {
            info!("No container supervisor detected; manual restart required");
            return Ok(RestartOutcome::ManualRequired);
        }

        let Some(pid) = self.signal_pid else {
            info!("Container detected; requesting exit for supervisor restart");
            return Ok(RestartOutcome::ExitRequested);
        };

        info!(pid, "Container detected; sending SIGTERM");
        let status = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .map_err(|e| {
                warn!(pid, "Could not run kill: {e}");
                UpdateError::Restart {
                    reason: format!("cannot run kill for process {pid}: {e}"),
                }
            })?;

        if status.success() {
            Ok(RestartOutcome::Signalled {
                pid,
            })
        } else {
            warn!(pid, "kill exited with {status}");
            Err(UpdateError::Restart {
                reason: format!("failed to signal process {pid} ({status})"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manual_restart_outside_container() {
        let temp = TempDir::new().unwrap();
        let hook = SupervisedRestart::new().with_container_marker(temp.path().join(".dockerenv"));
        assert_eq!(hook.restart().unwrap(), RestartOutcome::ManualRequired);
    }

    #[test]
    fn test_exit_requested_inside_container() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join(".dockerenv");
        std::fs::write(&marker, "").unwrap();

        let hook = SupervisedRestart::new().with_container_marker(&marker);
        let outcome = hook.restart().unwrap();
        assert_eq!(outcome, RestartOutcome::ExitRequested);
        assert!(outcome.to_string().contains("supervisor"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_signal_is_restart_error() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join(".dockerenv");
        std::fs::write(&marker, "").unwrap();

        // Larger than any pid_max, so kill always fails
        let hook = SupervisedRestart::new().with_container_marker(&marker).with_signal_pid(u32::MAX / 2);
        let err = hook.restart().unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Restart);
        assert_eq!(err.step(), crate::core::UpdateState::Committed);
        assert!(err.to_string().contains("Restart failed"));
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(RestartOutcome::Signalled {
            pid: 1,
        })
        .unwrap();
        assert_eq!(json["kind"], "signalled");
        assert_eq!(json["pid"], 1);
    }
}
