//! Cross-process guard that keeps update workflows from overlapping.
//!
//! The lock is an exclusive OS file lock (via `fs4`) on `<data_dir>/.safeup.lock`.
//! Acquisition never waits: a held lock means another workflow is running, and
//! the caller gets [`UpdateError::Busy`] straight away. The lock is released
//! when the [`UpdateLock`] is dropped.

use crate::core::UpdateError;
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the whole duration of an update workflow.
#[derive(Debug)]
pub struct UpdateLock {
    // The OS lock lives as long as this handle
    _file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Try to take the lock without waiting.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Busy`] if another process or task holds it,
    /// [`UpdateError::Config`] if the lock file cannot be created or locked.
    pub fn try_acquire(path: &Path) -> Result<Self, UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::config(format!("cannot create lock directory {}: {e}", parent.display()))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| UpdateError::config(format!("cannot open lock file {}: {e}", path.display())))?;

        lock_outcome(path, file.try_lock_exclusive())?;
        debug!(lock = %path.display(), "Update lock acquired");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// [`try_acquire`](Self::try_acquire) off the async runtime's worker threads.
    pub async fn acquire(path: &Path) -> Result<Self, UpdateError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::try_acquire(&path))
            .await
            .map_err(|e| UpdateError::config(format!("lock task failed: {e}")))?
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A held lock is `Busy`; a failing lock call (no lock support on the
/// filesystem, for one) is a configuration problem.
fn lock_outcome(path: &Path, result: io::Result<bool>) -> Result<(), UpdateError> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => Err(UpdateError::Busy {
            lock_path: path.display().to_string(),
        }),
        Err(e) => Err(UpdateError::config(format!("cannot lock {}: {e}", path.display()))),
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        debug!(lock = %self.path.display(), "Update lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data/.safeup.lock");

        let held = UpdateLock::try_acquire(&path).unwrap();
        let err = UpdateLock::try_acquire(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(err.to_string().contains(".safeup.lock"));

        drop(held);
        UpdateLock::try_acquire(&path).unwrap();
    }

    #[test]
    fn test_lock_failure_is_not_busy() {
        let path = Path::new("/mnt/nfs/data/.safeup.lock");
        let unsupported = io::Error::new(io::ErrorKind::Unsupported, "locking not supported");

        let err = lock_outcome(path, Err(unsupported)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("locking not supported"));

        assert_eq!(lock_outcome(path, Ok(false)).unwrap_err().kind(), ErrorKind::Busy);
        assert!(lock_outcome(path, Ok(true)).is_ok());
    }

    #[tokio::test]
    async fn test_async_acquire_creates_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fresh/data/.safeup.lock");

        let lock = UpdateLock::acquire(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }
}
