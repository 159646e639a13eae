//! Read/write access to the installation's version marker file.
//!
//! The marker is externally owned state: the engine never caches it, it asks
//! the [`VersionStore`] every time it needs the current tag.

use crate::core::{UpdateError, UpdateState};
use crate::utils::fs::FileSystem;
use crate::version::VersionTag;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persisted current-version marker.
pub trait VersionStore: Send + Sync + std::fmt::Debug {
    /// Read the raw marker contents, `None` when no marker exists.
    fn read_raw(&self) -> Result<Option<String>, UpdateError>;

    /// Overwrite the marker with `tag`.
    fn write(&self, tag: &VersionTag) -> Result<(), UpdateError>;

    /// Read and parse the marker.
    fn read(&self) -> Result<Option<VersionTag>, UpdateError> {
        self.read_raw()?.map(|raw| VersionTag::parse(&raw)).transpose()
    }
}

/// A `VERSION` file at the installation root.
#[derive(Debug, Clone)]
pub struct FileVersionMarker {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileVersionMarker {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionStore for FileVersionMarker {
    fn read_raw(&self) -> Result<Option<String>, UpdateError> {
        if !self.fs.exists(&self.path) {
            return Ok(None);
        }

        let bytes = self.fs.read(&self.path).map_err(|e| {
            UpdateError::validation(UpdateState::CheckingVersion, format!("cannot read version marker: {e}"))
        })?;
        let raw = String::from_utf8_lossy(&bytes).trim().to_string();

        if raw.is_empty() { Ok(None) } else { Ok(Some(raw)) }
    }

    fn write(&self, tag: &VersionTag) -> Result<(), UpdateError> {
        self.fs.write(&self.path, format!("{tag}\n").as_bytes()).map_err(|e| UpdateError::Verify {
            reason: format!("cannot write version marker: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fs::OsFileSystem;
    use tempfile::TempDir;

    fn marker(temp: &TempDir) -> FileVersionMarker {
        FileVersionMarker::new(temp.path().join("VERSION"), Arc::new(OsFileSystem))
    }

    #[test]
    fn test_missing_marker_reads_none() {
        let temp = TempDir::new().unwrap();
        assert!(marker(&temp).read().unwrap().is_none());
    }

    #[test]
    fn test_round_trip_with_trailing_newline() {
        let temp = TempDir::new().unwrap();
        let store = marker(&temp);

        store.write(&VersionTag::parse("1.4.2").unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "1.4.2\n");
        assert_eq!(store.read().unwrap().unwrap().to_string(), "1.4.2");
    }

    #[test]
    fn test_blank_marker_is_treated_as_missing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("VERSION"), "  \n").unwrap();
        assert!(marker(&temp).read().unwrap().is_none());
    }

    #[test]
    fn test_garbage_marker_is_validation_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("VERSION"), "not-a-version").unwrap();
        assert!(marker(&temp).read().is_err());
    }
}
