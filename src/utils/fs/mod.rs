//! Injectable filesystem access with typed per-call errors.
//!
//! Every file operation the updater performs on the installation tree goes
//! through the [`FileSystem`] trait. Production code uses [`OsFileSystem`];
//! tests substitute an in-memory implementation or wrap the real one to inject
//! failures at a chosen path.
//!
//! Each call returns an [`FsError`] naming the operation and path that failed,
//! so the merger and backup manager can report exactly which step broke.

pub mod atomic;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Which filesystem operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    ListDir,
    Read,
    Write,
    Copy,
    Rename,
    RemoveFile,
    RemoveDir,
    CreateDir,
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListDir => "list directory",
            Self::Read => "read",
            Self::Write => "write",
            Self::Copy => "copy",
            Self::Rename => "rename",
            Self::RemoveFile => "remove file",
            Self::RemoveDir => "remove directory",
            Self::CreateDir => "create directory",
        };
        f.write_str(name)
    }
}

/// A failed filesystem call.
#[derive(Debug, Error)]
#[error("Failed to {op} {}: {source}", path.display())]
pub struct FsError {
    pub op: FsOp,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    pub fn new(op: FsOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }

    /// Whether a rename failed only because source and target are on different devices.
    #[must_use]
    pub fn is_cross_device(&self) -> bool {
        self.source.kind() == io::ErrorKind::CrossesDevices
    }
}

/// Filesystem operations used by the merger, backup manager and version marker.
///
/// Implementations must be safe to share across the blocking worker that runs
/// the post-backup pipeline, hence `Send + Sync`.
pub trait FileSystem: Send + Sync + fmt::Debug {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Names of the entries directly under `path`, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError>;

    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Replace the contents of `path`. Parent directories must exist.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

    fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, FsError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError>;

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Remove a file or a whole directory tree.
    fn remove(&self, path: &Path) -> Result<(), FsError> {
        if self.is_dir(path) {
            self.remove_dir_all(path)
        } else {
            self.remove_file(path)
        }
    }

    /// Recursively copy a file or directory.
    fn copy_tree(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        if !self.is_dir(from) {
            return self.copy_file(from, to).map(|_| ());
        }

        self.create_dir_all(to)?;
        for name in self.list_dir(from)? {
            self.copy_tree(&from.join(&name), &to.join(&name))?;
        }
        Ok(())
    }

    /// Move an entry into place, copying when a plain rename crosses devices.
    fn move_entry(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        match self.rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.is_cross_device() => {
                self.copy_tree(from, to)?;
                self.remove(from)
            }
            Err(e) => Err(e),
        }
    }
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        // Symlinks to directories are moved as links, not followed
        fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let entries = fs::read_dir(path).map_err(|e| FsError::new(FsOp::ListDir, path, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::new(FsOp::ListDir, path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path).map_err(|e| FsError::new(FsOp::Read, path, e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        atomic::atomic_write(path, contents).map_err(|e| FsError::new(FsOp::Write, path, e))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, FsError> {
        fs::copy(from, to).map_err(|e| FsError::new(FsOp::Copy, from, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| FsError::new(FsOp::Rename, from, e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| FsError::new(FsOp::RemoveFile, path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_dir_all(path).map_err(|e| FsError::new(FsOp::RemoveDir, path, e))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| FsError::new(FsOp::CreateDir, path, e))
    }

    fn copy_tree(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        if !self.is_dir(from) {
            return self.copy_file(from, to).map(|_| ());
        }

        for entry in WalkDir::new(from).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(from).to_path_buf();
                FsError::new(FsOp::ListDir, path, io::Error::other(e.to_string()))
            })?;
            let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
            let target = to.join(relative);

            if entry.file_type().is_dir() {
                self.create_dir_all(&target)?;
            } else {
                self.copy_file(entry.path(), &target)?;
            }
        }
        Ok(())
    }
}
