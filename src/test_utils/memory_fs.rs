//! An in-memory [`FileSystem`] for deterministic merge and backup tests.

use crate::utils::fs::{FileSystem, FsError, FsOp};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn add_dirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn parent_exists(&self, path: &Path) -> bool {
        path.parent().is_none_or(|p| p.as_os_str().is_empty() || self.dirs.contains(p))
    }
}

/// Files and directories held in a shared map. Clones see the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a file, and its parent directories, with `contents`.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let path = PathBuf::from(path);
        let mut tree = self.tree();
        if let Some(parent) = path.parent() {
            tree.add_dirs(parent);
        }
        tree.files.insert(path, contents.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        self.tree().add_dirs(Path::new(path));
    }

    #[must_use]
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.tree().files.get(Path::new(path)).cloned()
    }

    /// Every file path, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.tree().files.keys().cloned().collect()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(op: FsOp, path: &Path) -> FsError {
    FsError::new(op, path, io::Error::from(io::ErrorKind::NotFound))
}

fn error(op: FsOp, path: &Path, kind: io::ErrorKind) -> FsError {
    FsError::new(op, path, io::Error::from(kind))
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree();
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.tree().dirs.contains(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let tree = self.tree();
        if !tree.dirs.contains(path) {
            return Err(not_found(FsOp::ListDir, path));
        }

        let children: BTreeSet<String> = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        Ok(children.into_iter().collect())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.tree().files.get(path).cloned().ok_or_else(|| not_found(FsOp::Read, path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let mut tree = self.tree();
        if !tree.parent_exists(path) {
            return Err(not_found(FsOp::Write, path));
        }
        if tree.dirs.contains(path) {
            return Err(error(FsOp::Write, path, io::ErrorKind::IsADirectory));
        }
        tree.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, FsError> {
        let contents = self.tree().files.get(from).cloned().ok_or_else(|| not_found(FsOp::Copy, from))?;
        let len = contents.len() as u64;
        self.write(to, &contents).map_err(|e| FsError::new(FsOp::Copy, from, e.source))?;
        Ok(len)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut tree = self.tree();
        if !tree.parent_exists(to) {
            return Err(not_found(FsOp::Rename, from));
        }

        if let Some(contents) = tree.files.remove(from) {
            if tree.dirs.contains(to) {
                tree.files.insert(from.to_path_buf(), contents);
                return Err(error(FsOp::Rename, from, io::ErrorKind::IsADirectory));
            }
            tree.files.insert(to.to_path_buf(), contents);
            return Ok(());
        }

        if !tree.dirs.contains(from) {
            return Err(not_found(FsOp::Rename, from));
        }
        if tree.files.contains_key(to) || tree.dirs.contains(to) {
            return Err(error(FsOp::Rename, from, io::ErrorKind::AlreadyExists));
        }

        let moved_dirs: Vec<PathBuf> = tree.dirs.iter().filter(|p| p.starts_with(from)).cloned().collect();
        for dir in moved_dirs {
            tree.dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                tree.dirs.insert(to.join(rest));
            }
        }
        let moved_files: Vec<PathBuf> = tree.files.keys().filter(|p| p.starts_with(from)).cloned().collect();
        for file in moved_files {
            if let (Some(contents), Ok(rest)) = (tree.files.remove(&file), file.strip_prefix(from)) {
                tree.files.insert(to.join(rest), contents);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.tree().files.remove(path).map(|_| ()).ok_or_else(|| not_found(FsOp::RemoveFile, path))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut tree = self.tree();
        if !tree.dirs.contains(path) {
            return Err(not_found(FsOp::RemoveDir, path));
        }
        tree.dirs.retain(|p| !p.starts_with(path));
        tree.files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut tree = self.tree();
        if path.ancestors().any(|a| tree.files.contains_key(a)) {
            return Err(error(FsOp::CreateDir, path, io::ErrorKind::AlreadyExists));
        }
        tree.add_dirs(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/a/x/1.txt", b"1");
        fs.add_file("/a/x/y/2.txt", b"2");
        fs.add_dir("/b");

        fs.rename(Path::new("/a/x"), Path::new("/b/x")).unwrap();

        assert_eq!(fs.contents("/b/x/y/2.txt").unwrap(), b"2");
        assert!(!fs.exists(Path::new("/a/x")));
        assert_eq!(fs.list_dir(Path::new("/b/x")).unwrap(), vec!["1.txt", "y"]);
    }

    #[test]
    fn test_write_requires_parent() {
        let fs = MemoryFileSystem::new();
        let err = fs.write(Path::new("/missing/file"), b"x").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.op, FsOp::Write);
    }
}
