//! Atomic file write operations using temp-and-rename strategy.
//!
//! A reader of the target path sees either the old contents or the new
//! contents, never a torn write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Temporary sibling used while writing `path`.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `content` to a temporary sibling, sync it, then rename over `path`.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = temp_sibling(path);

    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_basic() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("atomic.txt");

        atomic_write(&file, b"atomic content").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "atomic content");
        assert!(!temp_sibling(&file).exists());
    }

    #[test]
    fn test_atomic_write_overwrites() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("VERSION");

        atomic_write(&file, b"1.0.0\n").unwrap();
        atomic_write(&file, b"1.1.0\n").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "1.1.0\n");
    }

    #[test]
    fn test_atomic_write_missing_parent_fails() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("missing").join("file.txt");
        assert!(atomic_write(&file, b"x").is_err());
    }

    #[test]
    fn test_temp_sibling_keeps_extension() {
        let path = Path::new("/srv/app/data/app.db");
        assert_eq!(temp_sibling(path), PathBuf::from("/srv/app/data/app.db.tmp"));
    }
}
