//! Sources of migration steps.

use crate::core::UpdateError;
use crate::migration::Migration;
use crate::utils::fs::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Supplies the steps to migrate with.
///
/// Called after the merge, with the live installation root, so providers that
/// read from the tree see the newly installed release.
pub trait MigrationProvider: Send + Sync {
    fn migrations(&self, live_root: &Path) -> Result<Vec<Migration>, UpdateError>;
}

/// A fixed list of steps compiled into the host application.
#[derive(Debug, Clone, Default)]
pub struct StaticMigrations(pub Vec<Migration>);

impl MigrationProvider for StaticMigrations {
    fn migrations(&self, _live_root: &Path) -> Result<Vec<Migration>, UpdateError> {
        Ok(self.0.clone())
    }
}

/// `NNNN_description.sql` files in a directory of the live tree.
///
/// The numeric prefix is the id; the rest of the stem, with underscores as
/// spaces, is the description. A missing directory means no migrations.
#[derive(Debug, Clone)]
pub struct SqlDirectory {
    relative: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl SqlDirectory {
    pub fn new(relative: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            relative: relative.into(),
            fs,
        }
    }

    /// Load every migration file under `dir`.
    pub fn load(&self, dir: &Path) -> Result<Vec<Migration>, UpdateError> {
        if !self.fs.is_dir(dir) {
            debug!("No migrations directory at {}", dir.display());
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for name in self.fs.list_dir(dir).map_err(load_error)? {
            let Some((prefix, rest)) = split_file_name(&name) else {
                if name.ends_with(".sql") {
                    warn!("Ignoring {name}: migration files are named NNNN_description.sql");
                }
                continue;
            };

            let id: i64 =
                prefix.parse().map_err(|e| load_error(format!("bad migration id in {name}: {e}")))?;
            let description = rest.replace('_', " ");
            let bytes = self.fs.read(&dir.join(&name)).map_err(load_error)?;
            let sql = String::from_utf8(bytes).map_err(|e| load_error(format!("{name} is not UTF-8: {e}")))?;

            migrations.push(Migration::sql(id, description, sql));
        }

        migrations.sort_by_key(|m| m.id);
        debug!("Loaded {} SQL migration(s) from {}", migrations.len(), dir.display());
        Ok(migrations)
    }
}

impl MigrationProvider for SqlDirectory {
    fn migrations(&self, live_root: &Path) -> Result<Vec<Migration>, UpdateError> {
        self.load(&live_root.join(&self.relative))
    }
}

/// `0002_create_quotes.sql` → (`0002`, `create_quotes`).
fn split_file_name(name: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = name.strip_suffix(".sql")?.split_once('_')?;
    let numeric = !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit());
    (numeric && !rest.is_empty()).then_some((prefix, rest))
}

fn load_error(reason: impl ToString) -> UpdateError {
    UpdateError::Migration {
        id: 0,
        applied: Vec::new(),
        reason: format!("cannot load migrations: {}", reason.to_string()),
    }
}
