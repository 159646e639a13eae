//! Post-update verification.
//!
//! After migrations the orchestrator runs every registered [`HealthCheck`].
//! The first failure turns into a verify error and the database is restored.

use crate::constants::LEDGER_TABLE;
use crate::core::UpdateError;
use crate::version::{VersionStore, VersionTag};
use rusqlite::{Connection, OpenFlags};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What a health check may look at.
#[derive(Debug, Clone, Copy)]
pub struct VerifyContext<'a> {
    pub live_root: &'a Path,
    pub database: &'a Path,
    /// Version shipped by the package that was just merged, if it had one.
    pub package_version: Option<&'a VersionTag>,
    /// Highest migration id the ledger must have reached.
    pub expected_ledger_max: i64,
}

/// A post-update check.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a human-readable reason.
    fn check(&self, ctx: &VerifyContext<'_>) -> Result<(), String>;
}

/// Run `checks` in order, stopping at the first failure.
pub fn run_checks(checks: &[Arc<dyn HealthCheck>], ctx: &VerifyContext<'_>) -> Result<(), UpdateError> {
    for check in checks {
        debug!(check = check.name(), "Running health check");
        check.check(ctx).map_err(|reason| UpdateError::Verify {
            reason: format!("{}: {reason}", check.name()),
        })?;
    }
    Ok(())
}

/// The database opens, passes `PRAGMA integrity_check` and the ledger reached the expected id.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseHealthCheck {
    pub integrity: bool,
}

impl HealthCheck for DatabaseHealthCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn check(&self, ctx: &VerifyContext<'_>) -> Result<(), String> {
        if !ctx.database.exists() {
            return if ctx.expected_ledger_max == 0 {
                Ok(())
            } else {
                Err(format!("{} is missing", ctx.database.display()))
            };
        }

        let conn = Connection::open_with_flags(ctx.database, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| format!("cannot open {}: {e}", ctx.database.display()))?;

        if self.integrity {
            let result: String = conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))
                .map_err(|e| format!("integrity check failed to run: {e}"))?;
            if result != "ok" {
                return Err(format!("integrity check reported: {result}"));
            }
        }

        if ctx.expected_ledger_max > 0 {
            let max: i64 = conn
                .query_row(&format!("SELECT COALESCE(MAX(id), 0) FROM {LEDGER_TABLE}"), [], |row| row.get(0))
                .map_err(|e| format!("cannot read migration ledger: {e}"))?;
            if max < ctx.expected_ledger_max {
                return Err(format!("ledger is at {max}, expected {}", ctx.expected_ledger_max));
            }
        }

        Ok(())
    }
}

/// The version marker in the live tree matches the package that was merged.
#[derive(Debug, Clone)]
pub struct VersionMarkerCheck {
    store: Arc<dyn VersionStore>,
}

impl VersionMarkerCheck {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self {
            store,
        }
    }
}

impl HealthCheck for VersionMarkerCheck {
    fn name(&self) -> &str {
        "version marker"
    }

    fn check(&self, ctx: &VerifyContext<'_>) -> Result<(), String> {
        let Some(expected) = ctx.package_version else {
            return Ok(());
        };
        match self.store.read() {
            Ok(Some(found)) if found == *expected => Ok(()),
            Ok(Some(found)) => Err(format!("marker says {found}, package shipped {expected}")),
            Ok(None) => Err("marker is missing after merge".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// A check supplied as a closure by the host application.
pub struct CustomCheck<F> {
    name: String,
    check: F,
}

impl<F> CustomCheck<F>
where
    F: Fn(&VerifyContext<'_>) -> Result<(), String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> HealthCheck for CustomCheck<F>
where
    F: Fn(&VerifyContext<'_>) -> Result<(), String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &VerifyContext<'_>) -> Result<(), String> {
        (self.check)(ctx)
    }
}

impl<F> fmt::Debug for CustomCheck<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCheck").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::migration::{Migration, SchemaMigrationEngine};
    use crate::utils::fs::OsFileSystem;
    use crate::version::FileVersionMarker;
    use tempfile::TempDir;

    fn ctx<'a>(root: &'a Path, db: &'a Path, max: i64) -> VerifyContext<'a> {
        VerifyContext {
            live_root: root,
            database: db,
            package_version: None,
            expected_ledger_max: max,
        }
    }

    #[test]
    fn test_database_check_passes_after_migration() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("app.db");
        let mut engine = SchemaMigrationEngine::open(&db).unwrap();
        engine.migrate(&[Migration::sql(1, "t", "CREATE TABLE t (x)")]).unwrap();
        drop(engine);

        let check = DatabaseHealthCheck {
            integrity: true,
        };
        check.check(&ctx(temp.path(), &db, 1)).unwrap();
        assert!(check.check(&ctx(temp.path(), &db, 2)).unwrap_err().contains("expected 2"));
    }

    #[test]
    fn test_database_check_rejects_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("app.db");
        std::fs::write(&db, b"this is not an sqlite database at all, just text padding").unwrap();

        let check = DatabaseHealthCheck {
            integrity: true,
        };
        assert!(check.check(&ctx(temp.path(), &db, 0)).is_err());
    }

    #[test]
    fn test_missing_database_ok_without_migrations() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("app.db");
        let check = DatabaseHealthCheck {
            integrity: true,
        };
        check.check(&ctx(temp.path(), &db, 0)).unwrap();
        assert!(check.check(&ctx(temp.path(), &db, 1)).is_err());
    }

    #[test]
    fn test_version_marker_check() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileVersionMarker::new(temp.path().join("VERSION"), Arc::new(OsFileSystem)));
        let check = VersionMarkerCheck::new(store);
        let expected = VersionTag::parse("1.3.0").unwrap();
        let db = temp.path().join("app.db");
        let mut context = ctx(temp.path(), &db, 0);

        check.check(&context).unwrap();

        context.package_version = Some(&expected);
        assert!(check.check(&context).is_err());

        std::fs::write(temp.path().join("VERSION"), "1.3.0\n").unwrap();
        check.check(&context).unwrap();

        std::fs::write(temp.path().join("VERSION"), "1.3.0+build.7\n").unwrap();
        check.check(&context).unwrap();
    }

    #[test]
    fn test_run_checks_stops_at_first_failure() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("app.db");
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(CustomCheck::new("always fails", |_: &VerifyContext<'_>| Err("boom".to_string()))),
            Arc::new(CustomCheck::new("never reached", |_: &VerifyContext<'_>| panic!("ran"))),
        ];

        let err = run_checks(&checks, &ctx(temp.path(), &db, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Verify);
        assert!(err.to_string().contains("always fails: boom"));
    }
}
