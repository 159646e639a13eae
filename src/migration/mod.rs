//! Forward-only schema migrations with a persisted ledger.
//!
//! The ledger is a table `migration_ledger (id, applied_at, description,
//! checksum)` created once when the engine opens the database. A migration is
//! a numbered step; the engine applies every step whose id is above the
//! highest id in the ledger, in ascending order.
//!
//! Each step runs in its own `EXCLUSIVE` transaction together with the insert
//! of its ledger row. When a step fails its transaction rolls back and the
//! run stops, so the schema and the ledger always agree on the last step that
//! committed. Steps are never batched.
//!
//! ```rust,no_run
//! use safeup_cli::migration::{Migration, SchemaMigrationEngine};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = SchemaMigrationEngine::open("data/app.db".as_ref())?;
//! let report = engine.migrate(&[
//!     Migration::sql(1, "create quotes", "CREATE TABLE quotes (symbol TEXT PRIMARY KEY, price REAL)"),
//!     Migration::sql(2, "add watchlist", "CREATE TABLE watchlist (symbol TEXT NOT NULL)"),
//! ])?;
//! println!("applied {:?}", report.applied);
//! # Ok(())
//! # }
//! ```

pub mod sql_dir;

pub use sql_dir::{MigrationProvider, SqlDirectory, StaticMigrations};

use crate::constants::{LEDGER_TABLE, SQLITE_BUSY_TIMEOUT};
use crate::core::UpdateError;
use crate::update::verification::ChecksumVerifier;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

type ApplyFn = dyn Fn(&Transaction<'_>) -> rusqlite::Result<()> + Send + Sync;

/// One numbered schema change.
#[derive(Clone)]
pub struct Migration {
    pub id: i64,
    pub description: String,
    pub checksum: Option<String>,
    apply: Arc<ApplyFn>,
}

impl Migration {
    /// A step implemented in Rust.
    pub fn new<F>(id: i64, description: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        Self {
            id,
            description: description.into(),
            checksum: None,
            apply: Arc::new(apply),
        }
    }

    /// A step that runs a batch of SQL statements.
    pub fn sql(id: i64, description: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = ChecksumVerifier::sha256_hex(sql.as_bytes());
        let mut migration = Self::new(id, description, move |tx| tx.execute_batch(&sql));
        migration.checksum = Some(checksum);
        migration
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub applied_at: String,
    pub description: String,
    pub checksum: Option<String>,
}

/// What a successful `migrate` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Highest ledger id before the run.
    pub previous_max: i64,
    pub applied: Vec<i64>,
    /// Ids below the ledger maximum that were never applied.
    pub skipped: Vec<i64>,
}

/// Errors from the migration engine.
#[derive(Debug, Error)]
pub enum MigrationFailure {
    #[error("Cannot open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Cannot access the migration ledger: {0}")]
    Ledger(#[source] rusqlite::Error),

    #[error("Invalid migration set: {0}")]
    InvalidSet(String),

    /// A step failed and was rolled back. `applied` lists steps committed earlier in the run.
    #[error("Migration {id} ({description}) failed: {source}")]
    Step {
        id: i64,
        description: String,
        applied: Vec<i64>,
        #[source]
        source: rusqlite::Error,
    },
}

impl From<MigrationFailure> for UpdateError {
    fn from(failure: MigrationFailure) -> Self {
        match failure {
            MigrationFailure::Step {
                id,
                ref applied,
                ..
            } => Self::Migration {
                id,
                applied: applied.clone(),
                reason: failure.to_string(),
            },
            other => Self::Migration {
                id: 0,
                applied: Vec::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Applies migrations to one database connection.
pub struct SchemaMigrationEngine {
    conn: Connection,
    ledger_created: bool,
}

impl fmt::Debug for SchemaMigrationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaMigrationEngine").field("ledger_created", &self.ledger_created).finish()
    }
}

impl SchemaMigrationEngine {
    /// Open (or create) the database at `path` and initialise the ledger.
    pub fn open(path: &Path) -> Result<Self, MigrationFailure> {
        let conn = Connection::open(path).map_err(|source| MigrationFailure::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT).map_err(MigrationFailure::Ledger)?;
        Self::with_connection(conn)
    }

    /// Use an existing connection, initialising the ledger on it.
    pub fn with_connection(conn: Connection) -> Result<Self, MigrationFailure> {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![LEDGER_TABLE],
                |row| row.get(0),
            )
            .optional()
            .map_err(MigrationFailure::Ledger)?;

        let ledger_created = exists.is_none();
        if ledger_created {
            conn.execute_batch(&format!(
                "CREATE TABLE {LEDGER_TABLE} (
                    id INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    description TEXT NOT NULL,
                    checksum TEXT
                );"
            ))
            .map_err(MigrationFailure::Ledger)?;
            info!("Created migration ledger table {LEDGER_TABLE}");
        }

        Ok(Self {
            conn,
            ledger_created,
        })
    }

    /// Read the ledger of the database at `path` without creating or changing anything.
    ///
    /// A missing database or ledger table reads as an empty ledger.
    pub fn read_ledger(path: &Path) -> Result<Vec<MigrationRecord>, MigrationFailure> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
            MigrationFailure::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![LEDGER_TABLE],
                |row| row.get(0),
            )
            .optional()
            .map_err(MigrationFailure::Ledger)?;
        if exists.is_none() {
            return Ok(Vec::new());
        }
        Self {
            conn,
            ledger_created: false,
        }
        .applied()
    }

    /// Whether opening the engine created the ledger table.
    #[must_use]
    pub const fn ledger_created(&self) -> bool {
        self.ledger_created
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Highest applied id, 0 for an empty ledger.
    pub fn max_applied(&self) -> Result<i64, MigrationFailure> {
        self.conn
            .query_row(&format!("SELECT COALESCE(MAX(id), 0) FROM {LEDGER_TABLE}"), [], |row| row.get(0))
            .map_err(MigrationFailure::Ledger)
    }

    /// Ledger rows in id order.
    pub fn applied(&self) -> Result<Vec<MigrationRecord>, MigrationFailure> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, applied_at, description, checksum FROM {LEDGER_TABLE} ORDER BY id"
            ))
            .map_err(MigrationFailure::Ledger)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    id: row.get(0)?,
                    applied_at: row.get(1)?,
                    description: row.get(2)?,
                    checksum: row.get(3)?,
                })
            })
            .map_err(MigrationFailure::Ledger)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(MigrationFailure::Ledger)
    }

    /// The steps `migrate` would apply, in order.
    pub fn pending<'m>(&self, steps: &'m [Migration]) -> Result<Vec<&'m Migration>, MigrationFailure> {
        validate(steps)?;
        let max = self.max_applied()?;
        let mut pending: Vec<&Migration> = steps.iter().filter(|m| m.id > max).collect();
        pending.sort_by_key(|m| m.id);
        Ok(pending)
    }

    /// Apply every step above the ledger maximum, one transaction per step.
    pub fn migrate(&mut self, steps: &[Migration]) -> Result<MigrationReport, MigrationFailure> {
        validate(steps)?;
        let previous_max = self.max_applied()?;
        let recorded: HashSet<i64> = self.applied()?.into_iter().map(|r| r.id).collect();

        let mut report = MigrationReport {
            previous_max,
            ..MigrationReport::default()
        };

        let mut selected: Vec<&Migration> = Vec::new();
        for step in steps {
            if step.id > previous_max {
                selected.push(step);
            } else if !recorded.contains(&step.id) {
                warn!(id = step.id, "Migration is below the ledger maximum {previous_max} and was never applied; skipping");
                report.skipped.push(step.id);
            }
        }
        selected.sort_by_key(|m| m.id);
        report.skipped.sort_unstable();

        if selected.is_empty() {
            debug!("No pending migrations (ledger at {previous_max})");
            return Ok(report);
        }

        for step in selected {
            info!(id = step.id, "Applying migration: {}", step.description);
            self.apply_one(step).map_err(|source| MigrationFailure::Step {
                id: step.id,
                description: step.description.clone(),
                applied: report.applied.clone(),
                source,
            })?;
            report.applied.push(step.id);
        }

        info!("Applied {} migration(s): {:?}", report.applied.len(), report.applied);
        Ok(report)
    }

    fn apply_one(&mut self, step: &Migration) -> rusqlite::Result<()> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        (step.apply)(&tx)?;
        tx.execute(
            &format!("INSERT INTO {LEDGER_TABLE} (id, description, checksum) VALUES (?1, ?2, ?3)"),
            params![step.id, step.description, step.checksum],
        )?;
        tx.commit()
    }
}

fn validate(steps: &[Migration]) -> Result<(), MigrationFailure> {
    let mut seen = BTreeSet::new();
    for step in steps {
        if step.id <= 0 {
            return Err(MigrationFailure::InvalidSet(format!(
                "migration id {} must be positive",
                step.id
            )));
        }
        if !seen.insert(step.id) {
            return Err(MigrationFailure::InvalidSet(format!("duplicate migration id {}", step.id)));
        }
    }
    Ok(())
}
