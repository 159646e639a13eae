//! Global constants used throughout the safeup codebase.
//!
//! Timeouts, retry parameters, and well-known file names that more than one
//! module needs to agree on live here so they stay discoverable.

use std::time::Duration;

/// Default timeout for the whole fetch phase (download + extraction).
///
/// Large source snapshots behind a slow mirror can take a while; anything
/// beyond two minutes is treated as a stalled transfer and cancelled.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout applied to a single HTTP request.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for fetching the remote version marker.
pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries for transient network failures.
pub const DEFAULT_FETCH_RETRIES: usize = 3;

/// Starting delay for exponential backoff between fetch retries (ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 250;

/// Maximum backoff delay between fetch retries (ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 4_000;

/// Number of database backups kept after a committed update.
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// File name of the version marker at the installation root.
pub const DEFAULT_VERSION_FILE: &str = "VERSION";

/// Name of the protected data directory under the installation root.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Database file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "app.db";

/// Directory (relative to the installation root) holding `.sql` migrations.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Default branch fetched from the source repository.
pub const DEFAULT_BRANCH: &str = "main";

/// Infix between the database stem and the timestamp in backup file names.
pub const BACKUP_INFIX: &str = "_backup_";

/// Timestamp layout used in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lock file guarding against concurrent update workflows.
pub const UPDATE_LOCK_FILE: &str = ".safeup.lock";

/// Persisted update history, stored inside the data directory.
pub const HISTORY_FILE: &str = ".safeup-history.json";

/// Name of the migration ledger table.
pub const LEDGER_TABLE: &str = "migration_ledger";

/// Busy timeout for SQLite connections opened by the engine.
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker file whose presence means the process runs inside a container.
pub const CONTAINER_MARKER: &str = "/.dockerenv";

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "safeup.toml";
