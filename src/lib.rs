//! safeup - safe in-place updates for applications with a local database
//!
//! safeup replaces an installed application tree with a newer release
//! downloaded as a zip archive, while guaranteeing that the user's SQLite
//! database and other protected data survive. After the code is swapped the
//! database schema is evolved with ordered, transactional migrations, and any
//! failure past the backup step restores the database.
//!
//! # Architecture Overview
//!
//! ```text
//! check ──► fetch ──► backup ──► merge ──► migrate ──► verify ──► commit
//!                        │          │          │          │
//!                        └──────────┴──────────┴──────────┴──► restore database
//! ```
//!
//! - No mutation happens before a backup of the database exists
//! - Protected paths (the data directory, the database, configured extras)
//!   are never overwritten or deleted by a merge
//! - Each migration runs in its own transaction and is recorded in a ledger
//!   table inside the same database
//! - Only one update runs per installation at a time
//!
//! # Core Modules
//!
//! - [`update`] - the update engine, its components and the orchestrating
//!   state machine
//! - [`migration`] - the schema migration engine and migration providers
//! - [`version`] - version tags, comparison and the installed version marker
//! - [`config`] - `safeup.toml` loading and path resolution
//! - [`core`] - workflow states, outcomes and the error taxonomy
//! - [`cli`] - the `safeup` command-line interface
//! - [`utils`] - the filesystem abstraction
//!
//! # Embedding
//!
//! Host applications use [`update::UpdateEngine`] directly:
//!
//! ```rust,no_run
//! use safeup_cli::config::UpdaterConfig;
//! use safeup_cli::update::UpdateEngine;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdaterConfig::load(None).await?;
//! let engine = UpdateEngine::from_config(&config)?;
//! let report = engine.perform(false).await?;
//! if report.is_success() {
//!     engine.restart()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod migration;
pub mod update;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
