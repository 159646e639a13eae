//! Safe in-place updates of an application tree.
//!
//! The update engine replaces a running application's code with a newer
//! release while guaranteeing that the user-owned database survives, and then
//! evolves the database schema with ordered, transactional migrations.
//!
//! # Components
//!
//! - [`source`]: where packages and remote version markers are downloaded from
//! - [`transport`]: the injectable HTTP GET primitive
//! - [`fetcher`]: downloads, extracts and validates a package into staging
//! - [`backup`]: timestamped database copies and restores
//! - [`merge`]: replaces the live tree with the staged one, skipping protected entries
//! - [`health`]: post-update verification
//! - [`orchestrator`]: the state machine sequencing all of the above
//! - [`engine`]: the embeddable facade with `check`, `perform` and `restart`
//!
//! # Update flow
//!
//! ```text
//! 1. CheckingVersion  local marker vs. remote marker
//! 2. Fetching         download + extract into staging (cancellable, timed out)
//! 3. BackingUp        copy the database; no backup, no mutation
//! 4. Merging          move staged entries over the live tree
//! 5. Migrating        apply pending migrations, one transaction each
//! 6. Verifying        health checks
//! 7. Committed        marker written, history saved, old backups pruned
//! ```
//!
//! Only one workflow runs at a time per installation, guarded by
//! [`lock::UpdateLock`].
//!
//! # Example
//!
//! ```rust,no_run
//! use safeup_cli::config::UpdaterConfig;
//! use safeup_cli::update::UpdateEngine;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdaterConfig::load(None).await?;
//! let engine = UpdateEngine::from_config(&config)?;
//!
//! if engine.check().await?.update_available {
//!     let report = engine.perform(false).await?;
//!     println!("{}: {}", report.status, report.detail);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod engine;
pub mod fetcher;
pub mod health;
pub mod history;
pub mod lock;
pub mod merge;
pub mod orchestrator;
pub mod restart;
pub mod source;
pub mod transport;
pub mod verification;


pub use backup::{BackupRecord, DatabaseBackupManager, RestorePoint};
pub use config::UpdateConfig;
pub use engine::{MigrationStatus, UpdateEngine, UpdateEngineBuilder};
pub use fetcher::{PackageFetcher, PackageManifest, UpdatePackage};
pub use health::{CustomCheck, DatabaseHealthCheck, HealthCheck, VerifyContext};
pub use history::{HistoryStore, UpdateHistory};
pub use lock::UpdateLock;
pub use merge::{FileTreeMerger, MergeReport, ProtectedPaths};
pub use orchestrator::UpdateReport;
pub use restart::{RestartHook, RestartOutcome, SupervisedRestart};
pub use source::SourceSpec;
pub use transport::{DefaultTransport, HttpTransport, TransportError};
