//! The update state machine.
//!
//! ```text
//! Idle → CheckingVersion → Fetching → BackingUp → Merging → Migrating → Verifying → Committed
//! ```
//!
//! Up to and including `Fetching` nothing outside the staging directory is
//! touched, so every failure there ends `failed-safely`. `BackingUp` is a hard
//! gate: no backup, no mutation. From `Merging` on, failures restore the
//! database from the backup taken in `BackingUp`:
//!
//! | Failed in | Database | Tree | Status |
//! |---|---|---|---|
//! | `Merging` | restored | partially merged, left as is | `failed-degraded` |
//! | `Migrating` | restored | new version | `failed-restored` |
//! | `Verifying` | restored | new version | `failed-restored` |
//!
//! If the restore itself fails the run ends `failed-degraded` and the report
//! names the backup to restore by hand.
//!
//! Everything after the version check and fetch runs on one blocking worker
//! that owns the update lock. Dropping the caller's future does not stop it.

use crate::core::{Recovery, UpdateError, UpdateState, UpdateStatus};
use crate::migration::{MigrationProvider, SchemaMigrationEngine};
use crate::update::backup::{DatabaseBackupManager, RestorePoint};
use crate::update::engine::UpdateEngine;
use crate::update::fetcher::{PackageFetcher, UpdatePackage};
use crate::update::health::{HealthCheck, VerifyContext, run_checks};
use crate::update::history::{CheckRecord, OutcomeRecord};
use crate::update::lock::UpdateLock;
use crate::update::merge::{FileTreeMerger, ProtectedPaths};
use crate::update::transport::HttpTransport;
use crate::version::{VersionStore, VersionTag};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What `perform()` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub status: UpdateStatus,
    pub detail: String,
    pub final_state: UpdateState,
    /// Every state the run entered, starting with `Idle`.
    pub transitions: Vec<UpdateState>,
    pub from_version: Option<VersionTag>,
    pub to_version: Option<VersionTag>,
    /// Backup taken before mutating, if there was a database to back up.
    pub backup: Option<PathBuf>,
    /// Migrations committed during this run.
    pub applied_migrations: Vec<i64>,
    pub failed_migration: Option<i64>,
}

impl UpdateReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Records state transitions and the outcome as a run progresses.
#[derive(Debug)]
struct Progress {
    transitions: Vec<UpdateState>,
    backup: Option<PathBuf>,
    applied: Vec<i64>,
    failed_migration: Option<i64>,
}

impl Progress {
    fn new() -> Self {
        Self {
            transitions: vec![UpdateState::Idle],
            backup: None,
            applied: Vec::new(),
            failed_migration: None,
        }
    }

    fn enter(&mut self, state: UpdateState) {
        info!(state = %state, "Update state");
        self.transitions.push(state);
    }

    fn state(&self) -> UpdateState {
        self.transitions.last().copied().unwrap_or(UpdateState::Idle)
    }

    fn finish(mut self, status: UpdateStatus, detail: String, versions: Versions) -> UpdateReport {
        match status {
            UpdateStatus::UpToDate => self.enter(UpdateState::Idle),
            UpdateStatus::Updated => self.enter(UpdateState::Committed),
            UpdateStatus::FailedSafely => self.enter(UpdateState::Failed),
            // The pipeline already entered RolledBack or Failed
            UpdateStatus::FailedRestored | UpdateStatus::FailedDegraded => {}
        }
        UpdateReport {
            status,
            detail,
            final_state: self.state(),
            transitions: self.transitions,
            from_version: versions.from,
            to_version: versions.to,
            backup: self.backup,
            applied_migrations: self.applied,
            failed_migration: self.failed_migration,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Versions {
    from: Option<VersionTag>,
    to: Option<VersionTag>,
}

/// Drives one update run for an [`UpdateEngine`].
pub struct UpdateOrchestrator<'e, T: HttpTransport> {
    engine: &'e UpdateEngine<T>,
    lock: UpdateLock,
    force: bool,
}

impl<'e, T: HttpTransport> UpdateOrchestrator<'e, T> {
    /// The lock is held until the run, including its blocking worker, ends.
    pub fn new(engine: &'e UpdateEngine<T>, lock: UpdateLock) -> Self {
        Self {
            engine,
            lock,
            force: false,
        }
    }

    /// Fetch and install even if the versions match.
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub async fn run(self) -> UpdateReport {
        let mut progress = Progress::new();
        progress.enter(UpdateState::CheckingVersion);

        let check = match self.engine.resolve_version().await {
            Ok(check) => check,
            Err(e) => return self.abort(progress, &e, Versions::default()),
        };
        let record = CheckRecord::from_check(&check);
        self.engine.history.update(|h| h.last_check = Some(record));

        let versions = Versions {
            from: check.current.clone(),
            to: Some(check.remote.clone()),
        };

        if !check.update_available && !self.force {
            return match self.has_pending_migrations() {
                Ok(true) => {
                    info!("Version {} is current but migrations are pending; resuming", check.remote);
                    self.run_pipeline(progress, None, versions).await
                }
                Ok(false) => {
                    let detail = format!("Already at version {}", check.remote);
                    self.record(progress.finish(UpdateStatus::UpToDate, detail, versions))
                }
                Err(e) => self.abort(progress, &e, versions),
            };
        }

        progress.enter(UpdateState::Fetching);
        let fetcher = PackageFetcher::new(&self.engine.transport, &self.engine.policy);
        match fetcher.fetch(&self.engine.source).await {
            Ok(package) => self.run_pipeline(progress, Some(package), versions).await,
            Err(e) => self.abort(progress, &e, versions),
        }
    }

    /// Apply pending migrations from the live tree without fetching anything.
    pub async fn migrate_only(self) -> UpdateReport {
        let progress = Progress::new();
        let current = match self.engine.version_store.read() {
            Ok(current) => current,
            Err(e) => return self.abort(progress, &e, Versions::default()),
        };
        let versions = Versions {
            from: current.clone(),
            to: current,
        };

        match self.has_pending_migrations() {
            Ok(true) => self.run_pipeline(progress, None, versions).await,
            Ok(false) => self.record(progress.finish(UpdateStatus::UpToDate, "No pending migrations".to_string(), versions)),
            Err(e) => self.abort(progress, &e, versions),
        }
    }

    /// Read-only: whether the provider offers steps above the ledger maximum.
    fn has_pending_migrations(&self) -> Result<bool, UpdateError> {
        let steps = self.engine.migrations.migrations(&self.engine.install_root)?;
        if steps.is_empty() {
            return Ok(false);
        }
        let ledger = SchemaMigrationEngine::read_ledger(&self.engine.database)?;
        let max = ledger.iter().map(|r| r.id).max().unwrap_or(0);
        Ok(steps.iter().any(|m| m.id > max))
    }

    async fn run_pipeline(self, progress: Progress, package: Option<UpdatePackage>, versions: Versions) -> UpdateReport {
        let engine = self.engine;
        let pipeline = Pipeline {
            package,
            lock: self.lock,
            install_root: engine.install_root.clone(),
            database: engine.database.clone(),
            protected: engine.protected.clone(),
            merger: engine.merger.clone(),
            backups: engine.backups.clone(),
            migrations: Arc::clone(&engine.migrations),
            checks: engine.checks.clone(),
            version_store: Arc::clone(&engine.version_store),
            keep_backups: engine.policy.keep_backups,
            versions: versions.clone(),
        };

        let report = match tokio::task::spawn_blocking(move || pipeline.run(progress)).await {
            Ok(report) => report,
            Err(e) => {
                error!("Update worker did not finish: {e}");
                let mut progress = Progress::new();
                progress.enter(UpdateState::Failed);
                progress.finish(
                    UpdateStatus::FailedDegraded,
                    format!("update worker did not finish ({e}); inspect the installation and the latest backup"),
                    versions,
                )
            }
        };

        if report.status == UpdateStatus::Updated {
            let now = Utc::now();
            engine.history.update(|h| h.last_update_time = Some(now));
        }
        record_outcome(engine, &report);
        report
    }

    fn abort(self, progress: Progress, error: &UpdateError, versions: Versions) -> UpdateReport {
        warn!(step = %error.step(), kind = %error.kind(), "Update aborted: {error}");
        let report = progress.finish(UpdateStatus::FailedSafely, format!("{error}; no changes were made"), versions);
        self.record(report)
    }

    fn record(self, report: UpdateReport) -> UpdateReport {
        record_outcome(self.engine, &report);
        report
    }
}

fn record_outcome<T: HttpTransport>(engine: &UpdateEngine<T>, report: &UpdateReport) {
    let outcome = OutcomeRecord {
        finished_at: Utc::now(),
        status: report.status,
        detail: report.detail.clone(),
        from_version: report.from_version.clone(),
        to_version: report.to_version.clone(),
        backup: report.backup.clone(),
    };
    engine.history.update(|h| h.last_outcome = Some(outcome));
}

/// The mutating part of a run. Owns everything it touches so it can run on a
/// blocking worker to completion.
struct Pipeline {
    package: Option<UpdatePackage>,
    lock: UpdateLock,
    install_root: PathBuf,
    database: PathBuf,
    protected: ProtectedPaths,
    merger: FileTreeMerger,
    backups: DatabaseBackupManager,
    migrations: Arc<dyn MigrationProvider>,
    checks: Vec<Arc<dyn HealthCheck>>,
    version_store: Arc<dyn VersionStore>,
    keep_backups: usize,
    versions: Versions,
}

impl Pipeline {
    fn run(mut self, mut progress: Progress) -> UpdateReport {
        progress.enter(UpdateState::BackingUp);
        let point = match self.backups.snapshot(self.versions.from.as_ref()) {
            Ok(point) => point,
            Err(e) => {
                warn!("Backup failed, nothing was changed: {e}");
                self.discard_package();
                let detail = format!("{e}; no changes were made");
                return progress.finish(UpdateStatus::FailedSafely, detail, self.versions);
            }
        };
        progress.backup = point.record().map(|r| r.path.clone());

        let report = match self.mutate(&mut progress) {
            Ok(()) => {
                self.prune();
                let detail = match &self.versions.to {
                    Some(to) if self.versions.from.as_ref() != Some(to) => format!("Updated to version {to}"),
                    _ => format!("Applied {} migration(s)", progress.applied.len()),
                };
                info!("{detail}");
                progress.finish(UpdateStatus::Updated, detail, self.versions.clone())
            }
            Err(e) => self.recover(progress, &e, &point),
        };

        drop(self.lock);
        report
    }

    fn mutate(&mut self, progress: &mut Progress) -> Result<(), UpdateError> {
        let mut merged = false;
        let mut package_version = None;
        if let Some(package) = self.package.take() {
            progress.enter(UpdateState::Merging);
            let result = self.merger.merge(package.root(), &self.install_root, &self.protected);
            package_version = package.manifest().version.clone();
            cleanup(package);
            result?;
            merged = true;
        }

        progress.enter(UpdateState::Migrating);
        let steps = self.migrations.migrations(&self.install_root)?;
        let expected_ledger_max = if steps.is_empty() {
            0
        } else {
            let mut engine = SchemaMigrationEngine::open(&self.database)?;
            let report = engine.migrate(&steps)?;
            progress.applied.clone_from(&report.applied);
            report.applied.last().copied().unwrap_or(report.previous_max)
        };

        progress.enter(UpdateState::Verifying);
        let ctx = VerifyContext {
            live_root: &self.install_root,
            database: &self.database,
            package_version: package_version.as_ref(),
            expected_ledger_max,
        };
        run_checks(&self.checks, &ctx)?;

        if merged
            && package_version.is_none()
            && let Some(to) = &self.versions.to
        {
            self.version_store.write(to)?;
        }
        Ok(())
    }

    fn recover(&self, mut progress: Progress, error: &UpdateError, point: &RestorePoint) -> UpdateReport {
        if let UpdateError::Migration {
            id,
            applied,
            ..
        } = error
        {
            progress.applied.clone_from(applied);
            progress.failed_migration = (*id > 0).then_some(*id);
        }

        // Past the backup every failure restores the database
        let degraded = error.kind().recovery() == Recovery::DegradeAndReport;
        warn!(step = %error.step(), kind = %error.kind(), "Update failed, restoring database: {error}");

        let (status, detail) = match self.backups.rollback(point) {
            Ok(()) => {
                progress.enter(UpdateState::RolledBack);
                if degraded {
                    (
                        UpdateStatus::FailedDegraded,
                        format!(
                            "{error}; database restored, application files may be mixed between versions and need a manual check"
                        ),
                    )
                } else {
                    (UpdateStatus::FailedRestored, format!("{error}; database restored"))
                }
            }
            Err(restore_error) => {
                error!("Database restore failed: {restore_error}");
                progress.enter(UpdateState::Failed);
                let by_hand = point.record().map_or_else(
                    || "remove the database created during the update".to_string(),
                    |r| format!("restore {} by hand", r.path.display()),
                );
                (UpdateStatus::FailedDegraded, format!("{error}; restoring the database failed ({restore_error}); {by_hand}"))
            }
        };

        progress.finish(status, detail, self.versions.clone())
    }

    fn prune(&self) {
        match self.backups.prune(self.keep_backups) {
            Ok(removed) if !removed.is_empty() => info!("Pruned {} old backup(s)", removed.len()),
            Ok(_) => {}
            Err(e) => warn!("Could not prune old backups: {e}"),
        }
    }

    fn discard_package(&mut self) {
        if let Some(package) = self.package.take() {
            cleanup(package);
        }
    }
}

fn cleanup(package: UpdatePackage) {
    let staging = package.staging_path().to_path_buf();
    if let Err(e) = package.cleanup() {
        warn!("Could not remove staging directory {}: {e}", staging.display());
    }
}
