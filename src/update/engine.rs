//! The embeddable update engine.
//!
//! [`UpdateEngine`] wires the components together from an
//! [`UpdaterConfig`] and exposes the three operations a host application
//! needs: [`check`](UpdateEngine::check), [`perform`](UpdateEngine::perform)
//! and [`restart`](UpdateEngine::restart).
//!
//! Every collaborator is injectable through [`UpdateEngineBuilder`]: the HTTP
//! transport, the filesystem, the version store, the migration provider, the
//! health checks and the restart hook. The defaults talk to the real world.

use crate::config::UpdaterConfig;
use crate::constants::VERSION_CHECK_TIMEOUT;
use crate::core::{UpdateError, UpdateState};
use crate::migration::{MigrationProvider, MigrationRecord, SchemaMigrationEngine, SqlDirectory};
use crate::update::backup::DatabaseBackupManager;
use crate::update::config::UpdateConfig;
use crate::update::fetcher::get_with_retry;
use crate::update::health::{DatabaseHealthCheck, HealthCheck, VersionMarkerCheck};
use crate::update::history::{CheckRecord, HistoryStore, UpdateHistory};
use crate::update::lock::UpdateLock;
use crate::update::merge::{FileTreeMerger, ProtectedPaths};
use crate::update::orchestrator::{UpdateOrchestrator, UpdateReport};
use crate::update::restart::{RestartHook, RestartOutcome, SupervisedRestart};
use crate::update::source::SourceSpec;
use crate::update::transport::{DefaultTransport, HttpTransport};
use crate::utils::fs::{FileSystem, OsFileSystem};
use crate::version::{FileVersionMarker, VersionCheck, VersionResolver, VersionStore, VersionTag};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Migration ledger state for `safeup migrate --status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    /// Ids the live tree provides that the ledger has not reached, ascending.
    pub pending: Vec<i64>,
}

/// Checks for, applies and recovers from updates of one installation.
pub struct UpdateEngine<T: HttpTransport = DefaultTransport> {
    pub(crate) transport: T,
    pub(crate) install_root: PathBuf,
    pub(crate) database: PathBuf,
    pub(crate) lock_path: PathBuf,
    pub(crate) source: SourceSpec,
    pub(crate) policy: UpdateConfig,
    pub(crate) protected: ProtectedPaths,
    pub(crate) merger: FileTreeMerger,
    pub(crate) backups: DatabaseBackupManager,
    pub(crate) version_store: Arc<dyn VersionStore>,
    pub(crate) migrations: Arc<dyn MigrationProvider>,
    pub(crate) checks: Vec<Arc<dyn HealthCheck>>,
    pub(crate) history: HistoryStore,
    restart_hook: Arc<dyn RestartHook>,
}

impl<T: HttpTransport> fmt::Debug for UpdateEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("install_root", &self.install_root)
            .field("database", &self.database)
            .field("source", &self.source)
            .field("protected", &self.protected)
            .field("checks", &self.checks.iter().map(|c| c.name().to_string()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl UpdateEngine<DefaultTransport> {
    /// Build an engine with every default collaborator.
    ///
    /// # Errors
    ///
    /// Returns a config error if the configuration is invalid or the HTTP
    /// client cannot be created.
    pub fn from_config(config: &UpdaterConfig) -> Result<Self, UpdateError> {
        let transport = DefaultTransport::new().map_err(|e| UpdateError::config(e.to_string()))?;
        UpdateEngineBuilder::new(config.clone(), transport).build()
    }
}

impl<T: HttpTransport> UpdateEngine<T> {
    /// Compare the local version marker with the remote one.
    ///
    /// Read-only apart from the advisory check record in the history file.
    pub async fn check(&self) -> Result<VersionCheck, UpdateError> {
        let check = self.resolve_version().await?;
        info!("{}", check.summary());
        let record = CheckRecord::from_check(&check);
        self.history.update(|h| h.last_check = Some(record));
        Ok(check)
    }

    /// Run the full update workflow.
    ///
    /// Failures inside the workflow are reported through
    /// [`UpdateReport::status`]; only a held lock (`Busy`) is an `Err`.
    pub async fn perform(&self, force: bool) -> Result<UpdateReport, UpdateError> {
        let lock = UpdateLock::acquire(&self.lock_path).await?;
        Ok(UpdateOrchestrator::new(self, lock).force(force).run().await)
    }

    /// Apply migrations pending in the live tree, under the same backup guard
    /// as an update. Nothing is fetched or merged.
    pub async fn migrate(&self) -> Result<UpdateReport, UpdateError> {
        let lock = UpdateLock::acquire(&self.lock_path).await?;
        Ok(UpdateOrchestrator::new(self, lock).migrate_only().await)
    }

    /// Ask the host to restart so the new code takes effect.
    pub fn restart(&self) -> Result<RestartOutcome, UpdateError> {
        self.restart_hook.restart()
    }

    /// Ledger rows and the ids the live tree still has pending.
    pub fn migration_status(&self) -> Result<MigrationStatus, UpdateError> {
        let applied = SchemaMigrationEngine::read_ledger(&self.database)?;
        let max = applied.iter().map(|r| r.id).max().unwrap_or(0);
        let mut pending: Vec<i64> =
            self.migrations.migrations(&self.install_root)?.iter().map(|m| m.id).filter(|id| *id > max).collect();
        pending.sort_unstable();
        Ok(MigrationStatus {
            applied,
            pending,
        })
    }

    #[must_use]
    pub const fn backups(&self) -> &DatabaseBackupManager {
        &self.backups
    }

    /// Run `f` while holding the update lock, so backups are never taken or
    /// restored underneath a running update.
    pub async fn with_lock<R>(&self, f: impl FnOnce(&DatabaseBackupManager) -> R) -> Result<R, UpdateError> {
        let lock = UpdateLock::acquire(&self.lock_path).await?;
        let result = f(&self.backups);
        drop(lock);
        Ok(result)
    }

    #[must_use]
    pub fn history(&self) -> UpdateHistory {
        self.history.load()
    }

    pub fn current_version(&self) -> Result<Option<VersionTag>, UpdateError> {
        self.version_store.read()
    }

    #[must_use]
    pub const fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub(crate) async fn resolve_version(&self) -> Result<VersionCheck, UpdateError> {
        let current = self.version_store.read()?;
        let url = self.source.remote_version_url()?;
        debug!(%url, "Fetching remote version");

        let fetch = get_with_retry(
            &self.transport,
            &url,
            self.policy.retries,
            UpdateState::CheckingVersion,
            "checking remote version",
        );
        let bytes = tokio::time::timeout(VERSION_CHECK_TIMEOUT, fetch).await.map_err(|_| {
            UpdateError::network(
                UpdateState::CheckingVersion,
                "checking remote version",
                format!("timed out after {}s", VERSION_CHECK_TIMEOUT.as_secs()),
            )
        })??;

        let remote = VersionTag::parse(&String::from_utf8_lossy(&bytes))?;
        Ok(VersionResolver::compare(current, remote))
    }
}

/// Assembles an [`UpdateEngine`], overriding collaborators as needed.
pub struct UpdateEngineBuilder<T: HttpTransport> {
    config: UpdaterConfig,
    transport: T,
    fs: Option<Arc<dyn FileSystem>>,
    version_store: Option<Arc<dyn VersionStore>>,
    migrations: Option<Arc<dyn MigrationProvider>>,
    extra_checks: Vec<Arc<dyn HealthCheck>>,
    default_checks: bool,
    restart_hook: Option<Arc<dyn RestartHook>>,
}

impl<T: HttpTransport> UpdateEngineBuilder<T> {
    pub fn new(config: UpdaterConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            fs: None,
            version_store: None,
            migrations: None,
            extra_checks: Vec::new(),
            default_checks: true,
            restart_hook: None,
        }
    }

    #[must_use]
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    #[must_use]
    pub fn version_store(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.version_store = Some(store);
        self
    }

    /// Replace the default `.sql` directory provider.
    #[must_use]
    pub fn migrations(mut self, provider: Arc<dyn MigrationProvider>) -> Self {
        self.migrations = Some(provider);
        self
    }

    /// Run `check` after the built-in checks.
    #[must_use]
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.extra_checks.push(check);
        self
    }

    /// Drop the built-in database and version marker checks.
    #[must_use]
    pub const fn without_default_checks(mut self) -> Self {
        self.default_checks = false;
        self
    }

    #[must_use]
    pub fn restart_hook(mut self, hook: Arc<dyn RestartHook>) -> Self {
        self.restart_hook = Some(hook);
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(self) -> Result<UpdateEngine<T>, UpdateError> {
        let config = self.config;
        config.validate()?;

        let fs = self.fs.unwrap_or_else(|| Arc::new(OsFileSystem));
        let database = config.database_path();
        let version_store = self
            .version_store
            .unwrap_or_else(|| Arc::new(FileVersionMarker::new(config.version_path(), Arc::clone(&fs))));
        let migrations = self
            .migrations
            .unwrap_or_else(|| Arc::new(SqlDirectory::new(&config.migrations_dir, Arc::clone(&fs))));

        let mut checks: Vec<Arc<dyn HealthCheck>> = Vec::new();
        if self.default_checks {
            checks.push(Arc::new(DatabaseHealthCheck {
                integrity: config.update.verify_integrity,
            }));
            checks.push(Arc::new(VersionMarkerCheck::new(Arc::clone(&version_store))));
        }
        checks.extend(self.extra_checks);

        Ok(UpdateEngine {
            transport: self.transport,
            backups: DatabaseBackupManager::new(&database, Arc::clone(&fs))?,
            merger: FileTreeMerger::new(Arc::clone(&fs)).with_mount_points(config.mount_points.iter()),
            protected: ProtectedPaths::from_entries(&config.protected_entries()),
            history: HistoryStore::new(config.history_path(), Arc::clone(&fs)),
            install_root: config.install_root.clone(),
            lock_path: config.lock_path(),
            source: config.source_spec(),
            policy: config.update.clone(),
            database,
            version_store,
            migrations,
            checks,
            restart_hook: self.restart_hook.unwrap_or_else(|| Arc::new(SupervisedRestart::new())),
        })
    }
}
