use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_BRANCH, DEFAULT_DATA_DIR, DEFAULT_DATABASE_FILE,
    DEFAULT_MIGRATIONS_DIR, DEFAULT_VERSION_FILE, HISTORY_FILE, UPDATE_LOCK_FILE,
};
use crate::core::UpdateError;
use crate::update::config::UpdateConfig;
use crate::update::source::SourceSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Where releases are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// `owner/repo`, a repository URL, or a `file://` URL to a `.zip` archive.
    #[serde(default)]
    pub repository: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Prefix prepended to every download URL (for regions where the forge is slow or blocked).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,

    /// Explicit URL of the remote version marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            branch: default_branch(),
            mirror: None,
            version_url: None,
        }
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_FILE)
}

fn default_version_file() -> String {
    DEFAULT_VERSION_FILE.to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_DIR)
}

/// Settings for one managed installation, as read from `safeup.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Root of the live application tree.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// User data directory, relative to `install_root`. Always protected.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file, relative to `data_dir`.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Additional top-level entries the merger must never touch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protected: Vec<String>,

    /// Top-level directories that may be mounted volumes; merged child by child.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<String>,

    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Directory of `NNNN_description.sql` migrations, relative to `install_root`.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default, skip_serializing_if = "UpdateConfig::is_default")]
    pub update: UpdateConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            data_dir: default_data_dir(),
            database: default_database(),
            protected: Vec::new(),
            mount_points: Vec::new(),
            version_file: default_version_file(),
            migrations_dir: default_migrations_dir(),
            source: SourceConfig::default(),
            update: UpdateConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Find and load the configuration file.
    ///
    /// An explicit path must exist. Without one, `./safeup.toml` and then the
    /// user config directory are tried.
    ///
    /// # Errors
    ///
    /// Returns an error if no file is found, it cannot be read, or it is invalid.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        tracing::debug!("Loading configuration from {}", path.display());
        Self::load_from(&path).await
    }

    /// Resolve which configuration file to use.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(UpdateError::config(format!(
                "configuration file {} does not exist",
                path.display()
            ))
            .into());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok(local);
        }

        if let Some(user) = Self::user_config_path()
            && user.is_file()
        {
            return Ok(user);
        }

        Err(UpdateError::config(format!(
            "no {CONFIG_FILE_NAME} found in the current directory or the user config directory"
        ))
        .into())
    }

    /// `<user config dir>/safeup/safeup.toml`, if the platform has one.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("safeup").join(CONFIG_FILE_NAME))
    }

    /// Load from a specific file and resolve relative paths against its directory.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().context("Failed to determine current directory")?,
        };
        config.resolve_paths(&base)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Expand `~`/`$VAR` and anchor relative roots at `base`.
    pub fn resolve_paths(&mut self, base: &Path) -> Result<()> {
        self.install_root = expand_path(&self.install_root, base)?;
        if let Some(staging) = &self.update.staging_dir {
            self.update.staging_dir = Some(expand_path(staging, base)?);
        }
        Ok(())
    }

    /// Check the settings that the engine relies on.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.source.repository.trim().is_empty() {
            return Err(UpdateError::config("[source] repository is not set"));
        }
        if !is_inner_relative(&self.data_dir) {
            return Err(UpdateError::config(format!(
                "data_dir '{}' must be a relative path inside install_root",
                self.data_dir.display()
            )));
        }
        if self.database.file_name().is_none() || !is_inner_relative(&self.database) {
            return Err(UpdateError::config(format!(
                "database '{}' must name a file inside data_dir",
                self.database.display()
            )));
        }
        if self.version_file.trim().is_empty() {
            return Err(UpdateError::config("version_file must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.install_root.join(&self.data_dir)
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_path().join(&self.database)
    }

    #[must_use]
    pub fn version_path(&self) -> PathBuf {
        self.install_root.join(&self.version_file)
    }

    #[must_use]
    pub fn migrations_path(&self) -> PathBuf {
        self.install_root.join(&self.migrations_dir)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_path().join(UPDATE_LOCK_FILE)
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.data_path().join(HISTORY_FILE)
    }

    /// Top-level entries excluded from the merge. The data directory is always first.
    #[must_use]
    pub fn protected_entries(&self) -> Vec<String> {
        let mut entries = Vec::with_capacity(self.protected.len() + 1);
        if let Some(Component::Normal(first)) = self.data_dir.components().find(|c| !matches!(c, Component::CurDir)) {
            entries.push(first.to_string_lossy().into_owned());
        }
        entries.extend(self.protected.iter().cloned());
        entries
    }

    #[must_use]
    pub fn source_spec(&self) -> SourceSpec {
        let mut spec = SourceSpec::new(&self.source.repository, &self.source.branch)
            .with_version_file(&self.version_file);
        if let Some(mirror) = &self.source.mirror {
            spec = spec.with_mirror(mirror);
        }
        if let Some(url) = &self.source.version_url {
            spec = spec.with_version_url(url);
        }
        spec
    }
}

fn expand_path(path: &Path, base: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {raw}"))?
        .into_owned();
    let expanded = PathBuf::from(expanded);

    Ok(if expanded.is_absolute() { expanded } else { base.join(expanded) })
}

fn is_inner_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
install_root = "app"
protected = [".env"]
mount_points = ["templates"]

[source]
repository = "acme/stockwatch"
mirror = "https://mirror.example.com/"

[update]
retries = 1
"#;

    #[tokio::test]
    async fn test_load_resolves_relative_root() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("safeup.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = UpdaterConfig::load_from(&path).await.unwrap();
        assert_eq!(config.install_root, temp.path().join("app"));
        assert_eq!(config.database_path(), temp.path().join("app/data/app.db"));
        assert_eq!(config.lock_path(), temp.path().join("app/data/.safeup.lock"));
        assert_eq!(config.source.branch, "main");
        assert_eq!(config.update.retries, 1);
        assert_eq!(config.update.keep_backups, 5);
    }

    #[tokio::test]
    async fn test_missing_repository_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("safeup.toml");
        std::fs::write(&path, "install_root = \".\"\n").unwrap();

        let err = UpdaterConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("repository"));
    }

    #[tokio::test]
    async fn test_invalid_toml_reports_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("safeup.toml");
        std::fs::write(&path, "install_root = [").unwrap();

        let err = UpdaterConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("safeup.toml");

        let mut config = UpdaterConfig::default();
        config.source.repository = "acme/stockwatch".to_string();
        config.save_to(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("[update]"));

        let loaded = UpdaterConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.source.repository, "acme/stockwatch");
        assert_eq!(loaded.install_root, temp.path().join("nested"));
    }

    #[test]
    fn test_protected_entries_always_include_data_dir() {
        let mut config = UpdaterConfig::default();
        config.data_dir = PathBuf::from("./data/db");
        config.protected = vec![".env".to_string()];
        assert_eq!(config.protected_entries(), vec!["data", ".env"]);
    }

    #[test]
    fn test_data_dir_must_stay_inside_root() {
        let mut config = UpdaterConfig::default();
        config.source.repository = "a/b".to_string();
        assert!(config.validate().is_ok());

        config.data_dir = PathBuf::from("../outside");
        assert!(config.validate().is_err());

        config.data_dir = PathBuf::from("/var/lib/app");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_must_stay_inside_data_dir() {
        let mut config = UpdaterConfig::default();
        config.source.repository = "a/b".to_string();

        config.database = PathBuf::from("sqlite/app.db");
        assert!(config.validate().is_ok());

        for outside in ["../app.db", "/srv/app/app.db", "sqlite/../../app.db"] {
            config.database = PathBuf::from(outside);
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), crate::core::ErrorKind::Config, "{outside}");
        }
    }

    #[test]
    fn test_locate_rejects_missing_explicit_path() {
        let err = UpdaterConfig::locate(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.downcast_ref::<UpdateError>().is_some());
    }
}
