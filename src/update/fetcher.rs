//! Downloading and staging a release package.
//!
//! [`PackageFetcher::fetch`] downloads the archive for a [`SourceSpec`],
//! extracts it into a fresh staging directory and validates its shape. The
//! result is an [`UpdatePackage`] that owns the staging directory; dropping it
//! removes everything that was extracted.
//!
//! # Validation
//!
//! - the archive is non-empty and a readable zip with at least one entry
//! - every entry name stays inside the staging directory
//! - the extracted tree has exactly one top-level directory
//! - a `VERSION` file inside the package, if present, is a valid tag
//! - the archive digest matches `expected_sha256` when one is configured
//!
//! Any violation is a validation error; nothing outside the staging directory
//! has been touched at that point.
//!
//! # Cancellation
//!
//! Download and extraction share one deadline. The download future is simply
//! dropped on expiry. Extraction runs on a blocking worker that checks a
//! cancel flag between entries; on expiry the flag is raised and the worker is
//! awaited so the staging directory is gone before `fetch` returns.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use crate::core::{UpdateError, UpdateState};
use crate::update::config::UpdateConfig;
use crate::update::source::SourceSpec;
use crate::update::transport::{HttpTransport, TransportError};
use crate::update::verification::ChecksumVerifier;
use crate::version::VersionTag;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{Instant, timeout_at};
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

/// Describes what was downloaded and extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub url: String,
    pub sha256: String,
    /// Name of the single top-level directory in the archive.
    pub top_level: String,
    /// Names of the entries directly under the top-level directory, sorted.
    pub entries: Vec<String>,
    /// Version marker shipped inside the package.
    pub version: Option<VersionTag>,
}

/// An extracted package in its staging directory.
///
/// The staging directory is deleted when the package is dropped.
#[derive(Debug)]
pub struct UpdatePackage {
    staging: TempDir,
    root: PathBuf,
    manifest: PackageManifest,
}

impl UpdatePackage {
    /// The package root, i.e. the single top-level directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// Remove the staging directory now, reporting failures.
    pub fn cleanup(self) -> io::Result<()> {
        let path = self.staging.path().to_path_buf();
        self.staging.close()?;
        debug!("Removed staging directory {}", path.display());
        Ok(())
    }
}

/// Downloads and stages release packages.
pub struct PackageFetcher<'a, T: HttpTransport> {
    transport: &'a T,
    config: &'a UpdateConfig,
}

impl<'a, T: HttpTransport> PackageFetcher<'a, T> {
    pub const fn new(transport: &'a T, config: &'a UpdateConfig) -> Self {
        Self {
            transport,
            config,
        }
    }

    /// Fetch, extract and validate the package for `source`.
    pub async fn fetch(&self, source: &SourceSpec) -> Result<UpdatePackage, UpdateError> {
        let url = source.archive_url()?;
        let timeout = self.config.fetch_timeout();
        let deadline = Instant::now() + timeout;
        info!(%url, "Fetching package");

        let bytes = match timeout_at(deadline, self.download(&url)).await {
            Ok(result) => result?,
            Err(_) => return Err(timed_out(timeout)),
        };

        if bytes.is_empty() {
            return Err(UpdateError::validation(UpdateState::Fetching, "downloaded archive is empty"));
        }

        let sha256 = match &self.config.expected_sha256 {
            Some(expected) => ChecksumVerifier::verify(&bytes, expected)?,
            None => ChecksumVerifier::sha256_hex(&bytes),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let job = ExtractJob {
            bytes,
            staging_parent: self.config.staging_dir.clone(),
            version_file: source.version_file.clone(),
            cancel: Arc::clone(&cancel),
        };
        let mut handle = tokio::task::spawn_blocking(move || job.run());

        let (staging, root, top_level, entries, version) = match timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined.map_err(|e| {
                UpdateError::validation(UpdateState::Fetching, format!("extraction task failed: {e}"))
            })??,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                // Wait for the worker to notice so its staging directory is dropped
                let _ = handle.await;
                return Err(timed_out(timeout));
            }
        };

        info!(top_level = %top_level, entries = entries.len(), "Package staged at {}", root.display());
        Ok(UpdatePackage {
            staging,
            root,
            manifest: PackageManifest {
                url,
                sha256,
                top_level,
                entries,
                version,
            },
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        get_with_retry(self.transport, url, self.config.retries, UpdateState::Fetching, "downloading package").await
    }
}

/// GET `url`, retrying transient failures with exponential backoff.
pub(crate) async fn get_with_retry<T: HttpTransport>(
    transport: &T,
    url: &str,
    retries: usize,
    step: UpdateState,
    operation: &str,
) -> Result<Vec<u8>, UpdateError> {
    // 250ms, 500ms, 1s ... capped
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(STARTING_BACKOFF_DELAY_MS / 2)
        .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
        .take(retries);

    RetryIf::spawn(
        strategy,
        || async {
            transport.get(url).await.inspect_err(|e| {
                if e.is_retryable() {
                    warn!(%url, error = %e, "Transient transfer failure");
                }
            })
        },
        TransportError::is_retryable,
    )
    .await
    .map_err(|e| UpdateError::Network {
        step,
        operation: operation.to_string(),
        reason: e.to_string(),
        retryable: e.is_retryable(),
    })
}

fn timed_out(timeout: Duration) -> UpdateError {
    UpdateError::network(
        UpdateState::Fetching,
        "fetching package",
        format!("timed out after {}s", timeout.as_secs_f32()),
    )
}

type Staged = (TempDir, PathBuf, String, Vec<String>, Option<VersionTag>);

struct ExtractJob {
    bytes: Vec<u8>,
    staging_parent: Option<PathBuf>,
    version_file: String,
    cancel: Arc<AtomicBool>,
}

impl ExtractJob {
    fn run(self) -> Result<Staged, UpdateError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(self.bytes))
            .map_err(|e| invalid(format!("not a readable zip archive: {e}")))?;
        if archive.is_empty() {
            return Err(invalid("archive contains no entries"));
        }

        let staging = match &self.staging_parent {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| staging_error(parent, &e))?;
                tempfile::Builder::new().prefix("safeup-staging-").tempdir_in(parent)
            }
            None => tempfile::Builder::new().prefix("safeup-staging-").tempdir(),
        }
        .map_err(|e| staging_error(&std::env::temp_dir(), &e))?;
        debug!("Extracting into {}", staging.path().display());

        for index in 0..archive.len() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(UpdateError::network(UpdateState::Fetching, "extracting package", "cancelled"));
            }

            let mut entry = archive
                .by_index(index)
                .map_err(|e| invalid(format!("corrupt archive entry #{index}: {e}")))?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(invalid(format!("archive entry '{}' escapes the package root", entry.name())));
            };
            let target = staging.path().join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| staging_error(&target, &e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| staging_error(parent, &e))?;
            }
            let mut out = fs::File::create(&target).map_err(|e| staging_error(&target, &e))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| invalid(format!("cannot extract '{}': {e}", entry.name())))?;

            #[cfg(unix)]
            {
                if let Some(mode) = entry.unix_mode().filter(|m| m & 0o777 != 0) {
                    apply_mode(&target, mode);
                }
            }
        }

        let (root, top_level) = single_top_level(staging.path())?;
        let mut entries: Vec<String> = fs::read_dir(&root)
            .map_err(|e| staging_error(&root, &e))?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        let marker = root.join(&self.version_file);
        let version = if marker.is_file() {
            let raw = fs::read_to_string(&marker).map_err(|e| staging_error(&marker, &e))?;
            Some(
                VersionTag::parse(&raw)
                    .map_err(|e| invalid(format!("package version marker is invalid: {e}")))?,
            )
        } else {
            None
        };

        Ok((staging, root, top_level, entries, version))
    }
}

/// Carry the archived permission bits over. A failure keeps the default
/// mode and is logged, not fatal.
#[cfg(unix)]
fn apply_mode(target: &Path, mode: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777)) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not set mode {:o} on {}: {e}", mode & 0o7777, target.display());
            false
        }
    }
}

fn single_top_level(staging: &Path) -> Result<(PathBuf, String), UpdateError> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(staging)
        .map_err(|e| staging_error(staging, &e))?
        .filter_map(Result::ok)
        .collect();

    match entries.as_slice() {
        [only] if only.path().is_dir() => {
            Ok((only.path(), only.file_name().to_string_lossy().into_owned()))
        }
        [_] => Err(invalid("archive top-level entry is not a directory")),
        _ => Err(invalid(format!(
            "archive must contain exactly one top-level directory, found {} entries",
            entries.len()
        ))),
    }
}

fn invalid(reason: impl Into<String>) -> UpdateError {
    UpdateError::validation(UpdateState::Fetching, reason)
}

fn staging_error(path: &Path, error: &io::Error) -> UpdateError {
    UpdateError::validation(
        UpdateState::Fetching,
        format!("cannot write staging area {}: {error}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::test_utils::{ArchiveBuilder, FakeTransport};
    use tempfile::TempDir;

    const URL: &str = "https://github.com/acme/app/archive/refs/heads/main.zip";

    fn spec() -> SourceSpec {
        SourceSpec::new("acme/app", "main")
    }

    fn config(staging: &TempDir) -> UpdateConfig {
        UpdateConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            retries: 2,
            ..UpdateConfig::default()
        }
    }

    fn staging_is_empty(staging: &TempDir) -> bool {
        std::fs::read_dir(staging.path()).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_mode_reports_failure() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        assert!(apply_mode(&script, 0o100_755));
        assert_eq!(std::fs::metadata(&script).unwrap().permissions().mode() & 0o777, 0o755);

        assert!(!apply_mode(&temp.path().join("missing.sh"), 0o755));
    }

    #[tokio::test]
    async fn test_fetch_valid_package() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::new("app-main")
            .file("VERSION", "1.3.0\n")
            .file("app.py", "print('hi')")
            .file("templates/index.html", "<html/>")
            .build();
        let transport = FakeTransport::new().with_body(URL, archive);
        let config = config(&staging);

        let package = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap();
        let manifest = package.manifest();
        assert_eq!(manifest.top_level, "app-main");
        assert_eq!(manifest.entries, vec!["VERSION", "app.py", "templates"]);
        assert_eq!(manifest.version.as_ref().unwrap().to_string(), "1.3.0");
        assert_eq!(manifest.sha256.len(), 64);
        assert!(package.root().join("templates/index.html").is_file());

        package.cleanup().unwrap();
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_empty_archive_is_validation_error() {
        let staging = TempDir::new().unwrap();
        let transport = FakeTransport::new().with_body(URL, Vec::new());
        let config = config(&staging);

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_validation_error() {
        let staging = TempDir::new().unwrap();
        let transport = FakeTransport::new().with_body(URL, b"definitely not a zip".to_vec());
        let config = config(&staging);

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_multiple_top_level_entries_rejected() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::flat().file("a/x.txt", "x").file("b/y.txt", "y").build();
        let transport = FakeTransport::new().with_body(URL, archive);
        let config = config(&staging);

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("exactly one top-level directory"));
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::flat().file("app/ok.txt", "ok").file("../evil.txt", "x").build();
        let transport = FakeTransport::new().with_body(URL, archive);
        let config = config(&staging);

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert!(err.to_string().contains("escapes the package root"));
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_checksum_pin_mismatch() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::new("app").file("a.txt", "a").build();
        let transport = FakeTransport::new().with_body(URL, archive);
        let mut config = config(&staging);
        config.expected_sha256 = Some("0".repeat(64));

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::new("app").file("a.txt", "a").build();
        let transport = FakeTransport::new().with_failures(URL, 503, 2).with_body(URL, archive);
        let config = config(&staging);

        let package = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap();
        assert_eq!(package.manifest().top_level, "app");
        assert_eq!(transport.requests(URL), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let staging = TempDir::new().unwrap();
        let transport = FakeTransport::new();
        let config = config(&staging);

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.is_retryable());
        assert_eq!(transport.requests(URL), 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_staging() {
        let staging = TempDir::new().unwrap();
        let archive = ArchiveBuilder::new("app").file("a.txt", "a").build();
        let transport =
            FakeTransport::new().with_body(URL, archive).with_delay(Duration::from_secs(5));
        let mut config = config(&staging);
        config.fetch_timeout_secs = 1;

        let err = PackageFetcher::new(&transport, &config).fetch(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("timed out"));
        assert!(staging_is_empty(&staging));
    }
}
