//! Test utilities for safeup.
//!
//! Available to unit tests and, through the `test-utils` feature, to the
//! integration tests:
//!
//! - [`init_test_logging`]: one-time tracing setup honouring `RUST_LOG`
//! - [`ArchiveBuilder`]: builds zip packages in memory
//! - [`FakeTransport`]: scripted HTTP responses with request counting
//! - [`MemoryFileSystem`] and [`FaultyFileSystem`]: filesystem doubles
//! - [`InstallFixture`]: a throwaway installation directory with a database
//!
//! # Example
//!
//! ```rust,no_run
//! use safeup_cli::test_utils::{ArchiveBuilder, FakeTransport};
//!
//! let archive = ArchiveBuilder::new("app-main").file("VERSION", "1.3.0\n").build();
//! let transport = FakeTransport::new()
//!     .with_body("https://github.com/acme/app/archive/refs/heads/main.zip", archive);
//! ```

pub mod install;
pub mod memory_fs;

pub use install::InstallFixture;
pub use memory_fs::MemoryFileSystem;

use crate::update::transport::{HttpTransport, TransportError};
use crate::utils::fs::{FileSystem, FsError, FsOp};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use zip::write::SimpleFileOptions;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, otherwise `RUST_LOG`; without either, tests log nothing.
///
/// ```bash
/// RUST_LOG=safeup_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// Builds a zip archive shaped like a branch snapshot.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    prefix: Option<String>,
    files: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    /// Every file is placed under `top/`, like `app-main/` in a GitHub snapshot.
    pub fn new(top: impl Into<String>) -> Self {
        Self {
            prefix: Some(top.into()),
            files: Vec::new(),
        }
    }

    /// Entry names are used exactly as given.
    #[must_use]
    pub const fn flat() -> Self {
        Self {
            prefix: None,
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn file(mut self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        let name = match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_string(),
        };
        self.files.push((name, contents.as_ref().to_vec()));
        self
    }

    /// The zip bytes.
    ///
    /// # Panics
    ///
    /// If the in-memory zip writer fails.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        for (name, contents) in &self.files {
            writer.start_file(name.as_str(), options).expect("start zip entry");
            writer.write_all(contents).expect("write zip entry");
        }
        writer.finish().expect("finish zip archive").into_inner()
    }

    /// Write the archive to `path`, for `file://` sources.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build())
    }
}

#[derive(Debug, Default)]
struct Route {
    failures: VecDeque<u16>,
    body: Option<Vec<u8>>,
    requests: usize,
}

/// An [`HttpTransport`] serving scripted responses.
///
/// Unknown URLs answer 404. Scripted failures are served before the body.
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_body(url, body);
        self
    }

    /// Answer the next `count` requests for `url` with `status`.
    #[must_use]
    pub fn with_failures(self, url: &str, status: u16, count: usize) -> Self {
        self.routes().entry(url.to_string()).or_default().failures.extend(std::iter::repeat_n(status, count));
        self
    }

    /// Wait this long before answering any request.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the body served for `url`.
    pub fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes().entry(url.to_string()).or_default().body = Some(body.into());
    }

    /// How many requests were made for `url`.
    #[must_use]
    pub fn requests(&self, url: &str) -> usize {
        self.routes().get(url).map_or(0, |r| r.requests)
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let mut routes = self.routes();
        let route = routes.entry(url.to_string()).or_default();
        route.requests += 1;

        if let Some(status) = route.failures.pop_front() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
            });
        }
        route.body.clone().ok_or_else(|| TransportError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

impl HttpTransport for FakeTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(url)
    }
}

/// Wraps another [`FileSystem`] and fails chosen operations on chosen paths.
#[derive(Debug)]
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    faults: HashSet<(FsOp, PathBuf)>,
}

impl FaultyFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            faults: HashSet::new(),
        }
    }

    #[must_use]
    pub fn fail_on(mut self, op: FsOp, path: impl Into<PathBuf>) -> Self {
        self.faults.insert((op, path.into()));
        self
    }

    fn check(&self, op: FsOp, path: &Path) -> Result<(), FsError> {
        if self.faults.contains(&(op, path.to_path_buf())) {
            Err(FsError::new(op, path, io::Error::other("injected failure")))
        } else {
            Ok(())
        }
    }
}

impl FileSystem for FaultyFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        self.check(FsOp::ListDir, path)?;
        self.inner.list_dir(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.check(FsOp::Read, path)?;
        self.inner.read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        self.check(FsOp::Write, path)?;
        self.inner.write(path, contents)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, FsError> {
        self.check(FsOp::Copy, from)?;
        self.inner.copy_file(from, to)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.check(FsOp::Rename, from)?;
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.check(FsOp::RemoveFile, path)?;
        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.check(FsOp::RemoveDir, path)?;
        self.inner.remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.check(FsOp::CreateDir, path)?;
        self.inner.create_dir_all(path)
    }
}
