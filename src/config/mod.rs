//! Configuration for a managed installation.
//!
//! One `safeup.toml` describes the installation the updater works on: where
//! the application tree lives, which directory holds user data, where the
//! database is, and where new releases come from.
//!
//! ```toml
//! install_root = "/srv/stockwatch"
//! data_dir = "data"
//! database = "app.db"
//! protected = [".env"]
//! mount_points = ["templates", "logs"]
//! version_file = "VERSION"
//! migrations_dir = "migrations"
//!
//! [source]
//! repository = "acme/stockwatch"
//! branch = "main"
//! # mirror = "https://ghproxy.example.com/"
//! # version_url = "https://updates.example.com/stockwatch/VERSION"
//!
//! [update]
//! fetch_timeout_secs = 120
//! retries = 3
//! keep_backups = 5
//! ```
//!
//! # Lookup order
//!
//! 1. `--config <PATH>` (or `SAFEUP_CONFIG`, which clap maps onto the same flag)
//! 2. `./safeup.toml`
//! 3. `<user config dir>/safeup/safeup.toml`
//!
//! # Paths
//!
//! `install_root` and `update.staging_dir` may use `~` and `$VAR`; relative
//! values resolve against the directory of the config file. `data_dir` and
//! `migrations_dir` are relative to `install_root`, and `database` is relative
//! to `data_dir`.

mod updater;

pub use updater::{SourceConfig, UpdaterConfig};
