//! Command-line interface for the `safeup` binary.
//!
//! Every subcommand works on the installation described by one `safeup.toml`
//! (see [`crate::config`]). Commands load the configuration, build an
//! [`UpdateEngine`] from it and call one engine operation.
//!
//! # Commands
//!
//! - `check`: compare the local and remote versions
//! - `update`: fetch, back up, merge, migrate and verify
//! - `restart`: ask the supervisor to restart the application
//! - `backups`: list, create or restore database backups
//! - `migrate`: apply migrations pending in the live tree, or show the ledger
//!
//! # Global options
//!
//! - `--config <PATH>`: configuration file (also `SAFEUP_CONFIG`)
//! - `--verbose` / `--quiet`: log level; `RUST_LOG` takes precedence
//!
//! ```bash
//! safeup check
//! safeup --config /srv/stockwatch/safeup.toml update --restart
//! safeup backups restore data/app_backup_20240301120000.db
//! RUST_LOG=safeup_cli=trace safeup migrate --status
//! ```

mod backups;
mod check;
mod migrate;
mod restart;
mod update;

use crate::config::UpdaterConfig;
use crate::update::UpdateEngine;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use backups::BackupsCommand;
pub use check::CheckCommand;
pub use migrate::MigrateCommand;
pub use restart::RestartCommand;
pub use update::UpdateCommand;

/// Settings derived from the global flags, separate from parsing so they can
/// be inspected in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Filter for the log subscriber. `None` installs no subscriber.
    pub log_level: Option<String>,
    /// Explicit configuration file, from `--config` or `SAFEUP_CONFIG`.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global `tracing` subscriber.
    ///
    /// `RUST_LOG` overrides the level chosen by the flags, including `--quiet`.
    /// Logs go to stderr so `--json` output on stdout stays parseable.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if let Some(level) = &self.log_level {
            EnvFilter::new(format!("safeup_cli={level}"))
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Safe in-place updater for applications with a local SQLite database.
#[derive(Parser, Debug)]
#[command(
    name = "safeup",
    about = "Safely update an installed application without losing its data",
    version,
    author,
    long_about = "safeup replaces an installed application tree with a newer release, \
                  backs up and migrates its SQLite database, and rolls the database back \
                  if anything goes wrong."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug logs.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress log output. Command results are still printed.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to safeup.toml.
    ///
    /// Defaults to `./safeup.toml`, then `<user config dir>/safeup/safeup.toml`.
    #[arg(long, global = true, env = "SAFEUP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a newer release is available.
    Check(CheckCommand),

    /// Download and apply the latest release.
    Update(UpdateCommand),

    /// Restart the application so a new release takes effect.
    Restart(RestartCommand),

    /// Manage database backups.
    Backups(BackupsCommand),

    /// Apply pending database migrations from the installed tree.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Parse-independent entry point used by `main`.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Run the subcommand with an explicit [`CliConfig`].
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        let updater = UpdaterConfig::load(config.config_path.as_deref()).await?;
        let engine = UpdateEngine::from_config(&updater)?;

        match self.command {
            Commands::Check(cmd) => cmd.execute(&engine).await,
            Commands::Update(cmd) => cmd.execute(&engine).await,
            Commands::Restart(cmd) => cmd.execute(&engine),
            Commands::Backups(cmd) => cmd.execute(&engine).await,
            Commands::Migrate(cmd) => cmd.execute(&engine).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_log_level_is_info() {
        let cli = Cli::parse_from(["safeup", "check"]);
        let config = cli.build_config();
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_verbose_and_quiet() {
        let verbose = Cli::parse_from(["safeup", "--verbose", "update"]).build_config();
        assert_eq!(verbose.log_level.as_deref(), Some("debug"));

        let quiet = Cli::parse_from(["safeup", "update", "--quiet"]).build_config();
        assert_eq!(quiet.log_level, None);

        assert!(Cli::try_parse_from(["safeup", "-v", "-q", "check"]).is_err());
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::parse_from(["safeup", "--config", "/srv/app/safeup.toml", "migrate", "--status"]);
        assert_eq!(cli.build_config().config_path, Some(PathBuf::from("/srv/app/safeup.toml")));
    }

    #[test]
    fn test_subcommand_flags() {
        let cli = Cli::parse_from(["safeup", "update", "--force", "--restart", "--json"]);
        let Commands::Update(cmd) = cli.command else {
            panic!("expected update");
        };
        assert!(cmd.force);
        assert!(cmd.restart);
        assert!(cmd.json);

        let cli = Cli::parse_from(["safeup", "backups", "restore", "data/app_backup_20240301120000.db"]);
        assert!(matches!(cli.command, Commands::Backups(_)));
    }
}
