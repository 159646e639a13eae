//! `safeup` entry point.
//!
//! Parses arguments, runs the command and renders errors:
//! - `check` - compare installed and published versions
//! - `update` - apply the latest release
//! - `restart` - restart the application after an update
//! - `backups` - list, create and restore database backups
//! - `migrate` - apply or inspect database migrations

use anyhow::Result;
use clap::Parser;
use safeup_cli::cli;
use safeup_cli::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
