//! `safeup check`: compare the installed version with the published one.

use crate::update::{HttpTransport, UpdateEngine};
use crate::version::VersionCheck;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Check whether a newer release is available. Nothing is downloaded
/// besides the remote version marker.
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckCommand {
    pub async fn execute<T: HttpTransport>(self, engine: &UpdateEngine<T>) -> Result<()> {
        let check = engine.check().await?;

        if self.json {
            let json = serde_json::to_string_pretty(&check).context("Failed to serialize version check")?;
            println!("{json}");
        } else {
            print_check(&check);
        }
        Ok(())
    }
}

fn print_check(check: &VersionCheck) {
    let current = check
        .current
        .as_ref()
        .map_or_else(|| "unknown".dimmed().to_string(), ToString::to_string);

    println!("Current version: {current}");
    if check.update_available {
        println!("Latest version:  {}", check.remote.to_string().green().bold());
        println!("\nRun {} to install it.", "safeup update".cyan());
    } else {
        println!("{}", "Already up to date.".green());
    }
}
