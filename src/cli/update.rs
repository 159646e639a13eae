//! `safeup update`: run the full update workflow.
//!
//! The exit code is 0 when the installation ends `updated` or `up-to-date`
//! and 1 for every failure outcome, so supervisors and cron jobs can react
//! without parsing output.

use crate::core::UpdateStatus;
use crate::update::{HttpTransport, RestartOutcome, UpdateEngine, UpdateReport};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Download the latest release and apply it.
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Reinstall even if the installed version is current.
    #[arg(long)]
    pub force: bool,

    /// Restart the application after a successful update.
    #[arg(long)]
    pub restart: bool,

    /// Print the update report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl UpdateCommand {
    pub async fn execute<T: HttpTransport>(self, engine: &UpdateEngine<T>) -> Result<()> {
        let report = engine.perform(self.force).await?;

        if self.json {
            let json = serde_json::to_string_pretty(&report).context("Failed to serialize update report")?;
            println!("{json}");
        } else {
            print_report(&report);
        }

        if !report.is_success() {
            std::process::exit(1);
        }

        if self.restart && report.status == UpdateStatus::Updated {
            let outcome = engine.restart()?;
            if !self.json {
                println!("{outcome}");
            }
            if outcome == RestartOutcome::ExitRequested {
                std::process::exit(0);
            }
        }

        Ok(())
    }
}

pub(super) fn print_report(report: &UpdateReport) {
    let label = match report.status {
        UpdateStatus::UpToDate | UpdateStatus::Updated => report.status.to_string().green().bold(),
        UpdateStatus::FailedSafely | UpdateStatus::FailedRestored => report.status.to_string().yellow().bold(),
        UpdateStatus::FailedDegraded => report.status.to_string().red().bold(),
    };
    println!("{label}: {}", report.detail);

    if let (Some(from), Some(to)) = (&report.from_version, &report.to_version)
        && from != to
    {
        println!("  version:    {from} -> {to}");
    }
    if !report.applied_migrations.is_empty() {
        let ids: Vec<String> = report.applied_migrations.iter().map(ToString::to_string).collect();
        println!("  migrations: {}", ids.join(", "));
    }
    if let Some(id) = report.failed_migration {
        println!("  failed:     migration {id}");
    }
    if let Some(backup) = &report.backup {
        println!("  backup:     {}", backup.display());
    }
    if report.status == UpdateStatus::FailedDegraded {
        println!(
            "\n{}",
            "The installation needs manual inspection before the application is started again.".red()
        );
    }
}
