//! `safeup migrate`: apply or inspect database migrations.

use crate::update::{HttpTransport, UpdateEngine};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Apply migrations pending in the installed tree.
///
/// Runs under the same backup and restore guard as `safeup update`, without
/// fetching anything.
#[derive(Args, Debug)]
pub struct MigrateCommand {
    /// Show applied and pending migrations without changing anything.
    #[arg(long)]
    pub status: bool,
}

impl MigrateCommand {
    pub async fn execute<T: HttpTransport>(self, engine: &UpdateEngine<T>) -> Result<()> {
        if self.status {
            return print_status(engine);
        }

        let report = engine.migrate().await?;
        super::update::print_report(&report);
        if !report.is_success() {
            std::process::exit(1);
        }
        Ok(())
    }
}

fn print_status<T: HttpTransport>(engine: &UpdateEngine<T>) -> Result<()> {
    let status = engine.migration_status()?;

    if status.applied.is_empty() {
        println!("No migrations applied");
    } else {
        println!("{}", "Applied:".bold());
        for record in &status.applied {
            println!("  {:>4}  {}  {}", record.id, record.applied_at, record.description);
        }
    }

    if status.pending.is_empty() {
        println!("{}", "No pending migrations".green());
    } else {
        let ids: Vec<String> = status.pending.iter().map(ToString::to_string).collect();
        println!("{} {}", "Pending:".yellow().bold(), ids.join(", "));
    }
    Ok(())
}
