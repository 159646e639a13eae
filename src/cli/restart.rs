//! `safeup restart`: hand control to the process supervisor.

use crate::update::{HttpTransport, RestartOutcome, UpdateEngine};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Restart the application so a new release takes effect.
///
/// Inside a container the supervisor restarts the process; elsewhere this
/// reports that a manual restart is needed.
#[derive(Args, Debug)]
pub struct RestartCommand {}

impl RestartCommand {
    pub fn execute<T: HttpTransport>(self, engine: &UpdateEngine<T>) -> Result<()> {
        let outcome = engine.restart()?;
        match outcome {
            RestartOutcome::ManualRequired => println!("{}", outcome.to_string().yellow()),
            _ => println!("{}", outcome.to_string().green()),
        }
        if outcome == RestartOutcome::ExitRequested {
            std::process::exit(0);
        }
        Ok(())
    }
}
