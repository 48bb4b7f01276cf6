//! db-custom-metrics - sync database rows into an events analytics store
//!
//! Reads the configured SQL statement on a schedule and publishes rows the
//! events store does not have yet.

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cli::run_scheduled(cli.config.as_ref(), cli.dry_run)?,
        Commands::Once => cli::run_once(cli.config.as_ref(), cli.dry_run)?,
        Commands::Check => cli::check(cli.config.as_ref())?,
    }

    Ok(())
}
