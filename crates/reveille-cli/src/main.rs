//! Reveille CLI - keep alarms in sync across devices from the terminal

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod error;
mod runtime;

use crate::cli::{Cli, Commands};
use crate::commands::device::run_device;
use crate::commands::queue::run_queue;
use crate::commands::run::run_daemon;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = CliConfig::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    config.apply_flags(cli.hub_url, cli.db_path);
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Commands::Run => run_daemon(&config).await?,
        Commands::Sync { timeout } => run_sync(&config, timeout).await?,
        Commands::Status { json } => run_status(&config, json).await?,
        Commands::Queue { json } => run_queue(&config, json).await?,
        Commands::Device => run_device(&config).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for directive in [format!("reveille={level}"), format!("reveille_core={level}")] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests;
