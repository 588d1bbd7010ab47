use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "reveille")]
#[command(about = "Keep alarms in sync across your devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync hub WebSocket URL (ws:// or wss://)
    #[arg(long, global = true, value_name = "URL")]
    pub hub_url: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect and keep syncing until interrupted
    Run,
    /// Connect, run one full sync, and exit once the hub confirms it
    Sync {
        /// Seconds to wait for the hub's confirmation
        #[arg(long, value_name = "SECS", default_value_t = 30)]
        timeout: u64,
    },
    /// Show per-alarm sync status, known devices, and conflicts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show operations waiting for connectivity
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print this device's id
    Device,
}
