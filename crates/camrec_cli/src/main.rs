//! camrec CLI
//!
//! Drives the camera segment pipeline on a recorder node.
//!
//! # Commands
//!
//! - `stage` - Move closed segments into the staging tree
//! - `replicate` - Transfer staged segments and record them in the ledger
//! - `reclaim` - Delete staged segments the ledger lists as replicated
//! - `watchdog` - Restart producers whose output went stale
//! - `run` - Run every component on its own schedule until interrupted
//! - `ledger` - Inspect ledger partitions
//! - `status` - Per-station overview
//! - `units` - Generate systemd service and timer files

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Camera segment lifecycle: stage, replicate, reclaim, watch.
#[derive(Parser)]
#[command(name = "camrec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(global = true, short, long, default_value = "/etc/camrec/camrec.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move closed segments from the live tree into staging
    Stage,

    /// Replicate staged segments to the target and record them
    Replicate,

    /// Delete staged segments already recorded as replicated
    Reclaim,

    /// Check producers for stalls and restart them
    Watchdog,

    /// Run all components periodically until Ctrl-C
    Run,

    /// Inspect the sync ledger
    Ledger {
        /// Show the entries of this partition (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-station pipeline status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate systemd unit files
    Units {
        /// Directory to write unit files into
        #[arg(short, long)]
        out: PathBuf,

        /// Path of the camrec binary used in ExecStart
        #[arg(short, long)]
        exe: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Stage => {
            let config = commands::load_config(&cli.config)?;
            commands::stage::run(&config)?;
        }
        Commands::Replicate => {
            let config = commands::load_config(&cli.config)?;
            commands::replicate::run(&config)?;
        }
        Commands::Reclaim => {
            let config = commands::load_config(&cli.config)?;
            commands::reclaim::run(&config)?;
        }
        Commands::Watchdog => {
            let config = commands::load_config(&cli.config)?;
            commands::watchdog::run(&config)?;
        }
        Commands::Run => {
            let config = commands::load_config(&cli.config)?;
            commands::run::run(config)?;
        }
        Commands::Ledger { date, format } => {
            let config = commands::load_config(&cli.config)?;
            commands::ledger::run(&config, date.as_deref(), &format)?;
        }
        Commands::Status { format } => {
            let config = commands::load_config(&cli.config)?;
            commands::status::run(&config, &format)?;
        }
        Commands::Units { out, exe } => {
            let config = commands::load_config(&cli.config)?;
            let exe = match exe {
                Some(exe) => exe,
                None => std::env::current_exe()?,
            };
            commands::units::run(&config, &cli.config, &exe, &out)?;
        }
        Commands::Version => {
            println!("camrec v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
