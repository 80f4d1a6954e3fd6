//! Tessera CLI - drive the unit runtime from a terminal.
//!
//! `run` loads, deploys and starts every unit in a directory and keeps them
//! running until Ctrl+C. `restore` recreates components from a snapshot and
//! drops into the console. `console` is an interactive shell over the
//! orchestrator. `inspect` prints what a unit declares without deploying it.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tessera_config::RuntimeConfig;
use tessera_telemetry::LogFormat;

mod commands;
mod repl;
mod theme;

use commands::{console, inspect, restore, run};

/// Default configuration file, read from the working directory.
const DEFAULT_CONFIG_FILE: &str = "tessera.toml";

/// Tessera - dynamic unit runtime
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, deploy and start every unit in a directory until Ctrl+C
    Run {
        /// Directory to scan for `.unit` files (defaults to `runtime.units_dir`)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Recreate components from a snapshot, then open the console
    Restore {
        /// Snapshot file written by a previous session
        snapshot: PathBuf,
    },

    /// Show a unit's exports and declarations
    Inspect {
        /// Path to the `.unit` file
        unit: PathBuf,
    },

    /// Interactive console (default)
    Console,
}

fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig> {
    match explicit {
        Some(path) => tessera_config::load_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => tessera_config::load_or_default(Path::new(DEFAULT_CONFIG_FILE))
            .context("failed to load configuration"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let mut log_config = config.logging.clone();
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
        log_config = log_config.with_format(LogFormat::Full);
    }
    if let Err(e) = tessera_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging from configuration: {e}");
        if let Err(e) = tessera_telemetry::setup_default_logging() {
            eprintln!("Failed to initialize logging: {e}");
        }
    }

    match cli.command {
        Some(Commands::Run { dir }) => {
            let dir = dir.unwrap_or_else(|| config.runtime.units_dir.clone());
            run::run_units(&config, &dir).await?;
        },
        Some(Commands::Restore { snapshot }) => {
            restore::run_restore(&config, &snapshot)?;
        },
        Some(Commands::Inspect { unit }) => {
            inspect::run_inspect(&config, &unit)?;
        },
        Some(Commands::Console) | None => {
            console::run_console(&config)?;
        },
    }

    Ok(())
}
