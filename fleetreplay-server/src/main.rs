#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the `fleetreplay` CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::commands;
use shared::config::Config;
use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

/// Main CLI structure for `fleetreplay`
#[derive(Debug, Parser)]
#[command(name = "fleetreplay")]
#[command(about = "Replays recorded fleet trips as live-looking event streams", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the `fleetreplay` CLI
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind, overriding the configuration (e.g. `--port 8080`)
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (`.yaml`, `.yml`, `.json` or `.toml`); defaults are used when omitted
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Validate a trips document and print a summary
    Check {
        /// Trips document to validate
        file: PathBuf,
    },
    /// Play a trips document on the virtual clock and log every batch
    Replay {
        /// Trips document to play
        file: PathBuf,

        /// Virtual milliseconds per real millisecond
        #[arg(long, short, default_value_t = 1.0)]
        speed: f64,

        /// Tick interval in milliseconds
        #[arg(long, default_value_t = 500)]
        tick_ms: u64,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config.as_deref(), port).context("loading configuration")?;
    server::server::run(resolved)
        .await
        .map_err(|err| anyhow::anyhow!(err))
        .context("server exited with an error")
}

async fn handle_check_command(file: PathBuf) -> anyhow::Result<()> {
    let report = commands::check::run(&file)
        .await
        .with_context(|| format!("{} is not a valid trips document", file.display()))?;
    io::stdout().write_all(report.to_string().as_bytes())?;
    Ok(())
}

async fn handle_replay_command(file: PathBuf, speed: f64, tick_ms: u64) -> anyhow::Result<()> {
    server::server::initialize_tracing(&Config::with_defaults());
    let options = commands::replay::ReplayOptions {
        speed,
        tick: Duration::from_millis(tick_ms.max(1)),
    };
    let summary = commands::replay::run(&file, options).await?;
    writeln!(
        io::stdout(),
        "replayed {} events in {} batches",
        summary.events, summary.batches
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Check { file } => handle_check_command(file).await,
        Commands::Replay {
            file,
            speed,
            tick_ms,
        } => handle_replay_command(file, speed, tick_ms).await,
    }
}
