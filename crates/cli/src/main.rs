//! Tally CLI - command-line client for the Tally API

mod commands;
mod config;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use commands::Commands;
use logging::LogLevel;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Command-line client for the Tally API")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Set logging level, overriding the configured one
    #[arg(short = 'l', long, global = true)]
    log_level: Option<LogLevel>,

    /// Directory holding the persisted session
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Timeout for the whole command in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = config::load(cli.config.as_deref(), cli.data_dir, cli.log_level)?;
    tally_core::tracing::init_tracing(&settings.logging)?;

    debug!(base_url = %settings.api.base_url, "Starting Tally CLI");

    let run = cli.command.execute(settings);
    let outcome = if cli.timeout == 0 {
        Ok(run.await)
    } else {
        tokio::time::timeout(Duration::from_secs(cli.timeout), run).await
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Command failed: {e:#}");
            std::process::exit(1);
        }
        Err(_) => {
            error!("Command timed out after {} seconds", cli.timeout);
            std::process::exit(1);
        }
    }
}
