// crates/uniperp-cli/src/main.rs
//
// CLI entrypoint for the UniPerp staking engine.
//
// Provides subcommands for checking deployment configs and running a
// deterministic simulation of the staking pipeline.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::config::ConfigCmd;
use commands::simulate::SimulateCmd;

/// UniPerp staking engine operator tools.
#[derive(Parser, Debug)]
#[command(
    name = "uniperp",
    version = "0.1.0",
    about = "UniPerp staking engine: config checks and pipeline simulation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Deployment config management: check, default.
    #[command(subcommand)]
    Config(ConfigCmd),

    /// Deploy into a fresh protocol and simulate staking over time.
    Simulate(SimulateCmd),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Config(cmd) => commands::config::run(cmd)?,
        Commands::Simulate(cmd) => commands::simulate::run(cmd)?,
    }

    Ok(())
}
