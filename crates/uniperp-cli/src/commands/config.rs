// crates/uniperp-cli/src/commands/config.rs
//
// `uniperp config {check, default}`: deployment config management.

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use uniperp_staking::DeploymentConfig;

use crate::output::{format_json, format_table, units, OutputFormat};

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Load and validate a deployment config, then print its parsed values.
    Check {
        /// Path to the TOML config file.
        path: String,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print the default deployment config as TOML.
    Default,
}

#[derive(Debug, Serialize, Tabled)]
struct ConfigRow {
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn rows(config: &DeploymentConfig) -> Result<Vec<ConfigRow>, Box<dyn std::error::Error>> {
    let amounts = config.amounts()?;
    let row = |setting: &str, value: String| ConfigRow {
        setting: setting.to_string(),
        value,
    };
    Ok(vec![
        row("reward token", config.reward_symbol.clone()),
        row("escrowed token", config.es_symbol.clone()),
        row("bonus token", config.bonus_symbol.clone()),
        row("fee token", format!("{} (wraps {})", config.fee_symbol, config.native_symbol)),
        row("es per second", units(amounts.es_tokens_per_second)),
        row("fees per second", units(amounts.fee_tokens_per_second)),
        row("bonus multiplier", format!("{} bps", config.bonus_multiplier_bps)),
        row("vesting duration", format!("{} s", config.vesting_duration_secs)),
        row("unstake cooldown", format!("{} s", config.unstake_cooldown_secs)),
        row("max batch size", config.max_batch_size.to_string()),
        row("max vestable cap", config.has_max_vestable_amount.to_string()),
        row("es emitter funding", units(amounts.es_emitter_funding)),
        row("fee emitter funding", units(amounts.fee_emitter_funding)),
        row("vault float", units(amounts.vault_float)),
    ])
}

/// Run the config subcommand.
pub fn run(cmd: &ConfigCmd) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCmd::Check { path, json } => {
            let config = DeploymentConfig::load(path)?;
            config.validate()?;
            tracing::info!(path = %path, "deployment config is valid");
            let rows = rows(&config)?;
            match OutputFormat::from_json_flag(*json) {
                OutputFormat::Table => println!("{}", format_table(&rows)),
                OutputFormat::Json => println!("{}", format_json(&config)),
            }
        }
        ConfigCmd::Default => {
            print!("{}", DeploymentConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}
