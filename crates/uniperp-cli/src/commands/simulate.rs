// crates/uniperp-cli/src/commands/simulate.rs
//
// `uniperp simulate`: deploy the standard stack into a fresh protocol on a
// manual clock, stake for a demo account, compound daily and optionally vest.
//
// Deterministic: the same config and flags always print the same figures.

use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use uniperp_core::{Address, Amount, ManualClock, Units};
use uniperp_staking::{deploy_standard, Deployment, DeploymentConfig, HandleRewardsFlags, Protocol};

use crate::output::{format_json, format_table, units, OutputFormat};

const SIMULATION_START: u64 = 1_700_000_000;
const DAY: u64 = 86_400;

/// Pipeline simulation command.
#[derive(Debug, Args)]
pub struct SimulateCmd {
    /// Deployment config to use (defaults when omitted).
    #[arg(long)]
    pub config: Option<String>,

    /// Base tokens the demo account stakes, as a decimal amount.
    #[arg(long, default_value = "1000")]
    pub stake: String,

    /// Days to run the staking period, compounding once a day.
    #[arg(long, default_value = "30")]
    pub days: u64,

    /// Escrowed tokens to vest at the end of the staking period. Escrowed
    /// rewards are kept liquid instead of restaked when this is set.
    #[arg(long)]
    pub vest: Option<String>,

    /// Days to let the vesting deposit run before claiming.
    #[arg(long, default_value = "30")]
    pub vest_days: u64,

    /// Print JSON instead of tables.
    #[arg(long)]
    pub json: bool,
}

/// One row per component the demo account holds a position in.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct PositionRow {
    #[tabled(rename = "Component")]
    pub component: String,
    #[tabled(rename = "Staked")]
    pub staked: String,
    #[tabled(rename = "Claimable")]
    pub claimable: String,
    #[tabled(rename = "Cumulative")]
    pub cumulative: String,
    #[tabled(rename = "Average staked")]
    pub average_staked: String,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct VestingRow {
    #[tabled(rename = "Deposited")]
    pub deposited: String,
    #[tabled(rename = "Pair locked")]
    pub pair_locked: String,
    #[tabled(rename = "Claimed")]
    pub claimed: String,
    #[tabled(rename = "Max vestable")]
    pub max_vestable: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub account: String,
    pub elapsed_days: u64,
    pub wallet_reward_tokens: String,
    pub wallet_es_tokens: String,
    pub wallet_native: String,
    pub positions: Vec<PositionRow>,
    pub vesting: VestingRow,
}

fn parse_units(field: &str, value: &str) -> Result<Amount, Box<dyn std::error::Error>> {
    let parsed: Units = value
        .parse()
        .map_err(|e| format!("--{}: {}", field, e))?;
    Ok(parsed.0)
}

/// Run the whole scenario and collect the demo account's final state.
pub fn simulate(
    config: &DeploymentConfig,
    stake: Amount,
    days: u64,
    vest: Option<Amount>,
    vest_days: u64,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let clock = Arc::new(ManualClock::new(SIMULATION_START));
    let mut protocol = Protocol::new(clock.clone());
    let gov = Address::from_label("gov");
    let account = Address::from_label("demo");
    let d = deploy_standard(&mut protocol, gov, config)?;

    protocol.mint(gov, d.reward_token, account, stake)?;
    protocol.approve(account, d.reward_token, d.staked_ledger, stake)?;
    protocol.stake_tokens(account, d.router, stake)?;

    let flags = HandleRewardsFlags {
        claim_es_tokens: true,
        stake_es_tokens: vest.is_none(),
        stake_bonus_points: true,
        claim_fees: true,
        convert_fees_to_native: true,
        ..HandleRewardsFlags::default()
    };
    for day in 1..=days {
        clock.advance(DAY);
        let claimed = protocol.handle_rewards(account, d.router, flags)?;
        tracing::debug!(
            day,
            es = %Units(claimed.es_tokens),
            bonus = %Units(claimed.bonus_points),
            fees = %Units(claimed.fees),
            "daily rewards handled"
        );
    }

    let mut elapsed_days = days;
    if let Some(amount) = vest {
        protocol.deposit(account, d.vault, amount)?;
        clock.advance(vest_days * DAY);
        elapsed_days += vest_days;
        let paid = protocol.claim_vested(account, d.vault, account)?;
        tracing::info!(paid = %Units(paid), "vested tokens claimed");
    }

    report(&protocol, &d, account, elapsed_days)
}

fn report(
    protocol: &Protocol,
    d: &Deployment,
    account: Address,
    elapsed_days: u64,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let mut positions = Vec::new();
    for id in [d.staked_ledger, d.bonus_ledger, d.fee_ledger] {
        let ledger = protocol.ledger(&id)?;
        positions.push(PositionRow {
            component: ledger.symbol.clone(),
            staked: units(ledger.staked_amount(&account)),
            claimable: units(protocol.claimable(id, account)?),
            cumulative: units(ledger.cumulative_rewards(&account)),
            average_staked: units(ledger.average_staked_amount(&account)),
        });
    }

    let position = protocol.vesting_position(d.vault, account)?;
    let vesting = VestingRow {
        deposited: units(position.deposited_balance),
        pair_locked: units(position.pair_amount),
        claimed: units(position.claimed_amount),
        max_vestable: units(protocol.get_max_vestable_amount(d.vault, account)?),
    };

    Ok(SimulationReport {
        account: account.short(),
        elapsed_days,
        wallet_reward_tokens: units(protocol.balance_of(&d.reward_token, &account)?),
        wallet_es_tokens: units(protocol.balance_of(&d.es_token, &account)?),
        wallet_native: units(protocol.balance_of(&d.native_token, &account)?),
        positions,
        vesting,
    })
}

/// Run the simulate command.
pub fn run(cmd: &SimulateCmd) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cmd.config {
        Some(path) => DeploymentConfig::load(path)?,
        None => DeploymentConfig::default(),
    };
    let stake = parse_units("stake", &cmd.stake)?;
    let vest = cmd
        .vest
        .as_deref()
        .map(|v| parse_units("vest", v))
        .transpose()?;

    let report = simulate(&config, stake, cmd.days, vest, cmd.vest_days)?;

    match OutputFormat::from_json_flag(cmd.json) {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            println!(
                "Account {} after {} days  |  wallet: {} {}, {} {}, {} {}",
                report.account,
                report.elapsed_days,
                report.wallet_reward_tokens,
                config.reward_symbol,
                report.wallet_es_tokens,
                config.es_symbol,
                report.wallet_native,
                config.native_symbol,
            );
            println!();
            println!("{}", format_table(&report.positions));
            println!();
            println!("{}", format_table(std::slice::from_ref(&report.vesting)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniperp_core::expand_decimals;

    #[test]
    fn test_simulate_compounds_into_staked_ledger() {
        let config = DeploymentConfig::default();
        let report = simulate(&config, expand_decimals(1_000, 18), 1, None, 0).unwrap();
        assert_eq!(report.elapsed_days, 1);
        assert_eq!(report.positions.len(), 3);
        // 0.0206 es per second for a day, restaked
        assert_eq!(report.positions[0].staked, "2779.84");
        assert_eq!(report.wallet_es_tokens, "0");
        assert_eq!(report.vesting.deposited, "0");
    }

    #[test]
    fn test_simulate_vests_liquid_rewards() {
        let config = DeploymentConfig::default();
        let report = simulate(
            &config,
            expand_decimals(1_000, 18),
            1,
            Some(expand_decimals(1_000, 18)),
            0,
        )
        .unwrap();
        // 1779.84 es earned, 1000 deposited and nothing released yet
        assert_eq!(report.wallet_es_tokens, "779.84");
        assert_eq!(report.vesting.deposited, "1000");
        assert_eq!(report.positions[0].staked, "1000");
    }

    #[test]
    fn test_simulate_rejects_oversized_vest() {
        let config = DeploymentConfig::default();
        let err = simulate(
            &config,
            expand_decimals(1_000, 18),
            1,
            Some(expand_decimals(5_000, 18)),
            0,
        );
        assert!(err.is_err());
    }
}
