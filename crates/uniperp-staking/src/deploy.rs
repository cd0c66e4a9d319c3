// crates/uniperp-staking/src/deploy.rs
//
// Standard deployment: the stake -> bonus -> fee ledger chain, its three
// emitters, the vesting vault and the router, with every handler, minter and
// private-mode switch wired.
//
//   reward, es ──► staked ledger ──► bonus ledger ──► fee ledger ◄── bonus pts
//                  (es emitter)      (bonus emitter)  (fee emitter)
//
// The vault vests es-tokens into the reward token, capped by the staked
// ledger's reward history and paired with fee-ledger shares.

use serde::{Deserialize, Serialize};
use tracing::info;

use uniperp_core::error::ProtocolError;
use uniperp_core::Address;

use crate::config::DeploymentConfig;
use crate::emitter::{EmissionSchedule, Emitter};
use crate::protocol::Protocol;
use crate::router::{Router, RouterConfig};
use crate::stake_ledger::StakeLedger;
use crate::vesting::{VaultConfig, VestingVault};

/// Addresses of a standard deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub gov: Address,
    pub reward_token: Address,
    pub es_token: Address,
    pub bonus_token: Address,
    pub fee_token: Address,
    pub native_token: Address,
    pub staked_ledger: Address,
    pub bonus_ledger: Address,
    pub fee_ledger: Address,
    pub staked_emitter: Address,
    pub bonus_emitter: Address,
    pub fee_emitter: Address,
    pub vault: Address,
    pub router: Address,
}

impl Deployment {
    /// Derive component addresses from the configured symbols.
    pub fn from_config(gov: Address, config: &DeploymentConfig) -> Self {
        let reward = &config.reward_symbol;
        let id = |name: String| Address::from_label(&name);
        Self {
            gov,
            reward_token: id(reward.clone()),
            es_token: id(config.es_symbol.clone()),
            bonus_token: id(config.bonus_symbol.clone()),
            fee_token: id(config.fee_symbol.clone()),
            native_token: id(config.native_symbol.clone()),
            staked_ledger: id(format!("s{}", reward)),
            bonus_ledger: id(format!("sb{}", reward)),
            fee_ledger: id(format!("sbf{}", reward)),
            staked_emitter: id(format!("s{}/emitter", reward)),
            bonus_emitter: id(format!("sb{}/emitter", reward)),
            fee_emitter: id(format!("sbf{}/emitter", reward)),
            vault: id(format!("v{}", reward)),
            router: id(format!("{}/router", reward)),
        }
    }
}

/// Build and wire the standard stack inside `protocol`, owned by `gov`.
/// Runs as one atomic call: on error nothing is registered.
pub fn deploy_standard(
    protocol: &mut Protocol,
    gov: Address,
    config: &DeploymentConfig,
) -> Result<Deployment, ProtocolError> {
    config.validate()?;
    let amounts = config.amounts()?;
    let d = Deployment::from_config(gov, config);
    let reward = config.reward_symbol.as_str();

    protocol.atomically("deploy_standard", |p| {
        let now = p.now();
        if now == 0 {
            return Err(ProtocolError::Config("clock must be past the epoch".to_string()));
        }

        // Tokens
        p.create_token(d.reward_token, reward, gov)?;
        p.create_token(d.es_token, &config.es_symbol, gov)?;
        p.create_token(d.bonus_token, &config.bonus_symbol, gov)?;
        p.create_token(d.fee_token, &config.fee_symbol, gov)?;
        p.create_token(d.native_token, &config.native_symbol, gov)?;
        p.tokens_mut().register_wrapped(d.fee_token, d.native_token)?;

        // Ledgers
        p.add_ledger(StakeLedger::new(d.staked_ledger, format!("s{}", reward), gov))?;
        p.add_ledger(StakeLedger::new(d.bonus_ledger, format!("sb{}", reward), gov))?;
        p.add_ledger(StakeLedger::new(d.fee_ledger, format!("sbf{}", reward), gov))?;

        // Emitters
        p.add_emitter(Emitter::new(
            d.staked_emitter,
            d.es_token,
            d.staked_ledger,
            gov,
            EmissionSchedule::Fixed {
                tokens_per_interval: amounts.es_tokens_per_second,
            },
        ))?;
        p.add_emitter(Emitter::new(
            d.bonus_emitter,
            d.bonus_token,
            d.bonus_ledger,
            gov,
            EmissionSchedule::Bonus {
                multiplier_bps: config.bonus_multiplier_bps as u128,
            },
        ))?;
        p.add_emitter(Emitter::new(
            d.fee_emitter,
            d.fee_token,
            d.fee_ledger,
            gov,
            EmissionSchedule::Fixed {
                tokens_per_interval: amounts.fee_tokens_per_second,
            },
        ))?;

        p.ledger_mut(&d.staked_ledger)?
            .initialize(gov, &[d.reward_token, d.es_token], d.staked_emitter, d.es_token)?;
        p.ledger_mut(&d.bonus_ledger)?
            .initialize(gov, &[d.staked_ledger], d.bonus_emitter, d.bonus_token)?;
        p.ledger_mut(&d.fee_ledger)?
            .initialize(gov, &[d.bonus_ledger, d.bonus_token], d.fee_emitter, d.fee_token)?;

        // Vault and router
        p.add_vault(VestingVault::new(
            d.vault,
            format!("v{}", reward),
            gov,
            VaultConfig {
                vesting_duration: config.vesting_duration_secs,
                es_token: d.es_token,
                claimable_token: d.reward_token,
                reward_ledger: Some(d.staked_ledger),
                pair_token: Some(d.fee_ledger),
                has_max_vestable_amount: config.has_max_vestable_amount,
            },
        ))?;
        let mut router = Router::new(d.router, gov);
        router.initialize(
            gov,
            RouterConfig {
                reward_token: d.reward_token,
                es_token: d.es_token,
                bonus_token: d.bonus_token,
                fee_token: d.fee_token,
                native_token: d.native_token,
                staked_ledger: d.staked_ledger,
                bonus_ledger: d.bonus_ledger,
                fee_ledger: d.fee_ledger,
                vaults: vec![d.vault],
            },
        )?;
        router.set_max_batch_size(gov, config.max_batch_size)?;
        p.add_router(router)?;

        // Ledger switches and handlers
        for ledger in [d.staked_ledger, d.bonus_ledger, d.fee_ledger] {
            let l = p.ledger_mut(&ledger)?;
            l.set_in_private_transfer_mode(gov, true)?;
            l.set_in_private_staking_mode(gov, true)?;
            l.set_handler(gov, d.router, true)?;
            l.set_unstake_cooldown(gov, config.unstake_cooldown_secs)?;
        }
        p.ledger_mut(&d.bonus_ledger)?.set_in_private_claiming_mode(gov, true)?;
        p.ledger_mut(&d.staked_ledger)?.set_handler(gov, d.bonus_ledger, true)?;
        p.ledger_mut(&d.bonus_ledger)?.set_handler(gov, d.fee_ledger, true)?;
        p.ledger_mut(&d.fee_ledger)?.set_handler(gov, d.vault, true)?;
        p.vault_mut(&d.vault)?.set_handler(gov, d.router, true)?;

        // Token permissions
        {
            let es = p.tokens_mut().get_mut(&d.es_token)?;
            es.set_in_private_transfer_mode(gov, true)?;
            for handler in [d.staked_ledger, d.staked_emitter, d.vault, d.router] {
                es.set_handler(gov, handler, true)?;
            }
            es.set_minter(gov, d.vault, true)?;
            es.set_minter(gov, gov, true)?;
        }
        {
            let bonus = p.tokens_mut().get_mut(&d.bonus_token)?;
            bonus.set_in_private_transfer_mode(gov, true)?;
            bonus.set_handler(gov, d.bonus_ledger, true)?;
            bonus.set_handler(gov, d.fee_ledger, true)?;
            bonus.set_minter(gov, d.bonus_emitter, true)?;
            bonus.set_minter(gov, d.router, true)?;
        }
        p.tokens_mut().get_mut(&d.reward_token)?.set_minter(gov, gov, true)?;
        p.tokens_mut().get_mut(&d.native_token)?.set_minter(gov, gov, true)?;

        // Funding
        p.token_mint(d.es_token, gov, d.staked_emitter, amounts.es_emitter_funding)?;
        p.token_mint(d.reward_token, gov, d.vault, amounts.vault_float)?;
        if amounts.fee_emitter_funding > 0 {
            p.token_mint(d.native_token, gov, gov, amounts.fee_emitter_funding)?;
            p.tokens_mut().wrap(&d.fee_token, gov, amounts.fee_emitter_funding)?;
            p.token_transfer(d.fee_token, gov, d.fee_emitter, amounts.fee_emitter_funding)?;
        }

        for emitter in [d.staked_emitter, d.bonus_emitter, d.fee_emitter] {
            p.emitter_mut(&emitter)?.start_clock(gov, now)?;
        }

        info!(
            reward = reward,
            router = %d.router.short(),
            vault = %d.vault.short(),
            vesting_duration = config.vesting_duration_secs,
            "standard deployment wired"
        );
        Ok(d.clone())
    })
}
