// crates/uniperp-staking/src/router.rs
//
// The reward router: composes the staked -> bonus -> fee ledger chain and
// the vesting vaults into user-level operations.
//
// Staking the base token (or its escrowed form) propagates through the whole
// chain: the staked ledger's shares are staked into the bonus ledger, whose
// shares are staked into the fee ledger. Bonus points earned on the bonus
// ledger are staked into the fee ledger directly and are partially burned
// when the underlying stake is reduced.
//
// The router is a registered handler on every ledger and vault and acts
// through their delegated entry points.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use uniperp_core::error::ProtocolError;
use uniperp_core::math;
use uniperp_core::{Action, Address, Amount, Event, Governable};

use crate::protocol::Protocol;

/// Default upper bound on `batch_compound_for_accounts`.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Components a router drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Base reward token.
    pub reward_token: Address,
    pub es_token: Address,
    /// Bonus-point token.
    pub bonus_token: Address,
    /// Fee reward token (wrapped native asset).
    pub fee_token: Address,
    pub native_token: Address,
    pub staked_ledger: Address,
    pub bonus_ledger: Address,
    pub fee_ledger: Address,
    pub vaults: Vec<Address>,
}

/// Independent toggles for `handle_rewards`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRewardsFlags {
    /// Claim released base tokens from every vault.
    pub claim_vested: bool,
    /// Re-stake the base tokens claimed from vaults.
    pub stake_vested: bool,
    pub claim_es_tokens: bool,
    pub stake_es_tokens: bool,
    /// Claim bonus points and stake them into the fee ledger.
    pub stake_bonus_points: bool,
    pub claim_fees: bool,
    /// Pay fee proceeds out as the native asset instead of the wrapped one.
    pub convert_fees_to_native: bool,
}

impl HandleRewardsFlags {
    /// Every toggle on except native conversion.
    pub fn all() -> Self {
        Self {
            claim_vested: true,
            stake_vested: true,
            claim_es_tokens: true,
            stake_es_tokens: true,
            stake_bonus_points: true,
            claim_fees: true,
            convert_fees_to_native: false,
        }
    }
}

/// What a claim-style router call paid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsClaimed {
    pub vested: Amount,
    pub es_tokens: Amount,
    pub bonus_points: Amount,
    pub fees: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    pub address: Address,
    governance: Governable,
    config: Option<RouterConfig>,
    max_batch_size: usize,
    /// sender -> receiver of a signalled position transfer
    pending_receivers: BTreeMap<Address, Address>,
}

impl Router {
    pub fn new(address: Address, gov: Address) -> Self {
        Self {
            address,
            governance: Governable::new(gov),
            config: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            pending_receivers: BTreeMap::new(),
        }
    }

    pub fn gov(&self) -> Address {
        self.governance.gov()
    }

    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.governance.set_gov(caller, new_gov)
    }

    /// Wire the router once.
    pub fn initialize(&mut self, caller: Address, config: RouterConfig) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        if self.config.is_some() {
            return Err(ProtocolError::AlreadyInitialized(format!(
                "router {} already initialized",
                self.address.short()
            )));
        }
        self.config = Some(config);
        Ok(())
    }

    pub fn set_max_batch_size(&mut self, caller: Address, size: usize) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        if size == 0 {
            return Err(ProtocolError::Config("max batch size must be positive".to_string()));
        }
        self.max_batch_size = size;
        Ok(())
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn config(&self) -> Result<&RouterConfig, ProtocolError> {
        self.config.as_ref().ok_or_else(|| {
            ProtocolError::NotFound(format!("router {} is not initialized", self.address.short()))
        })
    }

    pub fn pending_receiver(&self, sender: &Address) -> Option<Address> {
        self.pending_receivers.get(sender).copied()
    }
}

impl Protocol {
    fn router_config(&self, router: Address) -> Result<RouterConfig, ProtocolError> {
        Ok(self.router(&router)?.config()?.clone())
    }

    fn ensure_router_gov(&self, router: Address, caller: Address) -> Result<(), ProtocolError> {
        self.router(&router)?.governance.ensure_gov(caller)
    }

    // ---------------------------------------------------------------------
    // Delegated calls, each gated by the target's handler list
    // ---------------------------------------------------------------------

    fn stake_via(
        &mut self,
        router: Address,
        ledger: Address,
        funding: Address,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.ledger(&ledger)?.ensure_handler(router)?;
        self.stake_on_ledger(ledger, router, funding, account, token, amount)
    }

    fn unstake_via(
        &mut self,
        router: Address,
        ledger: Address,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.ledger(&ledger)?.ensure_handler(router)?;
        self.unstake_from_ledger(ledger, router, account, token, amount, account)
    }

    fn claim_via(
        &mut self,
        router: Address,
        ledger: Address,
        account: Address,
        receiver: Address,
    ) -> Result<Amount, ProtocolError> {
        self.ledger(&ledger)?.ensure_handler(router)?;
        self.claim_from_ledger(ledger, router, account, receiver)
    }

    /// staked -> bonus -> fee.
    fn stake_through_chain(
        &mut self,
        router: Address,
        cfg: &RouterConfig,
        funding: Address,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.stake_via(router, cfg.staked_ledger, funding, account, token, amount)?;
        self.stake_via(router, cfg.bonus_ledger, account, account, cfg.staked_ledger, amount)?;
        self.stake_via(router, cfg.fee_ledger, account, account, cfg.bonus_ledger, amount)
    }

    /// fee -> bonus -> staked, then burn the matching share of staked bonus
    /// points.
    fn unstake_through_chain(
        &mut self,
        router: Address,
        cfg: &RouterConfig,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("unstake amount is zero".to_string()));
        }
        let staked_before = self.ledger(&cfg.staked_ledger)?.staked_amount(&account);

        self.unstake_via(router, cfg.fee_ledger, account, cfg.bonus_ledger, amount)?;
        self.unstake_via(router, cfg.bonus_ledger, account, cfg.staked_ledger, amount)?;
        self.unstake_via(router, cfg.staked_ledger, account, token, amount)?;

        let bonus_points = self.claim_via(router, cfg.bonus_ledger, account, account)?;
        if bonus_points > 0 {
            self.stake_via(router, cfg.fee_ledger, account, account, cfg.bonus_token, bonus_points)?;
        }

        let staked_bonus = self
            .ledger(&cfg.fee_ledger)?
            .deposit_balance(&account, &cfg.bonus_token);
        if staked_bonus > 0 && staked_before > 0 {
            let reduction = math::mul_div(staked_bonus, amount, staked_before)?;
            if reduction > 0 {
                self.unstake_via(router, cfg.fee_ledger, account, cfg.bonus_token, reduction)?;
                self.token_burn(cfg.bonus_token, router, account, reduction)?;
                let now = self.now();
                self.record(
                    Event::new(now, router, router, account, Action::BonusBurn)
                        .with_token(cfg.bonus_token)
                        .with_amount(reduction)
                        .with_balance("staked_bonus_before", staked_bonus),
                );
            }
        }
        Ok(())
    }

    fn compound_account(&mut self, router: Address, cfg: &RouterConfig, account: Address) -> Result<RewardsClaimed, ProtocolError> {
        let es_tokens = self.claim_via(router, cfg.staked_ledger, account, account)?;
        if es_tokens > 0 {
            self.stake_through_chain(router, cfg, account, account, cfg.es_token, es_tokens)?;
        }
        let bonus_points = self.claim_via(router, cfg.bonus_ledger, account, account)?;
        if bonus_points > 0 {
            self.stake_via(router, cfg.fee_ledger, account, account, cfg.bonus_token, bonus_points)?;
        }

        let now = self.now();
        self.record(
            Event::new(now, router, router, account, Action::Compound)
                .with_token(cfg.es_token)
                .with_amount(es_tokens)
                .with_balance("bonus_points", bonus_points),
        );
        Ok(RewardsClaimed {
            es_tokens,
            bonus_points,
            ..RewardsClaimed::default()
        })
    }

    fn claim_fees_for(
        &mut self,
        router: Address,
        cfg: &RouterConfig,
        account: Address,
        convert_to_native: bool,
    ) -> Result<Amount, ProtocolError> {
        if !convert_to_native {
            return self.claim_via(router, cfg.fee_ledger, account, account);
        }
        let fees = self.claim_via(router, cfg.fee_ledger, account, router)?;
        if fees > 0 {
            self.tokens_mut().unwrap(&cfg.fee_token, router, fees, account)?;
            let now = self.now();
            self.record(
                Event::new(now, router, router, account, Action::FeeConversion)
                    .with_token(cfg.native_token)
                    .with_amount(fees),
            );
        }
        Ok(fees)
    }

    /// Receiver of a position transfer must carry no reward history.
    fn validate_receiver(&self, cfg: &RouterConfig, receiver: Address) -> Result<(), ProtocolError> {
        for id in [cfg.staked_ledger, cfg.bonus_ledger, cfg.fee_ledger] {
            let l = self.ledger(&id)?;
            if l.average_staked_amount(&receiver) > 0 || l.cumulative_rewards(&receiver) > 0 {
                return Err(ProtocolError::InvalidReceiver(format!(
                    "{} has reward history on {}",
                    receiver.short(),
                    l.symbol
                )));
            }
        }
        for id in &cfg.vaults {
            let pos = self.vault(id)?.position(&receiver);
            if pos.transferred_average_staked_amount > 0 || pos.transferred_cumulative_rewards > 0 {
                return Err(ProtocolError::InvalidReceiver(format!(
                    "{} already received a transfer on {}",
                    receiver.short(),
                    id.short()
                )));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Public entry points
    // ---------------------------------------------------------------------

    /// Stake the base reward token through the whole chain.
    pub fn stake_tokens(&mut self, caller: Address, router: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("stake_tokens", |p| {
            let cfg = p.router_config(router)?;
            p.stake_through_chain(router, &cfg, caller, caller, cfg.reward_token, amount)
        })
    }

    /// Stake escrowed reward tokens through the whole chain.
    pub fn stake_es_tokens(&mut self, caller: Address, router: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("stake_es_tokens", |p| {
            let cfg = p.router_config(router)?;
            p.stake_through_chain(router, &cfg, caller, caller, cfg.es_token, amount)
        })
    }

    /// Gov-only stake funded by the caller and credited to `account`.
    pub fn stake_tokens_for_account(
        &mut self,
        caller: Address,
        router: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("stake_tokens_for_account", |p| {
            p.ensure_router_gov(router, caller)?;
            let cfg = p.router_config(router)?;
            p.stake_through_chain(router, &cfg, caller, account, cfg.reward_token, amount)
        })
    }

    pub fn unstake_tokens(&mut self, caller: Address, router: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("unstake_tokens", |p| {
            let cfg = p.router_config(router)?;
            p.unstake_through_chain(router, &cfg, caller, cfg.reward_token, amount)
        })
    }

    pub fn unstake_es_tokens(&mut self, caller: Address, router: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("unstake_es_tokens", |p| {
            let cfg = p.router_config(router)?;
            p.unstake_through_chain(router, &cfg, caller, cfg.es_token, amount)
        })
    }

    /// Claim fee proceeds and escrowed rewards.
    pub fn claim_rewards(&mut self, caller: Address, router: Address) -> Result<RewardsClaimed, ProtocolError> {
        self.atomically("claim_rewards", |p| {
            let cfg = p.router_config(router)?;
            let fees = p.claim_via(router, cfg.fee_ledger, caller, caller)?;
            let es_tokens = p.claim_via(router, cfg.staked_ledger, caller, caller)?;
            Ok(RewardsClaimed {
                es_tokens,
                fees,
                ..RewardsClaimed::default()
            })
        })
    }

    pub fn claim_es_tokens(&mut self, caller: Address, router: Address) -> Result<Amount, ProtocolError> {
        self.atomically("claim_es_tokens", |p| {
            let cfg = p.router_config(router)?;
            p.claim_via(router, cfg.staked_ledger, caller, caller)
        })
    }

    pub fn claim_fees(&mut self, caller: Address, router: Address) -> Result<Amount, ProtocolError> {
        self.atomically("claim_fees", |p| {
            let cfg = p.router_config(router)?;
            p.claim_via(router, cfg.fee_ledger, caller, caller)
        })
    }

    /// Re-stake escrowed rewards and bonus points.
    pub fn compound(&mut self, caller: Address, router: Address) -> Result<RewardsClaimed, ProtocolError> {
        self.atomically("compound", |p| {
            let cfg = p.router_config(router)?;
            p.compound_account(router, &cfg, caller)
        })
    }

    pub fn compound_for_account(
        &mut self,
        caller: Address,
        router: Address,
        account: Address,
    ) -> Result<RewardsClaimed, ProtocolError> {
        self.atomically("compound_for_account", |p| {
            p.ensure_router_gov(router, caller)?;
            let cfg = p.router_config(router)?;
            p.compound_account(router, &cfg, account)
        })
    }

    /// Compound a caller-supplied list of accounts, bounded by the router's
    /// max batch size.
    pub fn batch_compound_for_accounts(
        &mut self,
        caller: Address,
        router: Address,
        accounts: &[Address],
    ) -> Result<(), ProtocolError> {
        self.atomically("batch_compound_for_accounts", |p| {
            p.ensure_router_gov(router, caller)?;
            let max = p.router(&router)?.max_batch_size();
            if accounts.len() > max {
                return Err(ProtocolError::InvalidAmount(format!(
                    "batch of {} accounts exceeds limit {}",
                    accounts.len(),
                    max
                )));
            }
            let cfg = p.router_config(router)?;
            for account in accounts {
                p.compound_account(router, &cfg, *account)?;
            }
            info!(router = %router.short(), accounts = accounts.len(), "batch compounded");
            Ok(())
        })
    }

    /// Claim and re-stake according to `flags`.
    pub fn handle_rewards(
        &mut self,
        caller: Address,
        router: Address,
        flags: HandleRewardsFlags,
    ) -> Result<RewardsClaimed, ProtocolError> {
        self.atomically("handle_rewards", |p| {
            let cfg = p.router_config(router)?;
            let mut out = RewardsClaimed::default();

            if flags.claim_vested {
                for vault in &cfg.vaults {
                    p.vault(vault)?.ensure_handler(router)?;
                    out.vested = math::add(out.vested, p.claim_from_vault(*vault, router, caller, caller)?)?;
                }
            }
            if flags.stake_vested && out.vested > 0 {
                p.stake_through_chain(router, &cfg, caller, caller, cfg.reward_token, out.vested)?;
            }

            if flags.claim_es_tokens {
                out.es_tokens = p.claim_via(router, cfg.staked_ledger, caller, caller)?;
            }
            if flags.stake_es_tokens && out.es_tokens > 0 {
                p.stake_through_chain(router, &cfg, caller, caller, cfg.es_token, out.es_tokens)?;
            }

            if flags.stake_bonus_points {
                out.bonus_points = p.claim_via(router, cfg.bonus_ledger, caller, caller)?;
                if out.bonus_points > 0 {
                    p.stake_via(router, cfg.fee_ledger, caller, caller, cfg.bonus_token, out.bonus_points)?;
                }
            }

            if flags.claim_fees {
                out.fees = p.claim_fees_for(router, &cfg, caller, flags.convert_fees_to_native)?;
            }
            Ok(out)
        })
    }

    /// First phase of a position transfer. The caller must be fully
    /// unstaked and `receiver` must carry no reward history.
    pub fn signal_transfer(&mut self, caller: Address, router: Address, receiver: Address) -> Result<(), ProtocolError> {
        self.atomically("signal_transfer", |p| {
            let cfg = p.router_config(router)?;
            let staked = p.ledger(&cfg.staked_ledger)?.staked_amount(&caller);
            if staked > 0 {
                return Err(ProtocolError::ActionNotEnabled(format!(
                    "{} must unstake {} before transferring",
                    caller.short(),
                    staked
                )));
            }
            p.validate_receiver(&cfg, receiver)?;

            for vault in &cfg.vaults {
                p.vault(vault)?.ensure_handler(router)?;
                p.signal_vault_transfer_inner(*vault, router, caller, receiver)?;
            }
            p.router_mut(&router)?.pending_receivers.insert(caller, receiver);

            let now = p.now();
            p.record(Event::new(now, router, caller, caller, Action::TransferSignalled));
            Ok(())
        })
    }

    /// Second phase: the receiver takes over `sender`'s vesting positions and
    /// escrowed token balance.
    pub fn accept_transfer(&mut self, caller: Address, router: Address, sender: Address) -> Result<(), ProtocolError> {
        self.atomically("accept_transfer", |p| {
            let cfg = p.router_config(router)?;
            let r = p.router(&router)?;
            if r.pending_receiver(&sender) != Some(caller) {
                return Err(ProtocolError::TransferNotSignalled(format!(
                    "no pending transfer from {} to {}",
                    sender.short(),
                    caller.short()
                )));
            }
            if r.pending_receiver(&caller).is_some() {
                return Err(ProtocolError::TransferAlreadySignalled(format!(
                    "{} has its own pending transfer",
                    caller.short()
                )));
            }
            p.router_mut(&router)?.pending_receivers.remove(&sender);
            p.validate_receiver(&cfg, caller)?;

            // Settled escrow rewards go to the sender's wallet first, then
            // move with the rest of the wallet balance.
            p.claim_via(router, cfg.staked_ledger, sender, sender)?;
            let es_balance = p.balance_of(&cfg.es_token, &sender)?;
            if es_balance > 0 {
                p.token_transfer_from(cfg.es_token, router, sender, caller, es_balance)?;
            }

            for vault in &cfg.vaults {
                p.vault(vault)?.ensure_handler(router)?;
                p.accept_vault_transfer_inner(*vault, router, sender, caller)?;
            }

            let now = p.now();
            p.record(
                Event::new(now, router, caller, sender, Action::TransferAccepted)
                    .with_token(cfg.es_token)
                    .with_amount(es_balance),
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn config() -> RouterConfig {
        RouterConfig {
            reward_token: addr("UNIP"),
            es_token: addr("esUNIP"),
            bonus_token: addr("bnUNIP"),
            fee_token: addr("WETH"),
            native_token: addr("ETH"),
            staked_ledger: addr("sUNIP"),
            bonus_ledger: addr("sbUNIP"),
            fee_ledger: addr("sbfUNIP"),
            vaults: vec![addr("vUNIP")],
        }
    }

    #[test]
    fn test_initialize_once_and_gov_only() {
        let gov = addr("gov");
        let mut router = Router::new(addr("router"), gov);
        assert!(router.config().is_err());
        assert!(router.initialize(addr("user"), config()).is_err());
        router.initialize(gov, config()).unwrap();
        assert_eq!(router.config().unwrap().vaults.len(), 1);
        assert!(matches!(
            router.initialize(gov, config()),
            Err(ProtocolError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_max_batch_size() {
        let gov = addr("gov");
        let mut router = Router::new(addr("router"), gov);
        assert_eq!(router.max_batch_size(), DEFAULT_MAX_BATCH_SIZE);
        assert!(router.set_max_batch_size(gov, 0).is_err());
        router.set_max_batch_size(gov, 3).unwrap();
        assert_eq!(router.max_batch_size(), 3);
    }

    #[test]
    fn test_flags_all_leaves_conversion_off() {
        let flags = HandleRewardsFlags::all();
        assert!(flags.claim_fees);
        assert!(!flags.convert_fees_to_native);
        assert!(!HandleRewardsFlags::default().claim_fees);
    }
}
