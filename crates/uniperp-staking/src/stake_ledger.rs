// crates/uniperp-staking/src/stake_ledger.rs
//
// Multi-deposit-token staking pool with lazy reward accrual.
//
// Every mutating call first pulls newly emitted rewards from the attached
// emitter and folds them into a single fixed-point accumulator:
//
//   cumulative_reward_per_token += distributed * PRECISION / total_supply
//
// and then settles the touched account:
//
//   reward = staked_amount * (accumulator - checkpoint) / PRECISION
//
// Settlement also maintains a reward-weighted average of the account's stake,
// which bounds how much a paired vesting vault lets the account vest.
//
// Staking mints share tokens 1:1. The share token is this ledger's own
// address, so one ledger can be the deposit token of another and form a
// stake -> bonus -> fee chain.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use uniperp_core::error::ProtocolError;
use uniperp_core::math::{self, PRECISION};
use uniperp_core::{
    Action, Address, Amount, Balances, Event, FungibleToken, Governable, HandlerSet,
};

use crate::protocol::Protocol;

/// Per-account stake record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    /// Staked amount per deposit token.
    pub deposit_balances: BTreeMap<Address, Amount>,
    /// Sum of all deposit balances.
    pub staked_amount: Amount,
    /// Accumulator value at the last settlement.
    pub reward_checkpoint: u128,
    /// Settled but unclaimed reward.
    pub claimable_reward: Amount,
    /// Reward-weighted historical average of `staked_amount`.
    pub average_staked_amount: Amount,
    /// Total reward ever credited.
    pub cumulative_rewards: Amount,
    /// Timestamp of the most recent stake, for the unstake cooldown.
    pub last_stake_time: u64,
}

impl StakeRecord {
    pub fn deposit_balance(&self, token: &Address) -> Amount {
        self.deposit_balances.get(token).copied().unwrap_or(0)
    }
}

/// A staking pool and its transferable share token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeLedger {
    pub address: Address,
    pub symbol: String,
    governance: Governable,
    initialized: bool,
    emitter: Option<Address>,
    reward_token: Option<Address>,
    deposit_tokens: BTreeSet<Address>,
    handlers: HandlerSet,
    in_private_transfer_mode: bool,
    in_private_staking_mode: bool,
    in_private_claiming_mode: bool,
    unstake_cooldown: u64,
    shares: Balances,
    total_deposit_supply: BTreeMap<Address, Amount>,
    cumulative_reward_per_token: u128,
    accounts: BTreeMap<Address, StakeRecord>,
}

impl StakeLedger {
    pub fn new(address: Address, symbol: impl Into<String>, gov: Address) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            governance: Governable::new(gov),
            initialized: false,
            emitter: None,
            reward_token: None,
            deposit_tokens: BTreeSet::new(),
            handlers: HandlerSet::new(),
            in_private_transfer_mode: false,
            in_private_staking_mode: false,
            in_private_claiming_mode: false,
            unstake_cooldown: 0,
            shares: Balances::new(),
            total_deposit_supply: BTreeMap::new(),
            cumulative_reward_per_token: 0,
            accounts: BTreeMap::new(),
        }
    }

    pub(crate) fn initialize(
        &mut self,
        caller: Address,
        deposit_tokens: &[Address],
        emitter: Address,
        reward_token: Address,
    ) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        if self.initialized {
            return Err(ProtocolError::AlreadyInitialized(format!(
                "ledger {} already initialized",
                self.symbol
            )));
        }
        self.initialized = true;
        self.deposit_tokens.extend(deposit_tokens.iter().copied());
        self.emitter = Some(emitter);
        self.reward_token = Some(reward_token);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Governance
    // ---------------------------------------------------------------------

    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.governance.set_gov(caller, new_gov)
    }

    pub fn set_deposit_token(&mut self, caller: Address, token: Address, allowed: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        if allowed {
            self.deposit_tokens.insert(token);
        } else {
            self.deposit_tokens.remove(&token);
        }
        Ok(())
    }

    pub fn set_handler(&mut self, caller: Address, handler: Address, allowed: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.handlers.set(handler, allowed);
        Ok(())
    }

    pub fn set_in_private_transfer_mode(&mut self, caller: Address, enabled: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.in_private_transfer_mode = enabled;
        Ok(())
    }

    pub fn set_in_private_staking_mode(&mut self, caller: Address, enabled: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.in_private_staking_mode = enabled;
        Ok(())
    }

    pub fn set_in_private_claiming_mode(&mut self, caller: Address, enabled: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.in_private_claiming_mode = enabled;
        Ok(())
    }

    /// Minimum seconds between an account's last stake and its next unstake.
    pub fn set_unstake_cooldown(&mut self, caller: Address, seconds: u64) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.unstake_cooldown = seconds;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    pub fn gov(&self) -> Address {
        self.governance.gov()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn emitter(&self) -> Option<Address> {
        self.emitter
    }

    pub fn reward_token(&self) -> Option<Address> {
        self.reward_token
    }

    pub fn is_deposit_token(&self, token: &Address) -> bool {
        self.deposit_tokens.contains(token)
    }

    pub fn is_handler(&self, account: &Address) -> bool {
        self.handlers.contains(account)
    }

    pub fn in_private_transfer_mode(&self) -> bool {
        self.in_private_transfer_mode
    }

    pub fn in_private_staking_mode(&self) -> bool {
        self.in_private_staking_mode
    }

    pub fn in_private_claiming_mode(&self) -> bool {
        self.in_private_claiming_mode
    }

    pub fn unstake_cooldown(&self) -> u64 {
        self.unstake_cooldown
    }

    pub fn record(&self, account: &Address) -> Option<&StakeRecord> {
        self.accounts.get(account)
    }

    pub fn staked_amount(&self, account: &Address) -> Amount {
        self.accounts.get(account).map(|r| r.staked_amount).unwrap_or(0)
    }

    pub fn deposit_balance(&self, account: &Address, token: &Address) -> Amount {
        self.accounts
            .get(account)
            .map(|r| r.deposit_balance(token))
            .unwrap_or(0)
    }

    pub fn total_deposit_supply(&self, token: &Address) -> Amount {
        self.total_deposit_supply.get(token).copied().unwrap_or(0)
    }

    pub fn cumulative_reward_per_token(&self) -> u128 {
        self.cumulative_reward_per_token
    }

    pub fn average_staked_amount(&self, account: &Address) -> Amount {
        self.accounts
            .get(account)
            .map(|r| r.average_staked_amount)
            .unwrap_or(0)
    }

    pub fn cumulative_rewards(&self, account: &Address) -> Amount {
        self.accounts
            .get(account)
            .map(|r| r.cumulative_rewards)
            .unwrap_or(0)
    }

    /// Accounts with a stake record.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &StakeRecord)> {
        self.accounts.iter()
    }

    /// Claimable reward if `pending` more units were distributed right now.
    pub fn preview_claimable(&self, account: &Address, pending: Amount) -> Result<Amount, ProtocolError> {
        let record = match self.accounts.get(account) {
            Some(r) => r,
            None => return Ok(0),
        };
        if record.staked_amount == 0 {
            return Ok(record.claimable_reward);
        }
        let supply = self.shares.total_supply();
        let next = if supply > 0 && pending > 0 {
            math::add(
                self.cumulative_reward_per_token,
                math::mul_div(pending, PRECISION, supply)?,
            )?
        } else {
            self.cumulative_reward_per_token
        };
        let accrued = math::mul_div(record.staked_amount, next - record.reward_checkpoint, PRECISION)?;
        math::add(record.claimable_reward, accrued)
    }

    // ---------------------------------------------------------------------
    // Accounting
    // ---------------------------------------------------------------------

    pub(crate) fn ensure_handler(&self, caller: Address) -> Result<(), ProtocolError> {
        self.handlers.ensure(caller, &self.symbol)
    }

    /// Fold `distributed` newly received reward units into the accumulator.
    /// No-op while nothing is staked.
    pub(crate) fn accrue(&mut self, distributed: Amount) -> Result<(), ProtocolError> {
        let supply = self.shares.total_supply();
        if supply == 0 || distributed == 0 {
            return Ok(());
        }
        let delta = math::mul_div(distributed, PRECISION, supply)?;
        self.cumulative_reward_per_token = math::add(self.cumulative_reward_per_token, delta)?;
        Ok(())
    }

    /// Settle `account` against the current accumulator and return the
    /// newly credited reward.
    pub(crate) fn settle(&mut self, account: Address) -> Result<Amount, ProtocolError> {
        let accumulator = self.cumulative_reward_per_token;
        let record = self.accounts.entry(account).or_default();
        let staked = record.staked_amount;
        let delta = math::mul_div(staked, accumulator - record.reward_checkpoint, PRECISION)?;
        record.reward_checkpoint = accumulator;
        record.claimable_reward = math::add(record.claimable_reward, delta)?;

        if staked > 0 && delta > 0 {
            let previous = record.cumulative_rewards;
            let next = math::add(previous, delta)?;
            // Skipped when the denominator is zero; unreachable with delta > 0
            // but kept explicit.
            if next > 0 {
                let carried = math::mul_div(record.average_staked_amount, previous, next)?;
                let fresh = math::mul_div(staked, delta, next)?;
                record.average_staked_amount = math::add(carried, fresh)?;
            }
            record.cumulative_rewards = next;
        }
        Ok(delta)
    }

    /// Record a stake whose deposit tokens have already been received.
    pub(crate) fn credit_stake(
        &mut self,
        account: Address,
        token: Address,
        amount: Amount,
        now: u64,
    ) -> Result<(), ProtocolError> {
        let record = self.accounts.entry(account).or_default();
        let deposit = math::add(record.deposit_balance(&token), amount)?;
        record.deposit_balances.insert(token, deposit);
        record.staked_amount = math::add(record.staked_amount, amount)?;
        record.last_stake_time = now;

        let supply = math::add(self.total_deposit_supply(&token), amount)?;
        self.total_deposit_supply.insert(token, supply);
        self.shares.mint(account, amount)
    }

    /// Remove a stake. The caller returns the deposit tokens afterwards.
    pub(crate) fn debit_stake(
        &mut self,
        account: Address,
        token: Address,
        amount: Amount,
        now: u64,
    ) -> Result<(), ProtocolError> {
        let cooldown = self.unstake_cooldown;
        let record = self.accounts.entry(account).or_default();
        if record.staked_amount < amount {
            return Err(ProtocolError::ExceedsStakedAmount(format!(
                "{}: {} exceeds staked amount {}",
                self.symbol, amount, record.staked_amount
            )));
        }
        let deposit = record.deposit_balance(&token);
        if deposit < amount {
            return Err(ProtocolError::ExceedsDepositBalance(format!(
                "{}: {} exceeds deposit balance {}",
                self.symbol, amount, deposit
            )));
        }
        if cooldown > 0 && now < record.last_stake_time.saturating_add(cooldown) {
            return Err(ProtocolError::CooldownNotElapsed(format!(
                "{}: unstake available at {}",
                self.symbol,
                record.last_stake_time + cooldown
            )));
        }

        record.staked_amount -= amount;
        if deposit == amount {
            record.deposit_balances.remove(&token);
        } else {
            record.deposit_balances.insert(token, deposit - amount);
        }
        let supply = self.total_deposit_supply(&token) - amount;
        self.total_deposit_supply.insert(token, supply);
        let symbol = self.symbol.clone();
        self.shares.burn(account, amount, &symbol)
    }

    /// Take the account's settled reward, leaving zero behind.
    pub(crate) fn take_claimable(&mut self, account: Address) -> Amount {
        match self.accounts.get_mut(&account) {
            Some(record) => std::mem::take(&mut record.claimable_reward),
            None => 0,
        }
    }

    fn ensure_share_transfer_allowed(&self, caller: Address) -> Result<(), ProtocolError> {
        if self.in_private_transfer_mode && !self.handlers.contains(&caller) {
            return Err(ProtocolError::UnauthorizedCaller(format!(
                "{}: share transfers are restricted to handlers",
                self.symbol
            )));
        }
        Ok(())
    }
}

impl FungibleToken for StakeLedger {
    fn balance_of(&self, account: &Address) -> Amount {
        self.shares.balance_of(account)
    }

    fn total_supply(&self) -> Amount {
        self.shares.total_supply()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.shares.allowance(owner, spender)
    }

    fn approve(&mut self, owner: Address, spender: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.shares.approve(owner, spender, amount);
        Ok(())
    }

    fn transfer(&mut self, sender: Address, recipient: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.ensure_share_transfer_allowed(sender)?;
        self.shares.move_balance(sender, recipient, amount, &self.symbol)
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if self.handlers.contains(&spender) {
            return self.shares.move_balance(from, to, amount, &self.symbol);
        }
        self.ensure_share_transfer_allowed(spender)?;
        self.shares.spend_allowance(from, spender, amount, &self.symbol)?;
        self.shares.move_balance(from, to, amount, &self.symbol)
    }
}

/// Direct (non-delegated) actions that a private-mode flag can disable.
#[derive(Debug, Clone, Copy)]
enum DirectAction {
    Staking,
    Claiming,
}

impl Protocol {
    /// One-time setup: deposit-token whitelist and the emitter feeding the pool.
    ///
    /// # Errors
    /// `AlreadyInitialized` on the second call.
    pub fn initialize_ledger(
        &mut self,
        caller: Address,
        ledger: Address,
        deposit_tokens: &[Address],
        emitter: Address,
    ) -> Result<(), ProtocolError> {
        self.atomically("initialize_ledger", |p| {
            let e = p.emitter(&emitter)?;
            if e.ledger != ledger {
                return Err(ProtocolError::Config(format!(
                    "emitter {} feeds a different ledger",
                    emitter.short()
                )));
            }
            let reward_token = e.reward_token;
            p.ledger_mut(&ledger)?
                .initialize(caller, deposit_tokens, emitter, reward_token)?;
            let now = p.now();
            p.record(Event::new(now, ledger, caller, caller, Action::Admin).with_token(reward_token));
            Ok(())
        })
    }

    /// Stake `amount` of `token` from the caller's own balance.
    pub fn stake(&mut self, caller: Address, ledger: Address, token: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("stake", |p| {
            p.ensure_direct_action(ledger, DirectAction::Staking)?;
            p.stake_on_ledger(ledger, caller, caller, caller, token, amount)
        })
    }

    /// Handler-only stake funded by `funding_account` and credited to `account`.
    pub fn stake_for_account(
        &mut self,
        caller: Address,
        ledger: Address,
        funding_account: Address,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("stake_for_account", |p| {
            p.ledger(&ledger)?.ensure_handler(caller)?;
            p.stake_on_ledger(ledger, caller, funding_account, account, token, amount)
        })
    }

    /// Unstake `amount` of `token` back to the caller.
    pub fn unstake(&mut self, caller: Address, ledger: Address, token: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("unstake", |p| {
            p.ensure_direct_action(ledger, DirectAction::Staking)?;
            p.unstake_from_ledger(ledger, caller, caller, token, amount, caller)
        })
    }

    /// Handler-only unstake of `account`'s stake, paid to `receiver`.
    pub fn unstake_for_account(
        &mut self,
        caller: Address,
        ledger: Address,
        account: Address,
        token: Address,
        amount: Amount,
        receiver: Address,
    ) -> Result<(), ProtocolError> {
        self.atomically("unstake_for_account", |p| {
            p.ledger(&ledger)?.ensure_handler(caller)?;
            p.unstake_from_ledger(ledger, caller, account, token, amount, receiver)
        })
    }

    /// Claim the caller's reward to `receiver`. Returns the amount paid.
    pub fn claim(&mut self, caller: Address, ledger: Address, receiver: Address) -> Result<Amount, ProtocolError> {
        self.atomically("claim", |p| {
            p.ensure_direct_action(ledger, DirectAction::Claiming)?;
            p.claim_from_ledger(ledger, caller, caller, receiver)
        })
    }

    /// Handler-only claim of `account`'s reward to `receiver`.
    pub fn claim_for_account(
        &mut self,
        caller: Address,
        ledger: Address,
        account: Address,
        receiver: Address,
    ) -> Result<Amount, ProtocolError> {
        self.atomically("claim_for_account", |p| {
            p.ledger(&ledger)?.ensure_handler(caller)?;
            p.claim_from_ledger(ledger, caller, account, receiver)
        })
    }

    /// Pull pending emission into the accumulator without settling anyone.
    pub fn update_rewards(&mut self, ledger: Address) -> Result<(), ProtocolError> {
        self.atomically("update_rewards", |p| p.update_ledger_rewards(ledger).map(|_| ()))
    }

    /// Claimable amount of `account` on a ledger (including emission not yet
    /// pulled) or on a vesting vault.
    pub fn claimable(&self, component: Address, account: Address) -> Result<Amount, ProtocolError> {
        if let Ok(vault) = self.vault(&component) {
            return vault.claimable(&account, self.clock_now());
        }
        let l = self.ledger(&component)?;
        let pending = match l.emitter() {
            Some(emitter) => self.emission_preview(emitter)?,
            None => 0,
        };
        l.preview_claimable(&account, pending)
    }

    /// Gov-only recovery of tokens sent to the ledger by mistake.
    pub fn withdraw_ledger_token(
        &mut self,
        caller: Address,
        ledger: Address,
        token: Address,
        receiver: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("withdraw_ledger_token", |p| {
            p.ledger(&ledger)?.governance.ensure_gov(caller)?;
            p.token_transfer(token, ledger, receiver, amount)?;
            let now = p.now();
            p.record(
                Event::new(now, ledger, caller, receiver, Action::Admin)
                    .with_token(token)
                    .with_amount(amount),
            );
            Ok(())
        })
    }

    fn ensure_direct_action(&self, ledger: Address, action: DirectAction) -> Result<(), ProtocolError> {
        let l = self.ledger(&ledger)?;
        let disabled = match action {
            DirectAction::Staking => l.in_private_staking_mode(),
            DirectAction::Claiming => l.in_private_claiming_mode(),
        };
        if disabled {
            return Err(ProtocolError::ActionNotEnabled(format!(
                "{}: direct {:?} is disabled",
                l.symbol, action
            )));
        }
        Ok(())
    }

    /// Pull pending emission into `ledger` and fold it into the accumulator.
    /// Returns the amount pulled.
    pub(crate) fn update_ledger_rewards(&mut self, ledger: Address) -> Result<Amount, ProtocolError> {
        let emitter = self.ledger(&ledger)?.emitter().ok_or_else(|| {
            ProtocolError::NotFound(format!("ledger {} is not initialized", ledger.short()))
        })?;
        let distributed = self.distribute_emitter(emitter, ledger)?;
        self.ledger_mut(&ledger)?.accrue(distributed)?;
        Ok(distributed)
    }

    pub(crate) fn stake_on_ledger(
        &mut self,
        ledger: Address,
        actor: Address,
        funding_account: Address,
        account: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("stake amount is zero".to_string()));
        }
        if !self.ledger(&ledger)?.is_deposit_token(&token) {
            return Err(ProtocolError::InvalidDepositToken(format!(
                "{} is not a deposit token of {}",
                token.short(),
                self.ledger(&ledger)?.symbol
            )));
        }

        self.token_transfer_from(token, ledger, funding_account, ledger, amount)?;
        self.update_ledger_rewards(ledger)?;

        let now = self.now();
        let l = self.ledger_mut(&ledger)?;
        l.settle(account)?;
        l.credit_stake(account, token, amount, now)?;
        let staked = l.staked_amount(&account);
        let supply = l.total_deposit_supply(&token);

        self.record(
            Event::new(now, ledger, actor, account, Action::Stake)
                .with_token(token)
                .with_amount(amount)
                .with_balance("staked_amount", staked)
                .with_balance("total_deposit_supply", supply),
        );
        Ok(())
    }

    pub(crate) fn unstake_from_ledger(
        &mut self,
        ledger: Address,
        actor: Address,
        account: Address,
        token: Address,
        amount: Amount,
        receiver: Address,
    ) -> Result<(), ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("unstake amount is zero".to_string()));
        }
        if !self.ledger(&ledger)?.is_deposit_token(&token) {
            return Err(ProtocolError::InvalidDepositToken(format!(
                "{} is not a deposit token of {}",
                token.short(),
                self.ledger(&ledger)?.symbol
            )));
        }

        self.update_ledger_rewards(ledger)?;

        let now = self.now();
        let l = self.ledger_mut(&ledger)?;
        l.settle(account)?;
        l.debit_stake(account, token, amount, now)?;
        let staked = l.staked_amount(&account);
        let supply = l.total_deposit_supply(&token);

        self.token_transfer(token, ledger, receiver, amount)?;

        self.record(
            Event::new(now, ledger, actor, account, Action::Unstake)
                .with_token(token)
                .with_amount(amount)
                .with_balance("staked_amount", staked)
                .with_balance("total_deposit_supply", supply),
        );
        Ok(())
    }

    pub(crate) fn claim_from_ledger(
        &mut self,
        ledger: Address,
        actor: Address,
        account: Address,
        receiver: Address,
    ) -> Result<Amount, ProtocolError> {
        self.update_ledger_rewards(ledger)?;

        let l = self.ledger_mut(&ledger)?;
        l.settle(account)?;
        let amount = l.take_claimable(account);
        let cumulative = l.cumulative_rewards(&account);
        let reward_token = l.reward_token().ok_or_else(|| {
            ProtocolError::NotFound(format!("ledger {} is not initialized", ledger.short()))
        })?;

        if amount > 0 {
            self.token_transfer(reward_token, ledger, receiver, amount)?;
        }

        let now = self.now();
        self.record(
            Event::new(now, ledger, actor, account, Action::Claim)
                .with_token(reward_token)
                .with_amount(amount)
                .with_balance("cumulative_rewards", cumulative),
        );
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniperp_core::expand_decimals;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn ledger() -> StakeLedger {
        let gov = addr("gov");
        let mut l = StakeLedger::new(addr("stUNIP"), "stUNIP", gov);
        l.initialize(gov, &[addr("UNIP"), addr("esUNIP")], addr("emitter"), addr("esUNIP"))
            .unwrap();
        l
    }

    #[test]
    fn test_initialize_once() {
        let mut l = ledger();
        assert!(l.is_initialized());
        assert!(l.is_deposit_token(&addr("UNIP")));
        assert!(!l.is_deposit_token(&addr("other")));
        assert!(matches!(
            l.initialize(addr("gov"), &[], addr("emitter"), addr("esUNIP")),
            Err(ProtocolError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_admin_setters_require_gov() {
        let mut l = ledger();
        let user = addr("user");
        assert!(l.set_deposit_token(user, addr("x"), true).is_err());
        assert!(l.set_in_private_transfer_mode(user, true).is_err());
        assert!(l.set_in_private_staking_mode(user, true).is_err());
        assert!(l.set_in_private_claiming_mode(user, true).is_err());
        assert!(l.set_handler(user, user, true).is_err());

        l.set_deposit_token(addr("gov"), addr("x"), true).unwrap();
        assert!(l.is_deposit_token(&addr("x")));
        l.set_deposit_token(addr("gov"), addr("x"), false).unwrap();
        assert!(!l.is_deposit_token(&addr("x")));
    }

    #[test]
    fn test_accrue_and_settle_single_staker() {
        let mut l = ledger();
        let user = addr("user0");
        let amount = expand_decimals(1_000, 18);
        l.credit_stake(user, addr("UNIP"), amount, 0).unwrap();

        l.accrue(expand_decimals(100, 18)).unwrap();
        let delta = l.settle(user).unwrap();
        assert_eq!(delta, expand_decimals(100, 18));
        assert_eq!(l.cumulative_rewards(&user), expand_decimals(100, 18));
        assert_eq!(l.average_staked_amount(&user), amount);

        // Settling again with no new accrual credits nothing
        assert_eq!(l.settle(user).unwrap(), 0);
        assert_eq!(l.take_claimable(user), expand_decimals(100, 18));
        assert_eq!(l.take_claimable(user), 0);
    }

    #[test]
    fn test_accrue_noop_on_empty_pool() {
        let mut l = ledger();
        l.accrue(expand_decimals(100, 18)).unwrap();
        assert_eq!(l.cumulative_reward_per_token(), 0);
    }

    #[test]
    fn test_average_staked_is_reward_weighted() {
        let mut l = ledger();
        let user = addr("user0");
        l.credit_stake(user, addr("UNIP"), 1_000, 0).unwrap();
        l.accrue(100).unwrap();
        l.settle(user).unwrap();
        assert_eq!(l.average_staked_amount(&user), 1_000);

        // Double the stake, earn the same reward again: average = (1000*100 + 2000*100) / 200
        l.credit_stake(user, addr("esUNIP"), 1_000, 0).unwrap();
        l.accrue(100).unwrap();
        l.settle(user).unwrap();
        assert_eq!(l.cumulative_rewards(&user), 200);
        assert_eq!(l.average_staked_amount(&user), 1_500);
    }

    #[test]
    fn test_rewards_split_pro_rata() {
        let mut l = ledger();
        let (a, b) = (addr("a"), addr("b"));
        l.credit_stake(a, addr("UNIP"), 3_000, 0).unwrap();
        l.credit_stake(b, addr("esUNIP"), 1_000, 0).unwrap();
        l.accrue(400).unwrap();
        assert_eq!(l.preview_claimable(&a, 0).unwrap(), 300);
        assert_eq!(l.preview_claimable(&b, 0).unwrap(), 100);
        // Preview with pending emission
        assert_eq!(l.preview_claimable(&b, 400).unwrap(), 200);
    }

    #[test]
    fn test_debit_checks_staked_then_deposit_balance() {
        let mut l = ledger();
        let user = addr("user0");
        l.credit_stake(user, addr("UNIP"), 1_000, 0).unwrap();
        assert!(matches!(
            l.debit_stake(user, addr("esUNIP"), 1_001, 0),
            Err(ProtocolError::ExceedsStakedAmount(_))
        ));
        assert!(matches!(
            l.debit_stake(user, addr("esUNIP"), 1_000, 0),
            Err(ProtocolError::ExceedsDepositBalance(_))
        ));
        l.debit_stake(user, addr("UNIP"), 1_000, 0).unwrap();
        assert_eq!(l.staked_amount(&user), 0);
        assert_eq!(l.total_deposit_supply(&addr("UNIP")), 0);
        assert_eq!(l.total_supply(), 0);
    }

    #[test]
    fn test_unstake_cooldown() {
        let mut l = ledger();
        let user = addr("user0");
        l.set_unstake_cooldown(addr("gov"), 100).unwrap();
        l.credit_stake(user, addr("UNIP"), 10, 1_000).unwrap();
        assert!(matches!(
            l.debit_stake(user, addr("UNIP"), 10, 1_099),
            Err(ProtocolError::CooldownNotElapsed(_))
        ));
        l.debit_stake(user, addr("UNIP"), 10, 1_100).unwrap();
    }

    #[test]
    fn test_share_transfer_private_mode() {
        let mut l = ledger();
        let (a, b) = (addr("a"), addr("b"));
        l.credit_stake(a, addr("UNIP"), 10, 0).unwrap();
        l.transfer(a, b, 4).unwrap();
        assert_eq!(l.balance_of(&b), 4);
        // Shares moved, stake did not
        assert_eq!(l.staked_amount(&a), 10);

        l.set_in_private_transfer_mode(addr("gov"), true).unwrap();
        assert!(matches!(
            l.transfer(a, b, 1),
            Err(ProtocolError::UnauthorizedCaller(_))
        ));
        let handler = addr("handler");
        l.set_handler(addr("gov"), handler, true).unwrap();
        l.transfer_from(handler, a, b, 1).unwrap();
        assert_eq!(l.balance_of(&a), 5);
    }

    #[test]
    fn test_burn_fails_when_shares_moved() {
        let mut l = ledger();
        let (a, b) = (addr("a"), addr("b"));
        l.credit_stake(a, addr("UNIP"), 10, 0).unwrap();
        l.transfer(a, b, 10).unwrap();
        assert!(matches!(
            l.debit_stake(a, addr("UNIP"), 10, 0),
            Err(ProtocolError::InsufficientBalance(_))
        ));
    }
}
