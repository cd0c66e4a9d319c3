// crates/uniperp-staking/src/vesting.rs
//
// Linear vesting of escrowed reward tokens into the claimable token.
//
// An account deposits es-tokens; they are released linearly over
// `vesting_duration` seconds. Released es-tokens are burned and the same
// amount of the claimable token is paid out of the vault's float.
//
// Vesting is capped by the account's reward history on a paired ledger:
//
//   max_vestable = bonus_rewards + cumulative_rewards + transferred_cumulative
//                  - cumulative_reward_deductions
//
// and may require locking ledger shares ("pair") in proportion to the
// amount being vested.
//
// The release rate is `cycle_amount / vesting_duration`, constant between
// deposits. A deposit into an existing position first releases what has
// vested, then restarts the clock on the merged remaining balance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use uniperp_core::error::ProtocolError;
use uniperp_core::math;
use uniperp_core::{Action, Address, Amount, Event, Governable, HandlerSet};

use crate::protocol::Protocol;
use crate::stake_ledger::StakeLedger;

/// Static configuration of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub vesting_duration: u64,
    /// Escrowed token deposited and burned on release.
    pub es_token: Address,
    /// Token paid out on claim.
    pub claimable_token: Address,
    /// Ledger whose reward history bounds vesting.
    pub reward_ledger: Option<Address>,
    /// Ledger share token locked while vesting.
    pub pair_token: Option<Address>,
    pub has_max_vestable_amount: bool,
}

/// Per-account vesting state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingPosition {
    pub deposited_balance: Amount,
    /// Total released so far.
    pub cumulative_claim_amount: Amount,
    /// Total paid out so far.
    pub claimed_amount: Amount,
    pub pair_amount: Amount,
    pub last_vesting_time: u64,
    /// Balance the current linear clock runs on.
    pub cycle_amount: Amount,
    pub transferred_average_staked_amount: Amount,
    pub transferred_cumulative_rewards: Amount,
    pub cumulative_reward_deductions: Amount,
    pub bonus_rewards: Amount,
    pub pending_transfer_to: Option<Address>,
}

impl VestingPosition {
    /// Deposited plus already released.
    pub fn total_vested(&self) -> Amount {
        self.deposited_balance + self.cumulative_claim_amount
    }

    pub fn is_vesting(&self) -> bool {
        self.deposited_balance > 0
    }

    /// Amount released between the last checkpoint and `now`.
    pub fn releasable(&self, now: u64, vesting_duration: u64) -> Result<Amount, ProtocolError> {
        if self.deposited_balance == 0 || now <= self.last_vesting_time || vesting_duration == 0 {
            return Ok(0);
        }
        let elapsed = (now - self.last_vesting_time) as u128;
        let released = math::mul_div(self.cycle_amount, elapsed, vesting_duration as u128)?;
        Ok(released.min(self.deposited_balance))
    }
}

/// Amounts moved by a release step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Release {
    pub released: Amount,
    pub pair_released: Amount,
}

/// A vesting vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VestingVault {
    pub address: Address,
    pub symbol: String,
    governance: Governable,
    handlers: HandlerSet,
    config: VaultConfig,
    positions: BTreeMap<Address, VestingPosition>,
    total_deposited: Amount,
    total_pair: Amount,
}

impl VestingVault {
    pub fn new(address: Address, symbol: impl Into<String>, gov: Address, config: VaultConfig) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            governance: Governable::new(gov),
            handlers: HandlerSet::new(),
            config,
            positions: BTreeMap::new(),
            total_deposited: 0,
            total_pair: 0,
        }
    }

    pub fn gov(&self) -> Address {
        self.governance.gov()
    }

    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.governance.set_gov(caller, new_gov)
    }

    pub fn set_handler(&mut self, caller: Address, handler: Address, allowed: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.handlers.set(handler, allowed);
        Ok(())
    }

    pub fn set_has_max_vestable_amount(&mut self, caller: Address, enabled: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.config.has_max_vestable_amount = enabled;
        Ok(())
    }

    /// Handler-only credit that raises the account's vesting cap.
    pub fn set_bonus_rewards(&mut self, caller: Address, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.ensure_handler(caller)?;
        self.positions.entry(account).or_default().bonus_rewards = amount;
        Ok(())
    }

    /// Handler-only deduction that lowers the account's vesting cap.
    pub fn set_cumulative_reward_deductions(
        &mut self,
        caller: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.ensure_handler(caller)?;
        self.positions.entry(account).or_default().cumulative_reward_deductions = amount;
        Ok(())
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn is_handler(&self, account: &Address) -> bool {
        self.handlers.contains(account)
    }

    pub fn position(&self, account: &Address) -> VestingPosition {
        self.positions.get(account).cloned().unwrap_or_default()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&Address, &VestingPosition)> {
        self.positions.iter()
    }

    pub fn total_deposited(&self) -> Amount {
        self.total_deposited
    }

    pub fn total_pair(&self) -> Amount {
        self.total_pair
    }

    pub fn total_vested(&self, account: &Address) -> Amount {
        self.positions.get(account).map(|p| p.total_vested()).unwrap_or(0)
    }

    /// Released but unpaid amount plus what has vested since the last
    /// checkpoint.
    pub fn claimable(&self, account: &Address, now: u64) -> Result<Amount, ProtocolError> {
        let pos = match self.positions.get(account) {
            Some(p) => p,
            None => return Ok(0),
        };
        let unpaid = pos.cumulative_claim_amount - pos.claimed_amount;
        math::add(unpaid, pos.releasable(now, self.config.vesting_duration)?)
    }

    /// Reward-weighted blend of the ledger's average stake and the average
    /// carried in by transfers.
    pub fn combined_average_staked_amount(
        &self,
        account: &Address,
        ledger: Option<&StakeLedger>,
    ) -> Result<Amount, ProtocolError> {
        let pos = self.position(account);
        let (average, cumulative) = ledger
            .map(|l| (l.average_staked_amount(account), l.cumulative_rewards(account)))
            .unwrap_or((0, 0));
        let total = math::add(cumulative, pos.transferred_cumulative_rewards)?;
        if total == 0 {
            return Ok(0);
        }
        math::add(
            math::mul_div(average, cumulative, total)?,
            math::mul_div(
                pos.transferred_average_staked_amount,
                pos.transferred_cumulative_rewards,
                total,
            )?,
        )
    }

    pub fn max_vestable_amount(&self, account: &Address, ledger: Option<&StakeLedger>) -> Result<Amount, ProtocolError> {
        let pos = self.position(account);
        let cumulative = ledger.map(|l| l.cumulative_rewards(account)).unwrap_or(0);
        let gross = math::add(
            math::add(pos.bonus_rewards, cumulative)?,
            pos.transferred_cumulative_rewards,
        )?;
        Ok(gross.saturating_sub(pos.cumulative_reward_deductions))
    }

    /// Pair tokens that must be locked to vest `es_amount`.
    pub fn pair_amount_for(
        &self,
        account: &Address,
        es_amount: Amount,
        ledger: Option<&StakeLedger>,
    ) -> Result<Amount, ProtocolError> {
        if self.config.pair_token.is_none() {
            return Ok(0);
        }
        let max = self.max_vestable_amount(account, ledger)?;
        if max == 0 {
            return Ok(0);
        }
        let average = self.combined_average_staked_amount(account, ledger)?;
        math::mul_div(es_amount, average, max)
    }

    pub(crate) fn ensure_handler(&self, caller: Address) -> Result<(), ProtocolError> {
        self.handlers.ensure(caller, &self.symbol)
    }

    pub(crate) fn ensure_gov(&self, caller: Address) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)
    }

    /// Move what has vested since the last checkpoint from the deposited
    /// balance into the released total, and unlock the matching pair share.
    pub(crate) fn release(&mut self, account: Address, now: u64) -> Result<Release, ProtocolError> {
        let duration = self.config.vesting_duration;
        let pos = match self.positions.get_mut(&account) {
            Some(p) => p,
            None => return Ok(Release::default()),
        };
        let released = pos.releasable(now, duration)?;
        if pos.deposited_balance > 0 {
            pos.last_vesting_time = now;
        }
        if released == 0 {
            return Ok(Release::default());
        }

        let balance_before = pos.deposited_balance;
        pos.deposited_balance -= released;
        pos.cumulative_claim_amount = math::add(pos.cumulative_claim_amount, released)?;

        let pair_released = if pos.deposited_balance == 0 {
            pos.pair_amount
        } else {
            math::mul_div(pos.pair_amount, released, balance_before)?
        };
        pos.pair_amount -= pair_released;
        if pos.deposited_balance == 0 {
            pos.cycle_amount = 0;
        }

        self.total_deposited -= released;
        self.total_pair -= pair_released;
        Ok(Release {
            released,
            pair_released,
        })
    }

    /// Add `amount` to the balance and restart the clock on the merged
    /// balance. Call `release` first.
    pub(crate) fn credit_deposit(&mut self, account: Address, amount: Amount, now: u64) -> Result<Amount, ProtocolError> {
        let pos = self.positions.entry(account).or_default();
        pos.deposited_balance = math::add(pos.deposited_balance, amount)?;
        pos.cycle_amount = pos.deposited_balance;
        pos.last_vesting_time = now;
        let balance = pos.deposited_balance;
        self.total_deposited = math::add(self.total_deposited, amount)?;
        Ok(balance)
    }

    pub(crate) fn lock_pair(&mut self, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        let pos = self.positions.entry(account).or_default();
        pos.pair_amount = math::add(pos.pair_amount, amount)?;
        self.total_pair = math::add(self.total_pair, amount)?;
        Ok(())
    }

    /// Mark everything released as paid and return the amount.
    pub(crate) fn take_unpaid(&mut self, account: Address) -> Amount {
        match self.positions.get_mut(&account) {
            Some(pos) => {
                let unpaid = pos.cumulative_claim_amount - pos.claimed_amount;
                pos.claimed_amount = pos.cumulative_claim_amount;
                unpaid
            }
            None => 0,
        }
    }

    /// Cancel vesting. Returns the (es balance, pair amount) to hand back.
    pub(crate) fn cancel(&mut self, account: Address) -> (Amount, Amount) {
        let pos = self.positions.entry(account).or_default();
        let balance = std::mem::take(&mut pos.deposited_balance);
        let pair = std::mem::take(&mut pos.pair_amount);
        pos.cumulative_claim_amount = 0;
        pos.claimed_amount = 0;
        pos.last_vesting_time = 0;
        pos.cycle_amount = 0;
        self.total_deposited -= balance;
        self.total_pair -= pair;
        (balance, pair)
    }

    pub(crate) fn signal(&mut self, account: Address, to: Address) {
        self.positions.entry(account).or_default().pending_transfer_to = Some(to);
    }

    pub(crate) fn ensure_signalled(&self, from: Address, to: Address) -> Result<(), ProtocolError> {
        let pending = self.positions.get(&from).and_then(|p| p.pending_transfer_to);
        if pending != Some(to) {
            return Err(ProtocolError::TransferNotSignalled(format!(
                "{}: no pending transfer from {} to {}",
                self.symbol,
                from.short(),
                to.short()
            )));
        }
        if self
            .positions
            .get(&to)
            .and_then(|p| p.pending_transfer_to)
            .is_some()
        {
            return Err(ProtocolError::TransferAlreadySignalled(format!(
                "{}: {} has its own pending transfer",
                self.symbol,
                to.short()
            )));
        }
        Ok(())
    }

    /// Move the source's vesting balance, pair lock, claim history and
    /// reward history to the destination. `source_average` and
    /// `source_cumulative` are the source's ledger figures at the time of
    /// transfer. Call `release` on both accounts first.
    ///
    /// The claim history travels with the reward history it was vested
    /// against, so the destination's remaining vestable amount equals the
    /// source's.
    pub(crate) fn move_position(
        &mut self,
        from: Address,
        to: Address,
        source_average: Amount,
        source_cumulative: Amount,
        now: u64,
    ) -> Result<VestingPosition, ProtocolError> {
        let src = self.positions.entry(from).or_default().clone();
        let net = math::add(source_cumulative, src.transferred_cumulative_rewards)?
            .saturating_sub(src.cumulative_reward_deductions);

        let dest = self.positions.entry(to).or_default();
        let carried_total = math::add(dest.transferred_cumulative_rewards, net)?;
        if carried_total > 0 {
            dest.transferred_average_staked_amount = math::add(
                math::mul_div(
                    dest.transferred_average_staked_amount,
                    dest.transferred_cumulative_rewards,
                    carried_total,
                )?,
                math::mul_div(source_average, net, carried_total)?,
            )?;
        }
        dest.transferred_cumulative_rewards = carried_total;
        dest.bonus_rewards = math::add(dest.bonus_rewards, src.bonus_rewards)?;
        if src.deposited_balance > 0 {
            dest.deposited_balance = math::add(dest.deposited_balance, src.deposited_balance)?;
            dest.cycle_amount = dest.deposited_balance;
            dest.last_vesting_time = now;
        }
        dest.pair_amount = math::add(dest.pair_amount, src.pair_amount)?;
        dest.cumulative_claim_amount =
            math::add(dest.cumulative_claim_amount, src.cumulative_claim_amount)?;
        dest.claimed_amount = math::add(dest.claimed_amount, src.claimed_amount)?;
        let moved = dest.clone();

        let source = self.positions.entry(from).or_default();
        source.cumulative_reward_deductions = source_cumulative;
        source.transferred_average_staked_amount = 0;
        source.transferred_cumulative_rewards = 0;
        source.bonus_rewards = 0;
        source.deposited_balance = 0;
        source.pair_amount = 0;
        source.cumulative_claim_amount = 0;
        source.claimed_amount = 0;
        source.cycle_amount = 0;
        source.last_vesting_time = 0;
        source.pending_transfer_to = None;
        Ok(moved)
    }
}

impl Protocol {
    fn vault_ledger(&self, vault: Address) -> Result<(&VestingVault, Option<&StakeLedger>), ProtocolError> {
        let v = self.vault(&vault)?;
        let ledger = match v.config.reward_ledger {
            Some(id) => Some(self.ledger(&id)?),
            None => None,
        };
        Ok((v, ledger))
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    pub fn get_max_vestable_amount(&self, vault: Address, account: Address) -> Result<Amount, ProtocolError> {
        let (v, ledger) = self.vault_ledger(vault)?;
        v.max_vestable_amount(&account, ledger)
    }

    /// Cap left after everything already vested or vesting.
    pub fn remaining_vestable_amount(&self, vault: Address, account: Address) -> Result<Amount, ProtocolError> {
        let (v, ledger) = self.vault_ledger(vault)?;
        let max = v.max_vestable_amount(&account, ledger)?;
        Ok(max.saturating_sub(v.total_vested(&account)))
    }

    pub fn get_pair_amount(&self, vault: Address, account: Address, es_amount: Amount) -> Result<Amount, ProtocolError> {
        let (v, ledger) = self.vault_ledger(vault)?;
        v.pair_amount_for(&account, es_amount, ledger)
    }

    pub fn get_combined_average_staked_amount(&self, vault: Address, account: Address) -> Result<Amount, ProtocolError> {
        let (v, ledger) = self.vault_ledger(vault)?;
        v.combined_average_staked_amount(&account, ledger)
    }

    pub fn get_total_vested(&self, vault: Address, account: Address) -> Result<Amount, ProtocolError> {
        Ok(self.vault(&vault)?.total_vested(&account))
    }

    pub fn vesting_position(&self, vault: Address, account: Address) -> Result<VestingPosition, ProtocolError> {
        Ok(self.vault(&vault)?.position(&account))
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    /// Deposit `amount` es-tokens from the caller into vesting.
    ///
    /// # Errors
    /// `InvalidAmount` for zero, `MaxVestableAmountExceeded` if the total
    /// vested would pass the cap, token errors if the es-token or pair
    /// share cannot be pulled.
    pub fn deposit(&mut self, caller: Address, vault: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("vault_deposit", |p| p.deposit_to_vault(vault, caller, caller, amount))
    }

    pub fn deposit_for_account(
        &mut self,
        caller: Address,
        vault: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("vault_deposit_for_account", |p| {
            p.vault(&vault)?.ensure_handler(caller)?;
            p.deposit_to_vault(vault, caller, account, amount)
        })
    }

    /// Pay out everything released so far. Returns the amount paid.
    pub fn claim_vested(&mut self, caller: Address, vault: Address, receiver: Address) -> Result<Amount, ProtocolError> {
        self.atomically("vault_claim", |p| p.claim_from_vault(vault, caller, caller, receiver))
    }

    pub fn claim_vested_for_account(
        &mut self,
        caller: Address,
        vault: Address,
        account: Address,
        receiver: Address,
    ) -> Result<Amount, ProtocolError> {
        self.atomically("vault_claim_for_account", |p| {
            p.vault(&vault)?.ensure_handler(caller)?;
            p.claim_from_vault(vault, caller, account, receiver)
        })
    }

    /// Pay out released tokens, then cancel vesting and return the remaining
    /// es-tokens and pair shares.
    pub fn withdraw(&mut self, caller: Address, vault: Address) -> Result<(), ProtocolError> {
        self.atomically("vault_withdraw", |p| p.withdraw_from_vault(vault, caller))
    }

    pub fn signal_vault_transfer(&mut self, caller: Address, vault: Address, to: Address) -> Result<(), ProtocolError> {
        self.atomically("vault_signal_transfer", |p| p.signal_vault_transfer_inner(vault, caller, caller, to))
    }

    pub fn signal_vault_transfer_for_account(
        &mut self,
        caller: Address,
        vault: Address,
        account: Address,
        to: Address,
    ) -> Result<(), ProtocolError> {
        self.atomically("vault_signal_transfer_for_account", |p| {
            p.vault(&vault)?.ensure_handler(caller)?;
            p.signal_vault_transfer_inner(vault, caller, account, to)
        })
    }

    pub fn accept_vault_transfer(&mut self, caller: Address, vault: Address, from: Address) -> Result<(), ProtocolError> {
        self.atomically("vault_accept_transfer", |p| p.accept_vault_transfer_inner(vault, caller, from, caller))
    }

    pub fn accept_vault_transfer_for_account(
        &mut self,
        caller: Address,
        vault: Address,
        from: Address,
        to: Address,
    ) -> Result<(), ProtocolError> {
        self.atomically("vault_accept_transfer_for_account", |p| {
            p.vault(&vault)?.ensure_handler(caller)?;
            p.accept_vault_transfer_inner(vault, caller, from, to)
        })
    }

    /// Gov-only movement of tokens held by the vault (float management).
    pub fn withdraw_vault_token(
        &mut self,
        caller: Address,
        vault: Address,
        token: Address,
        receiver: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("vault_withdraw_token", |p| {
            p.vault(&vault)?.ensure_gov(caller)?;
            p.token_transfer(token, vault, receiver, amount)?;
            let now = p.now();
            p.record(
                Event::new(now, vault, caller, receiver, Action::Admin)
                    .with_token(token)
                    .with_amount(amount),
            );
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Release vested tokens for `account`: burn the released es-tokens and
    /// hand the unlocked pair share back.
    fn release_vested(&mut self, vault: Address, account: Address) -> Result<Release, ProtocolError> {
        let now = self.now();
        let config = self.vault(&vault)?.config.clone();
        let release = self.vault_mut(&vault)?.release(account, now)?;
        if release.released > 0 {
            self.token_burn(config.es_token, vault, vault, release.released)?;
        }
        if release.pair_released > 0 {
            if let Some(pair) = config.pair_token {
                self.token_transfer(pair, vault, account, release.pair_released)?;
            }
        }
        Ok(release)
    }

    pub(crate) fn deposit_to_vault(
        &mut self,
        vault: Address,
        actor: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("vesting deposit is zero".to_string()));
        }
        let now = self.now();
        let config = self.vault(&vault)?.config.clone();

        self.token_transfer_from(config.es_token, vault, account, vault, amount)?;
        self.release_vested(vault, account)?;
        let balance = self.vault_mut(&vault)?.credit_deposit(account, amount, now)?;

        if config.has_max_vestable_amount {
            let (v, ledger) = self.vault_ledger(vault)?;
            let total = v.total_vested(&account);
            let max = v.max_vestable_amount(&account, ledger)?;
            if total > max {
                return Err(ProtocolError::MaxVestableAmountExceeded(format!(
                    "{}: total vested {} exceeds max vestable {}",
                    v.symbol, total, max
                )));
            }
        }

        if let Some(pair) = config.pair_token {
            let (v, ledger) = self.vault_ledger(vault)?;
            let required = v.pair_amount_for(&account, balance, ledger)?;
            let locked = v.position(&account).pair_amount;
            if required > locked {
                let top_up = required - locked;
                self.token_transfer_from(pair, vault, account, vault, top_up)?;
                self.vault_mut(&vault)?.lock_pair(account, top_up)?;
            }
        }

        let pos = self.vault(&vault)?.position(&account);
        self.record(
            Event::new(now, vault, actor, account, Action::VestDeposit)
                .with_token(config.es_token)
                .with_amount(amount)
                .with_balance("deposited_balance", pos.deposited_balance)
                .with_balance("pair_amount", pos.pair_amount),
        );
        Ok(())
    }

    pub(crate) fn claim_from_vault(
        &mut self,
        vault: Address,
        actor: Address,
        account: Address,
        receiver: Address,
    ) -> Result<Amount, ProtocolError> {
        self.release_vested(vault, account)?;
        let amount = self.vault_mut(&vault)?.take_unpaid(account);
        let config = self.vault(&vault)?.config.clone();
        if amount > 0 {
            self.token_transfer(config.claimable_token, vault, receiver, amount)?;
        }

        let now = self.now();
        let pos = self.vault(&vault)?.position(&account);
        self.record(
            Event::new(now, vault, actor, account, Action::VestClaim)
                .with_token(config.claimable_token)
                .with_amount(amount)
                .with_balance("deposited_balance", pos.deposited_balance)
                .with_balance("claimed_amount", pos.claimed_amount),
        );
        Ok(amount)
    }

    fn withdraw_from_vault(&mut self, vault: Address, account: Address) -> Result<(), ProtocolError> {
        self.claim_from_vault(vault, account, account, account)?;
        if self.vault(&vault)?.total_vested(&account) == 0 {
            return Err(ProtocolError::InvalidAmount(format!(
                "{} has nothing vesting",
                account.short()
            )));
        }

        let config = self.vault(&vault)?.config.clone();
        let (balance, pair) = self.vault_mut(&vault)?.cancel(account);
        if balance > 0 {
            self.token_transfer(config.es_token, vault, account, balance)?;
        }
        if pair > 0 {
            if let Some(pair_token) = config.pair_token {
                self.token_transfer(pair_token, vault, account, pair)?;
            }
        }

        let now = self.now();
        self.record(
            Event::new(now, vault, account, account, Action::VestWithdraw)
                .with_token(config.es_token)
                .with_amount(balance)
                .with_balance("pair_returned", pair),
        );
        Ok(())
    }

    fn ensure_no_paired_stake(&self, vault: Address, account: Address) -> Result<(), ProtocolError> {
        let (v, ledger) = self.vault_ledger(vault)?;
        if let Some(l) = ledger {
            let staked = l.staked_amount(&account);
            if staked > 0 {
                return Err(ProtocolError::ActionNotEnabled(format!(
                    "{}: {} still has {} staked on {}",
                    v.symbol,
                    account.short(),
                    staked,
                    l.symbol
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn signal_vault_transfer_inner(
        &mut self,
        vault: Address,
        actor: Address,
        account: Address,
        to: Address,
    ) -> Result<(), ProtocolError> {
        if to == account || to.is_zero() {
            return Err(ProtocolError::InvalidReceiver(format!(
                "cannot transfer to {}",
                to.short()
            )));
        }
        self.ensure_no_paired_stake(vault, account)?;
        self.vault_mut(&vault)?.signal(account, to);
        tracing::debug!(vault = %vault.short(), from = %account.short(), to = %to.short(), "transfer pending");

        let now = self.now();
        self.record(Event::new(now, vault, actor, account, Action::TransferSignalled));
        Ok(())
    }

    pub(crate) fn accept_vault_transfer_inner(
        &mut self,
        vault: Address,
        actor: Address,
        from: Address,
        to: Address,
    ) -> Result<(), ProtocolError> {
        self.vault(&vault)?.ensure_signalled(from, to)?;
        self.ensure_no_paired_stake(vault, from)?;

        // Settle both sides so only unreleased balance moves.
        self.claim_from_vault(vault, actor, from, from)?;
        self.release_vested(vault, to)?;

        let (source_average, source_cumulative) = {
            let (v, ledger) = self.vault_ledger(vault)?;
            (
                v.combined_average_staked_amount(&from, ledger)?,
                ledger.map(|l| l.cumulative_rewards(&from)).unwrap_or(0),
            )
        };
        let now = self.now();
        let moved = self
            .vault_mut(&vault)?
            .move_position(from, to, source_average, source_cumulative, now)?;

        self.record(
            Event::new(now, vault, actor, to, Action::TransferAccepted)
                .with_balance("deposited_balance", moved.deposited_balance)
                .with_balance("transferred_average_staked_amount", moved.transferred_average_staked_amount)
                .with_balance("transferred_cumulative_rewards", moved.transferred_cumulative_rewards)
                .with_balance("bonus_rewards", moved.bonus_rewards),
        );
        Ok(())
    }
}
