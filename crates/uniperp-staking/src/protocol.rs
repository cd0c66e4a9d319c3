// crates/uniperp-staking/src/protocol.rs
//
// The protocol world: every token, ledger, emitter, vault and router instance,
// the event log, and the clock.
//
// Each public mutating entry point runs through `Protocol::atomically`, which
// snapshots the world, runs the call, and restores the snapshot if the call
// fails anywhere. The event log sits outside the snapshot and is cut back to
// its length before the call instead. A router call that touches five components is therefore
// one indivisible step: either every effect commits or none does.
//
// Token movements are dispatched by address. A ledger's address doubles as
// its share-token id, so a ledger can be the deposit token of another ledger
// and the same `token_transfer` path serves both.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use uniperp_core::error::ProtocolError;
use uniperp_core::{
    Action, Address, Amount, BaseToken, Clock, Event, EventLog, FungibleToken, TokenLedger,
};

use crate::emitter::Emitter;
use crate::router::Router;
use crate::stake_ledger::StakeLedger;
use crate::vesting::VestingVault;

/// All component state. Cloned as the rollback snapshot of each call.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub tokens: TokenLedger,
    pub ledgers: BTreeMap<Address, StakeLedger>,
    pub emitters: BTreeMap<Address, Emitter>,
    pub vaults: BTreeMap<Address, VestingVault>,
    pub routers: BTreeMap<Address, Router>,
}

/// Owner of the world and the single writer that mutates it.
pub struct Protocol {
    world: World,
    events: EventLog,
    clock: Arc<dyn Clock>,
    /// Timestamp captured at the start of the current call.
    now: u64,
}

impl Protocol {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            world: World::default(),
            events: EventLog::new(),
            clock,
            now,
        }
    }

    /// Read-only view of the whole world.
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Take every committed event out of the log, oldest first. Indexers call
    /// this to keep the in-memory log bounded.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    /// Run `f` as one indivisible step.
    ///
    /// The clock is read once, so every component touched by the call sees
    /// the same timestamp. On error the world is restored to its state
    /// before the call and the events the call recorded are dropped.
    pub(crate) fn atomically<T>(
        &mut self,
        op: &str,
        f: impl FnOnce(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.now = self.clock.now();
        let snapshot = self.world.clone();
        let first_event = self.events.len();

        match f(self) {
            Ok(value) => {
                let committed = self.events.since(first_event);
                for event in committed {
                    event.trace();
                }
                debug!(op, events = committed.len(), ts = self.now, "call committed");
                Ok(value)
            }
            Err(e) => {
                self.world = snapshot;
                self.events.truncate(first_event);
                warn!(op, error = %e, ts = self.now, "call reverted");
                Err(e)
            }
        }
    }

    /// Timestamp of the call in progress.
    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    /// Current clock reading, for read-only previews outside a call.
    pub fn clock_now(&self) -> u64 {
        self.clock.now()
    }

    pub(crate) fn record(&mut self, event: Event) {
        self.events.record(event);
    }

    // ---------------------------------------------------------------------
    // Component access
    // ---------------------------------------------------------------------

    pub fn ledger(&self, id: &Address) -> Result<&StakeLedger, ProtocolError> {
        self.world
            .ledgers
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("ledger {}", id.short())))
    }

    pub(crate) fn ledger_mut(&mut self, id: &Address) -> Result<&mut StakeLedger, ProtocolError> {
        self.world
            .ledgers
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("ledger {}", id.short())))
    }

    pub fn emitter(&self, id: &Address) -> Result<&Emitter, ProtocolError> {
        self.world
            .emitters
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("emitter {}", id.short())))
    }

    pub(crate) fn emitter_mut(&mut self, id: &Address) -> Result<&mut Emitter, ProtocolError> {
        self.world
            .emitters
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("emitter {}", id.short())))
    }

    pub fn vault(&self, id: &Address) -> Result<&VestingVault, ProtocolError> {
        self.world
            .vaults
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("vault {}", id.short())))
    }

    pub(crate) fn vault_mut(&mut self, id: &Address) -> Result<&mut VestingVault, ProtocolError> {
        self.world
            .vaults
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("vault {}", id.short())))
    }

    pub fn router(&self, id: &Address) -> Result<&Router, ProtocolError> {
        self.world
            .routers
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("router {}", id.short())))
    }

    pub(crate) fn router_mut(&mut self, id: &Address) -> Result<&mut Router, ProtocolError> {
        self.world
            .routers
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("router {}", id.short())))
    }

    pub fn tokens(&self) -> &TokenLedger {
        &self.world.tokens
    }

    pub(crate) fn tokens_mut(&mut self) -> &mut TokenLedger {
        &mut self.world.tokens
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    fn ensure_free(&self, id: &Address) -> Result<(), ProtocolError> {
        let taken = self.world.tokens.contains(id)
            || self.world.ledgers.contains_key(id)
            || self.world.emitters.contains_key(id)
            || self.world.vaults.contains_key(id)
            || self.world.routers.contains_key(id);
        if taken {
            return Err(ProtocolError::AlreadyInitialized(format!(
                "address {} is already registered",
                id.short()
            )));
        }
        Ok(())
    }

    /// Register a plain token governed by `gov`.
    pub fn create_token(&mut self, address: Address, symbol: &str, gov: Address) -> Result<(), ProtocolError> {
        self.ensure_free(&address)?;
        self.world.tokens.create_token(address, symbol, gov)?;
        debug!(token = %address.short(), symbol, "token registered");
        Ok(())
    }

    pub fn add_ledger(&mut self, ledger: StakeLedger) -> Result<(), ProtocolError> {
        self.ensure_free(&ledger.address)?;
        debug!(ledger = %ledger.address.short(), symbol = %ledger.symbol, "ledger registered");
        self.world.ledgers.insert(ledger.address, ledger);
        Ok(())
    }

    pub fn add_emitter(&mut self, emitter: Emitter) -> Result<(), ProtocolError> {
        self.ensure_free(&emitter.address)?;
        debug!(emitter = %emitter.address.short(), "emitter registered");
        self.world.emitters.insert(emitter.address, emitter);
        Ok(())
    }

    pub fn add_vault(&mut self, vault: VestingVault) -> Result<(), ProtocolError> {
        self.ensure_free(&vault.address)?;
        debug!(vault = %vault.address.short(), "vault registered");
        self.world.vaults.insert(vault.address, vault);
        Ok(())
    }

    pub fn add_router(&mut self, router: Router) -> Result<(), ProtocolError> {
        self.ensure_free(&router.address)?;
        debug!(router = %router.address.short(), "router registered");
        self.world.routers.insert(router.address, router);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Governance closures
    // ---------------------------------------------------------------------

    /// Apply a gov- or handler-gated setter to a ledger as one atomic call.
    /// `f` receives the ledger and `caller`, which it must pass on to the
    /// setter's permission check. The change is logged as an admin event.
    pub fn update_ledger<T>(
        &mut self,
        caller: Address,
        id: Address,
        f: impl FnOnce(&mut StakeLedger, Address) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.atomically("update_ledger", |p| {
            let out = f(p.ledger_mut(&id)?, caller)?;
            p.record_admin(id, caller);
            Ok(out)
        })
    }

    pub fn update_token<T>(
        &mut self,
        caller: Address,
        id: Address,
        f: impl FnOnce(&mut BaseToken, Address) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.atomically("update_token", |p| {
            let out = f(p.tokens_mut().get_mut(&id)?, caller)?;
            p.record_admin(id, caller);
            Ok(out)
        })
    }

    pub fn update_emitter<T>(
        &mut self,
        caller: Address,
        id: Address,
        f: impl FnOnce(&mut Emitter, Address) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.atomically("update_emitter", |p| {
            let out = f(p.emitter_mut(&id)?, caller)?;
            p.record_admin(id, caller);
            Ok(out)
        })
    }

    /// Vault setters, including the handler-only `set_bonus_rewards` and
    /// `set_cumulative_reward_deductions` that move an account's vesting cap.
    pub fn update_vault<T>(
        &mut self,
        caller: Address,
        id: Address,
        f: impl FnOnce(&mut VestingVault, Address) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.atomically("update_vault", |p| {
            let out = f(p.vault_mut(&id)?, caller)?;
            p.record_admin(id, caller);
            Ok(out)
        })
    }

    pub fn update_router<T>(
        &mut self,
        caller: Address,
        id: Address,
        f: impl FnOnce(&mut Router, Address) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        self.atomically("update_router", |p| {
            let out = f(p.router_mut(&id)?, caller)?;
            p.record_admin(id, caller);
            Ok(out)
        })
    }

    fn record_admin(&mut self, component: Address, caller: Address) {
        let now = self.now;
        self.record(Event::new(now, component, caller, caller, Action::Admin));
    }

    // ---------------------------------------------------------------------
    // Token dispatch
    // ---------------------------------------------------------------------

    pub fn fungible(&self, token: &Address) -> Result<&dyn FungibleToken, ProtocolError> {
        if let Some(ledger) = self.world.ledgers.get(token) {
            return Ok(ledger as &dyn FungibleToken);
        }
        Ok(self.world.tokens.get(token)? as &dyn FungibleToken)
    }

    pub(crate) fn fungible_mut(&mut self, token: &Address) -> Result<&mut dyn FungibleToken, ProtocolError> {
        if self.world.ledgers.contains_key(token) {
            return Ok(self.ledger_mut(token)? as &mut dyn FungibleToken);
        }
        Ok(self.world.tokens.get_mut(token)? as &mut dyn FungibleToken)
    }

    pub fn balance_of(&self, token: &Address, account: &Address) -> Result<Amount, ProtocolError> {
        Ok(self.fungible(token)?.balance_of(account))
    }

    pub fn total_supply(&self, token: &Address) -> Result<Amount, ProtocolError> {
        Ok(self.fungible(token)?.total_supply())
    }

    pub(crate) fn token_transfer(
        &mut self,
        token: Address,
        sender: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.fungible_mut(&token)?.transfer(sender, recipient, amount)
    }

    pub(crate) fn token_transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.fungible_mut(&token)?.transfer_from(spender, from, to, amount)
    }

    /// Mint a plain token. `caller` must be a minter of it.
    pub(crate) fn token_mint(
        &mut self,
        token: Address,
        caller: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.world.tokens.get_mut(&token)?.mint(caller, account, amount)
    }

    /// Burn a plain token. `caller` must be a minter of it.
    pub(crate) fn token_burn(
        &mut self,
        token: Address,
        caller: Address,
        account: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.world.tokens.get_mut(&token)?.burn(caller, account, amount)
    }

    // ---------------------------------------------------------------------
    // Account-facing token calls
    // ---------------------------------------------------------------------

    pub fn transfer(
        &mut self,
        caller: Address,
        token: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("transfer", |p| {
            p.token_transfer(token, caller, recipient, amount)?;
            p.record_share_transfer(token, caller, caller, recipient, amount);
            Ok(())
        })
    }

    pub fn approve(
        &mut self,
        caller: Address,
        token: Address,
        spender: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("approve", |p| {
            p.fungible_mut(&token)?.approve(caller, spender, amount)?;
            let now = p.now;
            p.record(
                Event::new(now, token, caller, spender, Action::Approval)
                    .with_token(token)
                    .with_amount(amount),
            );
            Ok(())
        })
    }

    pub fn transfer_from(
        &mut self,
        caller: Address,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("transfer_from", |p| {
            p.token_transfer_from(token, caller, from, to, amount)?;
            p.record_share_transfer(token, caller, from, to, amount);
            Ok(())
        })
    }

    /// Mint a plain token on behalf of `caller` (a minter), e.g. funding an
    /// emitter or a vault.
    pub fn mint(&mut self, caller: Address, token: Address, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("mint", |p| p.token_mint(token, caller, account, amount))
    }

    /// Wrap `amount` of native asset held by `caller`.
    pub fn wrap(&mut self, caller: Address, wrapped: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.atomically("wrap", |p| p.tokens_mut().wrap(&wrapped, caller, amount))
    }

    fn record_share_transfer(&mut self, token: Address, actor: Address, from: Address, to: Address, amount: Amount) {
        // Plain token transfers are not ledger events.
        if !self.world.ledgers.contains_key(&token) {
            return;
        }
        let now = self.now;
        let to_balance = self.fungible(&token).map(|t| t.balance_of(&to)).unwrap_or(0);
        self.record(
            Event::new(now, token, actor, from, Action::ShareTransfer)
                .with_token(token)
                .with_amount(amount)
                .with_balance("to_balance", to_balance),
        );
    }
}
