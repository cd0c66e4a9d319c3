// crates/uniperp-core/src/events.rs
//
// Structured records of every committed mutation. Per-second pending rewards
// are never persisted, so the event stream is what an off-process indexer
// replays to reconstruct accrual history.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::token::{Amount, Units};

/// Kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Stake,
    Unstake,
    Claim,
    Distribute,
    ShareTransfer,
    Approval,
    VestDeposit,
    VestClaim,
    VestWithdraw,
    TransferSignalled,
    TransferAccepted,
    Compound,
    BonusBurn,
    FeeConversion,
    Admin,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Stake => "stake",
            Action::Unstake => "unstake",
            Action::Claim => "claim",
            Action::Distribute => "distribute",
            Action::ShareTransfer => "share_transfer",
            Action::Approval => "approval",
            Action::VestDeposit => "vest_deposit",
            Action::VestClaim => "vest_claim",
            Action::VestWithdraw => "vest_withdraw",
            Action::TransferSignalled => "transfer_signalled",
            Action::TransferAccepted => "transfer_accepted",
            Action::Compound => "compound",
            Action::BonusBurn => "bonus_burn",
            Action::FeeConversion => "fee_conversion",
            Action::Admin => "admin",
        };
        write!(f, "{}", name)
    }
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: u64,
    /// Component that performed the mutation.
    pub component: Address,
    /// Caller of the entry point (an account or a handler).
    pub actor: Address,
    /// Account whose position changed.
    pub account: Address,
    pub action: Action,
    pub token: Option<Address>,
    pub amount: Amount,
    /// Resulting balances after the mutation, keyed by field name.
    pub balances: BTreeMap<String, Amount>,
}

impl Event {
    pub fn new(timestamp: u64, component: Address, actor: Address, account: Address, action: Action) -> Self {
        Self {
            timestamp,
            component,
            actor,
            account,
            action,
            token: None,
            amount: 0,
            balances: BTreeMap::new(),
        }
    }

    pub fn with_token(mut self, token: Address) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_balance(mut self, name: &str, value: Amount) -> Self {
        self.balances.insert(name.to_string(), value);
        self
    }

    /// Emit this event as a structured tracing record.
    pub fn trace(&self) {
        tracing::info!(
            action = %self.action,
            component = %self.component.short(),
            actor = %self.actor.short(),
            account = %self.account.short(),
            token = ?self.token.map(|t| t.short()),
            amount = %Units(self.amount),
            balances = ?self.balances,
            ts = self.timestamp,
            "committed"
        );
    }
}

/// Append-only log of committed events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events recorded at or after position `start`.
    pub fn since(&self, start: usize) -> &[Event] {
        &self.events[start.min(self.events.len())..]
    }

    /// Drop every event from position `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// Hand every event over to the caller and leave the log empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Serialize the full log as JSON lines.
    pub fn to_json_lines(&self) -> Result<String, crate::error::ProtocolError> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
