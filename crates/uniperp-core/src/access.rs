// crates/uniperp-core/src/access.rs
//
// Access-control primitives.
//
// `Governable` stands in for the external governance collaborator: a single
// `gov` capability per component that gates every administrative mutation.
// `HandlerSet` is the per-resource allow-list checked at the entry of every
// delegated ("for account") operation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::ProtocolError;

/// Single-owner governance capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governable {
    gov: Address,
}

impl Governable {
    pub fn new(gov: Address) -> Self {
        Self { gov }
    }

    pub fn gov(&self) -> Address {
        self.gov
    }

    /// # Errors
    /// `UnauthorizedCaller` unless `caller` holds the governance capability.
    pub fn ensure_gov(&self, caller: Address) -> Result<(), ProtocolError> {
        if caller != self.gov {
            return Err(ProtocolError::UnauthorizedCaller(format!(
                "{} is not gov",
                caller.short()
            )));
        }
        Ok(())
    }

    /// Transfer ownership. Only the current gov may do so.
    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.ensure_gov(caller)?;
        if new_gov.is_zero() {
            return Err(ProtocolError::UnauthorizedCaller(
                "gov cannot be the zero address".to_string(),
            ));
        }
        tracing::info!(old = %self.gov.short(), new = %new_gov.short(), "gov transferred");
        self.gov = new_gov;
        Ok(())
    }
}

/// Allow-list of components permitted to act on behalf of accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSet {
    handlers: BTreeSet<Address>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, handler: Address, allowed: bool) {
        if allowed {
            self.handlers.insert(handler);
        } else {
            self.handlers.remove(&handler);
        }
    }

    pub fn contains(&self, caller: &Address) -> bool {
        self.handlers.contains(caller)
    }

    /// # Errors
    /// `UnauthorizedCaller` if `caller` is not on the list. `resource` names
    /// the component for the error message.
    pub fn ensure(&self, caller: Address, resource: &str) -> Result<(), ProtocolError> {
        if !self.contains(&caller) {
            return Err(ProtocolError::UnauthorizedCaller(format!(
                "{} is not a handler of {}",
                caller.short(),
                resource
            )));
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.handlers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_gov() {
        let gov = Address::from_label("gov");
        let other = Address::from_label("other");
        let governable = Governable::new(gov);
        assert!(governable.ensure_gov(gov).is_ok());
        assert!(matches!(
            governable.ensure_gov(other),
            Err(ProtocolError::UnauthorizedCaller(_))
        ));
    }

    #[test]
    fn test_set_gov_only_by_gov() {
        let gov = Address::from_label("gov");
        let other = Address::from_label("other");
        let mut governable = Governable::new(gov);

        assert!(governable.set_gov(other, other).is_err());
        governable.set_gov(gov, other).unwrap();
        assert_eq!(governable.gov(), other);
        assert!(governable.ensure_gov(gov).is_err());
        assert!(governable.set_gov(other, Address::ZERO).is_err());
    }

    #[test]
    fn test_handler_set_toggle() {
        let router = Address::from_label("router");
        let mut handlers = HandlerSet::new();
        assert!(handlers.ensure(router, "ledger").is_err());
        handlers.set(router, true);
        assert!(handlers.ensure(router, "ledger").is_ok());
        handlers.set(router, false);
        assert!(!handlers.contains(&router));
    }
}
