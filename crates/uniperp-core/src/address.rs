// crates/uniperp-core/src/address.rs
//
// 32-byte identifiers shared by accounts and components. Every token, ledger,
// emitter, vault and router is addressed the same way as a user account, so a
// component can hold balances and sit on another component's allow-list.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of an account or a component.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The all-zero address. Never a valid account or component.
    pub const ZERO: Address = Address([0u8; 32]);

    /// Derive a deterministic address from a human-readable label.
    ///
    /// Used by the deployment wiring and tests, e.g. `Address::from_label("esUNIP")`.
    pub fn from_label(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"uniperp:address:");
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Address(bytes)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Short hex form (first 6 bytes), used in log lines.
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(14);
        out.push_str("0x");
        for b in &self.0[..6] {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_is_deterministic() {
        assert_eq!(Address::from_label("user0"), Address::from_label("user0"));
        assert_ne!(Address::from_label("user0"), Address::from_label("user1"));
        assert!(!Address::from_label("user0").is_zero());
    }

    #[test]
    fn test_display_is_full_hex() {
        let addr = Address([0xab; 32]);
        let s = addr.to_string();
        assert_eq!(s.len(), 2 + 64);
        assert!(s.starts_with("0xabab"));
        assert_eq!(addr.short(), "0xabababababab");
    }
}
