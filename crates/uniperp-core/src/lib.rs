// crates/uniperp-core/src/lib.rs
//
// uniperp-core: core types, checked fixed-point math, access control, clock
// and fungible-token primitives for the UniPerp staking engine.
//
// This is the leaf crate that the engine and the CLI depend on.
// All monetary values are u128 base units with 18 decimals.

pub mod access;
pub mod address;
pub mod clock;
pub mod error;
pub mod events;
pub mod math;
pub mod token;

// Re-export key types for ergonomic access from downstream crates.
pub use access::{Governable, HandlerSet};
pub use address::Address;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ProtocolError;
pub use events::{Action, Event, EventLog};
pub use math::{mul_div, BASIS_POINTS_DIVISOR, PRECISION, SECONDS_PER_YEAR};
pub use token::{
    expand_decimals, Amount, Balances, BaseToken, FungibleToken, TokenLedger, Units,
    TOKEN_DECIMALS, UNIT,
};
