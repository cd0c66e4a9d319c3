// crates/uniperp-staking/src/lib.rs
//
// uniperp-staking: staking ledgers, reward emitters, vesting vaults and the
// reward router that composes them into stake -> bonus -> fee pipelines.
//
// Every component lives inside a `Protocol`, which runs each public call as
// one atomic step against a shared clock.

pub mod config;
pub mod deploy;
pub mod emitter;
pub mod protocol;
pub mod router;
pub mod stake_ledger;
pub mod vesting;

// Re-export key types for ergonomic access from downstream crates.
pub use config::{DeploymentConfig, ParsedAmounts};
pub use deploy::{deploy_standard, Deployment};
pub use emitter::{EmissionSchedule, Emitter, MAX_BONUS_MULTIPLIER_BPS};
pub use protocol::{Protocol, World};
pub use router::{HandleRewardsFlags, RewardsClaimed, Router, RouterConfig, DEFAULT_MAX_BATCH_SIZE};
pub use stake_ledger::{StakeLedger, StakeRecord};
pub use vesting::{VaultConfig, VestingPosition, VestingVault};
