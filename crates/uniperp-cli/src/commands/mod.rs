// crates/uniperp-cli/src/commands/mod.rs
//
// Command module declarations for the UniPerp CLI.

pub mod config;
pub mod simulate;
