// crates/uniperp-staking/src/config.rs
//
// Deployment configuration for the standard staking stack.
// Loaded from a TOML file or populated with defaults. Token amounts are
// decimal strings ("0.0206") because TOML integers cannot hold 18-decimal
// base units.

use serde::{Deserialize, Serialize};
use std::fs;

use uniperp_core::error::ProtocolError;
use uniperp_core::{Amount, Units};

use crate::emitter::MAX_BONUS_MULTIPLIER_BPS;

/// Parameters of a standard deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Symbol of the base reward token.
    #[serde(default = "default_reward_symbol")]
    pub reward_symbol: String,

    /// Symbol of the escrowed reward token.
    #[serde(default = "default_es_symbol")]
    pub es_symbol: String,

    /// Symbol of the bonus-point token.
    #[serde(default = "default_bonus_symbol")]
    pub bonus_symbol: String,

    /// Symbol of the wrapped native asset paid as fees.
    #[serde(default = "default_fee_symbol")]
    pub fee_symbol: String,

    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,

    /// Escrowed tokens emitted to the staked ledger per second.
    #[serde(default = "default_es_per_second")]
    pub es_tokens_per_second: String,

    /// Fee tokens emitted to the fee ledger per second.
    #[serde(default = "default_fee_per_second")]
    pub fee_tokens_per_second: String,

    /// Annual bonus-point rate on the bonus ledger, in basis points.
    #[serde(default = "default_bonus_multiplier_bps")]
    pub bonus_multiplier_bps: u64,

    #[serde(default = "default_vesting_duration_secs")]
    pub vesting_duration_secs: u64,

    /// Seconds between an account's last stake and its next unstake.
    /// Zero disables the cooldown.
    #[serde(default)]
    pub unstake_cooldown_secs: u64,

    /// Upper bound on the account list of a batch compound.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_has_max_vestable_amount")]
    pub has_max_vestable_amount: bool,

    /// Escrowed tokens minted into the staked ledger's emitter.
    #[serde(default = "default_es_funding")]
    pub es_emitter_funding: String,

    /// Fee tokens wrapped and sent to the fee ledger's emitter.
    #[serde(default = "default_fee_funding")]
    pub fee_emitter_funding: String,

    /// Base tokens minted into the vesting vault to pay out claims.
    #[serde(default = "default_vault_float")]
    pub vault_float: String,
}

fn default_reward_symbol() -> String {
    "UNIP".to_string()
}

fn default_es_symbol() -> String {
    "esUNIP".to_string()
}

fn default_bonus_symbol() -> String {
    "bnUNIP".to_string()
}

fn default_fee_symbol() -> String {
    "WETH".to_string()
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_es_per_second() -> String {
    "0.0206".to_string()
}

fn default_fee_per_second() -> String {
    "0.0001".to_string()
}

fn default_bonus_multiplier_bps() -> u64 {
    10_000
}

fn default_vesting_duration_secs() -> u64 {
    365 * 24 * 60 * 60
}

fn default_max_batch_size() -> usize {
    50
}

fn default_has_max_vestable_amount() -> bool {
    true
}

fn default_es_funding() -> String {
    "50000".to_string()
}

fn default_fee_funding() -> String {
    "100".to_string()
}

fn default_vault_float() -> String {
    "50000".to_string()
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            reward_symbol: default_reward_symbol(),
            es_symbol: default_es_symbol(),
            bonus_symbol: default_bonus_symbol(),
            fee_symbol: default_fee_symbol(),
            native_symbol: default_native_symbol(),
            es_tokens_per_second: default_es_per_second(),
            fee_tokens_per_second: default_fee_per_second(),
            bonus_multiplier_bps: default_bonus_multiplier_bps(),
            vesting_duration_secs: default_vesting_duration_secs(),
            unstake_cooldown_secs: 0,
            max_batch_size: default_max_batch_size(),
            has_max_vestable_amount: default_has_max_vestable_amount(),
            es_emitter_funding: default_es_funding(),
            fee_emitter_funding: default_fee_funding(),
            vault_float: default_vault_float(),
        }
    }
}

/// Token amounts of a config, in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAmounts {
    pub es_tokens_per_second: Amount,
    pub fee_tokens_per_second: Amount,
    pub es_emitter_funding: Amount,
    pub fee_emitter_funding: Amount,
    pub vault_float: Amount,
}

impl DeploymentConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DeploymentConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ProtocolError> {
        toml::from_str(contents).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ProtocolError> {
        toml::to_string_pretty(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse every token amount into base units.
    pub fn amounts(&self) -> Result<ParsedAmounts, ProtocolError> {
        let parse = |field: &str, value: &str| -> Result<Amount, ProtocolError> {
            value
                .parse::<Units>()
                .map(|u| u.0)
                .map_err(|e| ProtocolError::Config(format!("{}: {}", field, e)))
        };
        Ok(ParsedAmounts {
            es_tokens_per_second: parse("es_tokens_per_second", &self.es_tokens_per_second)?,
            fee_tokens_per_second: parse("fee_tokens_per_second", &self.fee_tokens_per_second)?,
            es_emitter_funding: parse("es_emitter_funding", &self.es_emitter_funding)?,
            fee_emitter_funding: parse("fee_emitter_funding", &self.fee_emitter_funding)?,
            vault_float: parse("vault_float", &self.vault_float)?,
        })
    }

    /// Check the config for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.vesting_duration_secs == 0 {
            return Err(ProtocolError::Config("vesting_duration_secs must be positive".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ProtocolError::Config("max_batch_size must be positive".to_string()));
        }
        if self.bonus_multiplier_bps as u128 > MAX_BONUS_MULTIPLIER_BPS {
            return Err(ProtocolError::Config(format!(
                "bonus_multiplier_bps {} exceeds {}",
                self.bonus_multiplier_bps, MAX_BONUS_MULTIPLIER_BPS
            )));
        }
        let symbols = [
            &self.reward_symbol,
            &self.es_symbol,
            &self.bonus_symbol,
            &self.fee_symbol,
            &self.native_symbol,
        ];
        for (i, a) in symbols.iter().enumerate() {
            if a.is_empty() {
                return Err(ProtocolError::Config("token symbols must be non-empty".to_string()));
            }
            if symbols[i + 1..].contains(a) {
                return Err(ProtocolError::Config(format!("duplicate token symbol {}", a)));
            }
        }
        self.amounts()?;
        Ok(())
    }
}
