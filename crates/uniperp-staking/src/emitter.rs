// crates/uniperp-staking/src/emitter.rs
//
// Time-based reward emission feeding exactly one StakeLedger.
//
// Two schedules exist:
//   - Fixed: `elapsed * tokens_per_interval` of a pre-funded reward token is
//     pushed to the ledger, capped at the emitter's funded balance.
//   - Bonus: simple interest on the ledger's total staked supply,
//     `supply * multiplier_bps * elapsed / (10_000 * SECONDS_PER_YEAR)`,
//     minted as bonus points instead of drained from a pool.
//
// Emission is pulled lazily: the ledger calls `distribute` at the start of
// every mutating call, so nothing happens while nobody touches the pool.

use serde::{Deserialize, Serialize};

use uniperp_core::error::ProtocolError;
use uniperp_core::math::{self, BASIS_POINTS_DIVISOR, SECONDS_PER_YEAR};
use uniperp_core::{Action, Address, Amount, Event, FungibleToken, Governable};

use crate::protocol::Protocol;

/// Upper bound for the bonus multiplier (1000% APR).
pub const MAX_BONUS_MULTIPLIER_BPS: u128 = 100_000;

/// How an emitter computes the amount released over an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionSchedule {
    /// Fixed amount of reward token per second, drawn from the funded balance.
    Fixed { tokens_per_interval: Amount },
    /// Annualised simple interest on the ledger's total supply, minted.
    Bonus { multiplier_bps: u128 },
}

/// Reward distributor attached to a single ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emitter {
    pub address: Address,
    pub reward_token: Address,
    /// The only ledger allowed to pull from this emitter.
    pub ledger: Address,
    governance: Governable,
    schedule: EmissionSchedule,
    last_distribution_time: u64,
}

impl Emitter {
    pub fn new(
        address: Address,
        reward_token: Address,
        ledger: Address,
        gov: Address,
        schedule: EmissionSchedule,
    ) -> Self {
        Self {
            address,
            reward_token,
            ledger,
            governance: Governable::new(gov),
            schedule,
            last_distribution_time: 0,
        }
    }

    pub fn gov(&self) -> Address {
        self.governance.gov()
    }

    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.governance.set_gov(caller, new_gov)
    }

    pub fn schedule(&self) -> EmissionSchedule {
        self.schedule
    }

    pub fn is_bonus(&self) -> bool {
        matches!(self.schedule, EmissionSchedule::Bonus { .. })
    }

    pub fn last_distribution_time(&self) -> u64 {
        self.last_distribution_time
    }

    /// Amount emitted since the last distribution, ignoring the funded balance.
    ///
    /// Returns 0 until the emission clock has been started with
    /// `update_last_distribution_time`.
    pub fn pending_rewards(&self, now: u64, ledger_supply: Amount) -> Result<Amount, ProtocolError> {
        if self.last_distribution_time == 0 || now <= self.last_distribution_time {
            return Ok(0);
        }
        let elapsed = (now - self.last_distribution_time) as u128;
        match self.schedule {
            EmissionSchedule::Fixed { tokens_per_interval } => math::mul(elapsed, tokens_per_interval),
            EmissionSchedule::Bonus { multiplier_bps } => math::mul_div(
                math::mul(ledger_supply, multiplier_bps)?,
                elapsed,
                BASIS_POINTS_DIVISOR * SECONDS_PER_YEAR as u128,
            ),
        }
    }

    pub(crate) fn start_clock(&mut self, caller: Address, now: u64) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.last_distribution_time = now;
        Ok(())
    }

    /// Advance the clock. An unstarted clock stays unstarted.
    pub(crate) fn mark_distributed(&mut self, now: u64) {
        if self.last_distribution_time != 0 && now > self.last_distribution_time {
            self.last_distribution_time = now;
        }
    }

    pub(crate) fn set_schedule(&mut self, caller: Address, schedule: EmissionSchedule) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        let same_kind = matches!(
            (self.schedule, schedule),
            (EmissionSchedule::Fixed { .. }, EmissionSchedule::Fixed { .. })
                | (EmissionSchedule::Bonus { .. }, EmissionSchedule::Bonus { .. })
        );
        if !same_kind {
            return Err(ProtocolError::Config(
                "emission schedule kind cannot change".to_string(),
            ));
        }
        if let EmissionSchedule::Bonus { multiplier_bps } = schedule {
            if multiplier_bps > MAX_BONUS_MULTIPLIER_BPS {
                return Err(ProtocolError::Config(format!(
                    "bonus multiplier {} bps exceeds {} bps",
                    multiplier_bps, MAX_BONUS_MULTIPLIER_BPS
                )));
            }
        }
        if self.last_distribution_time == 0 {
            return Err(ProtocolError::Config(
                "emission clock not started".to_string(),
            ));
        }
        self.schedule = schedule;
        Ok(())
    }
}

impl Protocol {
    /// Push newly emitted rewards from `emitter` to its ledger and fold them
    /// into the ledger's accumulator in the same step. Returns the amount
    /// distributed.
    ///
    /// Only the attached ledger may call this; it does so at the start of
    /// every mutating ledger call.
    ///
    /// # Errors
    /// `UnauthorizedCaller` if `caller` is not the attached ledger.
    /// `NotFound` if that ledger is not wired to `emitter`.
    pub fn distribute(&mut self, caller: Address, emitter: Address) -> Result<Amount, ProtocolError> {
        self.atomically("distribute", |p| {
            let ledger = p.emitter(&emitter)?.ledger;
            if caller != ledger {
                return Err(ProtocolError::UnauthorizedCaller(format!(
                    "{} is not the ledger of emitter {}",
                    caller.short(),
                    emitter.short()
                )));
            }
            if p.ledger(&ledger)?.emitter() != Some(emitter) {
                return Err(ProtocolError::NotFound(format!(
                    "ledger {} does not draw from emitter {}",
                    ledger.short(),
                    emitter.short()
                )));
            }
            p.update_ledger_rewards(ledger)
        })
    }

    /// Read-only emission since the last distribution, for solvency checks.
    pub fn pending_rewards(&self, emitter: Address) -> Result<Amount, ProtocolError> {
        let e = self.emitter(&emitter)?;
        let supply = self.ledger(&e.ledger)?.total_supply();
        e.pending_rewards(self.clock_now(), supply)
    }

    /// Start (or restart) the emission clock at the current time.
    pub fn update_last_distribution_time(&mut self, caller: Address, emitter: Address) -> Result<(), ProtocolError> {
        self.atomically("update_last_distribution_time", |p| {
            let now = p.now();
            p.emitter_mut(&emitter)?.start_clock(caller, now)?;
            p.record(Event::new(now, emitter, caller, caller, Action::Admin));
            Ok(())
        })
    }

    /// Change the fixed emission rate. Accrual up to now is settled at the
    /// old rate first.
    pub fn set_tokens_per_interval(
        &mut self,
        caller: Address,
        emitter: Address,
        tokens_per_interval: Amount,
    ) -> Result<(), ProtocolError> {
        self.atomically("set_tokens_per_interval", |p| {
            p.emitter(&emitter)?.governance.ensure_gov(caller)?;
            let ledger = p.emitter(&emitter)?.ledger;
            p.update_ledger_rewards(ledger)?;
            p.emitter_mut(&emitter)?
                .set_schedule(caller, EmissionSchedule::Fixed { tokens_per_interval })?;
            let now = p.now();
            p.record(
                Event::new(now, emitter, caller, caller, Action::Admin)
                    .with_balance("tokens_per_interval", tokens_per_interval),
            );
            Ok(())
        })
    }

    /// Change the bonus multiplier. Accrual up to now is settled at the old
    /// multiplier first.
    pub fn set_bonus_multiplier(
        &mut self,
        caller: Address,
        emitter: Address,
        multiplier_bps: u128,
    ) -> Result<(), ProtocolError> {
        self.atomically("set_bonus_multiplier", |p| {
            p.emitter(&emitter)?.governance.ensure_gov(caller)?;
            let ledger = p.emitter(&emitter)?.ledger;
            p.update_ledger_rewards(ledger)?;
            p.emitter_mut(&emitter)?
                .set_schedule(caller, EmissionSchedule::Bonus { multiplier_bps })?;
            let now = p.now();
            p.record(
                Event::new(now, emitter, caller, caller, Action::Admin)
                    .with_balance("bonus_multiplier_bps", multiplier_bps),
            );
            Ok(())
        })
    }

    /// Emission `ledger` would receive if it pulled now, after the funded
    /// balance cap. Used by the claimable preview.
    pub(crate) fn emission_preview(&self, emitter: Address) -> Result<Amount, ProtocolError> {
        let e = self.emitter(&emitter)?;
        let supply = self.ledger(&e.ledger)?.total_supply();
        if supply == 0 {
            return Ok(0);
        }
        let pending = e.pending_rewards(self.clock_now(), supply)?;
        Ok(match e.schedule {
            EmissionSchedule::Fixed { .. } => {
                pending.min(self.tokens().balance_of(&e.reward_token, &e.address))
            }
            EmissionSchedule::Bonus { .. } => pending,
        })
    }

    pub(crate) fn distribute_emitter(&mut self, emitter: Address, caller: Address) -> Result<Amount, ProtocolError> {
        let now = self.now();
        let e = self.emitter(&emitter)?.clone();
        if caller != e.ledger {
            return Err(ProtocolError::UnauthorizedCaller(format!(
                "{} is not the ledger of emitter {}",
                caller.short(),
                emitter.short()
            )));
        }

        let supply = self.ledger(&e.ledger)?.total_supply();
        // Nothing can accrue against an empty pool: let the interval lapse.
        let mut amount = if supply == 0 {
            0
        } else {
            e.pending_rewards(now, supply)?
        };
        self.emitter_mut(&emitter)?.mark_distributed(now);
        if amount == 0 {
            return Ok(0);
        }

        match e.schedule {
            EmissionSchedule::Fixed { .. } => {
                let funded = self.tokens().balance_of(&e.reward_token, &e.address);
                amount = amount.min(funded);
                if amount == 0 {
                    tracing::warn!(emitter = %emitter.short(), "emitter has no funded balance");
                    return Ok(0);
                }
                self.token_transfer(e.reward_token, e.address, e.ledger, amount)?;
            }
            EmissionSchedule::Bonus { .. } => {
                self.tokens_mut()
                    .get_mut(&e.reward_token)?
                    .mint(e.address, e.ledger, amount)?;
            }
        }

        self.record(
            Event::new(now, emitter, caller, e.ledger, Action::Distribute)
                .with_token(e.reward_token)
                .with_amount(amount)
                .with_balance("ledger_supply", supply),
        );
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniperp_core::{expand_decimals, UNIT};

    fn fixed(rate: Amount) -> Emitter {
        Emitter::new(
            Address::from_label("emitter"),
            Address::from_label("esUNIP"),
            Address::from_label("ledger"),
            Address::from_label("gov"),
            EmissionSchedule::Fixed { tokens_per_interval: rate },
        )
    }

    #[test]
    fn test_pending_zero_before_clock_started() {
        let emitter = fixed(UNIT);
        assert_eq!(emitter.pending_rewards(1_000, UNIT).unwrap(), 0);
    }

    #[test]
    fn test_fixed_pending_is_elapsed_times_rate() {
        let mut emitter = fixed(UNIT);
        emitter.start_clock(Address::from_label("gov"), 1_000).unwrap();
        assert_eq!(emitter.pending_rewards(1_000, UNIT).unwrap(), 0);
        assert_eq!(emitter.pending_rewards(1_100, UNIT).unwrap(), 100 * UNIT);
        // Clock going backwards is treated as no elapsed time
        assert_eq!(emitter.pending_rewards(900, UNIT).unwrap(), 0);
    }

    #[test]
    fn test_bonus_pending_full_year_at_100_percent() {
        let gov = Address::from_label("gov");
        let mut emitter = Emitter::new(
            Address::from_label("bonus"),
            Address::from_label("bnUNIP"),
            Address::from_label("ledger"),
            gov,
            EmissionSchedule::Bonus { multiplier_bps: 10_000 },
        );
        emitter.start_clock(gov, 1).unwrap();
        let supply = expand_decimals(1_000, 18);
        let pending = emitter.pending_rewards(1 + SECONDS_PER_YEAR, supply).unwrap();
        assert_eq!(pending, supply);

        // One day at 100% on 1000 => ~2.739
        let day = emitter.pending_rewards(1 + 86_400, supply).unwrap();
        assert!(day > 2_730_000_000_000_000_000 && day < 2_750_000_000_000_000_000);
    }

    #[test]
    fn test_set_schedule_guards() {
        let gov = Address::from_label("gov");
        let mut emitter = fixed(UNIT);
        // Clock must be started first
        assert!(emitter
            .set_schedule(gov, EmissionSchedule::Fixed { tokens_per_interval: 2 })
            .is_err());
        emitter.start_clock(gov, 10).unwrap();
        assert!(emitter
            .set_schedule(Address::from_label("x"), EmissionSchedule::Fixed { tokens_per_interval: 2 })
            .is_err());
        assert!(emitter
            .set_schedule(gov, EmissionSchedule::Bonus { multiplier_bps: 1 })
            .is_err());
        emitter
            .set_schedule(gov, EmissionSchedule::Fixed { tokens_per_interval: 2 })
            .unwrap();
        assert_eq!(emitter.schedule(), EmissionSchedule::Fixed { tokens_per_interval: 2 });
    }
}
