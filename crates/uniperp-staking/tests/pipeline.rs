// crates/uniperp-staking/tests/pipeline.rs
//
// Integration tests for the deployed staking pipeline.
//
// Each test deploys the standard stack into a fresh protocol on a manual
// clock and drives it through the public entry points only: router calls,
// vault calls and token calls, the way an account would.

use std::sync::Arc;

use uniperp_core::{
    expand_decimals, Address, Amount, Clock, ManualClock, ProtocolError, SECONDS_PER_YEAR, UNIT,
};
use uniperp_staking::{
    deploy_standard, Deployment, DeploymentConfig, HandleRewardsFlags, Protocol, VaultConfig,
    VestingVault,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const START: u64 = 1_700_000_000;
const DAY: u64 = 86_400;

struct Harness {
    p: Protocol,
    clock: Arc<ManualClock>,
    d: Deployment,
    gov: Address,
}

fn setup_with(config: DeploymentConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let mut p = Protocol::new(clock.clone());
    let gov = Address::from_label("gov");
    let d = deploy_standard(&mut p, gov, &config).unwrap();
    Harness { p, clock, d, gov }
}

/// One es-token per second so emission figures are whole numbers.
fn setup() -> Harness {
    setup_with(DeploymentConfig {
        es_tokens_per_second: "1".to_string(),
        ..DeploymentConfig::default()
    })
}

fn user(label: &str) -> Address {
    Address::from_label(label)
}

/// Mint base tokens to `account` and approve the staked ledger to pull them.
fn fund(h: &mut Harness, account: Address, amount: Amount) {
    h.p.mint(h.gov, h.d.reward_token, account, amount).unwrap();
    h.p.approve(account, h.d.reward_token, h.d.staked_ledger, Amount::MAX)
        .unwrap();
}

fn stake(h: &mut Harness, account: Address, amount: Amount) {
    fund(h, account, amount);
    h.p.stake_tokens(account, h.d.router, amount).unwrap();
}

/// Σ deposit balances == total deposit supply, and Σ staked == share supply.
fn assert_ledger_conservation(p: &Protocol, ledger: Address, tokens: &[Address]) {
    let l = p.ledger(&ledger).unwrap();
    for token in tokens {
        let sum: Amount = l.accounts().map(|(_, r)| r.deposit_balance(token)).sum();
        assert_eq!(sum, l.total_deposit_supply(token));
    }
    let staked: Amount = l.accounts().map(|(_, r)| r.staked_amount).sum();
    assert_eq!(staked, p.total_supply(&ledger).unwrap());
}

fn balance(h: &Harness, token: Address, account: Address) -> Amount {
    h.p.balance_of(&token, &account).unwrap()
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

#[test]
fn test_stake_propagates_and_round_trips() {
    let mut h = setup();
    let alice = user("alice");
    let amount = expand_decimals(1_000, 18);
    stake(&mut h, alice, amount);

    let d = h.d.clone();
    assert_eq!(balance(&h, d.reward_token, alice), 0);
    assert_eq!(h.p.ledger(&d.staked_ledger).unwrap().staked_amount(&alice), amount);
    assert_eq!(
        h.p.ledger(&d.bonus_ledger).unwrap().deposit_balance(&alice, &d.staked_ledger),
        amount
    );
    assert_eq!(
        h.p.ledger(&d.fee_ledger).unwrap().deposit_balance(&alice, &d.bonus_ledger),
        amount
    );
    // Intermediate shares are held by the next ledger, not the account
    assert_eq!(balance(&h, d.staked_ledger, alice), 0);
    assert_eq!(balance(&h, d.fee_ledger, alice), amount);

    assert_ledger_conservation(&h.p, d.staked_ledger, &[d.reward_token, d.es_token]);
    assert_ledger_conservation(&h.p, d.fee_ledger, &[d.bonus_ledger, d.bonus_token]);

    // No time elapsed: unstaking restores the wallet exactly
    h.p.unstake_tokens(alice, d.router, amount).unwrap();
    assert_eq!(balance(&h, d.reward_token, alice), amount);
    for ledger in [d.staked_ledger, d.bonus_ledger, d.fee_ledger] {
        assert_eq!(h.p.ledger(&ledger).unwrap().staked_amount(&alice), 0);
        assert_eq!(h.p.total_supply(&ledger).unwrap(), 0);
    }
}

#[test]
fn test_es_emission_single_staker_100_seconds() {
    let mut h = setup();
    let alice = user("alice");
    stake(&mut h, alice, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(100);
    assert_eq!(h.p.pending_rewards(d.staked_emitter).unwrap(), 100 * UNIT);
    let claimable = h.p.claimable(d.staked_ledger, alice).unwrap();
    assert_eq!(claimable, 100 * UNIT);

    // Zero elapsed time between pokes changes nothing
    h.p.update_rewards(d.staked_ledger).unwrap();
    h.p.update_rewards(d.staked_ledger).unwrap();
    assert_eq!(h.p.claimable(d.staked_ledger, alice).unwrap(), claimable);

    let claimed = h.p.claim_es_tokens(alice, d.router).unwrap();
    assert_eq!(claimed, 100 * UNIT);
    assert_eq!(balance(&h, d.es_token, alice), 100 * UNIT);
    assert_eq!(h.p.claimable(d.staked_ledger, alice).unwrap(), 0);

    let l = h.p.ledger(&d.staked_ledger).unwrap();
    assert_eq!(l.cumulative_rewards(&alice), 100 * UNIT);
    assert_eq!(l.average_staked_amount(&alice), expand_decimals(1_000, 18));
}

#[test]
fn test_distribution_is_pro_rata() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    stake(&mut h, alice, expand_decimals(3_000, 18));
    stake(&mut h, bob, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(100);
    let a = h.p.claimable(d.staked_ledger, alice).unwrap();
    let b = h.p.claimable(d.staked_ledger, bob).unwrap();
    assert_eq!(a, 75 * UNIT);
    assert_eq!(b, 25 * UNIT);

    // After the pull, settled claimables sum to the distributed amount
    h.p.update_rewards(d.staked_ledger).unwrap();
    let distributed = 100 * UNIT;
    let sum = h.p.claimable(d.staked_ledger, alice).unwrap() + h.p.claimable(d.staked_ledger, bob).unwrap();
    assert!(distributed - sum <= 2);
}

#[test]
fn test_distribute_credits_stakers_in_full() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    stake(&mut h, alice, expand_decimals(3_000, 18));
    stake(&mut h, bob, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(100);
    // Settled claimables only: the emitter has not been pulled yet
    let settled = |h: &Harness, a: Address| {
        h.p.ledger(&d.staked_ledger).unwrap().preview_claimable(&a, 0).unwrap()
    };
    let before = settled(&h, alice) + settled(&h, bob);

    assert!(matches!(
        h.p.distribute(alice, d.staked_emitter),
        Err(ProtocolError::UnauthorizedCaller(_))
    ));
    let distributed = h.p.distribute(d.staked_ledger, d.staked_emitter).unwrap();
    assert_eq!(distributed, 100 * UNIT);
    assert_eq!(balance(&h, d.es_token, d.staked_ledger), 100 * UNIT);

    let after = settled(&h, alice) + settled(&h, bob);
    assert!(distributed - (after - before) <= 2);

    // Nothing is pending any more, and the pulled rewards are claimable
    assert_eq!(h.p.pending_rewards(d.staked_emitter).unwrap(), 0);
    assert_eq!(h.p.claim_es_tokens(alice, d.router).unwrap(), 75 * UNIT);
    assert_eq!(h.p.claim_es_tokens(bob, d.router).unwrap(), 25 * UNIT);
}

#[test]
fn test_bonus_points_full_year_at_100_percent() {
    let mut h = setup();
    let alice = user("alice");
    let amount = expand_decimals(1_000, 18);
    stake(&mut h, alice, amount);
    let d = h.d.clone();

    h.clock.advance(SECONDS_PER_YEAR);
    assert_eq!(h.p.claimable(d.bonus_ledger, alice).unwrap(), amount);

    // Bonus ledger is claim-private: only the router can claim
    assert!(matches!(
        h.p.claim(alice, d.bonus_ledger, alice),
        Err(ProtocolError::ActionNotEnabled(_))
    ));
}

#[test]
fn test_compound_then_unstake_burns_bonus_points() {
    let mut h = setup_with(DeploymentConfig {
        es_tokens_per_second: "0.001".to_string(),
        ..DeploymentConfig::default()
    });
    let alice = user("alice");
    stake(&mut h, alice, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(SECONDS_PER_YEAR);
    let out = h.p.compound(alice, d.router).unwrap();
    assert_eq!(out.es_tokens, expand_decimals(31_536, 18));
    assert_eq!(out.bonus_points, expand_decimals(1_000, 18));

    let staked_before = h.p.ledger(&d.staked_ledger).unwrap().staked_amount(&alice);
    assert_eq!(staked_before, expand_decimals(32_536, 18));
    let fee = h.p.ledger(&d.fee_ledger).unwrap();
    assert_eq!(fee.deposit_balance(&alice, &d.bonus_token), expand_decimals(1_000, 18));
    assert_eq!(fee.deposit_balance(&alice, &d.es_token), 0);

    let bonus_supply = h.p.total_supply(&d.bonus_token).unwrap();
    h.p.unstake_tokens(alice, d.router, expand_decimals(500, 18)).unwrap();

    let reduction = expand_decimals(1_000, 18) * 500 / 32_536;
    assert_eq!(
        h.p.ledger(&d.fee_ledger).unwrap().deposit_balance(&alice, &d.bonus_token),
        expand_decimals(1_000, 18) - reduction
    );
    assert_eq!(h.p.total_supply(&d.bonus_token).unwrap(), bonus_supply - reduction);
    assert_eq!(balance(&h, d.reward_token, alice), expand_decimals(500, 18));
    assert_ledger_conservation(&h.p, d.fee_ledger, &[d.bonus_ledger, d.bonus_token]);
}

#[test]
fn test_handle_rewards_converts_fees_to_native() {
    let mut h = setup();
    let alice = user("alice");
    stake(&mut h, alice, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(100);
    let flags = HandleRewardsFlags {
        claim_fees: true,
        convert_fees_to_native: true,
        ..HandleRewardsFlags::default()
    };
    let out = h.p.handle_rewards(alice, d.router, flags).unwrap();
    // 0.0001 per second for 100 seconds
    assert_eq!(out.fees, 10_000_000_000_000_000);
    assert_eq!(out.es_tokens, 0);
    assert_eq!(balance(&h, d.native_token, alice), out.fees);
    assert_eq!(balance(&h, d.fee_token, alice), 0);
}

#[test]
fn test_handle_rewards_restakes_es_and_bonus() {
    let mut h = setup();
    let alice = user("alice");
    stake(&mut h, alice, expand_decimals(1_000, 18));
    let d = h.d.clone();

    h.clock.advance(1_000);
    let out = h.p.handle_rewards(alice, d.router, HandleRewardsFlags::all()).unwrap();
    assert_eq!(out.es_tokens, 1_000 * UNIT);
    assert!(out.bonus_points > 0);
    let staked = h.p.ledger(&d.staked_ledger).unwrap();
    assert_eq!(staked.deposit_balance(&alice, &d.es_token), out.es_tokens);
    assert_eq!(balance(&h, d.es_token, alice), 0);
}

#[test]
fn test_private_modes_block_direct_calls() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    fund(&mut h, alice, expand_decimals(10, 18));
    let d = h.d.clone();

    assert!(matches!(
        h.p.stake(alice, d.staked_ledger, d.reward_token, UNIT),
        Err(ProtocolError::ActionNotEnabled(_))
    ));

    h.p.stake_tokens(alice, d.router, UNIT).unwrap();
    assert!(matches!(
        h.p.transfer(alice, d.fee_ledger, bob, UNIT),
        Err(ProtocolError::UnauthorizedCaller(_))
    ));
    assert!(matches!(
        h.p.stake_for_account(alice, d.staked_ledger, alice, alice, d.reward_token, UNIT),
        Err(ProtocolError::UnauthorizedCaller(_))
    ));
}

#[test]
fn test_batch_compound_is_bounded_and_gov_only() {
    let mut h = setup();
    let d = h.d.clone();
    let gov = h.gov;
    let accounts: Vec<Address> = ["a", "b", "c"].iter().map(|l| user(l)).collect();
    for a in &accounts {
        stake(&mut h, *a, UNIT);
    }
    h.p.update_router(gov, d.router, |r, caller| r.set_max_batch_size(caller, 2)).unwrap();
    h.clock.advance(10);

    assert!(matches!(
        h.p.batch_compound_for_accounts(gov, d.router, &accounts),
        Err(ProtocolError::InvalidAmount(_))
    ));
    assert!(matches!(
        h.p.batch_compound_for_accounts(accounts[0], d.router, &accounts[..2]),
        Err(ProtocolError::UnauthorizedCaller(_))
    ));
    h.p.batch_compound_for_accounts(gov, d.router, &accounts[..2]).unwrap();
    let staked = h.p.ledger(&d.staked_ledger).unwrap();
    assert!(staked.deposit_balance(&accounts[0], &d.es_token) > 0);
    assert!(staked.deposit_balance(&accounts[1], &d.es_token) > 0);
    assert_eq!(staked.deposit_balance(&accounts[2], &d.es_token), 0);
}

#[test]
fn test_failed_router_call_leaves_no_trace() {
    let mut h = setup();
    let alice = user("alice");
    let d = h.d.clone();
    let gov = h.gov;
    fund(&mut h, alice, expand_decimals(100, 18));

    // The last hop of the chain rejects the bonus-ledger shares
    h.p.update_ledger(gov, d.fee_ledger, |l, caller| l.set_deposit_token(caller, d.bonus_ledger, false))
        .unwrap();
    let events = h.p.events().len();

    let err = h.p.stake_tokens(alice, d.router, expand_decimals(100, 18)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidDepositToken(_)));
    assert_eq!(balance(&h, d.reward_token, alice), expand_decimals(100, 18));
    assert_eq!(h.p.ledger(&d.staked_ledger).unwrap().staked_amount(&alice), 0);
    assert_eq!(h.p.ledger(&d.bonus_ledger).unwrap().staked_amount(&alice), 0);
    assert_eq!(h.p.events().len(), events);
}

// ---------------------------------------------------------------------------
// Vesting
// ---------------------------------------------------------------------------

/// Stake 1000, earn 1000 es over 1000 seconds and claim them.
fn earn_es(h: &mut Harness, account: Address) {
    stake(h, account, expand_decimals(1_000, 18));
    h.clock.advance(1_000);
    let claimed = h.p.claim_es_tokens(account, h.d.router).unwrap();
    assert_eq!(claimed, expand_decimals(1_000, 18));
}

#[test]
fn test_vest_full_duration_releases_deposit() {
    let mut h = setup();
    let alice = user("alice");
    earn_es(&mut h, alice);
    let d = h.d.clone();
    let amount = expand_decimals(1_000, 18);

    assert_eq!(h.p.get_max_vestable_amount(d.vault, alice).unwrap(), amount);
    assert_eq!(h.p.get_pair_amount(d.vault, alice, amount).unwrap(), amount);

    h.p.deposit(alice, d.vault, amount).unwrap();
    let pos = h.p.vesting_position(d.vault, alice).unwrap();
    assert_eq!(pos.deposited_balance, amount);
    assert_eq!(pos.pair_amount, amount);
    assert_eq!(balance(&h, d.fee_ledger, alice), 0);
    assert_eq!(h.p.remaining_vestable_amount(d.vault, alice).unwrap(), 0);

    // Fee-ledger shares are locked, so the stake cannot be unwound
    assert!(matches!(
        h.p.unstake_tokens(alice, d.router, UNIT),
        Err(ProtocolError::InsufficientBalance(_))
    ));

    h.clock.advance(DAY);
    let day = h.p.claimable(d.vault, alice).unwrap();
    assert!(day > 2_730_000_000_000_000_000 && day < 2_750_000_000_000_000_000);

    h.clock.advance(SECONDS_PER_YEAR - DAY);
    let es_supply = h.p.total_supply(&d.es_token).unwrap();
    let paid = h.p.claim_vested(alice, d.vault, alice).unwrap();
    assert_eq!(paid, amount);
    assert_eq!(balance(&h, d.reward_token, alice), amount);
    assert_eq!(h.p.total_supply(&d.es_token).unwrap(), es_supply - amount);

    let pos = h.p.vesting_position(d.vault, alice).unwrap();
    assert_eq!(pos.deposited_balance, 0);
    assert_eq!(pos.pair_amount, 0);
    assert_eq!(pos.claimed_amount, amount);
    assert_eq!(balance(&h, d.fee_ledger, alice), amount);
}

#[test]
fn test_vest_rejects_beyond_max_vestable() {
    let mut h = setup();
    let alice = user("alice");
    earn_es(&mut h, alice);
    let d = h.d.clone();
    let gov = h.gov;

    h.p.mint(gov, d.es_token, alice, UNIT).unwrap();
    let err = h.p
        .deposit(alice, d.vault, expand_decimals(1_000, 18) + UNIT)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::MaxVestableAmountExceeded(_)));
    assert_eq!(balance(&h, d.es_token, alice), expand_decimals(1_000, 18) + UNIT);

    // Bonus rewards raise the cap and lower the pair ratio
    h.p.update_vault(gov, d.vault, |v, caller| v.set_handler(caller, gov, true)).unwrap();
    h.p.update_vault(gov, d.vault, |v, caller| v.set_bonus_rewards(caller, alice, expand_decimals(1_000, 18)))
        .unwrap();
    assert_eq!(
        h.p.get_max_vestable_amount(d.vault, alice).unwrap(),
        expand_decimals(2_000, 18)
    );
    h.p.deposit(alice, d.vault, expand_decimals(1_000, 18) + UNIT).unwrap();
    let pos = h.p.vesting_position(d.vault, alice).unwrap();
    assert_eq!(pos.pair_amount, (expand_decimals(1_000, 18) + UNIT) / 2);
}

#[test]
fn test_withdraw_returns_balance_and_keeps_bonus() {
    let mut h = setup();
    let alice = user("alice");
    earn_es(&mut h, alice);
    let d = h.d.clone();
    let gov = h.gov;
    h.p.update_vault(gov, d.vault, |v, caller| v.set_handler(caller, gov, true)).unwrap();
    h.p.update_vault(gov, d.vault, |v, caller| v.set_bonus_rewards(caller, alice, 5 * UNIT)).unwrap();

    let amount = expand_decimals(1_000, 18);
    h.p.deposit(alice, d.vault, amount).unwrap();
    h.clock.advance(SECONDS_PER_YEAR / 2);
    h.p.withdraw(alice, d.vault).unwrap();

    // Half released and paid, half returned as es
    assert_eq!(balance(&h, d.reward_token, alice), amount / 2);
    assert_eq!(balance(&h, d.es_token, alice), amount / 2);
    assert_eq!(balance(&h, d.fee_ledger, alice), amount);

    let pos = h.p.vesting_position(d.vault, alice).unwrap();
    assert_eq!(pos.deposited_balance, 0);
    assert_eq!(pos.last_vesting_time, 0);
    assert_eq!(pos.total_vested(), 0);
    assert_eq!(pos.bonus_rewards, 5 * UNIT);

    assert!(matches!(
        h.p.withdraw(alice, d.vault),
        Err(ProtocolError::InvalidAmount(_))
    ));
}

// ---------------------------------------------------------------------------
// Position transfer
// ---------------------------------------------------------------------------

#[test]
fn test_transfer_moves_vesting_cap_to_fresh_receiver() {
    let mut h = setup();
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
    earn_es(&mut h, alice);
    let d = h.d.clone();

    // Stake must be fully unwound first
    assert!(matches!(
        h.p.signal_transfer(alice, d.router, bob),
        Err(ProtocolError::ActionNotEnabled(_))
    ));
    h.p.unstake_tokens(alice, d.router, expand_decimals(1_000, 18)).unwrap();

    let max_before = h.p.get_max_vestable_amount(d.vault, alice).unwrap();
    let average_before = h.p.get_combined_average_staked_amount(d.vault, alice).unwrap();
    assert_eq!(max_before, expand_decimals(1_000, 18));

    h.p.signal_transfer(alice, d.router, carol).unwrap();
    // Re-signalling overwrites the pending receiver
    h.p.signal_transfer(alice, d.router, bob).unwrap();
    assert!(matches!(
        h.p.accept_transfer(carol, d.router, alice),
        Err(ProtocolError::TransferNotSignalled(_))
    ));
    h.p.accept_transfer(bob, d.router, alice).unwrap();

    assert_eq!(h.p.get_max_vestable_amount(d.vault, bob).unwrap(), max_before);
    assert_eq!(h.p.get_max_vestable_amount(d.vault, alice).unwrap(), 0);
    assert_eq!(
        h.p.get_combined_average_staked_amount(d.vault, bob).unwrap(),
        average_before
    );
    assert_eq!(balance(&h, d.es_token, bob), expand_decimals(1_000, 18));
    assert_eq!(balance(&h, d.es_token, alice), 0);

    // The same signal cannot be accepted twice
    assert!(matches!(
        h.p.accept_transfer(bob, d.router, alice),
        Err(ProtocolError::TransferNotSignalled(_))
    ));

    // Bob now carries transferred history and is no longer a valid receiver
    assert!(matches!(
        h.p.signal_transfer(carol, d.router, bob),
        Err(ProtocolError::InvalidReceiver(_))
    ));

    // Alice staking again blocks a new signal
    stake(&mut h, alice, UNIT);
    assert!(matches!(
        h.p.signal_transfer(alice, d.router, carol),
        Err(ProtocolError::ActionNotEnabled(_))
    ));
}

#[test]
fn test_transfer_carries_claim_history_with_rewards() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    earn_es(&mut h, alice);
    let d = h.d.clone();
    let gov = h.gov;

    // Vest half of the escrow to completion before moving anything
    h.p.deposit(alice, d.vault, expand_decimals(500, 18)).unwrap();
    h.clock.advance(SECONDS_PER_YEAR);
    assert_eq!(h.p.claim_vested(alice, d.vault, alice).unwrap(), expand_decimals(500, 18));
    h.p.unstake_tokens(alice, d.router, expand_decimals(1_000, 18)).unwrap();

    let max_a = h.p.get_max_vestable_amount(d.vault, alice).unwrap();
    let remaining_a = h.p.remaining_vestable_amount(d.vault, alice).unwrap();
    // The emitter's 50000 funding is fully paid out to the only staker
    assert_eq!(max_a, expand_decimals(50_000, 18));
    assert_eq!(remaining_a, expand_decimals(49_500, 18));

    h.p.signal_transfer(alice, d.router, bob).unwrap();
    h.p.accept_transfer(bob, d.router, alice).unwrap();

    assert_eq!(h.p.get_max_vestable_amount(d.vault, bob).unwrap(), max_a);
    assert_eq!(h.p.remaining_vestable_amount(d.vault, bob).unwrap(), remaining_a);
    assert_eq!(h.p.get_total_vested(d.vault, bob).unwrap(), expand_decimals(500, 18));
    assert_eq!(h.p.remaining_vestable_amount(d.vault, alice).unwrap(), 0);
    assert_eq!(h.p.get_total_vested(d.vault, alice).unwrap(), 0);
    assert_eq!(h.p.claimable(d.vault, bob).unwrap(), 0);

    // Bob cannot vest the half alice already vested
    assert_eq!(balance(&h, d.es_token, bob), remaining_a);
    h.p.mint(gov, d.es_token, bob, UNIT).unwrap();
    assert!(matches!(
        h.p.deposit(bob, d.vault, remaining_a + UNIT),
        Err(ProtocolError::MaxVestableAmountExceeded(_))
    ));
}

/// Register an unpaired vault on the staked ledger, able to burn escrow and
/// funded with base tokens to pay out.
fn add_unpaired_vault(h: &mut Harness) -> Address {
    let d = h.d.clone();
    let gov = h.gov;
    let vault = Address::from_label("vUNIP/solo");
    h.p.add_vault(VestingVault::new(
        vault,
        "vUNIP-solo",
        gov,
        VaultConfig {
            vesting_duration: SECONDS_PER_YEAR,
            es_token: d.es_token,
            claimable_token: d.reward_token,
            reward_ledger: Some(d.staked_ledger),
            pair_token: None,
            has_max_vestable_amount: true,
        },
    ))
    .unwrap();
    h.p.update_token(gov, d.es_token, |t, caller| {
        t.set_handler(caller, vault, true)?;
        t.set_minter(caller, vault, true)
    })
    .unwrap();
    h.p.mint(gov, d.reward_token, vault, expand_decimals(10_000, 18)).unwrap();
    vault
}

#[test]
fn test_transfer_moves_position_while_vesting() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    earn_es(&mut h, alice);
    let d = h.d.clone();
    let vault = add_unpaired_vault(&mut h);
    let amount = expand_decimals(1_000, 18);
    let year = SECONDS_PER_YEAR as u128;

    h.p.deposit(alice, vault, amount).unwrap();
    h.clock.advance(SECONDS_PER_YEAR / 4);
    // Nothing is paired, so the stake can be fully unwound mid-vest
    h.p.unstake_tokens(alice, d.router, amount).unwrap();
    h.p.signal_vault_transfer(alice, vault, bob).unwrap();

    h.clock.advance(100);
    h.p.accept_vault_transfer(bob, vault, alice).unwrap();
    let accepted_at = h.clock.now();

    // Alice is paid what vested up to the accept and keeps nothing else
    let released = amount * (year / 4 + 100) / year;
    assert_eq!(balance(&h, d.reward_token, alice), amount + released);
    let source = h.p.vesting_position(vault, alice).unwrap();
    assert_eq!(source.deposited_balance, 0);
    assert_eq!(source.total_vested(), 0);
    assert_eq!(source.last_vesting_time, 0);

    let remaining = amount - released;
    let dest = h.p.vesting_position(vault, bob).unwrap();
    assert_eq!(dest.deposited_balance, remaining);
    assert_eq!(dest.cumulative_claim_amount, released);
    assert_eq!(dest.last_vesting_time, accepted_at);
    assert_eq!(h.p.claimable(vault, bob).unwrap(), 0);

    // Release restarts linearly on bob's side over a full duration
    h.clock.advance(SECONDS_PER_YEAR / 2);
    assert_eq!(h.p.claimable(vault, bob).unwrap(), remaining / 2);
    h.clock.advance(SECONDS_PER_YEAR / 2);
    assert_eq!(h.p.claim_vested(bob, vault, bob).unwrap(), remaining);
    assert_eq!(balance(&h, d.reward_token, bob), remaining);
    assert_eq!(h.p.vesting_position(vault, bob).unwrap().deposited_balance, 0);
}

#[test]
fn test_transfer_rejects_receiver_with_history() {
    let mut h = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    earn_es(&mut h, alice);
    let d = h.d.clone();
    h.p.unstake_tokens(alice, d.router, expand_decimals(1_000, 18)).unwrap();

    // Bob earns a little and so carries reward history
    stake(&mut h, bob, UNIT);
    h.clock.advance(10);
    assert!(h.p.claim_es_tokens(bob, d.router).unwrap() > 0);

    assert!(matches!(
        h.p.signal_transfer(alice, d.router, bob),
        Err(ProtocolError::InvalidReceiver(_))
    ));
    assert!(matches!(
        h.p.signal_transfer(alice, d.router, alice),
        Err(ProtocolError::InvalidReceiver(_))
    ));
}
