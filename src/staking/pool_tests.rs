//! Staking Pool Tests
//!
//! End-to-end flows through the facade: reports, commits, deposits,
//! withdrawals, liquidity arrival and admin configuration.

use crate::staking::clock::ManualClock;
use crate::staking::config::StakingConfig;
use crate::staking::errors::StakingError;
use crate::staking::events::ProtocolEvent;
use crate::staking::ledger::{InMemoryPool, InMemoryReceiptToken, PoolLedger, ReceiptToken};
use crate::staking::oracle_consensus::SaveOutcome;
use crate::staking::pool::StakingPool;
use crate::staking::snapshot_rate::CommissionOutcome;
use crate::staking::types::{Identity, SCALE};

type TestPool = StakingPool<InMemoryPool, InMemoryReceiptToken, ManualClock>;

fn id(label: &str) -> Identity {
    Identity::from_label(label)
}

/// Short epochs and a 20% deviation band, wide enough for the round-number
/// yields below.
fn test_config() -> StakingConfig {
    StakingConfig {
        zero_epoch_timestamp: 0,
        epoch_duration: 10,
        epoch_update_period: 50,
        max_rate_deviation: 20_000,
        ..StakingConfig::default()
    }
}

fn make_pool(config: StakingConfig) -> (TestPool, ManualClock) {
    let clock = ManualClock::new(1_000);
    let pool = StakingPool::new(
        &config,
        InMemoryPool::new(0),
        InMemoryReceiptToken::new(),
        clock.clone(),
    )
    .expect("valid pool config");
    (pool, clock)
}

/// Two of three oracles agree on `balance` for the current epoch.
fn finalize_now(pool: &mut TestPool, clock: &ManualClock, balance: u128) {
    let epoch = clock_epoch(clock);
    pool.report(&id("oracle-a"), epoch, balance).unwrap();
    let outcome = pool.report(&id("oracle-b"), epoch, balance).unwrap();
    assert!(matches!(outcome, SaveOutcome::Finalized(_)));
}

fn clock_epoch(clock: &ManualClock) -> u64 {
    use crate::staking::clock::Clock;
    clock.now() / 10
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_deposit_before_any_commit_is_at_par() {
    let (mut pool, _clock) = make_pool(test_config());
    let alice = id("alice");

    assert_eq!(pool.rate(), SCALE);
    assert_eq!(pool.deposit(&alice, 1_000).unwrap(), 1_000);
    assert_eq!(pool.token().balance_of(&alice), 1_000);
    assert_eq!(pool.pool_ledger().balance(), 1_000);

    let events = pool.drain_events();
    assert_eq!(
        events,
        vec![ProtocolEvent::Deposited {
            account: alice,
            amount: 1_000,
            receipts: 1_000
        }]
    );
    assert!(pool.drain_events().is_empty());
}

#[test]
fn test_yield_is_reflected_in_rate_and_withdrawals() {
    let (mut pool, clock) = make_pool(test_config());
    let alice = id("alice");

    pool.deposit(&alice, 1_000).unwrap();
    finalize_now(&mut pool, &clock, 0);
    let first = pool.commit().unwrap();
    assert_eq!((first.total_value, first.total_receipts), (1_000, 1_000));

    clock.advance_to(1_100);
    finalize_now(&mut pool, &clock, 100);
    let second = pool.commit().unwrap();
    assert_eq!(second.total_value, 1_100);
    assert_eq!(pool.rate(), 1_100_000_000_000_000_000);
    assert_eq!(pool.rate_at(1_200), 1_200_000_000_000_000_000);

    let queued = pool.request_withdrawal(&alice, 500).unwrap();
    assert_eq!(queued, 550);
    assert_eq!(pool.token().live_supply(), 500);
    assert_eq!(pool.rate(), 1_100_000_000_000_000_000);
    assert!(pool.queue().settle_index_of(&alice) > 0);

    assert_eq!(pool.claim(&alice).unwrap(), 550);
    assert_eq!(pool.pool_ledger().paid_to(&alice), 550);
    assert_eq!(pool.pool_ledger().balance(), 450);
    assert!(pool.queue().is_empty());

    // Staking keeps earning 100 per 100 seconds; the next commit sees the
    // reduced pool and supply together and lands on the line.
    clock.advance_to(1_200);
    finalize_now(&mut pool, &clock, 200);
    let third = pool.commit().unwrap();
    assert_eq!((third.total_value, third.total_receipts), (650, 500));
    assert_eq!(pool.rate(), 1_300_000_000_000_000_000);
    // The withdrawal is not part of the slope.
    assert_eq!(pool.rate_at(1_300), 1_500_000_000_000_000_000);
}

#[test]
fn test_sequential_withdrawals_share_pool_value() {
    let (mut pool, clock) = make_pool(test_config());
    let alice = id("alice");
    let bob = id("bob");

    pool.deposit(&alice, 500).unwrap();
    pool.deposit(&bob, 500).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();

    assert_eq!(pool.request_withdrawal(&alice, 500).unwrap(), 500);
    assert_eq!(pool.rate(), SCALE);
    assert_eq!(pool.request_withdrawal(&bob, 500).unwrap(), 500);
    assert_eq!(pool.queue().pending_withdrawal_sum(), 1_000);
    assert_eq!(pool.pool_ledger().balance(), 1_000);

    assert_eq!(pool.claim(&alice).unwrap(), 500);
    assert_eq!(pool.claim(&bob).unwrap(), 500);
    assert_eq!(pool.pool_ledger().balance(), 0);
    assert_eq!(pool.state().pending_flows.outflow, 1_000);
}

#[test]
fn test_flows_pass_the_default_deviation_check() {
    let config = StakingConfig {
        zero_epoch_timestamp: 0,
        epoch_duration: 10,
        epoch_update_period: 50,
        ..StakingConfig::default()
    };
    assert!(config.rate_deviation_check);
    assert_eq!(config.max_rate_deviation, 500);
    let (mut pool, clock) = make_pool(config);
    let alice = id("alice");
    let bob = id("bob");

    pool.deposit(&alice, 100_000).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();
    clock.advance_to(1_100);
    finalize_now(&mut pool, &clock, 400);
    pool.commit().unwrap();
    assert_eq!(pool.rate(), 1_004_000_000_000_000_000);

    // Bob doubles the pool; the rate does not move.
    assert_eq!(pool.deposit(&bob, 100_400).unwrap(), 100_000);
    assert_eq!(pool.rate(), 1_004_000_000_000_000_000);

    clock.advance_to(1_200);
    finalize_now(&mut pool, &clock, 800);
    let snapshot = pool.commit().expect("deposit does not trip the check");
    assert_eq!(snapshot.total_value, 201_200);
    assert_eq!(pool.rate(), 1_006_000_000_000_000_000);
    assert_eq!(pool.rate_at(1_300), 1_008_000_000_000_000_000);

    // Half the pool exits; the following commit still passes.
    assert_eq!(pool.request_withdrawal(&alice, 50_000).unwrap(), 50_300);
    clock.advance_to(1_300);
    finalize_now(&mut pool, &clock, 1_200);
    let snapshot = pool.commit().expect("withdrawal does not trip the check");
    assert_eq!(snapshot.total_value, 151_300);
    assert_eq!(snapshot.total_receipts, 150_000);
}

#[test]
fn test_withdrawal_waits_for_liquidity() {
    let (mut pool, clock) = make_pool(test_config());
    let alice = id("alice");

    pool.deposit(&alice, 100).unwrap();
    finalize_now(&mut pool, &clock, 100);
    pool.commit().unwrap();
    assert_eq!(pool.rate(), 2 * SCALE);

    assert_eq!(pool.request_withdrawal(&alice, 100).unwrap(), 200);
    assert_eq!(
        pool.claim(&alice).unwrap_err(),
        StakingError::InsufficientLiquidityOrQueueDepth { account: alice }
    );

    let partial = pool.fund(50).unwrap();
    assert_eq!(partial.newly_covered, 0);
    assert!(pool.claim(&alice).is_err());

    let full = pool.fund(50).unwrap();
    assert_eq!(full.newly_covered, 1);
    assert_eq!(pool.claim(&alice).unwrap(), 200);
    assert_eq!(pool.pool_ledger().balance(), 0);
    assert_eq!(pool.fund(0).unwrap_err(), StakingError::ZeroAmount);
}

#[test]
fn test_commit_harvests_and_advances_queue() {
    let (mut pool, clock) = make_pool(test_config());
    let alice = id("alice");
    let bob = id("bob");

    pool.deposit(&alice, 100).unwrap();
    finalize_now(&mut pool, &clock, 100);
    pool.commit().unwrap();

    pool.request_withdrawal(&alice, 100).unwrap();
    assert_eq!(pool.deposit(&bob, 95).unwrap(), 47);
    assert_eq!(pool.queue().settle_index_of(&alice), 0);

    pool.pool_ledger_mut().accrue_external_yield(5);
    clock.advance_to(1_100);
    finalize_now(&mut pool, &clock, 100);
    pool.drain_events();

    let snapshot = pool.commit().unwrap();
    // 195 held + 5 harvested + 100 staked - 200 owed to the queue.
    assert_eq!(snapshot.total_value, 100);
    assert_eq!(pool.pool_ledger().balance(), 200);
    assert_eq!(pool.pool_ledger().pending_harvest(), 0);
    assert!(pool.queue().settle_index_of(&alice) > 0);

    let kinds: Vec<&str> = pool.drain_events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["committed", "queue_advanced"]);
}

// =============================================================================
// REJECTIONS
// =============================================================================

#[test]
fn test_commit_requires_finalized_report() {
    let (mut pool, _clock) = make_pool(test_config());
    pool.deposit(&id("alice"), 10).unwrap();
    assert_eq!(pool.commit().unwrap_err(), StakingError::NotInitialized);
    assert!(pool.engine().ordered().is_none());
}

#[test]
fn test_commit_same_report_twice_is_rejected() {
    let (mut pool, clock) = make_pool(test_config());
    pool.deposit(&id("alice"), 10).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();

    clock.advance_by(5);
    assert_eq!(
        pool.commit().unwrap_err(),
        StakingError::TimestampsTooClose {
            candidate: 1_000,
            newest: 1_000
        }
    );
}

#[test]
fn test_rejected_commit_keeps_harvest_pending() {
    let config = StakingConfig {
        max_rate_deviation: 500,
        ..test_config()
    };
    let (mut pool, clock) = make_pool(config);
    let alice = id("alice");
    let admin = id("admin");

    pool.deposit(&alice, 1_000).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();

    pool.pool_ledger_mut().accrue_external_yield(500);
    clock.advance_to(1_100);
    finalize_now(&mut pool, &clock, 0);

    let err = pool.commit().unwrap_err();
    assert!(matches!(err, StakingError::RateDeviationTooBig { .. }));
    assert_eq!(pool.pool_ledger().pending_harvest(), 500);
    assert_eq!(pool.pool_ledger().balance(), 1_000);
    assert_eq!(pool.engine().newer().map(|s| s.timestamp), Some(1_000));

    pool.set_rate_deviation_check(&admin, false).unwrap();
    let snapshot = pool.commit().unwrap();
    assert_eq!(snapshot.total_value, 1_500);
    assert_eq!(pool.pool_ledger().balance(), 1_500);
}

#[test]
fn test_withdrawal_request_rejections_leave_balances() {
    let (mut pool, _clock) = make_pool(test_config());
    let alice = id("alice");
    pool.deposit(&alice, 100).unwrap();

    assert_eq!(
        pool.request_withdrawal(&alice, 0).unwrap_err(),
        StakingError::ZeroAmount
    );
    assert!(matches!(
        pool.request_withdrawal(&alice, 101),
        Err(StakingError::InsufficientReceipts { balance: 100, .. })
    ));
    assert!(pool.queue().is_empty());

    // Keep the first request uncovered so it stays pending.
    pool.pool_ledger_mut().pay_out(&id("validator"), 100).unwrap();
    pool.request_withdrawal(&alice, 40).unwrap();
    assert_eq!(
        pool.request_withdrawal(&alice, 10).unwrap_err(),
        StakingError::AlreadyPending { account: alice }
    );
    assert_eq!(pool.token().balance_of(&alice), 60);
    assert_eq!(pool.queue().pending_withdrawal_sum(), 40);
}

#[test]
fn test_unauthorized_reporter_and_zero_deposit() {
    let (mut pool, _clock) = make_pool(test_config());
    let mallory = id("mallory");

    assert_eq!(
        pool.report(&mallory, 100, 1).unwrap_err(),
        StakingError::Unauthorized { caller: mallory }
    );
    assert_eq!(
        pool.deposit(&mallory, 0).unwrap_err(),
        StakingError::ZeroAmount
    );
    assert!(pool.drain_events().is_empty());
}

// =============================================================================
// COMMISSION & ADMINISTRATION
// =============================================================================

#[test]
fn test_commission_goes_to_current_treasury() {
    let (mut pool, clock) = make_pool(test_config());
    let alice = id("alice");
    let admin = id("admin");
    let vault = id("new-treasury");

    pool.deposit(&alice, 1_000).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();
    clock.advance_to(1_100);
    finalize_now(&mut pool, &clock, 100);
    pool.commit().unwrap();

    assert!(pool.set_treasury(&alice, vault).is_err());
    pool.set_treasury(&admin, vault).unwrap();

    let outcome = pool.extract_commission().unwrap();
    assert_eq!(outcome, CommissionOutcome { amount: 10, shares: 9 });
    assert_eq!(pool.token().balance_of(&vault), 9);
    assert_eq!(pool.token().balance_of(&id("treasury")), 0);
    assert_eq!(pool.extract_commission().unwrap(), CommissionOutcome::default());

    let events = pool.drain_events();
    assert!(events.contains(&ProtocolEvent::ParameterChanged {
        name: "treasury".to_string(),
        value: vault.to_string(),
    }));
}

#[test]
fn test_admin_capability_transfer() {
    let (mut pool, _clock) = make_pool(test_config());
    let admin = id("admin");
    let bob = id("bob");

    assert_eq!(
        pool.set_strict_mode(&bob, true).unwrap_err(),
        StakingError::Unauthorized { caller: bob }
    );
    pool.transfer_admin(&admin, bob).unwrap();
    assert_eq!(pool.authority().admin(), &bob);

    assert!(pool.set_loop_limit(&admin, 10).is_err());
    pool.set_loop_limit(&bob, 10).unwrap();
    assert_eq!(pool.queue().loop_limit(), 10);

    pool.set_strict_mode(&bob, true).unwrap();
    assert!(pool.consensus().strict_mode());
    assert!(pool.set_epoch_update_period(&bob, 55).is_err());
    pool.set_commission_rate(&bob, 5_000).unwrap();
    assert_eq!(pool.engine().commission_rate(), 5_000);
    pool.set_max_rate_deviation(&bob, 1_000).unwrap();
    assert_eq!(pool.engine().max_rate_deviation(), 1_000);

    let d = id("oracle-d");
    pool.set_oracle(&bob, 2, d).unwrap();
    assert_eq!(pool.consensus().seat_of(&d), Some(2));

    let events = pool.drain_events();
    assert_eq!(
        events.first(),
        Some(&ProtocolEvent::AdminTransferred { from: admin, to: bob })
    );
    assert!(events.contains(&ProtocolEvent::OracleSet { seat: 2, identity: d }));
}

#[test]
fn test_state_serializes() {
    let (mut pool, clock) = make_pool(test_config());
    pool.deposit(&id("alice"), 1_000).unwrap();
    finalize_now(&mut pool, &clock, 0);
    pool.commit().unwrap();

    let state = pool.state();
    assert_eq!(state.now, 1_000);
    assert_eq!(state.rate, SCALE);
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.finalized.map(|f| f.epoch), Some(100));

    let json = serde_json::to_string(&state).expect("state serializes");
    assert!(json.contains("\"live_supply\":1000"));
}
