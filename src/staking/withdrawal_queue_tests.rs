//! Withdrawal Queue Tests
//!
//! FIFO claim ordering, bounded advance work, convergence of incremental
//! liquidity arrival, and structural invariants under random operation
//! sequences.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use crate::staking::access::Authority;
use crate::staking::errors::StakingError;
use crate::staking::events::ProtocolEvent;
use crate::staking::types::{Amount, Identity};
use crate::staking::withdrawal_queue::{AdvanceOutcome, WithdrawalQueue};

fn account(i: usize) -> Identity {
    Identity::from_label(&format!("account-{}", i))
}

fn queue_with(amounts: &[Amount], loop_limit: u32) -> WithdrawalQueue {
    let mut queue = WithdrawalQueue::new(loop_limit).expect("valid loop limit");
    let mut events = Vec::new();
    for (i, &amount) in amounts.iter().enumerate() {
        queue
            .enqueue(&account(i), amount, &mut events)
            .expect("enqueue accepted");
    }
    queue
}

/// Advance until a call makes no further progress.
fn advance_to_fixpoint(queue: &mut WithdrawalQueue, liquidity: Amount) {
    let mut events: Vec<ProtocolEvent> = Vec::new();
    loop {
        let outcome = queue.advance(liquidity, &mut events);
        if outcome.newly_covered == 0 {
            break;
        }
    }
}

// =============================================================================
// FIFO
// =============================================================================

#[test]
fn test_staged_liquidity_covers_prefix() {
    let mut queue = queue_with(&[8, 8, 16], 50);
    let mut events = Vec::new();

    queue.advance(8, &mut events);
    assert_eq!(queue.settle_index_of(&account(0)), 1);
    assert_eq!(queue.settle_index_of(&account(1)), 0);
    assert_eq!(queue.settle_index_of(&account(2)), 0);

    queue.advance(16, &mut events);
    assert_eq!(queue.settle_index_of(&account(0)), 1);
    assert_eq!(queue.settle_index_of(&account(1)), 2);
    assert_eq!(queue.settle_index_of(&account(2)), 0);

    let outcome = queue.advance(32, &mut events);
    assert_eq!(
        outcome,
        AdvanceOutcome {
            visited: 1,
            newly_covered: 1,
            covered_total: 32
        }
    );
    assert_eq!(queue.settle_index_of(&account(2)), 3);
    queue.verify_invariants().unwrap();
}

#[test]
fn test_claims_succeed_only_in_fifo_order() {
    let mut queue = queue_with(&[8, 8, 16], 50);
    let mut events = Vec::new();
    queue.advance(32, &mut events);

    for later in [account(2), account(1)] {
        assert_eq!(
            queue.claim(&later, &mut events).unwrap_err(),
            StakingError::InsufficientLiquidityOrQueueDepth { account: later }
        );
    }

    assert_eq!(queue.claim(&account(0), &mut events).unwrap(), 8);
    assert_eq!(
        queue.claim(&account(2), &mut events).unwrap_err(),
        StakingError::InsufficientLiquidityOrQueueDepth { account: account(2) }
    );
    assert_eq!(queue.claim(&account(1), &mut events).unwrap(), 8);
    assert_eq!(queue.claim(&account(2), &mut events).unwrap(), 16);

    assert!(queue.is_empty());
    assert_eq!(queue.head(), None);
    assert_eq!(queue.tail(), None);
    assert_eq!(queue.pending_withdrawal_sum(), 0);
    assert_eq!(queue.covered_sum(), 0);

    // Each withdrawal pays out exactly once.
    assert_eq!(
        queue.claim(&account(0), &mut events).unwrap_err(),
        StakingError::NoPendingWithdrawal { account: account(0) }
    );
    let claimed: Vec<Amount> = events
        .iter()
        .filter_map(|e| match e {
            ProtocolEvent::Claimed { amount, .. } => Some(*amount),
            _ => None,
        })
        .collect();
    assert_eq!(claimed, vec![8, 8, 16]);
}

#[test]
fn test_settle_index_renumbers_after_claim() {
    let mut queue = queue_with(&[8, 8, 8, 8], 50);
    let mut events = Vec::new();
    queue.advance(16, &mut events);
    assert_eq!(queue.claim(&account(0), &mut events).unwrap(), 8);
    assert_eq!(queue.settle_index_of(&account(1)), 1);

    queue.advance(32, &mut events);
    let ranks: Vec<u32> = queue.entries().iter().map(|e| e.settle_index).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(queue.covered_count(), 3);
    queue.verify_invariants().unwrap();

    queue.claim(&account(1), &mut events).unwrap();
    let ranks: Vec<u32> = queue.entries().iter().map(|e| e.settle_index).collect();
    assert_eq!(ranks, vec![1, 2]);
    queue.verify_invariants().unwrap();
}

#[test]
fn test_uncovered_head_cannot_claim() {
    let mut queue = queue_with(&[10], 50);
    let mut events = Vec::new();

    assert_eq!(
        queue.claimable(&account(0)).unwrap_err(),
        StakingError::InsufficientLiquidityOrQueueDepth { account: account(0) }
    );
    queue.advance(9, &mut events);
    assert!(queue.claim(&account(0), &mut events).is_err());
    queue.advance(10, &mut events);
    assert_eq!(queue.claimable(&account(0)).unwrap(), 10);
}

#[test]
fn test_enqueue_rejects_duplicates_and_zero() {
    let mut queue = queue_with(&[5], 50);
    let mut events = Vec::new();

    assert_eq!(
        queue.enqueue(&account(0), 7, &mut events).unwrap_err(),
        StakingError::AlreadyPending { account: account(0) }
    );
    // Duplicate check comes first.
    assert!(matches!(
        queue.enqueue(&account(0), 0, &mut events),
        Err(StakingError::AlreadyPending { .. })
    ));
    assert_eq!(
        queue.enqueue(&account(1), 0, &mut events).unwrap_err(),
        StakingError::ZeroAmount
    );
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending_withdrawal_sum(), 5);
    assert!(events.is_empty());

    // After claiming, the account may queue again.
    queue.advance(5, &mut events);
    queue.claim(&account(0), &mut events).unwrap();
    queue.enqueue(&account(0), 3, &mut events).unwrap();
    assert_eq!(queue.pending_amount(&account(0)), Some(3));
    assert_eq!(queue.settle_index_of(&account(0)), 0);
}

// =============================================================================
// BOUNDED WORK
// =============================================================================

#[test]
fn test_advance_visits_at_most_loop_limit_nodes() {
    let amounts = vec![1; 23];
    let mut queue = queue_with(&amounts, 5);
    let mut events = Vec::new();

    let mut visits = Vec::new();
    loop {
        let outcome = queue.advance(1_000, &mut events);
        assert!(outcome.visited <= queue.loop_limit());
        if outcome.newly_covered == 0 {
            break;
        }
        visits.push(outcome.visited);
    }

    assert_eq!(visits, vec![5, 5, 5, 5, 3]);
    assert_eq!(queue.covered_sum(), 23);
    assert!(queue.entries().iter().all(|e| e.settle_index > 0));
    queue.verify_invariants().unwrap();
}

#[test]
fn test_advance_counts_the_node_that_does_not_fit() {
    let mut queue = queue_with(&[5, 10], 50);
    let mut events = Vec::new();

    let outcome = queue.advance(7, &mut events);
    assert_eq!(
        outcome,
        AdvanceOutcome {
            visited: 2,
            newly_covered: 1,
            covered_total: 5
        }
    );

    // No progress means no event.
    let before = events.len();
    let idle = queue.advance(7, &mut events);
    assert_eq!(idle.newly_covered, 0);
    assert_eq!(events.len(), before);
}

#[test]
fn test_loop_limit_must_be_positive() {
    assert!(matches!(
        WithdrawalQueue::new(0),
        Err(StakingError::InvalidParameter {
            name: "loop_limit",
            ..
        })
    ));

    let admin = Identity::from_label("admin");
    let authority = Authority::new(admin);
    let grant = authority.authorize(&admin).unwrap();
    let mut queue = queue_with(&[1, 1, 1], 1);
    let mut events = Vec::new();

    assert!(queue.set_loop_limit(&grant, 0, &mut events).is_err());
    queue.set_loop_limit(&grant, 3, &mut events).unwrap();
    assert_eq!(queue.advance(3, &mut events).newly_covered, 3);
}

// =============================================================================
// CONVERGENCE
// =============================================================================

#[test]
fn test_incremental_liquidity_converges_to_single_call() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);

    for trial in 0..100 {
        let len = rng.gen_range(1..40);
        let amounts: Vec<Amount> = (0..len).map(|_| rng.gen_range(1..50)).collect();
        let loop_limit = rng.gen_range(1..8);

        let mut incremental = queue_with(&amounts, loop_limit);
        let mut liquidity: Amount = 0;
        for _ in 0..rng.gen_range(1..10) {
            liquidity += rng.gen_range(0..200);
            let mut events: Vec<ProtocolEvent> = Vec::new();
            incremental.advance(liquidity, &mut events);
        }
        advance_to_fixpoint(&mut incremental, liquidity);

        let mut single = queue_with(&amounts, u32::MAX);
        let mut events: Vec<ProtocolEvent> = Vec::new();
        single.advance(liquidity, &mut events);

        assert_eq!(incremental.entries(), single.entries(), "trial {}", trial);
        assert_eq!(incremental.covered_sum(), single.covered_sum());
        incremental.verify_invariants().unwrap();
    }
}

#[test]
fn test_random_operations_preserve_invariants() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut queue = WithdrawalQueue::new(4).unwrap();
    let mut events = Vec::new();
    let mut liquidity: Amount = 0;
    let mut enqueued: HashMap<Identity, Amount> = HashMap::new();
    let mut next_id = 0usize;

    for _ in 0..5_000 {
        match rng.gen_range(0..4) {
            0 => {
                let who = account(next_id);
                next_id += 1;
                let amount = rng.gen_range(1..100);
                queue.enqueue(&who, amount, &mut events).unwrap();
                enqueued.insert(who, amount);
            }
            1 => {
                liquidity += rng.gen_range(0..150);
                queue.advance(liquidity, &mut events);
            }
            2 => {
                // Only the covered head may claim; everyone else is refused.
                let entries = queue.entries();
                if entries.is_empty() {
                    continue;
                }
                let pick = entries[rng.gen_range(0..entries.len())];
                let result = queue.claim(&pick.account, &mut events);
                let head_covered = entries[0].account == pick.account && pick.settle_index > 0;
                match result {
                    Ok(amount) => {
                        assert!(head_covered);
                        assert_eq!(Some(amount), enqueued.remove(&pick.account));
                        liquidity -= amount;
                    }
                    Err(err) => {
                        assert!(!head_covered);
                        assert_eq!(
                            err,
                            StakingError::InsufficientLiquidityOrQueueDepth {
                                account: pick.account
                            }
                        );
                    }
                }
            }
            _ => {
                let who = account(rng.gen_range(0..next_id.max(1)));
                if !enqueued.contains_key(&who) {
                    assert!(matches!(
                        queue.claim(&who, &mut events),
                        Err(StakingError::NoPendingWithdrawal { .. })
                    ));
                }
            }
        }

        queue.verify_invariants().unwrap();
        assert!(queue.covered_sum() <= liquidity);
        assert_eq!(queue.len(), enqueued.len());
    }
}
