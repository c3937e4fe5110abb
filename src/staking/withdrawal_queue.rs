//! Withdrawal Queue
//!
//! FIFO queue of pending exits, stored as a singly linked list keyed by
//! account (at most one live node per account).
//!
//! `advance(liquidity)` grants coverage to a prefix of the queue, walking at
//! most `loop_limit` nodes per call. Coverage is never revoked, and each call
//! resumes after the last covered node, so repeated calls with growing
//! liquidity converge to the same state as a single call with the final
//! liquidity (given enough calls for long queues).
//!
//! # Node lifecycle
//!
//! ```text
//! Absent -> Enqueued -> Covered (settle_index > 0) -> Claimed (Absent)
//! ```
//!
//! # Invariants
//!
//! 1. Accounts with non-zero `settle_index` form a contiguous prefix from `head`,
//!    numbered `1..=n` in queue order.
//! 2. `pending_withdrawal_sum` equals the sum of all live nodes' amounts.
//! 3. `covered_sum` equals the sum of covered nodes' amounts.
//!
//! Ranks are stored as absolute coverage sequence numbers and read relative
//! to the number of claims so far, so a claim renumbers the remaining
//! covered nodes without touching them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::access::AdminGrant;
use super::errors::{StakingError, StakingResult};
use super::events::{EventSink, ProtocolEvent};
use super::types::{Amount, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueNode {
    pending_amount: Amount,
    next: Option<Identity>,
}

/// Work done by one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    /// Nodes examined (never more than `loop_limit`).
    pub visited: u32,
    pub newly_covered: u32,
    /// Sum of all covered, unclaimed withdrawals after the call.
    pub covered_total: Amount,
}

/// One queue entry as seen from outside, in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub account: Identity,
    pub pending_amount: Amount,
    /// 0 while uncovered; otherwise the 1-based position from head among
    /// covered nodes.
    pub settle_index: u32,
}

#[derive(Debug, Clone)]
pub struct WithdrawalQueue {
    nodes: HashMap<Identity, QueueNode>,
    head: Option<Identity>,
    tail: Option<Identity>,
    pending_withdrawal_sum: Amount,
    /// Coverage sequence number per covered account.
    settle_index: HashMap<Identity, u64>,
    loop_limit: u32,
    /// Last covered node; the next `advance` resumes at its successor.
    last_covered: Option<Identity>,
    /// Nodes ever covered.
    covered_seq: u64,
    /// Nodes ever claimed.
    claimed_seq: u64,
    covered_sum: Amount,
}

impl WithdrawalQueue {
    pub fn new(loop_limit: u32) -> StakingResult<Self> {
        check_loop_limit(loop_limit)?;
        Ok(Self {
            nodes: HashMap::new(),
            head: None,
            tail: None,
            pending_withdrawal_sum: 0,
            settle_index: HashMap::new(),
            loop_limit,
            last_covered: None,
            covered_seq: 0,
            claimed_seq: 0,
            covered_sum: 0,
        })
    }

    /// Append a withdrawal for `account` at the tail.
    pub fn enqueue(
        &mut self,
        account: &Identity,
        amount: Amount,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        if self.nodes.contains_key(account) {
            return Err(StakingError::AlreadyPending { account: *account });
        }
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }

        self.nodes.insert(
            *account,
            QueueNode {
                pending_amount: amount,
                next: None,
            },
        );
        match self.tail {
            Some(tail) => {
                if let Some(node) = self.nodes.get_mut(&tail) {
                    node.next = Some(*account);
                }
            }
            None => self.head = Some(*account),
        }
        self.tail = Some(*account);
        self.pending_withdrawal_sum = self.pending_withdrawal_sum.saturating_add(amount);

        debug!(%account, amount, pending = self.pending_withdrawal_sum, "withdrawal enqueued");
        sink.emit(ProtocolEvent::Enqueued {
            account: *account,
            amount,
        });
        Ok(())
    }

    /// Cover as many further nodes as `available_liquidity` allows, visiting
    /// at most `loop_limit` nodes.
    ///
    /// `available_liquidity` is the total liquidity backing the queue,
    /// including what is already reserved for covered nodes.
    pub fn advance(
        &mut self,
        available_liquidity: Amount,
        sink: &mut impl EventSink,
    ) -> AdvanceOutcome {
        let mut cursor = match self.last_covered {
            Some(last) => self.nodes.get(&last).and_then(|n| n.next),
            None => self.head,
        };
        let mut running = self.covered_sum;
        let mut visited = 0u32;
        let mut newly_covered = 0u32;

        while visited < self.loop_limit {
            let Some(account) = cursor else { break };
            let Some(node) = self.nodes.get(&account).copied() else {
                break;
            };
            visited += 1;

            let Some(total) = running.checked_add(node.pending_amount) else {
                break;
            };
            if total > available_liquidity {
                break;
            }

            running = total;
            self.covered_seq += 1;
            self.settle_index.insert(account, self.covered_seq);
            self.last_covered = Some(account);
            newly_covered += 1;
            cursor = node.next;
        }
        self.covered_sum = running;

        let outcome = AdvanceOutcome {
            visited,
            newly_covered,
            covered_total: running,
        };
        if newly_covered > 0 {
            info!(
                visited,
                newly_covered,
                covered_total = running,
                available_liquidity,
                "withdrawal queue advanced"
            );
            sink.emit(ProtocolEvent::QueueAdvanced {
                visited,
                newly_covered,
                covered_total: running,
            });
        }
        outcome
    }

    /// Amount `account` could claim right now, without claiming it.
    pub fn claimable(&self, account: &Identity) -> StakingResult<Amount> {
        let node = self
            .nodes
            .get(account)
            .ok_or(StakingError::NoPendingWithdrawal { account: *account })?;
        if self.settle_index_of(account) == 0 || self.head != Some(*account) {
            return Err(StakingError::InsufficientLiquidityOrQueueDepth { account: *account });
        }
        Ok(node.pending_amount)
    }

    /// Remove the covered head node for `account` and return its amount.
    /// The caller pays the amount out.
    pub fn claim(&mut self, account: &Identity, sink: &mut impl EventSink) -> StakingResult<Amount> {
        let amount = self.claimable(account)?;
        let node = self
            .nodes
            .remove(account)
            .ok_or(StakingError::NoPendingWithdrawal { account: *account })?;

        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        if self.last_covered == Some(*account) {
            self.last_covered = None;
        }
        self.settle_index.remove(account);
        self.claimed_seq += 1;
        self.covered_sum -= amount;
        self.pending_withdrawal_sum -= amount;

        info!(%account, amount, pending = self.pending_withdrawal_sum, "withdrawal claimed");
        sink.emit(ProtocolEvent::Claimed {
            account: *account,
            amount,
        });
        Ok(amount)
    }

    pub fn set_loop_limit(
        &mut self,
        _grant: &AdminGrant<'_>,
        loop_limit: u32,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        check_loop_limit(loop_limit)?;
        self.loop_limit = loop_limit;
        sink.emit(ProtocolEvent::parameter("loop_limit", loop_limit));
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn settle_index_of(&self, account: &Identity) -> u32 {
        self.settle_index
            .get(account)
            .map(|seq| {
                u32::try_from(seq.saturating_sub(self.claimed_seq)).unwrap_or(u32::MAX)
            })
            .unwrap_or(0)
    }

    /// Covered, unclaimed nodes.
    pub fn covered_count(&self) -> u64 {
        self.covered_seq - self.claimed_seq
    }

    pub fn pending_amount(&self, account: &Identity) -> Option<Amount> {
        self.nodes.get(account).map(|n| n.pending_amount)
    }

    pub fn pending_withdrawal_sum(&self) -> Amount {
        self.pending_withdrawal_sum
    }

    pub fn covered_sum(&self) -> Amount {
        self.covered_sum
    }

    pub fn head(&self) -> Option<Identity> {
        self.head
    }

    pub fn tail(&self) -> Option<Identity> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn loop_limit(&self) -> u32 {
        self.loop_limit
    }

    /// Entries in queue order, head first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(account) = cursor {
            let Some(node) = self.nodes.get(&account) else {
                break;
            };
            out.push(QueueEntry {
                account,
                pending_amount: node.pending_amount,
                settle_index: self.settle_index_of(&account),
            });
            cursor = node.next;
        }
        out
    }

    /// Walk the whole list and check the structural invariants.
    pub fn verify_invariants(&self) -> Result<(), String> {
        let entries = self.entries();
        if entries.len() != self.nodes.len() {
            return Err(format!(
                "list reaches {} nodes, map holds {}",
                entries.len(),
                self.nodes.len()
            ));
        }
        if entries.last().map(|e| e.account) != self.tail {
            return Err("tail does not match last reachable node".to_string());
        }

        let pending: Amount = entries.iter().map(|e| e.pending_amount).sum();
        if pending != self.pending_withdrawal_sum {
            return Err(format!(
                "pending sum {} != recorded {}",
                pending, self.pending_withdrawal_sum
            ));
        }

        let covered = entries.iter().take_while(|e| e.settle_index > 0).count();
        if entries[covered..].iter().any(|e| e.settle_index > 0) {
            return Err("covered nodes are not a prefix".to_string());
        }
        if covered as u64 != self.covered_count() {
            return Err(format!(
                "covered prefix {} != recorded {}",
                covered,
                self.covered_count()
            ));
        }
        if let Some((pos, e)) = entries[..covered]
            .iter()
            .enumerate()
            .find(|(pos, e)| e.settle_index as usize != pos + 1)
        {
            return Err(format!(
                "node {} has settle index {}, expected {}",
                e.account,
                e.settle_index,
                pos + 1
            ));
        }
        let covered_sum: Amount = entries[..covered].iter().map(|e| e.pending_amount).sum();
        if covered_sum != self.covered_sum {
            return Err(format!(
                "covered sum {} != recorded {}",
                covered_sum, self.covered_sum
            ));
        }
        Ok(())
    }
}

fn check_loop_limit(loop_limit: u32) -> StakingResult<()> {
    if loop_limit == 0 {
        return Err(StakingError::invalid_parameter(
            "loop_limit",
            "must be at least 1",
        ));
    }
    Ok(())
}
