//! Staking Pool
//!
//! Wires oracle consensus, the snapshot rate engine and the withdrawal queue
//! to the pool ledger, the receipt token and a clock. This is the only place
//! that reads across components; each component sees the others solely
//! through the values passed in here.
//!
//! Every operation either completes or returns an error with no state change.
//! Fallible checks run first; mutations run only once nothing can fail.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::access::Authority;
use super::clock::Clock;
use super::config::StakingConfig;
use super::errors::{StakingError, StakingResult};
use super::events::{EventSink, ProtocolEvent};
use super::ledger::{PoolLedger, ReceiptToken};
use super::math::mul_div;
use super::oracle_consensus::{FinalizedReport, OracleConsensus, SaveOutcome};
use super::snapshot_rate::{CommissionOutcome, NetFlows, Snapshot, SnapshotRateEngine};
use super::types::{Amount, Identity, SCALE};
use super::withdrawal_queue::{AdvanceOutcome, QueueEntry, WithdrawalQueue};

/// Point-in-time view of the pool, for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub now: u64,
    pub rate: u128,
    pub live_supply: Amount,
    pub pool_balance: Amount,
    pub pending_withdrawals: Amount,
    pub covered_withdrawals: Amount,
    pub finalized: Option<FinalizedReport>,
    pub snapshots: Vec<Snapshot>,
    /// Deposits and withdrawal requests since the newest snapshot.
    pub pending_flows: NetFlows,
    pub correction_factor: u128,
    pub queue: Vec<QueueEntry>,
}

pub struct StakingPool<P, R, C> {
    consensus: OracleConsensus,
    engine: SnapshotRateEngine,
    queue: WithdrawalQueue,
    authority: Authority,
    treasury: Identity,
    pool: P,
    token: R,
    clock: C,
    events: Vec<ProtocolEvent>,
}

impl<P: PoolLedger, R: ReceiptToken, C: Clock> StakingPool<P, R, C> {
    pub fn new(config: &StakingConfig, pool: P, token: R, clock: C) -> StakingResult<Self> {
        Ok(Self {
            consensus: OracleConsensus::from_config(config)?,
            engine: SnapshotRateEngine::from_config(config)?,
            queue: WithdrawalQueue::new(config.loop_limit)?,
            authority: Authority::new(config.admin),
            treasury: config.treasury,
            pool,
            token,
            clock,
            events: Vec::new(),
        })
    }

    // =========================================================================
    // ORACLE REPORTS
    // =========================================================================

    pub fn report(
        &mut self,
        caller: &Identity,
        epoch: u64,
        balance: Amount,
    ) -> StakingResult<SaveOutcome> {
        let now = self.clock.now();
        self.consensus
            .save(caller, epoch, balance, now, &mut self.events)
    }

    // =========================================================================
    // SNAPSHOTS & RATE
    // =========================================================================

    /// Record a snapshot from the latest finalized report and the pool state.
    ///
    /// The candidate value counts pending harvest up front; the harvest itself
    /// runs only after the engine accepted the snapshot.
    pub fn commit(&mut self) -> StakingResult<Snapshot> {
        let now = self.clock.now();
        let report = self.consensus.latest_finalized()?;

        let pool_value = self
            .pool
            .balance()
            .saturating_add(self.pool.pending_harvest());
        // Queued withdrawals already had their receipts burned.
        let total_value = pool_value
            .saturating_add(report.balance)
            .saturating_sub(self.queue.pending_withdrawal_sum());
        let live_supply = self.token.live_supply();

        let snapshot = self.engine.commit(
            total_value,
            report.timestamp,
            live_supply,
            now,
            &mut self.events,
        )?;

        let harvested = self.pool.harvest();
        debug!(harvested, epoch = report.epoch, "harvested into pool on commit");
        if harvested > 0 {
            self.advance_with_balance();
        }
        Ok(snapshot)
    }

    pub fn rate(&self) -> u128 {
        self.rate_at(self.clock.now())
    }

    pub fn rate_at(&self, at: u64) -> u128 {
        self.engine.rate_at(at, self.token.live_supply())
    }

    pub fn extract_commission(&mut self) -> StakingResult<CommissionOutcome> {
        let now = self.clock.now();
        self.engine
            .extract_commission(now, &self.treasury, &mut self.token, &mut self.events)
    }

    // =========================================================================
    // DEPOSITS & WITHDRAWALS
    // =========================================================================

    /// Deposit `amount` for `account`; returns receipts minted.
    pub fn deposit(&mut self, account: &Identity, amount: Amount) -> StakingResult<Amount> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let rate = self.rate();
        if rate == 0 {
            return Err(StakingError::EmptyTotals {
                total_value: 0,
                total_receipts: self.token.live_supply(),
            });
        }
        let receipts = mul_div(amount, SCALE, rate).unwrap_or(0);
        if receipts == 0 {
            return Err(StakingError::ZeroAmount);
        }

        self.pool.credit(amount);
        self.token.mint(account, receipts);
        self.engine.record_inflow(amount);
        info!(%account, amount, receipts, rate, "deposit");
        self.events.emit(ProtocolEvent::Deposited {
            account: *account,
            amount,
            receipts,
        });
        self.advance_with_balance();
        Ok(receipts)
    }

    /// Burn `receipts` from `account` and queue the equivalent value.
    /// Returns the queued amount.
    pub fn request_withdrawal(
        &mut self,
        account: &Identity,
        receipts: Amount,
    ) -> StakingResult<Amount> {
        if receipts == 0 {
            return Err(StakingError::ZeroAmount);
        }
        if self.queue.pending_amount(account).is_some() {
            return Err(StakingError::AlreadyPending { account: *account });
        }
        let rate = self.rate();
        let amount = mul_div(receipts, rate, SCALE).unwrap_or(0);
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }

        self.token.burn(account, receipts)?;
        self.events.emit(ProtocolEvent::WithdrawalRequested {
            account: *account,
            receipts,
            amount,
        });
        self.queue.enqueue(account, amount, &mut self.events)?;
        self.engine.record_outflow(amount);
        info!(%account, receipts, amount, rate, "withdrawal requested");
        self.advance_with_balance();
        Ok(amount)
    }

    /// External liquidity arrival (validator exits, top-ups).
    pub fn fund(&mut self, amount: Amount) -> StakingResult<AdvanceOutcome> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        self.pool.credit(amount);
        info!(amount, balance = self.pool.balance(), "liquidity arrived");
        Ok(self.advance_with_balance())
    }

    /// Continue covering the queue with the current balance. Needed when the
    /// queue is longer than `loop_limit`.
    pub fn advance_queue(&mut self) -> AdvanceOutcome {
        self.advance_with_balance()
    }

    pub fn claim(&mut self, account: &Identity) -> StakingResult<Amount> {
        let amount = self.queue.claimable(account)?;
        let balance = self.pool.balance();
        if balance < amount {
            return Err(StakingError::InsufficientPoolBalance {
                balance,
                requested: amount,
            });
        }
        self.queue.claim(account, &mut self.events)?;
        self.pool.pay_out(account, amount)?;
        Ok(amount)
    }

    fn advance_with_balance(&mut self) -> AdvanceOutcome {
        let liquidity = self.pool.balance();
        self.queue.advance(liquidity, &mut self.events)
    }

    // =========================================================================
    // ADMINISTRATION
    // =========================================================================

    pub fn set_oracle(
        &mut self,
        caller: &Identity,
        seat: usize,
        identity: Identity,
    ) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.consensus
            .set_oracle(&grant, seat, identity, &mut self.events)
    }

    pub fn set_strict_mode(&mut self, caller: &Identity, strict: bool) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.consensus
            .set_strict_mode(&grant, strict, &mut self.events);
        Ok(())
    }

    pub fn set_epoch_update_period(&mut self, caller: &Identity, period: u64) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.consensus
            .set_epoch_update_period(&grant, period, &mut self.events)
    }

    pub fn set_max_rate_deviation(&mut self, caller: &Identity, value: u32) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.engine
            .set_max_rate_deviation(&grant, value, &mut self.events)
    }

    pub fn set_rate_deviation_check(&mut self, caller: &Identity, enabled: bool) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.engine
            .set_rate_deviation_check(&grant, enabled, &mut self.events);
        Ok(())
    }

    pub fn set_commission_rate(&mut self, caller: &Identity, value: u32) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.engine
            .set_commission_rate(&grant, value, &mut self.events)
    }

    pub fn set_loop_limit(&mut self, caller: &Identity, loop_limit: u32) -> StakingResult<()> {
        let grant = self.authority.authorize(caller)?;
        self.queue
            .set_loop_limit(&grant, loop_limit, &mut self.events)
    }

    pub fn set_treasury(&mut self, caller: &Identity, treasury: Identity) -> StakingResult<()> {
        self.authority.authorize(caller)?;
        self.treasury = treasury;
        self.events
            .emit(ProtocolEvent::parameter("treasury", treasury));
        Ok(())
    }

    pub fn transfer_admin(&mut self, caller: &Identity, new_admin: Identity) -> StakingResult<()> {
        self.authority
            .transfer(caller, new_admin, &mut self.events)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Take all events emitted since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn state(&self) -> PoolState {
        let now = self.clock.now();
        let mut snapshots: Vec<Snapshot> = self.engine.snapshots().iter().flatten().copied().collect();
        snapshots.sort_by_key(|s| s.timestamp);
        PoolState {
            now,
            rate: self.rate_at(now),
            live_supply: self.token.live_supply(),
            pool_balance: self.pool.balance(),
            pending_withdrawals: self.queue.pending_withdrawal_sum(),
            covered_withdrawals: self.queue.covered_sum(),
            finalized: self.consensus.finalized(),
            snapshots,
            pending_flows: self.engine.pending_flows(),
            correction_factor: self.engine.correction_factor(),
            queue: self.queue.entries(),
        }
    }

    pub fn consensus(&self) -> &OracleConsensus {
        &self.consensus
    }

    pub fn engine(&self) -> &SnapshotRateEngine {
        &self.engine
    }

    pub fn queue(&self) -> &WithdrawalQueue {
        &self.queue
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn treasury(&self) -> &Identity {
        &self.treasury
    }

    pub fn pool_ledger(&self) -> &P {
        &self.pool
    }

    pub fn pool_ledger_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    pub fn token(&self) -> &R {
        &self.token
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
