//! Snapshot Rate Engine
//!
//! Turns finalized oracle balances into a continuously evolving exchange rate.
//!
//! Two snapshot slots form a ring buffer. Each `commit` overwrites the older
//! slot; which slot is older is decided by timestamp, never by index. The rate
//! at time `t` is the line through both snapshots' total values, evaluated at
//! `t`, plus the value that moved since the newer snapshot, divided by the
//! *live* receipt supply:
//!
//! ```text
//! slope    = (new.V - (old.V + carried)) / (new.t - old.t)
//! value(t) = new.V + slope * (t - new.t) + pending
//! rate(t)  = value(t) * SCALE / live_supply
//! ```
//!
//! `pending` is the net flow since the newer snapshot: value credited by
//! deposits minus value queued by withdrawals. A deposit mints receipts at
//! the current rate and adds the same value to the numerator, so it leaves
//! the rate unchanged; a withdrawal burns and subtracts alike. On commit the
//! pending flow becomes `carried`: it is already inside `new.V`, and moving
//! it onto `old.V` keeps it out of the yield slope. With no flows this is the
//! plain two-point line. The slope may be negative and the line extends in
//! both directions.
//!
//! # Commission
//!
//! Yield is measured per receipt against a high-water reference rate. The
//! treasury is paid by minting receipts, which dilutes everyone else by
//! exactly the skimmed value. The mint also dilutes the *next* snapshot's
//! rate, so the reference is scaled by the commission correction factor
//! `F = S / (S + minted)` before the next comparison. Without `F`, the
//! dilution would read as a loss and later yield would be under-charged.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::AdminGrant;
use super::config::StakingConfig;
use super::errors::{StakingError, StakingResult};
use super::events::{EventSink, ProtocolEvent};
use super::ledger::ReceiptToken;
use super::math::{extrapolate, mul_div, relative_change};
use super::types::{Amount, Identity, RATE_DENOMINATOR, SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total_value: Amount,
    pub total_receipts: Amount,
    pub timestamp: u64,
}

impl Snapshot {
    /// Flat rate recorded by this snapshot. `total_receipts` is never zero
    /// for a committed snapshot.
    pub fn rate(&self) -> u128 {
        mul_div(self.total_value, SCALE, self.total_receipts).unwrap_or(SCALE)
    }
}

/// Value that entered or left the pool outside oracle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetFlows {
    /// Credited by deposits.
    pub inflow: Amount,
    /// Queued for withdrawal.
    pub outflow: Amount,
}

impl NetFlows {
    /// `value + inflow - outflow`, clamped at zero.
    pub fn apply(&self, value: Amount) -> Amount {
        value.saturating_add(self.inflow).saturating_sub(self.outflow)
    }

    pub fn is_empty(&self) -> bool {
        self.inflow == 0 && self.outflow == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommissionOutcome {
    /// Value skimmed, in underlying units.
    pub amount: Amount,
    /// Receipts minted to the treasury.
    pub shares: Amount,
}

#[derive(Debug, Clone)]
pub struct SnapshotRateEngine {
    snapshots: [Option<Snapshot>; 2],
    max_rate_deviation: u32,
    rate_deviation_check: bool,
    commission_rate: u32,
    /// `SCALE`-based multiplier applied to `reference_rate`.
    correction_factor: u128,
    /// High-water rate that commission is measured against.
    reference_rate: Option<u128>,
    /// Timestamp of the snapshot last used by `extract_commission`.
    last_extracted_at: Option<u64>,
    /// Flows since the newer snapshot.
    pending_flows: NetFlows,
    /// Flows between the older and the newer snapshot.
    carried_flows: NetFlows,
}

impl SnapshotRateEngine {
    pub fn new(max_rate_deviation: u32, rate_deviation_check: bool, commission_rate: u32) -> Self {
        Self {
            snapshots: [None, None],
            max_rate_deviation,
            rate_deviation_check,
            commission_rate,
            correction_factor: SCALE,
            reference_rate: None,
            last_extracted_at: None,
            pending_flows: NetFlows::default(),
            carried_flows: NetFlows::default(),
        }
    }

    pub fn from_config(config: &StakingConfig) -> StakingResult<Self> {
        check_ratio("max_rate_deviation", config.max_rate_deviation)?;
        check_ratio("commission_rate", config.commission_rate)?;
        Ok(Self::new(
            config.max_rate_deviation,
            config.rate_deviation_check,
            config.commission_rate,
        ))
    }

    // =========================================================================
    // SNAPSHOT ORDERING
    // =========================================================================

    /// `(older, newer)` by timestamp. `None` if nothing was committed.
    pub fn ordered(&self) -> Option<(Option<Snapshot>, Snapshot)> {
        match self.snapshots {
            [None, None] => None,
            [Some(only), None] | [None, Some(only)] => Some((None, only)),
            [Some(a), Some(b)] => {
                if a.timestamp < b.timestamp {
                    Some((Some(a), b))
                } else {
                    Some((Some(b), a))
                }
            }
        }
    }

    pub fn newer(&self) -> Option<Snapshot> {
        self.ordered().map(|(_, newer)| newer)
    }

    pub fn older(&self) -> Option<Snapshot> {
        self.ordered().and_then(|(older, _)| older)
    }

    /// Slot the next commit overwrites: an empty slot first, else the older.
    fn slot_to_overwrite(&self) -> usize {
        match self.snapshots {
            [None, _] => 0,
            [_, None] => 1,
            [Some(a), Some(b)] => {
                if a.timestamp < b.timestamp {
                    0
                } else {
                    1
                }
            }
        }
    }

    // =========================================================================
    // RATE
    // =========================================================================

    /// Total pool value at `at`: the snapshot line plus pending flows.
    pub fn value_at(&self, at: u64) -> Option<Amount> {
        let (older, newer) = self.ordered()?;
        let line = match older {
            None => newer.total_value,
            Some(old) => extrapolate(
                self.carried_flows.apply(old.total_value),
                old.timestamp,
                newer.total_value,
                newer.timestamp,
                at,
            ),
        };
        Some(self.pending_flows.apply(line))
    }

    /// Exchange rate (underlying per receipt, `SCALE`-based) at `at`.
    ///
    /// - nothing committed: par (`SCALE`)
    /// - one snapshot: its value plus pending flows over `live_supply`,
    ///   independent of `at`
    /// - two snapshots: extrapolated value plus pending flows over
    ///   `live_supply`
    ///
    /// With zero live supply the newer snapshot's flat rate is used.
    pub fn rate_at(&self, at: u64, live_supply: Amount) -> u128 {
        let Some(newer) = self.newer() else {
            return SCALE;
        };
        if live_supply == 0 {
            return newer.rate();
        }
        let value = self.value_at(at).unwrap_or(newer.total_value);
        mul_div(value, SCALE, live_supply).unwrap_or(SCALE)
    }

    // =========================================================================
    // FLOWS
    // =========================================================================

    /// Value credited to the pool by a deposit.
    pub fn record_inflow(&mut self, amount: Amount) {
        self.pending_flows.inflow = self.pending_flows.inflow.saturating_add(amount);
    }

    /// Value owed to a withdrawal request.
    pub fn record_outflow(&mut self, amount: Amount) {
        self.pending_flows.outflow = self.pending_flows.outflow.saturating_add(amount);
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Record a new snapshot `(total_value, live_supply, oracle_timestamp)`.
    ///
    /// `live_supply` doubles as the candidate receipt total and as the
    /// denominator of the pre-commit rate used by the deviation check.
    pub fn commit(
        &mut self,
        total_value: Amount,
        oracle_timestamp: u64,
        live_supply: Amount,
        now: u64,
        sink: &mut impl EventSink,
    ) -> StakingResult<Snapshot> {
        if total_value == 0 || live_supply == 0 {
            return Err(StakingError::EmptyTotals {
                total_value,
                total_receipts: live_supply,
            });
        }

        let newest = self.newer();
        if let Some(newest) = newest {
            if oracle_timestamp <= newest.timestamp {
                return Err(StakingError::TimestampsTooClose {
                    candidate: oracle_timestamp,
                    newest: newest.timestamp,
                });
            }
        }

        let candidate = Snapshot {
            total_value,
            total_receipts: live_supply,
            timestamp: oracle_timestamp,
        };
        let candidate_rate = candidate.rate();

        if self.rate_deviation_check && newest.is_some() {
            let current_rate = self.rate_at(now, live_supply);
            let deviation = relative_change(candidate_rate, current_rate);
            if deviation > self.max_rate_deviation as u128 {
                warn!(
                    current_rate,
                    candidate_rate, deviation, "commit rejected: rate deviation too big"
                );
                return Err(StakingError::RateDeviationTooBig {
                    current_rate,
                    candidate_rate,
                    deviation,
                    max_deviation: self.max_rate_deviation,
                });
            }
        }

        let slot = self.slot_to_overwrite();
        self.snapshots[slot] = Some(candidate);
        if self.reference_rate.is_none() {
            self.reference_rate = Some(candidate_rate);
        }
        self.carried_flows = std::mem::take(&mut self.pending_flows);

        info!(
            slot,
            inflow = self.carried_flows.inflow,
            outflow = self.carried_flows.outflow,
            total_value,
            total_receipts = live_supply,
            timestamp = oracle_timestamp,
            rate = candidate_rate,
            "snapshot committed"
        );
        sink.emit(ProtocolEvent::Committed {
            total_value,
            total_receipts: live_supply,
            timestamp: oracle_timestamp,
            rate: candidate_rate,
        });
        Ok(candidate)
    }

    // =========================================================================
    // COMMISSION
    // =========================================================================

    /// Skim the treasury's share of yield accrued up to the newest snapshot.
    ///
    /// A second call before the next commit returns a zero outcome.
    pub fn extract_commission<T: ReceiptToken>(
        &mut self,
        now: u64,
        treasury: &Identity,
        token: &mut T,
        sink: &mut impl EventSink,
    ) -> StakingResult<CommissionOutcome> {
        let Some(newer) = self.newer() else {
            return Ok(CommissionOutcome::default());
        };
        if self.last_extracted_at == Some(newer.timestamp) {
            debug!(timestamp = newer.timestamp, "commission already extracted for snapshot");
            return Ok(CommissionOutcome::default());
        }
        self.last_extracted_at = Some(newer.timestamp);

        let current_rate = newer.rate();
        let reference = self.reference_rate.unwrap_or(current_rate);
        let adjusted_reference =
            mul_div(reference, self.correction_factor, SCALE).unwrap_or(reference);
        if current_rate <= adjusted_reference {
            debug!(current_rate, adjusted_reference, "no yield above high-water mark");
            return Ok(CommissionOutcome::default());
        }

        let accrued = mul_div(current_rate - adjusted_reference, newer.total_receipts, SCALE)
            .unwrap_or(0);
        let amount = mul_div(
            accrued,
            self.commission_rate as u128,
            RATE_DENOMINATOR as u128,
        )
        .unwrap_or(0);

        let supply = token.live_supply();
        let value = self.value_at(now).unwrap_or(newer.total_value);
        let shares = if amount == 0 || supply == 0 || value <= amount {
            0
        } else {
            mul_div(amount, supply, value - amount).unwrap_or(0)
        };

        self.reference_rate = Some(current_rate);
        self.correction_factor = mul_div(SCALE, supply, supply.saturating_add(shares))
            .unwrap_or(SCALE);

        if shares == 0 {
            debug!(accrued, amount, "commission rounds to zero");
            return Ok(CommissionOutcome::default());
        }

        token.mint(treasury, shares);
        info!(
            %treasury,
            accrued,
            amount,
            shares,
            correction_factor = self.correction_factor,
            "commission extracted"
        );
        sink.emit(ProtocolEvent::CommissionExtracted {
            treasury: *treasury,
            amount,
            shares,
        });
        Ok(CommissionOutcome { amount, shares })
    }

    // =========================================================================
    // ADMINISTRATION
    // =========================================================================

    pub fn set_max_rate_deviation(
        &mut self,
        _grant: &AdminGrant<'_>,
        max_rate_deviation: u32,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        check_ratio("max_rate_deviation", max_rate_deviation)?;
        self.max_rate_deviation = max_rate_deviation;
        sink.emit(ProtocolEvent::parameter(
            "max_rate_deviation",
            max_rate_deviation,
        ));
        Ok(())
    }

    pub fn set_rate_deviation_check(
        &mut self,
        _grant: &AdminGrant<'_>,
        enabled: bool,
        sink: &mut impl EventSink,
    ) {
        self.rate_deviation_check = enabled;
        sink.emit(ProtocolEvent::parameter("rate_deviation_check", enabled));
    }

    pub fn set_commission_rate(
        &mut self,
        _grant: &AdminGrant<'_>,
        commission_rate: u32,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        check_ratio("commission_rate", commission_rate)?;
        self.commission_rate = commission_rate;
        sink.emit(ProtocolEvent::parameter("commission_rate", commission_rate));
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn snapshots(&self) -> &[Option<Snapshot>; 2] {
        &self.snapshots
    }

    pub fn max_rate_deviation(&self) -> u32 {
        self.max_rate_deviation
    }

    pub fn rate_deviation_check(&self) -> bool {
        self.rate_deviation_check
    }

    pub fn commission_rate(&self) -> u32 {
        self.commission_rate
    }

    pub fn correction_factor(&self) -> u128 {
        self.correction_factor
    }

    pub fn reference_rate(&self) -> Option<u128> {
        self.reference_rate
    }

    pub fn pending_flows(&self) -> NetFlows {
        self.pending_flows
    }

    pub fn carried_flows(&self) -> NetFlows {
        self.carried_flows
    }
}

fn check_ratio(name: &'static str, value: u32) -> StakingResult<()> {
    if value > RATE_DENOMINATOR {
        return Err(StakingError::invalid_parameter(
            name,
            format!("{} exceeds {}", value, RATE_DENOMINATOR),
        ));
    }
    Ok(())
}
