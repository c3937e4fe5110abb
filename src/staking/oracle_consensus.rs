//! Oracle Consensus
//!
//! Three fixed oracle seats report the external (beacon-chain) balance for an
//! epoch. A report becomes final once two seats hold the identical
//! `(epoch, balance)` proposal.
//!
//! # Modes
//!
//! - **Flexible**: any epoch up to the current one, not older than the
//!   finalized epoch.
//! - **Strict**: only [`OracleConsensus::next_epoch_to_publish`], the latest
//!   update-period boundary that has fully elapsed.
//!
//! # Invariants
//!
//! 1. `finalized.epoch` never decreases.
//! 2. `finalized.timestamp == zero_epoch_timestamp + finalized.epoch * epoch_duration`.
//! 3. A rejected `save` mutates nothing.
//! 4. Quorum counting is per seat, so submission order does not matter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::access::AdminGrant;
use super::config::StakingConfig;
use super::errors::{StakingError, StakingResult};
use super::events::{EventSink, ProtocolEvent};
use super::types::{Amount, Identity, ORACLE_SEATS, QUORUM};

/// Bit offset of seat 0 in the `Proposed` confirmation bitmask.
pub const CONFIRMATION_BIT_OFFSET: u32 = 24;

/// An oracle's latest claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub epoch: u64,
    pub balance: Amount,
}

/// The last quorum-agreed report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedReport {
    pub epoch: u64,
    pub balance: Amount,
    pub timestamp: u64,
}

/// What an accepted `save` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Matching confirmation of the already finalized epoch; no state change.
    Confirmed,
    /// Proposal recorded, quorum not reached (or epoch not newer).
    Recorded { confirmations: usize },
    /// Proposal recorded and the report finalized.
    Finalized(FinalizedReport),
}

#[derive(Debug, Clone)]
pub struct OracleConsensus {
    oracles: [Identity; ORACLE_SEATS],
    proposals: HashMap<Identity, Proposal>,
    finalized: Option<FinalizedReport>,
    zero_epoch_timestamp: u64,
    epoch_duration: u64,
    epoch_update_period: u64,
    strict_mode: bool,
}

impl OracleConsensus {
    pub fn new(
        oracles: [Identity; ORACLE_SEATS],
        zero_epoch_timestamp: u64,
        epoch_duration: u64,
        epoch_update_period: u64,
    ) -> StakingResult<Self> {
        if epoch_duration == 0 {
            return Err(StakingError::invalid_parameter(
                "epoch_duration",
                "must be positive",
            ));
        }
        check_update_period(epoch_update_period, epoch_duration)?;
        for seat in 0..ORACLE_SEATS {
            if let Some(other) = (0..seat).find(|&s| oracles[s] == oracles[seat]) {
                return Err(StakingError::DuplicateOracle {
                    identity: oracles[seat],
                    seat: other,
                });
            }
        }

        Ok(Self {
            oracles,
            proposals: HashMap::new(),
            finalized: None,
            zero_epoch_timestamp,
            epoch_duration,
            epoch_update_period,
            strict_mode: false,
        })
    }

    pub fn from_config(config: &StakingConfig) -> StakingResult<Self> {
        let mut consensus = Self::new(
            config.oracles,
            config.zero_epoch_timestamp,
            config.epoch_duration,
            config.epoch_update_period,
        )?;
        consensus.strict_mode = config.strict_mode;
        Ok(consensus)
    }

    // =========================================================================
    // REPORTING
    // =========================================================================

    /// Submit `(epoch, balance)` as `caller`.
    pub fn save(
        &mut self,
        caller: &Identity,
        epoch: u64,
        balance: Amount,
        now: u64,
        sink: &mut impl EventSink,
    ) -> StakingResult<SaveOutcome> {
        if self.seat_of(caller).is_none() {
            return Err(StakingError::Unauthorized { caller: *caller });
        }

        let max_epoch = self.time_to_epoch(now);
        if max_epoch.map_or(true, |max| epoch > max) {
            return Err(StakingError::FutureEpoch { epoch, max_epoch });
        }

        if self.strict_mode {
            let publishable = self.next_epoch_to_publish(now);
            if publishable != Some(epoch) {
                return Err(StakingError::OnlyPublishableEpoch { epoch, publishable });
            }
        }

        if let Some(finalized) = self.finalized {
            if epoch < finalized.epoch {
                return Err(StakingError::EpochMustIncrease {
                    epoch,
                    finalized: finalized.epoch,
                });
            }

            if epoch == finalized.epoch {
                if balance != finalized.balance {
                    return Err(StakingError::BalanceMismatch {
                        epoch,
                        finalized: finalized.balance,
                        proposed: balance,
                    });
                }
                let confirmations = self.confirmation_mask(epoch, balance);
                debug!(oracle = %caller, epoch, balance, "confirmation of finalized epoch");
                sink.emit(ProtocolEvent::Proposed {
                    oracle: *caller,
                    epoch,
                    balance,
                    confirmations,
                });
                return Ok(SaveOutcome::Confirmed);
            }
        }

        self.proposals.insert(*caller, Proposal { epoch, balance });

        let confirmations = self.confirmation_mask(epoch, balance);
        let count = confirmations.count_ones() as usize;
        debug!(oracle = %caller, epoch, balance, count, "proposal recorded");
        sink.emit(ProtocolEvent::Proposed {
            oracle: *caller,
            epoch,
            balance,
            confirmations,
        });

        // Reaching this point means the epoch is newer than any finalized one.
        if count >= QUORUM {
            let report = FinalizedReport {
                epoch,
                balance,
                timestamp: self.epoch_to_timestamp(epoch),
            };
            self.finalized = Some(report);
            info!(epoch, balance, timestamp = report.timestamp, "oracle report finalized");
            sink.emit(ProtocolEvent::Finalized {
                epoch,
                balance,
                timestamp: report.timestamp,
            });
            return Ok(SaveOutcome::Finalized(report));
        }

        Ok(SaveOutcome::Recorded {
            confirmations: count,
        })
    }

    /// Bitmask with bit `24 + seat` set for every seat whose latest proposal
    /// equals `(epoch, balance)`.
    pub fn confirmation_mask(&self, epoch: u64, balance: Amount) -> u32 {
        let target = Proposal { epoch, balance };
        self.oracles
            .iter()
            .enumerate()
            .filter(|(_, oracle)| self.proposals.get(*oracle) == Some(&target))
            .fold(0u32, |mask, (seat, _)| {
                mask | (1 << (CONFIRMATION_BIT_OFFSET + seat as u32))
            })
    }

    pub fn latest_finalized(&self) -> StakingResult<FinalizedReport> {
        self.finalized.ok_or(StakingError::NotInitialized)
    }

    pub fn proposal_of(&self, oracle: &Identity) -> Option<Proposal> {
        self.proposals.get(oracle).copied()
    }

    // =========================================================================
    // EPOCH ARITHMETIC
    // =========================================================================

    pub fn epoch_to_timestamp(&self, epoch: u64) -> u64 {
        self.zero_epoch_timestamp
            .saturating_add(epoch.saturating_mul(self.epoch_duration))
    }

    /// `None` before epoch zero has started.
    pub fn time_to_epoch(&self, time: u64) -> Option<u64> {
        time.checked_sub(self.zero_epoch_timestamp)
            .map(|elapsed| elapsed / self.epoch_duration)
    }

    /// Latest update-period boundary strictly in the past, as an epoch number.
    /// `None` until at least one second of epoch zero has elapsed.
    pub fn next_epoch_to_publish(&self, now: u64) -> Option<u64> {
        let elapsed = now
            .checked_sub(self.zero_epoch_timestamp)?
            .checked_sub(1)?;
        let boundary = elapsed / self.epoch_update_period * self.epoch_update_period;
        Some(boundary / self.epoch_duration)
    }

    // =========================================================================
    // ADMINISTRATION
    // =========================================================================

    pub fn set_oracle(
        &mut self,
        _grant: &AdminGrant<'_>,
        seat: usize,
        identity: Identity,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        if seat >= ORACLE_SEATS {
            return Err(StakingError::InvalidSeat { seat });
        }
        if let Some(other) = (0..ORACLE_SEATS).find(|&s| s != seat && self.oracles[s] == identity) {
            return Err(StakingError::DuplicateOracle {
                identity,
                seat: other,
            });
        }
        let previous = std::mem::replace(&mut self.oracles[seat], identity);
        info!(seat, %previous, %identity, "oracle seat updated");
        sink.emit(ProtocolEvent::OracleSet { seat, identity });
        Ok(())
    }

    pub fn set_strict_mode(
        &mut self,
        _grant: &AdminGrant<'_>,
        strict: bool,
        sink: &mut impl EventSink,
    ) {
        self.strict_mode = strict;
        sink.emit(ProtocolEvent::parameter("strict_mode", strict));
    }

    pub fn set_epoch_update_period(
        &mut self,
        _grant: &AdminGrant<'_>,
        period: u64,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        check_update_period(period, self.epoch_duration)?;
        self.epoch_update_period = period;
        sink.emit(ProtocolEvent::parameter("epoch_update_period", period));
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn oracles(&self) -> &[Identity; ORACLE_SEATS] {
        &self.oracles
    }

    pub fn seat_of(&self, identity: &Identity) -> Option<usize> {
        self.oracles.iter().position(|o| o == identity)
    }

    pub fn finalized(&self) -> Option<FinalizedReport> {
        self.finalized
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn zero_epoch_timestamp(&self) -> u64 {
        self.zero_epoch_timestamp
    }

    pub fn epoch_duration(&self) -> u64 {
        self.epoch_duration
    }

    pub fn epoch_update_period(&self) -> u64 {
        self.epoch_update_period
    }
}

fn check_update_period(period: u64, epoch_duration: u64) -> StakingResult<()> {
    if period == 0 || period % epoch_duration != 0 {
        return Err(StakingError::invalid_parameter(
            "epoch_update_period",
            format!(
                "{} is not a positive multiple of epoch duration {}",
                period, epoch_duration
            ),
        ));
    }
    Ok(())
}
