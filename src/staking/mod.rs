//! Liquid Staking Core
//!
//! Accounting and agreement core of a liquid-staking pool: deposits become
//! yield-bearing receipts, a small oracle committee reports the external
//! staked balance, and exits settle first-in-first-out as liquidity arrives.
//!
//! # Architecture
//!
//! ```text
//!  oracle reports          commit()                 deposit / withdraw
//!        │                    │                             │
//!        ▼                    ▼                             ▼
//! ┌────────────────┐   ┌────────────────────┐   ┌────────────────────┐
//! │OracleConsensus │──▶│ SnapshotRateEngine │──▶│    StakingPool     │
//! │ 2-of-3 quorum  │   │ 2-slot ring, rate  │   │ (facade, events)   │
//! └────────────────┘   │ commission         │   └─────────┬──────────┘
//!                      └────────────────────┘             │
//!                                                         ▼
//!                                              ┌────────────────────┐
//!                                              │  WithdrawalQueue   │
//!                                              │ FIFO, bounded walk │
//!                                              └────────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Clock**: injected [`Clock`]; tests use [`ManualClock`]
//! - **Arithmetic**: integer only, big-int intermediates, no panics in `rate`
//! - **Atomicity**: every rejected call leaves all state unchanged
//! - **Bounded work**: queue advance visits at most `loop_limit` nodes

pub mod access;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod journal;
pub mod ledger;
pub mod math;
pub mod oracle_consensus;
pub mod pool;
pub mod snapshot_rate;
pub mod types;
pub mod withdrawal_queue;

#[cfg(test)]
mod pool_tests;
#[cfg(test)]
mod withdrawal_queue_tests;

pub use access::{AdminGrant, Authority};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{ConfigViolation, StakingConfig};
pub use errors::{ErrorCategory, StakingError, StakingResult};
pub use events::{EventSink, ProtocolEvent};
pub use journal::EventJournal;
pub use ledger::{InMemoryPool, InMemoryReceiptToken, PoolLedger, ReceiptToken};
pub use oracle_consensus::{FinalizedReport, OracleConsensus, Proposal, SaveOutcome};
pub use pool::{PoolState, StakingPool};
pub use snapshot_rate::{CommissionOutcome, NetFlows, Snapshot, SnapshotRateEngine};
pub use types::{Amount, Identity, ORACLE_SEATS, QUORUM, RATE_DENOMINATOR, SCALE};
pub use withdrawal_queue::{AdvanceOutcome, QueueEntry, WithdrawalQueue};
