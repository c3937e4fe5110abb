//! Staking Core Errors
//!
//! Every rejected call surfaces exactly one [`StakingError`] and leaves all
//! component state untouched. Nothing retries internally; callers resubmit
//! with corrected inputs (a later epoch, more liquidity, another caller).

use super::types::{Amount, Identity};

/// Coarse grouping of errors, used for logging and by callers that only care
/// about the class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Authorization,
    Temporal,
    Consistency,
    Queue,
    Ledger,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    // Authorization
    /// Caller lacks the required oracle seat or admin capability.
    Unauthorized { caller: Identity },
    /// Oracle seat index outside `0..3`.
    InvalidSeat { seat: usize },
    /// Identity already occupies another oracle seat.
    DuplicateOracle { identity: Identity, seat: usize },

    // Temporal
    /// Report targets an epoch that has not started yet.
    FutureEpoch { epoch: u64, max_epoch: Option<u64> },
    /// Report targets an epoch older than the finalized one.
    EpochMustIncrease { epoch: u64, finalized: u64 },
    /// Strict mode only accepts the next publishable epoch.
    OnlyPublishableEpoch { epoch: u64, publishable: Option<u64> },
    /// Oracle timestamp not newer than the newest snapshot.
    TimestampsTooClose { candidate: u64, newest: u64 },

    // Consistency
    /// Confirmation of an already finalized epoch with a different balance.
    BalanceMismatch {
        epoch: u64,
        finalized: Amount,
        proposed: Amount,
    },
    /// Candidate rate moved further than `maxRateDeviation` allows.
    RateDeviationTooBig {
        current_rate: u128,
        candidate_rate: u128,
        deviation: u128,
        max_deviation: u32,
    },
    /// Candidate total value or receipt supply is zero.
    EmptyTotals { total_value: Amount, total_receipts: Amount },
    /// No epoch has been finalized yet.
    NotInitialized,

    // Queue
    /// Account already has a withdrawal in the queue.
    AlreadyPending { account: Identity },
    /// Account has nothing queued.
    NoPendingWithdrawal { account: Identity },
    /// Withdrawal not yet covered by liquidity, or not at the queue head.
    InsufficientLiquidityOrQueueDepth { account: Identity },

    // Ledger
    InsufficientReceipts {
        account: Identity,
        balance: Amount,
        requested: Amount,
    },
    InsufficientPoolBalance { balance: Amount, requested: Amount },
    ZeroAmount,

    // Configuration
    InvalidParameter { name: &'static str, reason: String },
}

impl StakingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized { .. } | Self::InvalidSeat { .. } | Self::DuplicateOracle { .. } => {
                ErrorCategory::Authorization
            }
            Self::FutureEpoch { .. }
            | Self::EpochMustIncrease { .. }
            | Self::OnlyPublishableEpoch { .. }
            | Self::TimestampsTooClose { .. } => ErrorCategory::Temporal,
            Self::BalanceMismatch { .. }
            | Self::RateDeviationTooBig { .. }
            | Self::EmptyTotals { .. }
            | Self::NotInitialized => ErrorCategory::Consistency,
            Self::AlreadyPending { .. }
            | Self::NoPendingWithdrawal { .. }
            | Self::InsufficientLiquidityOrQueueDepth { .. } => ErrorCategory::Queue,
            Self::InsufficientReceipts { .. }
            | Self::InsufficientPoolBalance { .. }
            | Self::ZeroAmount => ErrorCategory::Ledger,
            Self::InvalidParameter { .. } => ErrorCategory::Configuration,
        }
    }

    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StakingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized { caller } => write!(f, "unauthorized caller {}", caller),
            Self::InvalidSeat { seat } => write!(f, "invalid oracle seat {} (expected 0..=2)", seat),
            Self::DuplicateOracle { identity, seat } => {
                write!(f, "identity {} already occupies oracle seat {}", identity, seat)
            }
            Self::FutureEpoch { epoch, max_epoch } => match max_epoch {
                Some(max) => write!(f, "epoch {} is in the future (max {})", epoch, max),
                None => write!(f, "epoch {} is in the future (epoch zero not started)", epoch),
            },
            Self::EpochMustIncrease { epoch, finalized } => {
                write!(f, "epoch {} is older than finalized epoch {}", epoch, finalized)
            }
            Self::OnlyPublishableEpoch { epoch, publishable } => match publishable {
                Some(p) => write!(f, "epoch {} is not publishable (expected {})", epoch, p),
                None => write!(f, "epoch {} is not publishable (nothing publishable yet)", epoch),
            },
            Self::TimestampsTooClose { candidate, newest } => write!(
                f,
                "oracle timestamp {} is not newer than snapshot timestamp {}",
                candidate, newest
            ),
            Self::BalanceMismatch {
                epoch,
                finalized,
                proposed,
            } => write!(
                f,
                "epoch {} finalized with balance {}, got {}",
                epoch, finalized, proposed
            ),
            Self::RateDeviationTooBig {
                current_rate,
                candidate_rate,
                deviation,
                max_deviation,
            } => write!(
                f,
                "rate deviation {} exceeds max {} (current {}, candidate {})",
                deviation, max_deviation, current_rate, candidate_rate
            ),
            Self::EmptyTotals {
                total_value,
                total_receipts,
            } => write!(
                f,
                "empty totals: value {}, receipts {}",
                total_value, total_receipts
            ),
            Self::NotInitialized => write!(f, "no epoch finalized yet"),
            Self::AlreadyPending { account } => {
                write!(f, "account {} already has a pending withdrawal", account)
            }
            Self::NoPendingWithdrawal { account } => {
                write!(f, "account {} has no pending withdrawal", account)
            }
            Self::InsufficientLiquidityOrQueueDepth { account } => write!(
                f,
                "withdrawal for {} not claimable yet (liquidity or queue position)",
                account
            ),
            Self::InsufficientReceipts {
                account,
                balance,
                requested,
            } => write!(
                f,
                "account {} holds {} receipts, requested {}",
                account, balance, requested
            ),
            Self::InsufficientPoolBalance { balance, requested } => {
                write!(f, "pool balance {} below requested {}", balance, requested)
            }
            Self::ZeroAmount => write!(f, "amount must be non-zero"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter {}: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for StakingError {}

pub type StakingResult<T> = Result<T, StakingError>;
