//! Audit Events
//!
//! Events are observations for audit and replay. Nothing reads them back to
//! make decisions; the confirmation bitmask in `Proposed`, for instance, is
//! derived from proposal state at emission time.

use serde::{Deserialize, Serialize};

use super::types::{Amount, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// An oracle report was accepted. Bit `24 + seat` of `confirmations` is
    /// set for every seat currently proposing the same `(epoch, balance)`.
    Proposed {
        oracle: Identity,
        epoch: u64,
        balance: Amount,
        confirmations: u32,
    },
    Finalized {
        epoch: u64,
        balance: Amount,
        timestamp: u64,
    },
    Committed {
        total_value: Amount,
        total_receipts: Amount,
        timestamp: u64,
        rate: u128,
    },
    CommissionExtracted {
        treasury: Identity,
        amount: Amount,
        shares: Amount,
    },
    Deposited {
        account: Identity,
        amount: Amount,
        receipts: Amount,
    },
    WithdrawalRequested {
        account: Identity,
        receipts: Amount,
        amount: Amount,
    },
    Enqueued {
        account: Identity,
        amount: Amount,
    },
    QueueAdvanced {
        visited: u32,
        newly_covered: u32,
        covered_total: Amount,
    },
    Claimed {
        account: Identity,
        amount: Amount,
    },
    OracleSet {
        seat: usize,
        identity: Identity,
    },
    ParameterChanged {
        name: String,
        value: String,
    },
    AdminTransferred {
        from: Identity,
        to: Identity,
    },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Proposed { .. } => "proposed",
            Self::Finalized { .. } => "finalized",
            Self::Committed { .. } => "committed",
            Self::CommissionExtracted { .. } => "commission_extracted",
            Self::Deposited { .. } => "deposited",
            Self::WithdrawalRequested { .. } => "withdrawal_requested",
            Self::Enqueued { .. } => "enqueued",
            Self::QueueAdvanced { .. } => "queue_advanced",
            Self::Claimed { .. } => "claimed",
            Self::OracleSet { .. } => "oracle_set",
            Self::ParameterChanged { .. } => "parameter_changed",
            Self::AdminTransferred { .. } => "admin_transferred",
        }
    }

    pub(crate) fn parameter(name: &str, value: impl ToString) -> Self {
        Self::ParameterChanged {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Destination for emitted events.
pub trait EventSink {
    fn emit(&mut self, event: ProtocolEvent);
}

impl EventSink for Vec<ProtocolEvent> {
    fn emit(&mut self, event: ProtocolEvent) {
        tracing::trace!(kind = event.kind(), "event emitted");
        self.push(event);
    }
}
