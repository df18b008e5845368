use crate::{
    allowance::AllowanceRecord,
    chain::ReceiptOutcome,
    error::{ChainError, TransactionError},
    types::Currency,
};
use alloy::primitives::B256;
use std::time::Duration;

/// Results reported back to the [`PurchaseOrchestrator`](super::PurchaseOrchestrator).
///
/// Every result of background work carries the epoch it was started in. Results from an older
/// epoch are discarded.
#[derive(Debug)]
pub enum OrchestratorEvent {
    /// Periodic refresh of the connected chain and the allowance.
    Tick,
    /// An allowance read finished.
    AllowanceRead {
        /// Epoch the read was started in.
        epoch: u64,
        /// Currency the read was for.
        currency: Currency,
        /// The read allowance.
        result: Result<AllowanceRecord, ChainError>,
    },
    /// The approval was signed and broadcast.
    ApprovalSubmitted { epoch: u64, tx_hash: B256 },
    /// The approval was mined. The allowance is re-read next.
    ApprovalMined { epoch: u64, tx_hash: B256 },
    /// The allowance reflects the mined approval.
    AllowanceReconciled { epoch: u64, record: AllowanceRecord },
    /// The approval was rejected, reverted, timed out or never reflected.
    ApprovalFailed { epoch: u64, error: TransactionError },
    /// The purchase was signed and broadcast.
    PurchaseSubmitted { epoch: u64, tx_hash: B256 },
    /// The purchase is being watched for inclusion.
    PurchaseConfirming { epoch: u64, tx_hash: B256 },
    /// The purchase resolved.
    PurchaseResolved { epoch: u64, tx_hash: B256, outcome: ReceiptOutcome, elapsed: Duration },
    /// The purchase failed before it was mined.
    PurchaseFailed { epoch: u64, error: TransactionError },
}

impl OrchestratorEvent {
    /// Epoch the event belongs to, if it is the result of background work.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Tick => None,
            Self::AllowanceRead { epoch, .. }
            | Self::ApprovalSubmitted { epoch, .. }
            | Self::ApprovalMined { epoch, .. }
            | Self::AllowanceReconciled { epoch, .. }
            | Self::ApprovalFailed { epoch, .. }
            | Self::PurchaseSubmitted { epoch, .. }
            | Self::PurchaseConfirming { epoch, .. }
            | Self::PurchaseResolved { epoch, .. }
            | Self::PurchaseFailed { epoch, .. } => Some(*epoch),
        }
    }
}
