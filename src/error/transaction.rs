use super::ChainError;
use alloy::primitives::{B256, U256};
use std::time::Duration;
use thiserror::Error;

/// Errors related to submitted approval and purchase transactions.
///
/// None of these are retried automatically; the user restarts the flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The wallet rejected the transaction.
    #[error("transaction rejected in the wallet")]
    Rejected,
    /// The transaction was mined but reverted.
    #[error("transaction {0} reverted")]
    Reverted(B256),
    /// The transaction did not resolve in time.
    #[error("transaction timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    /// The transaction could not be submitted.
    #[error("failed to submit transaction: {0}")]
    Submission(String),
    /// The approval confirmed but the allowance read does not reflect it.
    #[error("allowance {allowance} does not cover the approved amount {required}")]
    AllowanceNotReflected {
        /// The approved amount.
        required: U256,
        /// The allowance read after the approval.
        allowance: U256,
    },
}

impl From<ChainError> for TransactionError {
    fn from(err: ChainError) -> Self {
        if err.is_rejection() { Self::Rejected } else { Self::Submission(err.to_string()) }
    }
}
