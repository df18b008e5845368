use crate::types::Currency;
use alloy::primitives::{ChainId, U256};
use thiserror::Error;

/// Errors raised when an action is not possible in the current state.
///
/// All of these are recoverable by a user action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// The wallet is connected to a different chain.
    #[error("wrong network: connected to chain {current:?}, switch to chain {required}")]
    WrongNetwork {
        /// Chain the wallet is connected to, if known.
        current: Option<ChainId>,
        /// Chain the sale lives on.
        required: ChainId,
    },
    /// The sale is not active.
    #[error("the sale is not active")]
    SaleInactive,
    /// The sale state has not been read yet.
    #[error("sale data is not available yet")]
    SaleStateUnavailable,
    /// No token address is configured for the currency.
    #[error("{0} is not supported on this network")]
    UnsupportedCurrency(Currency),
    /// No amount has been committed yet.
    #[error("enter an amount first")]
    NoCommittedAmount,
    /// The displayed amount differs from the committed amount.
    #[error("finish editing the amount first")]
    DraftNotCommitted,
    /// The allowance has not been read yet.
    #[error("checking allowance")]
    AllowanceUnknown,
    /// The allowance does not cover the committed amount.
    #[error("approval required: allowance {allowance} is below {required}")]
    ApprovalRequired {
        /// Allowance currently authorised on-chain.
        allowance: U256,
        /// Amount required for the purchase, in minor units.
        required: U256,
    },
    /// The allowance already covers the committed amount.
    #[error("no approval is required")]
    ApprovalNotRequired,
    /// An approval is already in flight.
    #[error("an approval is already in progress")]
    ApprovalInProgress,
    /// The purchase has not been simulated successfully yet.
    #[error("the purchase is not ready yet")]
    SimulationNotReady,
    /// The simulated purchase no longer matches the committed amount or currency.
    #[error("the purchase changed, review it again")]
    StaleSimulation,
    /// A purchase is already in flight.
    #[error("a purchase is already in progress")]
    PurchaseInProgress,
    /// There is no purchase awaiting confirmation.
    #[error("there is no purchase to confirm")]
    NothingToConfirm,
}
