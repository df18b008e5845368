use super::{AmountError, ChainError};
use thiserror::Error;

/// Errors related to the dry run of a purchase.
///
/// A simulation error blocks submission entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// The sale contract rejected the call.
    #[error("cannot prepare transaction: {0}")]
    Reverted(String),
    /// The dry run could not be performed.
    #[error("cannot prepare transaction: simulation unavailable: {0}")]
    Unavailable(String),
    /// The quote price cannot be passed to the contract.
    #[error("cannot prepare transaction: invalid quote price")]
    InvalidQuote,
    /// The committed amount cannot be converted into minor units.
    #[error("cannot prepare transaction: {0}")]
    InvalidAmount(#[from] AmountError),
}

impl From<ChainError> for SimulationError {
    fn from(err: ChainError) -> Self {
        if err.is_revert() { Self::Reverted(err.to_string()) } else { Self::Unavailable(err.to_string()) }
    }
}
