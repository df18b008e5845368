//! Purchase engine error types.
use serde::Serialize;
use thiserror::Error;

mod amount;
pub use amount::AmountError;

mod chain;
pub use chain::ChainError;

mod feed;
pub use feed::FeedError;

mod precondition;
pub use precondition::PreconditionError;

mod sale;
pub use sale::SaleStateError;

mod simulation;
pub use simulation::SimulationError;

mod transaction;
pub use transaction::TransactionError;

/// Coarse classification of a [`PurchaseError`], used by the presentation layer to decide how an
/// error is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The user entered an invalid amount. Never reaches the chain.
    Input,
    /// A precondition for the action is not met and can be fixed by the user.
    Precondition,
    /// The dry run of the purchase call failed.
    Simulation,
    /// A submitted approval or purchase failed, was rejected or timed out.
    Transaction,
    /// A read from the chain or the price feed failed.
    Read,
}

/// The overarching error type returned by the purchase engine.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// Errors related to user supplied amounts.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// Errors related to unmet preconditions.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    /// Errors related to purchase simulation.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    /// Errors related to submitted transactions.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// Errors related to the external price feed.
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// An error occurred talking to the chain.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The purchase service is no longer running.
    #[error("purchase service has stopped")]
    ServiceStopped,
    /// An internal error occurred.
    #[error(transparent)]
    InternalError(#[from] eyre::Error),
}

impl PurchaseError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Amount(_) => ErrorKind::Input,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Simulation(_) => ErrorKind::Simulation,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::Feed(_) | Self::Chain(_) | Self::ServiceStopped | Self::InternalError(_) => {
                ErrorKind::Read
            }
        }
    }
}

impl From<SaleStateError> for PurchaseError {
    fn from(err: SaleStateError) -> Self {
        Self::Chain(err.into())
    }
}

/// An error as shown to the user: its kind and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfacedError {
    /// Kind of the error.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

impl From<&PurchaseError> for SurfacedError {
    fn from(err: &PurchaseError) -> Self {
        Self { kind: err.kind(), message: err.to_string() }
    }
}
