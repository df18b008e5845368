use super::SaleStateError;
use alloy::{
    providers::PendingTransactionError,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

/// EIP-1193 error code returned by wallets when the user rejects a request.
const USER_REJECTED_CODE: i64 = 4001;

/// Errors returned while talking to the chain or the wallet.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An error occurred talking to RPC.
    #[error(transparent)]
    Rpc(#[from] RpcError<TransportErrorKind>),
    /// A contract call failed.
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
    /// Watching a pending transaction failed.
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
    /// The user rejected the request in the wallet.
    #[error("request rejected by the wallet: {0}")]
    Rejected(String),
    /// The call reverted.
    #[error("call reverted: {0}")]
    Reverted(String),
    /// The node could not serve the request.
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    /// The sale contract returned an inconsistent state.
    #[error(transparent)]
    InvalidSaleState(#[from] SaleStateError),
}

impl ChainError {
    /// Whether the wallet reported that the user rejected the request.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Rejected(_) => true,
            Self::Rpc(err) => is_rejection_response(err),
            Self::Contract(alloy::contract::Error::TransportError(err)) => {
                is_rejection_response(err)
            }
            _ => false,
        }
    }

    /// Whether the error is a revert of the called contract.
    pub fn is_revert(&self) -> bool {
        match self {
            Self::Reverted(_) => true,
            Self::Rpc(err) => err.as_error_resp().is_some_and(|resp| resp.as_revert_data().is_some()),
            Self::Contract(alloy::contract::Error::TransportError(err)) => {
                err.as_error_resp().is_some_and(|resp| resp.as_revert_data().is_some())
            }
            _ => false,
        }
    }
}

fn is_rejection_response(err: &RpcError<TransportErrorKind>) -> bool {
    err.as_error_resp().is_some_and(|resp| resp.code == USER_REJECTED_CODE)
}
