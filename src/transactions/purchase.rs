//! Purchase transaction state machine.
use super::PreparedPurchase;
use crate::error::{PreconditionError, TransactionError};
use alloy::primitives::B256;

/// State of the purchase transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PurchaseState {
    /// No purchase in progress.
    #[default]
    Idle,
    /// A simulated purchase waits for the user to confirm it.
    AwaitingConfirmation(PreparedPurchase),
    /// Waiting for the wallet to sign the purchase.
    AwaitingSignature(PreparedPurchase),
    /// The purchase was broadcast.
    Submitted(B256),
    /// Waiting for the purchase to be mined.
    Confirming(B256),
    /// The purchase was mined successfully.
    Confirmed(B256),
    /// The purchase was mined but reverted.
    Reverted(B256),
    /// The purchase was rejected, timed out or could not be submitted.
    Failed(TransactionError),
}

impl PurchaseState {
    /// Short label of the state.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingConfirmation(_) => "awaitingConfirmation",
            Self::AwaitingSignature(_) => "awaitingSignature",
            Self::Submitted(_) => "submitted",
            Self::Confirming(_) => "confirming",
            Self::Confirmed(_) => "confirmed",
            Self::Reverted(_) => "reverted",
            Self::Failed(_) => "failed",
        }
    }

    /// Hash of the purchase transaction, once it was broadcast.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Submitted(hash)
            | Self::Confirming(hash)
            | Self::Confirmed(hash)
            | Self::Reverted(hash) => Some(*hash),
            _ => None,
        }
    }
}

/// Drives a purchase from review to a terminal state.
#[derive(Debug, Clone, Default)]
pub struct PurchaseMachine {
    state: PurchaseState,
}

impl PurchaseMachine {
    /// Current state.
    pub fn state(&self) -> &PurchaseState {
        &self.state
    }

    /// Whether the purchase is between signing and a terminal state.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            PurchaseState::AwaitingSignature(_)
                | PurchaseState::Submitted(_)
                | PurchaseState::Confirming(_)
        )
    }

    /// Returns to [`PurchaseState::Idle`].
    pub fn reset(&mut self) {
        self.state = PurchaseState::Idle;
    }

    /// Presents a simulated purchase for confirmation.
    pub fn review(&mut self, prepared: PreparedPurchase) -> Result<(), PreconditionError> {
        if self.is_busy() {
            return Err(PreconditionError::PurchaseInProgress);
        }
        self.state = PurchaseState::AwaitingConfirmation(prepared);
        Ok(())
    }

    /// Moves the reviewed purchase to signing and returns it.
    pub fn sign(&mut self) -> Result<PreparedPurchase, PreconditionError> {
        match &self.state {
            PurchaseState::AwaitingConfirmation(prepared) => {
                let prepared = prepared.clone();
                self.state = PurchaseState::AwaitingSignature(prepared.clone());
                Ok(prepared)
            }
            _ if self.is_busy() => Err(PreconditionError::PurchaseInProgress),
            _ => Err(PreconditionError::NothingToConfirm),
        }
    }

    /// The signed purchase was broadcast.
    pub fn submitted(&mut self, tx_hash: B256) {
        if matches!(self.state, PurchaseState::AwaitingSignature(_)) {
            self.state = PurchaseState::Submitted(tx_hash);
        }
    }

    /// The purchase is being watched for inclusion.
    pub fn confirming(&mut self, tx_hash: B256) {
        if matches!(self.state, PurchaseState::Submitted(hash) if hash == tx_hash) {
            self.state = PurchaseState::Confirming(tx_hash);
        }
    }

    /// The purchase was mined successfully.
    pub fn confirmed(&mut self, tx_hash: B256) {
        self.state = PurchaseState::Confirmed(tx_hash);
    }

    /// The purchase was mined but reverted.
    pub fn reverted(&mut self, tx_hash: B256) {
        self.state = PurchaseState::Reverted(tx_hash);
    }

    /// The purchase failed before it was mined.
    pub fn failed(&mut self, err: TransactionError) {
        self.state = PurchaseState::Failed(err);
    }
}
