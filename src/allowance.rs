//! Allowance tracking and the approval state machine.
use crate::{
    error::{PreconditionError, TransactionError},
    types::Currency,
};
use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use tracing::debug;

/// An allowance read from the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceRecord {
    /// Currency the allowance is for.
    pub currency: Currency,
    /// The account owning the tokens.
    pub owner: Address,
    /// The account allowed to spend them.
    pub spender: Address,
    /// The authorised amount, in minor units.
    pub amount: U256,
}

/// State of the approval flow for the active currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ApprovalState {
    /// The native asset needs no approval.
    #[default]
    NotApplicable,
    /// The allowance is being read.
    Checking,
    /// The allowance covers the committed amount.
    Sufficient,
    /// The allowance does not cover the committed amount.
    Insufficient {
        /// Amount to approve, in minor units.
        required: U256,
    },
    /// Waiting for the wallet to sign the approval.
    Approving {
        /// Amount being approved.
        required: U256,
    },
    /// The approval was submitted and waits for confirmation and a fresh allowance read.
    ApprovalConfirming {
        /// Amount being approved.
        required: U256,
        /// Hash of the approval transaction.
        #[serde(rename = "txHash")]
        tx_hash: B256,
    },
}

impl ApprovalState {
    /// Whether an approval is in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Approving { .. } | Self::ApprovalConfirming { .. })
    }

    /// Amount being approved, if an approval is in flight.
    fn in_flight_amount(&self) -> Option<U256> {
        match self {
            Self::Approving { required } | Self::ApprovalConfirming { required, .. } => {
                Some(*required)
            }
            _ => None,
        }
    }
}

/// Approval state machine for the active currency.
#[derive(Debug, Clone)]
pub struct ApprovalMachine {
    /// Current state.
    state: ApprovalState,
    /// The last authoritative allowance read, cleared whenever it may be stale.
    allowance: Option<AllowanceRecord>,
    /// Error of the last failed approval.
    last_error: Option<TransactionError>,
}

impl ApprovalMachine {
    /// Creates a machine for `currency`.
    pub fn new(currency: Currency) -> Self {
        let mut this =
            Self { state: ApprovalState::NotApplicable, allowance: None, last_error: None };
        this.reset(currency);
        this
    }

    /// Current state.
    pub fn state(&self) -> ApprovalState {
        self.state
    }

    /// The cached allowance, if it is known.
    pub fn allowance(&self) -> Option<&AllowanceRecord> {
        self.allowance.as_ref()
    }

    /// Error of the last failed approval.
    pub fn last_error(&self) -> Option<&TransactionError> {
        self.last_error.as_ref()
    }

    /// Drops the cached allowance and starts over for `currency`.
    pub fn reset(&mut self, currency: Currency) {
        self.state = if currency.is_native() {
            ApprovalState::NotApplicable
        } else {
            ApprovalState::Checking
        };
        self.allowance = None;
        self.last_error = None;
    }

    /// Whether an approval must happen before the purchase.
    ///
    /// Only a known allowance covering the committed amount makes this false.
    pub fn needs_approval(&self) -> bool {
        !matches!(self.state, ApprovalState::NotApplicable | ApprovalState::Sufficient)
    }

    /// Re-evaluates the state against the committed amount in minor units.
    ///
    /// In-flight approvals are never interrupted.
    pub fn evaluate(&mut self, required: Option<U256>) {
        if matches!(self.state, ApprovalState::NotApplicable) || self.state.is_in_flight() {
            return;
        }

        self.state = match (self.allowance, required) {
            (None, _) => ApprovalState::Checking,
            (Some(_), None) => ApprovalState::Sufficient,
            (Some(record), Some(required)) if record.amount >= required => {
                ApprovalState::Sufficient
            }
            (Some(_), Some(required)) => ApprovalState::Insufficient { required },
        };
    }

    /// Stores a periodic allowance read and re-evaluates.
    ///
    /// While an approval is in flight the read is kept but the state is left to the approval.
    pub fn apply_allowance(&mut self, record: AllowanceRecord, required: Option<U256>) {
        if matches!(self.state, ApprovalState::NotApplicable) {
            return;
        }
        self.allowance = Some(record);
        self.evaluate(required);
    }

    /// Starts an approval for the insufficient amount and returns it.
    pub fn begin(&mut self) -> Result<U256, PreconditionError> {
        match self.state {
            ApprovalState::Insufficient { required } => {
                self.state = ApprovalState::Approving { required };
                self.last_error = None;
                Ok(required)
            }
            ApprovalState::Approving { .. } | ApprovalState::ApprovalConfirming { .. } => {
                Err(PreconditionError::ApprovalInProgress)
            }
            ApprovalState::Checking => Err(PreconditionError::AllowanceUnknown),
            ApprovalState::NotApplicable | ApprovalState::Sufficient => {
                Err(PreconditionError::ApprovalNotRequired)
            }
        }
    }

    /// Records the hash of the signed approval.
    pub fn submitted(&mut self, tx_hash: B256) {
        if let ApprovalState::Approving { required } = self.state {
            self.state = ApprovalState::ApprovalConfirming { required, tx_hash };
        }
    }

    /// The approval was mined. The cached allowance is stale until [`Self::reconciled`].
    pub fn mined(&mut self) {
        if self.state.is_in_flight() {
            debug!(state = ?self.state, "Approval mined, dropping cached allowance");
            self.allowance = None;
        }
    }

    /// Completes the approval with a fresh allowance read.
    pub fn reconciled(&mut self, record: AllowanceRecord, required: Option<U256>) {
        let Some(approved) = self.state.in_flight_amount() else { return };

        self.allowance = Some(record);
        self.state = ApprovalState::Insufficient { required: approved };
        self.evaluate(required);
    }

    /// Aborts the approval with `err`.
    pub fn failed(&mut self, err: TransactionError) {
        let Some(required) = self.state.in_flight_amount() else { return };

        self.state = ApprovalState::Insufficient { required };
        self.last_error = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(amount: u64) -> AllowanceRecord {
        AllowanceRecord {
            currency: Currency::USDT,
            owner: Address::repeat_byte(1),
            spender: Address::repeat_byte(2),
            amount: U256::from(amount),
        }
    }

    #[test]
    fn native_never_needs_approval() {
        let mut machine = ApprovalMachine::new(Currency::ETH);
        assert_eq!(machine.state(), ApprovalState::NotApplicable);
        machine.evaluate(Some(U256::from(1)));
        machine.apply_allowance(record(0), Some(U256::from(1)));
        assert!(!machine.needs_approval());
        assert_eq!(machine.begin(), Err(PreconditionError::ApprovalNotRequired));
    }

    #[test]
    fn unknown_allowance_needs_approval() {
        let mut machine = ApprovalMachine::new(Currency::USDT);
        machine.evaluate(Some(U256::from(1)));
        assert_eq!(machine.state(), ApprovalState::Checking);
        assert!(machine.needs_approval());
        assert_eq!(machine.begin(), Err(PreconditionError::AllowanceUnknown));
    }

    #[test]
    fn approval_flow() {
        let required = U256::from(100_000_000u64);
        let mut machine = ApprovalMachine::new(Currency::USDT);
        machine.apply_allowance(record(0), Some(required));
        assert_eq!(machine.state(), ApprovalState::Insufficient { required });

        assert_eq!(machine.begin(), Ok(required));
        assert_eq!(machine.begin(), Err(PreconditionError::ApprovalInProgress));

        machine.submitted(B256::repeat_byte(9));
        assert!(machine.needs_approval());

        // a periodic read racing the confirmation does not settle the approval
        machine.apply_allowance(record(100_000_000), Some(required));
        assert!(machine.state().is_in_flight());

        machine.mined();
        assert!(machine.allowance().is_none());
        assert!(machine.needs_approval());

        machine.reconciled(record(100_000_000), Some(required));
        assert_eq!(machine.state(), ApprovalState::Sufficient);
        assert!(!machine.needs_approval());

        // a larger amount needs a new approval
        machine.evaluate(Some(required + U256::from(1)));
        assert_eq!(machine.state(), ApprovalState::Insufficient { required: required + U256::from(1) });
    }

    #[test]
    fn failure_returns_to_insufficient() {
        let required = U256::from(5);
        let mut machine = ApprovalMachine::new(Currency::USDC);
        machine.apply_allowance(record(0), Some(required));
        machine.begin().unwrap();
        machine.failed(TransactionError::TimedOut(Duration::from_secs(30)));

        assert_eq!(machine.state(), ApprovalState::Insufficient { required });
        assert_eq!(machine.last_error(), Some(&TransactionError::TimedOut(Duration::from_secs(30))));

        machine.reset(Currency::USDC);
        assert!(machine.last_error().is_none());
        assert!(machine.allowance().is_none());
    }
}
