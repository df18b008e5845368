//! Guards every action on the wallet being connected to the sale's chain.
use crate::{chain::ChainApi, error::PreconditionError};
use alloy::primitives::ChainId;
use serde::Serialize;
use tracing::{info, warn};

/// Whether the wallet is on the required chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum NetworkStatus {
    /// The connected chain has not been read yet.
    #[default]
    Unknown,
    /// The wallet is on the required chain.
    Correct,
    /// The wallet is on another chain.
    Incorrect {
        /// The connected chain.
        current: ChainId,
        /// The chain the sale lives on.
        required: ChainId,
    },
}

/// Shown when the wallet could not be switched programmatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum NetworkNotice {
    /// The user has to switch the network in the wallet.
    ManualSwitch {
        /// The chain to switch to.
        required: ChainId,
        /// Why the switch failed.
        reason: String,
    },
}

/// Tracks the connected chain.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    /// The chain the sale lives on.
    required: ChainId,
    /// The connected chain, if known.
    current: Option<ChainId>,
    /// Set after a failed switch until the network is correct.
    notice: Option<NetworkNotice>,
}

impl NetworkGuard {
    /// Creates a guard for `required`.
    pub fn new(required: ChainId) -> Self {
        Self { required, current: None, notice: None }
    }

    /// The chain the sale lives on.
    pub fn required(&self) -> ChainId {
        self.required
    }

    /// The connected chain, if known.
    pub fn current(&self) -> Option<ChainId> {
        self.current
    }

    /// The pending manual switch notice, if any.
    pub fn notice(&self) -> Option<&NetworkNotice> {
        self.notice.as_ref()
    }

    /// Records the connected chain.
    pub fn set_current(&mut self, chain_id: ChainId) {
        if self.current != Some(chain_id) {
            info!(chain_id, required = self.required, "Connected chain changed");
        }
        self.current = Some(chain_id);
        if self.is_correct() {
            self.notice = None;
        }
    }

    /// Status of the connected chain.
    pub fn status(&self) -> NetworkStatus {
        match self.current {
            None => NetworkStatus::Unknown,
            Some(current) if current == self.required => NetworkStatus::Correct,
            Some(current) => NetworkStatus::Incorrect { current, required: self.required },
        }
    }

    /// Whether the wallet is on the required chain.
    pub fn is_correct(&self) -> bool {
        self.current == Some(self.required)
    }

    /// Fails with [`PreconditionError::WrongNetwork`] unless the wallet is on the required chain.
    pub fn ensure_correct(&self) -> Result<(), PreconditionError> {
        if self.is_correct() {
            return Ok(());
        }
        Err(PreconditionError::WrongNetwork { current: self.current, required: self.required })
    }

    /// Asks the wallet to switch to the required chain.
    ///
    /// A failed switch is never fatal. It leaves a [`NetworkNotice::ManualSwitch`].
    pub async fn switch(&mut self, chain: &dyn ChainApi) -> NetworkStatus {
        if let Err(err) = chain.switch_chain(self.required).await {
            warn!(%err, required = self.required, "Failed to switch network");
            self.notice =
                Some(NetworkNotice::ManualSwitch { required: self.required, reason: err.to_string() });
            return self.status();
        }

        match chain.chain_id().await {
            Ok(chain_id) => self.set_current(chain_id),
            Err(err) => warn!(%err, "Failed to read chain id after switching"),
        }
        self.status()
    }
}
