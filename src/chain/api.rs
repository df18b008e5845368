//! Chain api.

use crate::{
    error::ChainError,
    types::{PurchaseCall, SaleState},
};
use alloy::primitives::{Address, B256, ChainId, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::{fmt::Debug, time::Duration};

/// Type alias for `Result<T, ChainError>`
pub type Result<T> = core::result::Result<T, ChainError>;

/// How a submitted transaction resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptOutcome {
    /// Mined successfully.
    Success,
    /// Mined but reverted.
    Reverted,
    /// Not mined within the timeout.
    TimedOut,
}

/// Chain API used by the purchase engine.
#[async_trait]
pub trait ChainApi: Debug + Send + Sync {
    /// The connected account.
    fn account(&self) -> Address;

    /// The sale contract. It is also the spender of approvals.
    fn sale_contract(&self) -> Address;

    /// Reads the chain the wallet is connected to.
    async fn chain_id(&self) -> Result<ChainId>;

    /// Asks the wallet to switch to `chain_id`.
    async fn switch_chain(&self, chain_id: ChainId) -> Result<()>;

    /// Reads the aggregate sale state and the current and next tiers.
    async fn sale_state(&self) -> Result<SaleState>;

    /// Reads the amount of `token` needed to buy `token_amount` sale tokens, in minor units.
    async fn required_pay_amount(&self, token: Address, token_amount: U256) -> Result<U256>;

    /// Reads the amount of `token` that `spender` may move on behalf of `owner`.
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;

    /// Dry-runs the purchase call.
    async fn simulate_purchase(&self, call: &PurchaseCall) -> Result<()>;

    /// Sends an approval of `amount` of `token` to `spender` and returns its hash.
    async fn send_approval(&self, token: Address, spender: Address, amount: U256) -> Result<B256>;

    /// Sends the purchase call and returns its hash.
    async fn send_purchase(&self, call: &PurchaseCall) -> Result<B256>;

    /// Waits up to `timeout` for the transaction to be mined.
    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<ReceiptOutcome>;
}
