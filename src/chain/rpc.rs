//! [`ChainApi`] implementation over an alloy provider.

use super::{ChainApi, ReceiptOutcome, Result};
use crate::{
    error::ChainError,
    types::{IERC20, ISale, PurchaseCall, SaleState, next_tier_from},
};
use alloy::{
    network::ReceiptResponse,
    primitives::{Address, B256, ChainId, U64, U256},
    providers::{
        DynProvider, PendingTransactionConfig, PendingTransactionError, Provider, WatchTxError,
    },
};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// [`ChainApi`] backed by a provider with a wallet for `account`.
#[derive(Debug, Clone)]
pub struct RpcChain {
    /// Provider with a wallet filler.
    provider: DynProvider,
    /// The account signing transactions.
    account: Address,
    /// The sale contract.
    sale: Address,
}

impl RpcChain {
    /// Creates a new [`RpcChain`].
    pub fn new(provider: DynProvider, account: Address, sale: Address) -> Self {
        Self { provider, account, sale }
    }
}

#[async_trait]
impl ChainApi for RpcChain {
    fn account(&self) -> Address {
        self.account
    }

    fn sale_contract(&self) -> Address {
        self.sale
    }

    async fn chain_id(&self) -> Result<ChainId> {
        Ok(self.provider.get_chain_id().await?)
    }

    #[instrument(skip(self))]
    async fn switch_chain(&self, chain_id: ChainId) -> Result<()> {
        self.provider
            .raw_request::<_, serde_json::Value>(
                "wallet_switchEthereumChain".into(),
                json!([{ "chainId": U64::from(chain_id) }]),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sale_state(&self) -> Result<SaleState> {
        let sale = ISale::new(self.sale, &self.provider);

        let active = sale.saleActive();
        let total_for_sale = sale.totalTokensForSale();
        let total_sold = sale.totalTokensSold();
        let current = sale.getCurrentTier();
        let next = sale.getNextTier();

        let (active, total_for_sale, total_sold, current, next) = tokio::try_join!(
            active.call(),
            total_for_sale.call(),
            total_sold.call(),
            current.call(),
            next.call(),
        )?;

        debug!(active, %total_sold, %total_for_sale, tier = %current.index, "Read sale state");

        Ok(SaleState::new(active, total_for_sale, total_sold, current.into(), next_tier_from(next))?)
    }

    #[instrument(skip(self))]
    async fn required_pay_amount(&self, token: Address, token_amount: U256) -> Result<U256> {
        Ok(ISale::new(self.sale, &self.provider)
            .getRequiredPayAmount(token, token_amount)
            .call()
            .await?)
    }

    #[instrument(skip(self))]
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        Ok(IERC20::new(token, &self.provider).allowance(owner, spender).call().await?)
    }

    #[instrument(skip(self))]
    async fn simulate_purchase(&self, call: &PurchaseCall) -> Result<()> {
        self.provider.call(call.into_transaction(self.account, self.sale)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_approval(&self, token: Address, spender: Address, amount: U256) -> Result<B256> {
        let pending = IERC20::new(token, &self.provider)
            .approve(spender, amount)
            .from(self.account)
            .send()
            .await?;
        Ok(*pending.tx_hash())
    }

    #[instrument(skip(self))]
    async fn send_purchase(&self, call: &PurchaseCall) -> Result<B256> {
        let pending =
            self.provider.send_transaction(call.into_transaction(self.account, self.sale)).await?;
        Ok(*pending.tx_hash())
    }

    #[instrument(skip(self))]
    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<ReceiptOutcome> {
        let pending = self
            .provider
            .watch_pending_transaction(
                PendingTransactionConfig::new(tx_hash).with_timeout(Some(timeout)),
            )
            .await?;

        match pending.await {
            Ok(_) => {}
            Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout)) => {
                return Ok(ReceiptOutcome::TimedOut);
            }
            Err(err) => return Err(err.into()),
        }

        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| ChainError::Unavailable(format!("missing receipt for {tx_hash}")))?;

        Ok(if ReceiptResponse::status(&receipt) {
            ReceiptOutcome::Success
        } else {
            ReceiptOutcome::Reverted
        })
    }
}
