//! [`ChainApi`] implementation in-memory. For testing only.

use super::{ChainApi, ReceiptOutcome, Result};
use crate::{
    constants::DEFAULT_REQUIRED_CHAIN_ID,
    error::ChainError,
    types::{PricingTier, PurchaseCall, SaleState},
};
use alloy::primitives::{Address, B256, ChainId, U256, keccak256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};

/// How the in-memory chain resolves a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxBehavior {
    /// Signed and mined successfully.
    #[default]
    Confirm,
    /// Signed and mined, but reverted.
    Revert,
    /// Rejected in the wallet.
    Reject,
    /// Signed but never mined within the timeout.
    Hang,
    /// Never signed. The wallet prompt stays open.
    NeverSigned,
}

/// How the in-memory chain answers allowance reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllowanceReads {
    /// Returns the stored allowance.
    #[default]
    Serve,
    /// Fails every read.
    Fail,
    /// Never returns.
    Stall,
}

/// Effect applied once a transaction is mined.
#[derive(Debug, Clone)]
enum Effect {
    Approval { token: Address, spender: Address, amount: U256 },
    Purchase(PurchaseCall),
}

/// Number of calls made against the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Sale state reads.
    pub sale_reads: usize,
    /// Allowance reads.
    pub allowance_reads: usize,
    /// `getRequiredPayAmount` reads.
    pub required_pay_reads: usize,
    /// Purchase simulations.
    pub simulations: usize,
    /// Approvals sent.
    pub approvals: usize,
    /// Purchases sent.
    pub purchases: usize,
}

#[derive(Debug)]
struct Inner {
    chain_id: ChainId,
    switch_fails: bool,
    sale: SaleState,
    allowances: HashMap<(Address, Address, Address), U256>,
    /// Allowance values still served for a number of reads after an approval is mined.
    lagging_allowances: HashMap<(Address, Address, Address), (U256, u32)>,
    allowance_lag: u32,
    allowance_reads: AllowanceReads,
    simulation_error: Option<String>,
    approval_behavior: TxBehavior,
    purchase_behavior: TxBehavior,
    pending: HashMap<B256, (Effect, TxBehavior)>,
    nonce: u64,
    counts: CallCounts,
}

/// [`ChainApi`] implementation in-memory. Used for testing
#[derive(Debug)]
pub struct InMemoryChain {
    account: Address,
    sale_contract: Address,
    inner: Mutex<Inner>,
}

impl Default for InMemoryChain {
    fn default() -> Self {
        let tier = PricingTier {
            index: 0,
            start_amount: U256::ZERO,
            end_amount: U256::from(10_000_000u64) * U256::from(10u64).pow(U256::from(18)),
            // 0.001 per token
            price: U256::from(1_000u64),
        };
        let next = PricingTier {
            index: 1,
            start_amount: tier.end_amount,
            end_amount: tier.end_amount * U256::from(2),
            price: U256::from(2_000u64),
        };
        let sale = SaleState {
            active: true,
            total_for_sale: next.end_amount,
            total_sold: U256::ZERO,
            current_tier: tier,
            next_tier: Some(next),
        };

        Self {
            account: Address::repeat_byte(0xaa),
            sale_contract: Address::repeat_byte(0x5a),
            inner: Mutex::new(Inner {
                chain_id: DEFAULT_REQUIRED_CHAIN_ID,
                switch_fails: false,
                sale,
                allowances: HashMap::new(),
                lagging_allowances: HashMap::new(),
                allowance_lag: 0,
                allowance_reads: AllowanceReads::Serve,
                simulation_error: None,
                approval_behavior: TxBehavior::Confirm,
                purchase_behavior: TxBehavior::Confirm,
                pending: HashMap::new(),
                nonce: 0,
                counts: CallCounts::default(),
            }),
        }
    }
}

impl InMemoryChain {
    /// Sets the connected chain.
    pub fn with_chain_id(self, chain_id: ChainId) -> Self {
        self.inner.lock().chain_id = chain_id;
        self
    }

    /// Makes network switches fail.
    pub fn with_switch_failure(self) -> Self {
        self.inner.lock().switch_fails = true;
        self
    }

    /// Sets the sale state.
    pub fn with_sale(self, sale: SaleState) -> Self {
        self.inner.lock().sale = sale;
        self
    }

    /// Sets the allowance of `token` from the connected account to the sale contract.
    pub fn with_allowance(self, token: Address, amount: U256) -> Self {
        let key = (token, self.account, self.sale_contract);
        self.inner.lock().allowances.insert(key, amount);
        self
    }

    /// Serves the previous allowance for `reads` reads after an approval is mined.
    pub fn with_allowance_lag(self, reads: u32) -> Self {
        self.inner.lock().allowance_lag = reads;
        self
    }

    /// Makes allowance reads fail.
    pub fn with_failing_allowance_reads(self) -> Self {
        self.set_allowance_reads(AllowanceReads::Fail);
        self
    }

    /// Makes purchase simulations revert with `reason`.
    pub fn with_simulation_failure(self, reason: impl Into<String>) -> Self {
        self.inner.lock().simulation_error = Some(reason.into());
        self
    }

    /// Sets how approvals resolve.
    pub fn with_approval_behavior(self, behavior: TxBehavior) -> Self {
        self.inner.lock().approval_behavior = behavior;
        self
    }

    /// Sets how purchases resolve.
    pub fn with_purchase_behavior(self, behavior: TxBehavior) -> Self {
        self.inner.lock().purchase_behavior = behavior;
        self
    }

    /// Changes the connected chain, as if the user switched in the wallet.
    pub fn set_chain_id(&self, chain_id: ChainId) {
        self.inner.lock().chain_id = chain_id;
    }

    /// Changes how allowance reads are answered.
    pub fn set_allowance_reads(&self, reads: AllowanceReads) {
        self.inner.lock().allowance_reads = reads;
    }

    /// Changes how approvals resolve.
    pub fn set_approval_behavior(&self, behavior: TxBehavior) {
        self.inner.lock().approval_behavior = behavior;
    }

    /// Makes purchase simulations succeed again.
    pub fn clear_simulation_failure(&self) {
        self.inner.lock().simulation_error = None;
    }

    /// Returns the current sale state.
    pub fn sale(&self) -> SaleState {
        self.inner.lock().sale.clone()
    }

    /// Returns the calls made so far.
    pub fn counts(&self) -> CallCounts {
        self.inner.lock().counts
    }

    fn next_hash(inner: &mut Inner) -> B256 {
        inner.nonce += 1;
        keccak256(inner.nonce.to_be_bytes())
    }

    fn apply(&self, inner: &mut Inner, effect: Effect) {
        match effect {
            Effect::Approval { token, spender, amount } => {
                let key = (token, self.account, spender);
                let previous = inner.allowances.insert(key, amount).unwrap_or_default();
                if inner.allowance_lag > 0 {
                    inner.lagging_allowances.insert(key, (previous, inner.allowance_lag));
                }
            }
            Effect::Purchase(call) => {
                let price = inner.sale.current_tier.price;
                let decimals = U256::from(10u64).pow(U256::from(18));
                let tokens = match &call {
                    PurchaseCall::Native { value, quote_price, .. } => *value * *quote_price / price,
                    PurchaseCall::Token { token, amount } => {
                        let key = (*token, self.account, self.sale_contract);
                        let allowance = inner.allowances.entry(key).or_default();
                        *allowance = allowance.saturating_sub(*amount);
                        *amount * decimals / price
                    }
                };
                inner.sale.total_sold =
                    (inner.sale.total_sold + tokens).min(inner.sale.total_for_sale);
            }
        }
    }
}

#[async_trait]
impl ChainApi for InMemoryChain {
    fn account(&self) -> Address {
        self.account
    }

    fn sale_contract(&self) -> Address {
        self.sale_contract
    }

    async fn chain_id(&self) -> Result<ChainId> {
        Ok(self.inner.lock().chain_id)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.switch_fails {
            return Err(ChainError::Rejected("wallet_switchEthereumChain rejected".into()));
        }
        inner.chain_id = chain_id;
        Ok(())
    }

    async fn sale_state(&self) -> Result<SaleState> {
        let mut inner = self.inner.lock();
        inner.counts.sale_reads += 1;
        Ok(inner.sale.clone())
    }

    async fn required_pay_amount(&self, _token: Address, token_amount: U256) -> Result<U256> {
        let mut inner = self.inner.lock();
        inner.counts.required_pay_reads += 1;

        // rounds up in favour of the sale
        let decimals = U256::from(10u64).pow(U256::from(18));
        let product = token_amount * inner.sale.current_tier.price;
        Ok(product.div_ceil(decimals))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let reads = {
            let mut inner = self.inner.lock();
            inner.counts.allowance_reads += 1;
            inner.allowance_reads
        };
        match reads {
            AllowanceReads::Serve => {}
            AllowanceReads::Fail => {
                return Err(ChainError::Unavailable("allowance read failed".into()));
            }
            AllowanceReads::Stall => std::future::pending::<()>().await,
        }

        let mut inner = self.inner.lock();
        let key = (token, owner, spender);
        if let Some((lagging, reads)) = inner.lagging_allowances.get_mut(&key) {
            let lagging = *lagging;
            *reads -= 1;
            if *reads == 0 {
                inner.lagging_allowances.remove(&key);
            }
            return Ok(lagging);
        }

        Ok(inner.allowances.get(&key).copied().unwrap_or_default())
    }

    async fn simulate_purchase(&self, call: &PurchaseCall) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.counts.simulations += 1;

        if let Some(reason) = &inner.simulation_error {
            return Err(ChainError::Reverted(reason.clone()));
        }
        if !inner.sale.active {
            return Err(ChainError::Reverted("sale is not active".into()));
        }
        if let PurchaseCall::Token { token, amount } = call {
            let key = (*token, self.account, self.sale_contract);
            if inner.allowances.get(&key).copied().unwrap_or_default() < *amount {
                return Err(ChainError::Reverted("insufficient allowance".into()));
            }
        }
        Ok(())
    }

    async fn send_approval(&self, token: Address, spender: Address, amount: U256) -> Result<B256> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.counts.approvals += 1;
            inner.approval_behavior
        };

        match behavior {
            TxBehavior::Reject => Err(ChainError::Rejected("user rejected approval".into())),
            TxBehavior::NeverSigned => std::future::pending().await,
            _ => {
                let mut inner = self.inner.lock();
                let hash = Self::next_hash(&mut inner);
                inner.pending.insert(hash, (Effect::Approval { token, spender, amount }, behavior));
                Ok(hash)
            }
        }
    }

    async fn send_purchase(&self, call: &PurchaseCall) -> Result<B256> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.counts.purchases += 1;
            inner.purchase_behavior
        };

        match behavior {
            TxBehavior::Reject => Err(ChainError::Rejected("user rejected purchase".into())),
            TxBehavior::NeverSigned => std::future::pending().await,
            _ => {
                let mut inner = self.inner.lock();
                let hash = Self::next_hash(&mut inner);
                inner.pending.insert(hash, (Effect::Purchase(call.clone()), behavior));
                Ok(hash)
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<ReceiptOutcome> {
        let pending = self.inner.lock().pending.remove(&tx_hash);
        let Some((effect, behavior)) = pending else {
            return Err(ChainError::Unavailable(format!("unknown transaction {tx_hash}")));
        };

        match behavior {
            TxBehavior::Revert => Ok(ReceiptOutcome::Reverted),
            TxBehavior::Hang => {
                tokio::time::sleep(timeout).await;
                Ok(ReceiptOutcome::TimedOut)
            }
            _ => {
                let mut inner = self.inner.lock();
                self.apply(&mut inner, effect);
                Ok(ReceiptOutcome::Success)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approval_is_applied_on_receipt() {
        let chain = InMemoryChain::default();
        let (token, owner, spender) =
            (Address::repeat_byte(1), chain.account(), chain.sale_contract());

        let hash = chain.send_approval(token, spender, U256::from(10)).await.unwrap();
        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::ZERO);

        let outcome = chain.wait_for_receipt(hash, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ReceiptOutcome::Success);
        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::from(10));
        assert_eq!(chain.counts().allowance_reads, 2);
    }

    #[tokio::test]
    async fn failing_allowance_reads_are_counted() {
        let chain = InMemoryChain::default()
            .with_allowance(Address::repeat_byte(1), U256::from(5))
            .with_failing_allowance_reads();
        let (token, owner, spender) =
            (Address::repeat_byte(1), chain.account(), chain.sale_contract());

        assert!(chain.allowance(token, owner, spender).await.is_err());
        chain.set_allowance_reads(AllowanceReads::Serve);
        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::from(5));
        assert_eq!(chain.counts().allowance_reads, 2);
    }

    #[tokio::test]
    async fn lagging_allowance() {
        let chain = InMemoryChain::default().with_allowance_lag(2);
        let (token, owner, spender) =
            (Address::repeat_byte(1), chain.account(), chain.sale_contract());

        let hash = chain.send_approval(token, spender, U256::from(10)).await.unwrap();
        chain.wait_for_receipt(hash, Duration::from_secs(1)).await.unwrap();

        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::ZERO);
        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::ZERO);
        assert_eq!(chain.allowance(token, owner, spender).await.unwrap(), U256::from(10));
    }

    #[tokio::test]
    async fn required_pay_amount_rounds_up() {
        let chain = InMemoryChain::default();
        // 100_000 tokens at 0.001 cost 100 units of a 6 decimal token
        let tokens = U256::from(100_000u64) * U256::from(10u64).pow(U256::from(18));
        assert_eq!(
            chain.required_pay_amount(Address::ZERO, tokens).await.unwrap(),
            U256::from(100_000_000u64)
        );
        assert_eq!(chain.required_pay_amount(Address::ZERO, U256::from(1)).await.unwrap(), U256::from(1));
    }

    #[tokio::test]
    async fn purchase_updates_sold_amount() {
        let token = Address::repeat_byte(1);
        let chain = InMemoryChain::default().with_allowance(token, U256::from(100_000_000u64));
        let call = PurchaseCall::Token { token, amount: U256::from(100_000_000u64) };

        chain.simulate_purchase(&call).await.unwrap();
        let hash = chain.send_purchase(&call).await.unwrap();
        chain.wait_for_receipt(hash, Duration::from_secs(1)).await.unwrap();

        let tokens = U256::from(100_000u64) * U256::from(10u64).pow(U256::from(18));
        assert_eq!(chain.sale().total_sold, tokens);
        assert!(chain.simulate_purchase(&call).await.is_err());
    }
}
