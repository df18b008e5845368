//! Dry run of the purchase call.
use crate::{
    allowance::ApprovalState,
    chain::ChainApi,
    error::{PreconditionError, SimulationError},
    network::NetworkStatus,
    price::Quote,
    types::{Currency, PurchaseCall},
};
use alloy::primitives::{Address, Bytes, ChainId, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a simulation depends on.
///
/// A simulation result is only valid while these inputs are unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationInputs {
    /// The payment currency.
    pub currency: Currency,
    /// Token address of a fungible currency, if configured.
    pub token: Option<Address>,
    /// The committed pay amount.
    pub pay_amount: Option<Decimal>,
    /// Whether both displayed amounts equal their committed values.
    pub amounts_settled: bool,
    /// Whether the sale is active, if known.
    pub sale_active: Option<bool>,
    /// The approval state of the currency.
    pub approval: ApprovalState,
    /// The cached allowance, if known.
    pub allowance: Option<U256>,
    /// Whether the wallet is on the sale's chain.
    pub network: NetworkStatus,
    /// The sale's chain.
    pub required_chain: ChainId,
}

impl SimulationInputs {
    /// Checks every precondition of a purchase and returns the committed pay amount.
    pub fn check(&self) -> Result<Decimal, PreconditionError> {
        match self.network {
            NetworkStatus::Correct => {}
            NetworkStatus::Unknown => {
                return Err(PreconditionError::WrongNetwork {
                    current: None,
                    required: self.required_chain,
                });
            }
            NetworkStatus::Incorrect { current, required } => {
                return Err(PreconditionError::WrongNetwork { current: Some(current), required });
            }
        }

        match self.sale_active {
            None => return Err(PreconditionError::SaleStateUnavailable),
            Some(false) => return Err(PreconditionError::SaleInactive),
            Some(true) => {}
        }

        if !self.currency.is_native() && self.token.is_none() {
            return Err(PreconditionError::UnsupportedCurrency(self.currency));
        }

        let pay_amount = self.pay_amount.ok_or(PreconditionError::NoCommittedAmount)?;
        if !self.amounts_settled {
            return Err(PreconditionError::DraftNotCommitted);
        }

        match self.approval {
            ApprovalState::NotApplicable | ApprovalState::Sufficient => Ok(pay_amount),
            ApprovalState::Checking => Err(PreconditionError::AllowanceUnknown),
            ApprovalState::Insufficient { required } => Err(PreconditionError::ApprovalRequired {
                allowance: self.allowance.unwrap_or_default(),
                required,
            }),
            ApprovalState::Approving { .. } | ApprovalState::ApprovalConfirming { .. } => {
                Err(PreconditionError::ApprovalInProgress)
            }
        }
    }
}

/// A simulated purchase, ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPurchase {
    /// The payment currency.
    pub currency: Currency,
    /// The committed pay amount the call was built for.
    pub pay_amount: Decimal,
    /// The call.
    pub call: PurchaseCall,
}

/// Outcome of the last simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SimulationState {
    /// Nothing was simulated yet.
    #[default]
    Idle,
    /// A precondition is not met, no call was made.
    Blocked(PreconditionError),
    /// The purchase can be submitted.
    Ready(PreparedPurchase),
    /// The dry run failed. Submission is blocked.
    Failed(SimulationError),
}

impl SimulationState {
    /// Returns the prepared purchase, if the simulation succeeded.
    pub fn prepared(&self) -> Option<&PreparedPurchase> {
        match self {
            Self::Ready(prepared) => Some(prepared),
            _ => None,
        }
    }

    /// Short label of the state.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Blocked(_) => "blocked",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

/// Builds purchase calls and dry-runs them against the sale contract.
#[derive(Debug, Clone)]
pub struct TransactionSimulator {
    /// Chain to simulate on.
    chain: Arc<dyn ChainApi>,
}

impl TransactionSimulator {
    /// Creates a new [`TransactionSimulator`].
    pub fn new(chain: Arc<dyn ChainApi>) -> Self {
        Self { chain }
    }

    /// Builds the purchase call for the committed pay amount.
    pub fn build_call(
        &self,
        currency: Currency,
        token: Option<Address>,
        pay_amount: Decimal,
        quote: &Quote,
    ) -> Result<PurchaseCall, SimulationError> {
        let amount = currency.to_minor_units(pay_amount)?;

        if currency.is_native() {
            let quote_price =
                quote.price_minor_units().map_err(|_| SimulationError::InvalidQuote)?;
            return Ok(PurchaseCall::Native {
                value: amount,
                quote_price,
                quote_timestamp: U256::from(quote.timestamp),
                signature: Bytes::new(),
            });
        }

        let token = token.ok_or_else(|| {
            SimulationError::Unavailable(format!("no token address for {currency}"))
        })?;
        Ok(PurchaseCall::Token { token, amount })
    }

    /// Simulates the purchase described by `inputs`.
    ///
    /// No chain call is made unless every precondition holds.
    pub async fn simulate(&self, inputs: &SimulationInputs, quote: &Quote) -> SimulationState {
        let pay_amount = match inputs.check() {
            Ok(pay_amount) => pay_amount,
            Err(err) => return SimulationState::Blocked(err),
        };

        let call = match self.build_call(inputs.currency, inputs.token, pay_amount, quote) {
            Ok(call) => call,
            Err(err) => return SimulationState::Failed(err),
        };

        match self.chain.simulate_purchase(&call).await {
            Ok(()) => {
                debug!(currency = %inputs.currency, %pay_amount, "Purchase simulation succeeded");
                SimulationState::Ready(PreparedPurchase {
                    currency: inputs.currency,
                    pay_amount,
                    call,
                })
            }
            Err(err) => {
                warn!(%err, currency = %inputs.currency, %pay_amount, "Purchase simulation failed");
                SimulationState::Failed(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::InMemoryChain, price::Freshness};

    fn inputs() -> SimulationInputs {
        SimulationInputs {
            currency: Currency::USDT,
            token: Some(Address::repeat_byte(1)),
            pay_amount: Some(Decimal::from(100)),
            amounts_settled: true,
            sale_active: Some(true),
            approval: ApprovalState::Sufficient,
            allowance: Some(U256::from(100_000_000u64)),
            network: NetworkStatus::Correct,
            required_chain: 1,
        }
    }

    fn quote() -> Quote {
        Quote { price: 2500.0, timestamp: 1_700_000_000, source: "test".into(), freshness: Freshness::Live }
    }

    #[test]
    fn preconditions() {
        assert!(inputs().check().is_ok());

        let wrong_network = SimulationInputs {
            network: NetworkStatus::Incorrect { current: 5, required: 1 },
            ..inputs()
        };
        assert_eq!(
            wrong_network.check(),
            Err(PreconditionError::WrongNetwork { current: Some(5), required: 1 })
        );

        let editing = SimulationInputs { amounts_settled: false, ..inputs() };
        assert_eq!(editing.check(), Err(PreconditionError::DraftNotCommitted));

        let inactive = SimulationInputs { sale_active: Some(false), ..inputs() };
        assert_eq!(inactive.check(), Err(PreconditionError::SaleInactive));

        let unapproved = SimulationInputs {
            approval: ApprovalState::Insufficient { required: U256::from(100_000_000u64) },
            allowance: Some(U256::ZERO),
            ..inputs()
        };
        assert_eq!(
            unapproved.check(),
            Err(PreconditionError::ApprovalRequired {
                allowance: U256::ZERO,
                required: U256::from(100_000_000u64)
            })
        );

        let empty = SimulationInputs { pay_amount: None, ..inputs() };
        assert_eq!(empty.check(), Err(PreconditionError::NoCommittedAmount));
    }

    #[test]
    fn native_call_carries_quote() {
        let simulator = TransactionSimulator::new(Arc::new(InMemoryChain::default()));
        let call = simulator.build_call(Currency::ETH, None, Decimal::ONE, &quote()).unwrap();
        assert_eq!(
            call,
            PurchaseCall::Native {
                value: U256::from(10u64).pow(U256::from(18)),
                quote_price: U256::from(2_500_000_000u64),
                quote_timestamp: U256::from(1_700_000_000u64),
                signature: Bytes::new(),
            }
        );
    }

    #[tokio::test]
    async fn blocked_inputs_make_no_call() {
        let chain = Arc::new(InMemoryChain::default());
        let simulator = TransactionSimulator::new(chain.clone());

        let state = simulator
            .simulate(&SimulationInputs { network: NetworkStatus::Unknown, ..inputs() }, &quote())
            .await;
        assert!(matches!(state, SimulationState::Blocked(PreconditionError::WrongNetwork { .. })));
        assert_eq!(chain.counts().simulations, 0);
    }

    #[tokio::test]
    async fn failed_simulation() {
        let token = Address::repeat_byte(1);
        let chain = Arc::new(
            InMemoryChain::default()
                .with_allowance(token, U256::from(100_000_000u64))
                .with_simulation_failure("tier sold out"),
        );
        let simulator = TransactionSimulator::new(chain.clone());

        let state = simulator.simulate(&inputs(), &quote()).await;
        assert!(matches!(state, SimulationState::Failed(SimulationError::Reverted(_))));

        chain.clear_simulation_failure();
        let state = simulator.simulate(&inputs(), &quote()).await;
        let prepared = state.prepared().unwrap();
        assert_eq!(prepared.call, PurchaseCall::Token { token, amount: U256::from(100_000_000u64) });
        assert_eq!(chain.counts().simulations, 2);
    }
}
