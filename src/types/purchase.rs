use super::ISale;
use alloy::{
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
};
use serde::Serialize;

/// A purchase call on the sale contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PurchaseCall {
    /// `buyWithNativeAssetAtPrice`, paying with the transaction value.
    #[serde(rename_all = "camelCase")]
    Native {
        /// Amount of native asset sent, in wei.
        value: U256,
        /// The quote price in minor units.
        quote_price: U256,
        /// Unix timestamp of the quote.
        quote_timestamp: U256,
        /// Signature over the quote. Empty while the sale does not verify quotes.
        signature: Bytes,
    },
    /// `buyWithToken`, pulling the approved token amount.
    Token {
        /// The payment token.
        token: Address,
        /// Amount of the payment token, in minor units.
        amount: U256,
    },
}

impl PurchaseCall {
    /// Value sent with the call.
    pub fn value(&self) -> U256 {
        match self {
            Self::Native { value, .. } => *value,
            Self::Token { .. } => U256::ZERO,
        }
    }

    /// Amount paid, in minor units of the payment currency.
    pub fn pay_amount(&self) -> U256 {
        match self {
            Self::Native { value, .. } => *value,
            Self::Token { amount, .. } => *amount,
        }
    }

    /// ABI encoded calldata.
    pub fn calldata(&self) -> Bytes {
        match self {
            Self::Native { quote_price, quote_timestamp, signature, .. } => {
                ISale::buyWithNativeAssetAtPriceCall {
                    price: *quote_price,
                    timestamp: *quote_timestamp,
                    signature: signature.clone(),
                }
                .abi_encode()
                .into()
            }
            Self::Token { token, amount } => {
                ISale::buyWithTokenCall { token: *token, amount: *amount }.abi_encode().into()
            }
        }
    }

    /// Builds the transaction sending this call from `from` to the sale contract.
    pub fn into_transaction(&self, from: Address, sale: Address) -> TransactionRequest {
        TransactionRequest::default()
            .from(from)
            .to(sale)
            .value(self.value())
            .input(self.calldata().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calldata_selectors() {
        let call = PurchaseCall::Token { token: Address::repeat_byte(1), amount: U256::from(5) };
        assert_eq!(&call.calldata()[..4], ISale::buyWithTokenCall::SELECTOR.as_slice());
        assert_eq!(call.value(), U256::ZERO);

        let call = PurchaseCall::Native {
            value: U256::from(7),
            quote_price: U256::from(2_500_000_000u64),
            quote_timestamp: U256::from(1),
            signature: Bytes::new(),
        };
        assert_eq!(&call.calldata()[..4], ISale::buyWithNativeAssetAtPriceCall::SELECTOR.as_slice());
        assert_eq!(call.value(), U256::from(7));
        assert_eq!(call.pay_amount(), U256::from(7));
    }
}
