//! Conversion between pay amounts and sale token amounts.
//!
//! Native purchases are priced locally from the feed quote and the tier price. Fungible purchases
//! are 1:1 with the tier's quote currency. The fungible inverse is authoritative on-chain and is
//! read through [`ChainApi::required_pay_amount`](crate::chain::ChainApi::required_pay_amount)
//! instead.
use crate::{
    constants::NATIVE_DECIMALS,
    error::AmountError,
    price::Quote,
    types::{
        Currency, PricingTier,
        amount::{floor_to, to_minor_units},
    },
};
use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::Serialize;

/// Result of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    /// The converted amount, floored to the target precision.
    pub amount: Decimal,
    /// Whether the conversion used a price that is not live.
    pub degraded: bool,
}

/// Bidirectional amount calculator.
#[derive(Debug, Clone, Copy)]
pub struct AmountCalculator {
    /// Fractional digits of the sale token.
    sale_token_decimals: u8,
}

impl AmountCalculator {
    /// Creates a calculator for a sale token with `sale_token_decimals` fractional digits.
    pub const fn new(sale_token_decimals: u8) -> Self {
        Self { sale_token_decimals }
    }

    /// Fractional digits of the sale token.
    pub const fn sale_token_decimals(&self) -> u8 {
        self.sale_token_decimals
    }

    /// Converts a pay amount of `currency` into sale tokens at the given tier.
    ///
    /// The native quote is only used for [`Currency::ETH`].
    pub fn token_amount(
        &self,
        currency: Currency,
        pay: Decimal,
        tier: &PricingTier,
        quote: &Quote,
    ) -> Result<Conversion, AmountError> {
        let price = tier.unit_price()?;
        if price.is_zero() {
            return Err(AmountError::InvalidPrice);
        }

        let (value, degraded) = if currency.is_native() {
            (pay.checked_mul(quote.price()?).ok_or(AmountError::Overflow)?, quote.is_degraded())
        } else {
            (pay, false)
        };

        let amount = value.checked_div(price).ok_or(AmountError::Overflow)?;
        Ok(Conversion { amount: floor_to(amount, self.sale_token_decimals)?, degraded })
    }

    /// Converts a sale token amount into the native pay amount at the given tier.
    pub fn native_pay_amount(
        &self,
        token: Decimal,
        tier: &PricingTier,
        quote: &Quote,
    ) -> Result<Conversion, AmountError> {
        let price = tier.unit_price()?;
        let value = token.checked_mul(price).ok_or(AmountError::Overflow)?;
        let amount = value.checked_div(quote.price()?).ok_or(AmountError::Overflow)?;
        Ok(Conversion { amount: floor_to(amount, NATIVE_DECIMALS)?, degraded: quote.is_degraded() })
    }

    /// Converts a sale token amount into minor units.
    pub fn token_minor_units(&self, token: Decimal) -> Result<U256, AmountError> {
        to_minor_units(token, self.sale_token_decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::Freshness;

    fn tier(price: u64) -> PricingTier {
        PricingTier {
            index: 0,
            start_amount: U256::ZERO,
            end_amount: U256::from(10u64).pow(U256::from(30)),
            price: U256::from(price),
        }
    }

    fn quote(price: f64, freshness: Freshness) -> Quote {
        Quote { price, timestamp: 0, source: "test".into(), freshness }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn native_purchase() {
        let calc = AmountCalculator::new(18);
        let conversion = calc
            .token_amount(Currency::ETH, Decimal::ONE, &tier(1_000), &quote(2500.0, Freshness::Live))
            .unwrap();
        assert_eq!(conversion, Conversion { amount: dec("2500000"), degraded: false });
    }

    #[test]
    fn fungible_purchase_ignores_quote() {
        let calc = AmountCalculator::new(18);
        for currency in [Currency::USDT, Currency::USDC] {
            let conversion = calc
                .token_amount(currency, dec("100"), &tier(1_000), &quote(1.0, Freshness::Fallback))
                .unwrap();
            assert_eq!(conversion, Conversion { amount: dec("100000"), degraded: false });
        }
    }

    #[test]
    fn stale_quote_degrades_but_does_not_block() {
        let calc = AmountCalculator::new(18);
        let conversion = calc
            .token_amount(Currency::ETH, Decimal::ONE, &tier(1_000), &quote(2500.0, Freshness::Degraded))
            .unwrap();
        assert!(conversion.degraded);
        assert_eq!(conversion.amount, dec("2500000"));
    }

    #[test]
    fn native_inverse_roundtrip() {
        let calc = AmountCalculator::new(18);
        let tier = tier(1_000);
        let quote = quote(3000.0, Freshness::Live);

        for token in ["1", "2500000", "1234.5", "0.333"] {
            let token = dec(token);
            let pay = calc.native_pay_amount(token, &tier, &quote).unwrap().amount;
            let back = calc.token_amount(Currency::ETH, pay, &tier, &quote).unwrap().amount;

            // pay is floored to 18 digits, which costs at most quote / price of those units
            assert!(back <= token);
            assert!(token - back <= dec("0.000000000003000001"), "{token} -> {back}");
        }
    }

    #[test]
    fn floors_to_sale_token_precision() {
        let calc = AmountCalculator::new(2);
        let conversion = calc
            .token_amount(Currency::USDT, dec("0.0019"), &tier(1_000), &quote(1.0, Freshness::Live))
            .unwrap();
        assert_eq!(conversion.amount, dec("1.9"));

        assert_eq!(
            calc.token_amount(Currency::USDT, dec("0.000001"), &tier(1_000), &quote(1.0, Freshness::Live)),
            Err(AmountError::TooSmall { decimals: 2 })
        );
    }

    #[test]
    fn invalid_quote() {
        let calc = AmountCalculator::new(18);
        assert_eq!(
            calc.token_amount(Currency::ETH, Decimal::ONE, &tier(1_000), &quote(0.0, Freshness::Live)),
            Err(AmountError::InvalidPrice)
        );
    }
}
