use crate::{
    constants::TIER_PRICE_DECIMALS,
    error::{AmountError, SaleStateError},
    types::amount::from_minor_units,
};
use alloy::{primitives::U256, sol};
use rust_decimal::Decimal;
use serde::Serialize;

sol! {
    /// The tiered sale contract.
    #[sol(rpc)]
    #[derive(Debug)]
    interface ISale {
        /// A pricing tier as returned by the sale contract.
        #[derive(PartialEq, Eq)]
        struct Tier {
            uint256 index;
            uint256 startAmount;
            uint256 endAmount;
            uint256 price;
        }

        function saleActive() external view returns (bool);
        function totalTokensForSale() external view returns (uint256);
        function totalTokensSold() external view returns (uint256);
        function getCurrentTier() external view returns (Tier memory);
        function getNextTier() external view returns (Tier memory);

        function getRequiredPayAmount(address token, uint256 tokenAmount) external view returns (uint256);

        function buyWithToken(address token, uint256 amount) external;
        function buyWithNativeAssetAtPrice(uint256 price, uint256 timestamp, bytes signature) external payable;
    }
}

/// A snapshot of a pricing tier.
///
/// Amounts are cumulative sold sale-token minor units, the price is in quote currency minor units
/// with [`TIER_PRICE_DECIMALS`] decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    /// Index of the tier.
    pub index: u64,
    /// Cumulative sold amount at which the tier starts.
    pub start_amount: U256,
    /// Cumulative sold amount at which the tier ends.
    pub end_amount: U256,
    /// Unit price of the tier.
    pub price: U256,
}

impl PricingTier {
    /// Validates the tier range and price.
    pub fn validate(&self) -> Result<(), SaleStateError> {
        if self.start_amount >= self.end_amount {
            return Err(SaleStateError::EmptyTierRange { index: self.index });
        }
        if self.price.is_zero() {
            return Err(SaleStateError::ZeroTierPrice { index: self.index });
        }
        Ok(())
    }

    /// Whether the cumulative `sold` amount falls into this tier.
    pub fn contains(&self, sold: U256) -> bool {
        self.start_amount <= sold && sold < self.end_amount
    }

    /// Returns the unit price as a decimal amount of the quote currency.
    pub fn unit_price(&self) -> Result<Decimal, AmountError> {
        from_minor_units(self.price, TIER_PRICE_DECIMALS)
    }
}

impl From<ISale::Tier> for PricingTier {
    fn from(tier: ISale::Tier) -> Self {
        Self {
            index: tier.index.saturating_to(),
            start_amount: tier.startAmount,
            end_amount: tier.endAmount,
            price: tier.price,
        }
    }
}

/// Aggregate state of the sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleState {
    /// Whether the sale accepts purchases.
    pub active: bool,
    /// Total amount of sale tokens offered.
    pub total_for_sale: U256,
    /// Total amount of sale tokens sold so far.
    pub total_sold: U256,
    /// The tier purchases are currently priced at.
    pub current_tier: PricingTier,
    /// The tier following the current one, if any.
    pub next_tier: Option<PricingTier>,
}

impl SaleState {
    /// Creates a new [`SaleState`], checking its invariants.
    pub fn new(
        active: bool,
        total_for_sale: U256,
        total_sold: U256,
        current_tier: PricingTier,
        next_tier: Option<PricingTier>,
    ) -> Result<Self, SaleStateError> {
        current_tier.validate()?;

        if total_sold > total_for_sale {
            return Err(SaleStateError::SoldExceedsSupply { sold: total_sold, total: total_for_sale });
        }

        let this = Self { active, total_for_sale, total_sold, current_tier, next_tier };
        if !this.is_exhausted() && !current_tier.contains(total_sold) {
            return Err(SaleStateError::TierMismatch { index: current_tier.index, sold: total_sold });
        }

        if let Some(next) = next_tier {
            next.validate()?;
            if next.index != current_tier.index + 1 || next.start_amount != current_tier.end_amount
            {
                return Err(SaleStateError::NonContiguousTiers {
                    current: current_tier.index,
                    next: next.index,
                });
            }
        }

        Ok(this)
    }

    /// Whether every token offered has been sold.
    pub fn is_exhausted(&self) -> bool {
        self.total_sold >= self.total_for_sale
    }

    /// Whether the sale currently accepts purchases.
    pub fn accepts_purchases(&self) -> bool {
        self.active && !self.is_exhausted()
    }

    /// Amount of sale tokens still available.
    pub fn remaining(&self) -> U256 {
        self.total_for_sale.saturating_sub(self.total_sold)
    }
}

/// Returns the next tier only if the contract reported one.
///
/// The contract returns an all-zero tier once the last tier is reached.
pub fn next_tier_from(tier: ISale::Tier) -> Option<PricingTier> {
    (!tier.endAmount.is_zero()).then(|| tier.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(index: u64, start: u64, end: u64, price: u64) -> PricingTier {
        PricingTier {
            index,
            start_amount: U256::from(start),
            end_amount: U256::from(end),
            price: U256::from(price),
        }
    }

    #[test]
    fn unit_price() {
        assert_eq!(tier(0, 0, 10, 1_000).unit_price().unwrap(), Decimal::new(1, 3));
    }

    #[test]
    fn valid_state() {
        let state =
            SaleState::new(true, U256::from(100), U256::from(5), tier(0, 0, 10, 1), Some(tier(1, 10, 20, 2)))
                .unwrap();
        assert!(state.accepts_purchases());
        assert_eq!(state.remaining(), U256::from(95));
    }

    #[test]
    fn invariants() {
        assert_eq!(
            SaleState::new(true, U256::from(100), U256::from(5), tier(0, 10, 10, 1), None),
            Err(SaleStateError::EmptyTierRange { index: 0 })
        );
        assert_eq!(
            SaleState::new(true, U256::from(100), U256::from(5), tier(0, 0, 10, 0), None),
            Err(SaleStateError::ZeroTierPrice { index: 0 })
        );
        assert_eq!(
            SaleState::new(true, U256::from(4), U256::from(5), tier(0, 0, 10, 1), None),
            Err(SaleStateError::SoldExceedsSupply { sold: U256::from(5), total: U256::from(4) })
        );
        assert_eq!(
            SaleState::new(true, U256::from(100), U256::from(15), tier(0, 0, 10, 1), None),
            Err(SaleStateError::TierMismatch { index: 0, sold: U256::from(15) })
        );
        assert_eq!(
            SaleState::new(true, U256::from(100), U256::from(5), tier(0, 0, 10, 1), Some(tier(2, 10, 20, 1))),
            Err(SaleStateError::NonContiguousTiers { current: 0, next: 2 })
        );
    }

    #[test]
    fn exhausted_sale_may_sit_outside_its_tier() {
        let state =
            SaleState::new(true, U256::from(10), U256::from(10), tier(0, 0, 10, 1), None).unwrap();
        assert!(state.is_exhausted());
        assert!(!state.accepts_purchases());
    }
}
