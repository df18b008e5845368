//! Shared primitive types.
pub mod amount;
pub use amount::{AmountField, AmountPair};

mod currency;
pub use currency::Currency;

mod erc20;
pub use erc20::*;

mod purchase;
pub use purchase::PurchaseCall;

mod sale;
pub use sale::{ISale, PricingTier, SaleState, next_tier_from};
