use alloy::primitives::U256;
use thiserror::Error;

/// Violations of the sale state invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleStateError {
    /// A tier does not span a positive range.
    #[error("tier {index} has an empty range")]
    EmptyTierRange {
        /// Index of the tier.
        index: u64,
    },
    /// A tier has no price.
    #[error("tier {index} has a zero price")]
    ZeroTierPrice {
        /// Index of the tier.
        index: u64,
    },
    /// More tokens were sold than offered.
    #[error("sold amount {sold} exceeds the amount for sale {total}")]
    SoldExceedsSupply {
        /// Tokens sold.
        sold: U256,
        /// Tokens offered.
        total: U256,
    },
    /// The current tier does not contain the sold amount.
    #[error("current tier {index} does not contain the sold amount {sold}")]
    TierMismatch {
        /// Index of the current tier.
        index: u64,
        /// Tokens sold.
        sold: U256,
    },
    /// The next tier does not follow the current tier.
    #[error("tier {next} does not follow tier {current}")]
    NonContiguousTiers {
        /// Index of the current tier.
        current: u64,
        /// Index of the next tier.
        next: u64,
    },
}
