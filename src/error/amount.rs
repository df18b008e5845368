use thiserror::Error;

/// Errors related to amounts entered by the user.
///
/// These are surfaced inline and never reach the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// No amount was entered.
    #[error("enter an amount")]
    Empty,
    /// The input is not a decimal number.
    #[error("{0:?} is not a valid amount")]
    NotANumber(String),
    /// The amount is zero or negative.
    #[error("amount must be greater than zero")]
    NonPositive,
    /// The amount rounds down to zero minor units.
    #[error("amount is below the smallest unit of {decimals} decimals")]
    TooSmall {
        /// Number of fractional digits of the currency.
        decimals: u8,
    },
    /// The amount does not fit the supported numeric range.
    #[error("amount is too large")]
    Overflow,
    /// The price used for the conversion is not usable.
    #[error("price is not available for the conversion")]
    InvalidPrice,
}
