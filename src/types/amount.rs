//! Amount parsing, minor unit conversion and the draft/committed amount pair.
use crate::error::AmountError;
use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parses a user supplied amount.
///
/// Empty, non-numeric, zero and negative inputs are rejected.
pub fn parse_amount(input: &str) -> Result<Decimal, AmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AmountError::Empty);
    }

    let amount =
        Decimal::from_str(input).map_err(|_| AmountError::NotANumber(input.to_string()))?;
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(AmountError::NonPositive);
    }

    Ok(amount.normalize())
}

/// Converts a decimal amount into integer minor units with `decimals` fractional digits.
///
/// Digits beyond `decimals` are floored, never rounded up.
pub fn to_minor_units(amount: Decimal, decimals: u8) -> Result<U256, AmountError> {
    if amount.is_sign_negative() {
        return Err(AmountError::NonPositive);
    }

    let floored = amount.trunc_with_scale(decimals as u32);
    let mantissa = u128::try_from(floored.mantissa()).map_err(|_| AmountError::Overflow)?;
    let shift = decimals as u32 - floored.scale().min(decimals as u32);

    U256::from(mantissa)
        .checked_mul(U256::from(10u64).pow(U256::from(shift)))
        .ok_or(AmountError::Overflow)
}

/// Converts integer minor units with `decimals` fractional digits into a decimal amount.
pub fn from_minor_units(amount: U256, decimals: u8) -> Result<Decimal, AmountError> {
    let mantissa = i128::try_from(amount).map_err(|_| AmountError::Overflow)?;
    Decimal::try_from_i128_with_scale(mantissa, decimals as u32)
        .map(|amount| amount.normalize())
        .map_err(|_| AmountError::Overflow)
}

/// Floors `amount` to `decimals` fractional digits, rejecting results that floor to zero.
pub fn floor_to(amount: Decimal, decimals: u8) -> Result<Decimal, AmountError> {
    let floored = amount.trunc_with_scale(decimals as u32).normalize();
    if floored.is_zero() {
        return Err(AmountError::TooSmall { decimals });
    }
    Ok(floored)
}

/// A single amount input: what is displayed and what was last committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmountField {
    /// The value currently displayed, possibly still being typed.
    draft: String,
    /// The last value explicitly confirmed by the user, or derived from a confirmed value.
    committed: Option<Decimal>,
}

impl AmountField {
    /// Returns the displayed value.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Returns the committed value, if any.
    pub fn committed(&self) -> Option<Decimal> {
        self.committed
    }

    /// Updates the displayed value only.
    pub fn edit(&mut self, input: &str) {
        self.draft = input.to_string();
    }

    /// Commits `value` and displays it.
    pub fn commit(&mut self, value: Decimal) {
        self.draft = value.normalize().to_string();
        self.committed = Some(value.normalize());
    }

    /// Keeps the displayed input but drops the committed value.
    pub fn invalidate(&mut self) {
        self.committed = None;
    }

    /// Clears both values.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the displayed value equals the committed value.
    pub fn is_settled(&self) -> bool {
        match self.committed {
            Some(committed) => parse_amount(&self.draft).is_ok_and(|draft| draft == committed),
            None => false,
        }
    }
}

/// The pay and token amount inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmountPair {
    /// Amount of the payment currency.
    pub pay: AmountField,
    /// Amount of the sale token.
    pub token: AmountField,
}

impl AmountPair {
    /// Clears both amounts.
    pub fn reset(&mut self) {
        self.pay.clear();
        self.token.clear();
    }

    /// Whether both displayed values equal their committed values.
    pub fn is_settled(&self) -> bool {
        self.pay.is_settled() && self.token.is_settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_invalid_input() {
        assert_eq!(parse_amount(""), Err(AmountError::Empty));
        assert_eq!(parse_amount("   "), Err(AmountError::Empty));
        assert!(matches!(parse_amount("abc"), Err(AmountError::NotANumber(_))));
        assert!(matches!(parse_amount("1.2.3"), Err(AmountError::NotANumber(_))));
        assert_eq!(parse_amount("0"), Err(AmountError::NonPositive));
        assert_eq!(parse_amount("0.000"), Err(AmountError::NonPositive));
        assert_eq!(parse_amount("-5"), Err(AmountError::NonPositive));
        assert_eq!(parse_amount(" 1.50 ").unwrap(), Decimal::new(15, 1));
    }

    #[test]
    fn minor_units_roundtrip() {
        let amount = Decimal::new(123_456, 3);
        let minor = to_minor_units(amount, 6).unwrap();
        assert_eq!(minor, U256::from(123_456_000u64));
        assert_eq!(from_minor_units(minor, 6).unwrap(), amount);
    }

    #[test]
    fn minor_units_floor() {
        let amount: Decimal = "0.9999999".parse().unwrap();
        assert_eq!(to_minor_units(amount, 6).unwrap(), U256::from(999_999u64));
        assert_eq!(floor_to("0.0000001".parse().unwrap(), 6), Err(AmountError::TooSmall { decimals: 6 }));
    }

    #[test]
    fn field_settles_on_commit() {
        let mut field = AmountField::default();
        field.edit("1");
        assert!(!field.is_settled());

        field.commit(Decimal::ONE);
        assert!(field.is_settled());
        assert_eq!(field.draft(), "1");

        field.edit("12");
        assert!(!field.is_settled());
        assert_eq!(field.committed(), Some(Decimal::ONE));

        field.edit("1.00");
        assert!(field.is_settled());
    }
}
