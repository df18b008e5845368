use crate::{
    constants::{NATIVE_DECIMALS, TOKEN_DECIMALS},
    error::AmountError,
    types::amount::{from_minor_units, to_minor_units},
};
use alloy::primitives::{Address, U256, address};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Payment currencies accepted by the sale.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// The native asset of the chain, sent as transaction value.
    #[default]
    ETH,
    /// Tether USD.
    USDT,
    /// USD Coin.
    USDC,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Self; 3] = [Self::ETH, Self::USDT, Self::USDC];

    /// Whether this is the native asset.
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::ETH)
    }

    /// Number of fractional digits of the currency.
    pub const fn decimals(&self) -> u8 {
        match self {
            Self::ETH => NATIVE_DECIMALS,
            Self::USDT | Self::USDC => TOKEN_DECIMALS,
        }
    }

    /// Default contract address of the currency on Ethereum mainnet.
    ///
    /// The native asset uses the zero address as a sentinel.
    pub fn default_address(&self) -> Address {
        match self {
            Self::ETH => Address::ZERO,
            Self::USDT => address!("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
            Self::USDC => address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        }
    }

    /// Converts a decimal amount of this currency into minor units, flooring any excess digits.
    pub fn to_minor_units(&self, amount: Decimal) -> Result<U256, AmountError> {
        to_minor_units(amount, self.decimals())
    }

    /// Converts minor units of this currency into a decimal amount.
    pub fn from_minor_units(&self, amount: U256) -> Result<Decimal, AmountError> {
        from_minor_units(amount, self.decimals())
    }

    /// Returns the str identifier
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ETH => "ETH",
            Self::USDT => "USDT",
            Self::USDC => "USDC",
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eth" | "native" => Ok(Self::ETH),
            "usdt" => Ok(Self::USDT),
            "usdc" => Ok(Self::USDC),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals() {
        assert_eq!(Currency::ETH.decimals(), 18);
        assert_eq!(Currency::USDT.decimals(), 6);
        assert_eq!(Currency::USDC.decimals(), 6);
    }

    #[test]
    fn native_uses_zero_address() {
        assert!(Currency::ETH.is_native());
        assert_eq!(Currency::ETH.default_address(), Address::ZERO);
        assert!(Currency::ALL.iter().filter(|c| !c.is_native()).all(|c| !c.default_address().is_zero()));
    }

    #[test]
    fn parse() {
        assert_eq!("usdt".parse::<Currency>().unwrap(), Currency::USDT);
        assert_eq!(" USDC ".parse::<Currency>().unwrap(), Currency::USDC);
        assert_eq!("native".parse::<Currency>().unwrap(), Currency::ETH);
        assert!("dai".parse::<Currency>().is_err());
    }

    #[test]
    fn minor_units_are_floored() {
        let amount: Decimal = "1.2345679".parse().unwrap();
        assert_eq!(Currency::USDT.to_minor_units(amount).unwrap(), U256::from(1_234_567u64));

        let amount: Decimal = "0.0000000000000000019".parse().unwrap();
        assert_eq!(Currency::ETH.to_minor_units(amount).unwrap(), U256::from(1u64));
    }
}
