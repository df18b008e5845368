//! Purchase engine configuration.
use crate::{
    constants::{
        APPROVAL_TIMEOUT, DEFAULT_ALLOWANCE_REFRESH_INTERVAL, DEFAULT_CONFIRMATION_TIMEOUT,
        DEFAULT_NATIVE_PRICE, DEFAULT_PRICE_REFRESH_INTERVAL, DEFAULT_RATE_TTL,
        DEFAULT_RECONCILE_ATTEMPTS, DEFAULT_RECONCILE_BACKOFF, DEFAULT_REQUIRED_CHAIN_ID,
        DEFAULT_SALE_TOKEN_DECIMALS, DEFAULT_SIGNATURE_TIMEOUT,
    },
    types::Currency,
};
use alloy::primitives::{Address, ChainId};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use url::Url;

/// Purchase engine configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PurchaseConfig {
    /// Chain configuration.
    #[serde(default)]
    pub chain: ChainConfig,
    /// Sale contract configuration.
    #[serde(default)]
    pub sale: SaleConfig,
    /// Price feed configuration.
    #[serde(default)]
    pub pricefeed: PriceFeedConfig,
    /// Allowance and approval configuration.
    #[serde(default)]
    pub allowance: AllowanceConfig,
    /// Purchase transaction configuration.
    #[serde(default)]
    pub transactions: TransactionsConfig,
    /// Secrets.
    #[serde(skip_serializing, default)]
    pub secrets: SecretsConfig,
}

impl PurchaseConfig {
    /// Sets the chain the sale lives on.
    pub fn with_required_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain.required_chain_id = chain_id;
        self
    }

    /// Sets the RPC endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.chain.endpoint = Some(endpoint);
        self
    }

    /// Sets the sale contract address.
    pub fn with_sale_contract(mut self, contract: Address) -> Self {
        self.sale.contract = contract;
        self
    }

    /// Sets the token address of a fungible currency.
    pub fn with_token(mut self, currency: Currency, address: Address) -> Self {
        self.sale.tokens.insert(currency, address);
        self
    }

    /// Sets the price feed URL.
    pub fn with_price_feed_url(mut self, url: Option<Url>) -> Self {
        self.pricefeed.url = url;
        self
    }

    /// Sets a constant native price. Used for testing.
    pub fn with_constant_rate(mut self, constant_rate: Option<f64>) -> Self {
        self.pricefeed.constant_rate = constant_rate;
        self
    }

    /// Sets the lifetime of a fetched price.
    pub fn with_rate_ttl(mut self, rate_ttl: Duration) -> Self {
        self.pricefeed.rate_ttl = rate_ttl;
        self
    }

    /// Sets the approval timeout.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.allowance.approval_timeout = timeout;
        self
    }

    /// Sets the time the wallet may take to sign a purchase.
    pub fn with_signature_timeout(mut self, timeout: Duration) -> Self {
        self.transactions.signature_timeout = timeout;
        self
    }

    /// Sets the purchase confirmation timeout.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.transactions.confirmation_timeout = timeout;
        self
    }

    /// Sets the private key used to sign transactions.
    pub fn with_private_key(mut self, private_key: Option<String>) -> Self {
        if private_key.is_some() {
            self.secrets.private_key = private_key;
        }
        self
    }

    /// Returns the configured token address of a fungible currency.
    ///
    /// The native asset has no token address.
    pub fn token_address(&self, currency: Currency) -> Option<Address> {
        if currency.is_native() {
            return None;
        }
        self.sale.tokens.get(&currency).copied()
    }

    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// The chain the wallet must be connected to.
    pub required_chain_id: ChainId,
    /// RPC endpoint of the wallet provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            required_chain_id: DEFAULT_REQUIRED_CHAIN_ID,
            endpoint: None,
        }
    }
}

/// Sale contract configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleConfig {
    /// Address of the sale contract. It is also the spender of approvals.
    pub contract: Address,
    /// Fractional digits of the sale token.
    #[serde(default = "default_sale_token_decimals")]
    pub token_decimals: u8,
    /// Token addresses of the fungible payment currencies.
    #[serde(default)]
    pub tokens: HashMap<Currency, Address>,
}

fn default_sale_token_decimals() -> u8 {
    DEFAULT_SALE_TOKEN_DECIMALS
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            contract: Address::ZERO,
            token_decimals: DEFAULT_SALE_TOKEN_DECIMALS,
            tokens: Currency::ALL
                .into_iter()
                .filter(|currency| !currency.is_native())
                .map(|currency| (currency, currency.default_address()))
                .collect(),
        }
    }
}

/// Price feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFeedConfig {
    /// Endpoint returning the native asset price. Without it the fallback price is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// Interval between fetches.
    #[serde(with = "crate::serde::duration")]
    pub refresh_interval: Duration,
    /// Age after which a fetched price is degraded.
    #[serde(with = "crate::serde::duration")]
    pub rate_ttl: Duration,
    /// Price used until the feed returns one.
    pub fallback_price: f64,
    /// Sets a constant rate for the price oracle. Used for testing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant_rate: Option<f64>,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            refresh_interval: DEFAULT_PRICE_REFRESH_INTERVAL,
            rate_ttl: DEFAULT_RATE_TTL,
            fallback_price: DEFAULT_NATIVE_PRICE,
            constant_rate: None,
        }
    }
}

/// Allowance and approval configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceConfig {
    /// Interval between periodic allowance and network reads.
    #[serde(with = "crate::serde::duration")]
    pub refresh_interval: Duration,
    /// Time an approval may take from signing to confirmation.
    #[serde(with = "crate::serde::duration")]
    pub approval_timeout: Duration,
    /// Maximum allowance reads after a confirmed approval.
    pub reconcile_attempts: u32,
    /// Delay between allowance reads after a confirmed approval.
    #[serde(with = "crate::serde::duration")]
    pub reconcile_backoff: Duration,
}

impl Default for AllowanceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_ALLOWANCE_REFRESH_INTERVAL,
            approval_timeout: APPROVAL_TIMEOUT,
            reconcile_attempts: DEFAULT_RECONCILE_ATTEMPTS,
            reconcile_backoff: DEFAULT_RECONCILE_BACKOFF,
        }
    }
}

/// Purchase transaction configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsConfig {
    /// Time the wallet may take to sign and broadcast a purchase.
    #[serde(default = "default_signature_timeout", with = "crate::serde::duration")]
    pub signature_timeout: Duration,
    /// Time a purchase may take to be mined.
    #[serde(with = "crate::serde::duration")]
    pub confirmation_timeout: Duration,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            signature_timeout: DEFAULT_SIGNATURE_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

fn default_signature_timeout() -> Duration {
    DEFAULT_SIGNATURE_TIMEOUT
}

/// Secrets (kept out of serialized output).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    /// The private key to sign transactions with.
    #[serde(default)]
    pub private_key: Option<String>,
}
