//! Purchase engine constants.

use alloy::primitives::ChainId;
use std::time::Duration;

/// Fractional digits of the native asset.
pub const NATIVE_DECIMALS: u8 = 18;

/// Fractional digits of the supported stablecoins.
pub const TOKEN_DECIMALS: u8 = 6;

/// Fractional digits of the tier price returned by the sale contract.
pub const TIER_PRICE_DECIMALS: u8 = 6;

/// Fractional digits of the native quote passed to `buyWithNativeAssetAtPrice`.
pub const QUOTE_PRICE_DECIMALS: u8 = 6;

/// Fractional digits of the sale token, unless configured otherwise.
pub const DEFAULT_SALE_TOKEN_DECIMALS: u8 = 18;

/// Chain the sale lives on, unless configured otherwise.
pub const DEFAULT_REQUIRED_CHAIN_ID: ChainId = 1;

/// Native asset price used until the feed returns a price.
pub const DEFAULT_NATIVE_PRICE: f64 = 2500.0;

/// Source tag of [`DEFAULT_NATIVE_PRICE`].
pub const FALLBACK_PRICE_SOURCE: &str = "fallback";

/// Interval between price feed fetches.
pub const DEFAULT_PRICE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Age after which a fetched price is considered degraded.
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(300);

/// Interval between periodic allowance and network reads.
pub const DEFAULT_ALLOWANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Time an approval may spend between signing and confirmation before it is abandoned.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the wallet may take to sign and broadcast a purchase.
pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(120);

/// Time a purchase may take to be mined.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum allowance reads after a confirmed approval.
pub const DEFAULT_RECONCILE_ATTEMPTS: u32 = 5;

/// Delay between allowance reads after a confirmed approval.
pub const DEFAULT_RECONCILE_BACKOFF: Duration = Duration::from_secs(1);

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "presale.yaml";
