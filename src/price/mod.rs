//! Native asset price feed and oracle.

mod feed;
pub use feed::{FeedQuote, PriceFeed};

mod metrics;
pub use metrics::PriceFeedMetrics;

mod oracle;
pub use oracle::{Freshness, PriceOracle, PriceOracleConfig, PriceOracleMessage, Quote};
