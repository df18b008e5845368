//! Price feed metrics

use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Metrics for the [`PriceOracle`](crate::price::PriceOracle).
#[derive(Metrics)]
#[metrics(scope = "pricefeed")]
pub struct PriceFeedMetrics {
    /// Latest native asset price.
    pub price: Gauge,
    /// Number of failed fetches.
    pub fetch_failures: Counter,
    /// Number of lookups answered with the fallback price.
    pub fallback_hits: Counter,
    /// Number of lookups answered with an expired price.
    pub expired_hits: Counter,
}
