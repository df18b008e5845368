use super::{FeedQuote, PriceFeed, PriceFeedMetrics};
use crate::{
    constants::{DEFAULT_NATIVE_PRICE, DEFAULT_RATE_TTL, FALLBACK_PRICE_SOURCE, QUOTE_PRICE_DECIMALS},
    error::AmountError,
    types::amount::to_minor_units,
};
use alloy::primitives::U256;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Serialize;
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, trace};
use url::Url;

/// How much a [`Quote`] can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Freshness {
    /// Fetched within the rate TTL and the last fetch succeeded.
    Live,
    /// The last good price, either expired or followed by a failed fetch.
    Degraded,
    /// No price was ever received, the configured default is used.
    Fallback,
}

/// Native asset price handed to the calculator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Price of one native asset in the quote currency.
    pub price: f64,
    /// Unix timestamp of the price, in seconds.
    pub timestamp: u64,
    /// Name of the upstream source.
    pub source: String,
    /// How much the price can be trusted.
    pub freshness: Freshness,
}

impl Quote {
    /// Returns a quote with the given price tagged as [`Freshness::Fallback`].
    pub fn fallback(price: f64) -> Self {
        Self {
            price,
            timestamp: unix_now(),
            source: FALLBACK_PRICE_SOURCE.to_string(),
            freshness: Freshness::Fallback,
        }
    }

    /// Whether results computed from this quote must be marked degraded.
    pub fn is_degraded(&self) -> bool {
        self.freshness != Freshness::Live
    }

    /// Returns the price as a decimal.
    pub fn price(&self) -> Result<Decimal, AmountError> {
        Decimal::from_f64(self.price)
            .filter(|price| price.is_sign_positive() && !price.is_zero())
            .ok_or(AmountError::InvalidPrice)
    }

    /// Returns the price in minor units as passed to the sale contract.
    pub fn price_minor_units(&self) -> Result<U256, AmountError> {
        let minor = to_minor_units(self.price()?, QUOTE_PRICE_DECIMALS)?;
        if minor.is_zero() {
            return Err(AmountError::InvalidPrice);
        }
        Ok(minor)
    }
}

/// Messages used by the price oracle task.
#[derive(Debug)]
pub enum PriceOracleMessage {
    /// A new price was fetched.
    Update { quote: FeedQuote, received: Instant },
    /// The last fetch failed.
    FetchFailed,
    /// Message to lookup the current [`Quote`].
    Lookup { tx: oneshot::Sender<Quote> },
}

/// Configuration for the price oracle.
#[derive(Debug, Clone)]
pub struct PriceOracleConfig {
    /// Duration after which a price is considered degraded.
    pub rate_ttl: Duration,
    /// Price used until the feed returns one.
    pub fallback_price: f64,
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self { rate_ttl: DEFAULT_RATE_TTL, fallback_price: DEFAULT_NATIVE_PRICE }
    }
}

/// A price oracle that keeps the latest native asset price.
#[derive(Debug, Clone)]
pub struct PriceOracle {
    /// Channel sender to lookup and update the price.
    tx: mpsc::UnboundedSender<PriceOracleMessage>,
    /// Price returned if the oracle task is gone.
    fallback_price: f64,
    /// Constant rate returned on every lookup. For testing only.
    constant_rate: Option<f64>,
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl PriceOracle {
    /// Return a new [`PriceOracle`].
    pub fn new(config: PriceOracleConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fallback_price = config.fallback_price;

        tokio::spawn(async move {
            let metrics = PriceFeedMetrics::default();
            let mut latest: Option<(FeedQuote, Instant)> = None;
            let mut last_fetch_failed = false;

            while let Some(message) = rx.recv().await {
                match message {
                    PriceOracleMessage::Update { quote, received } => {
                        trace!(price = quote.price, source = %quote.source, "Price update.");
                        metrics.price.set(quote.price);
                        latest = Some((quote, received));
                        last_fetch_failed = false;
                    }
                    PriceOracleMessage::FetchFailed => {
                        metrics.fetch_failures.increment(1);
                        last_fetch_failed = true;
                    }
                    PriceOracleMessage::Lookup { tx } => {
                        let quote = match &latest {
                            None => {
                                metrics.fallback_hits.increment(1);
                                Quote::fallback(config.fallback_price)
                            }
                            Some((quote, received)) => {
                                let expired = received.elapsed() > config.rate_ttl;
                                if expired {
                                    metrics.expired_hits.increment(1);
                                }
                                Quote {
                                    price: quote.price,
                                    timestamp: quote.timestamp,
                                    source: quote.source.clone(),
                                    freshness: if expired || last_fetch_failed {
                                        Freshness::Degraded
                                    } else {
                                        Freshness::Live
                                    },
                                }
                            }
                        };
                        let _ = tx.send(quote);
                    }
                }
            }
        });

        Self { tx, fallback_price, constant_rate: None }
    }

    /// Returns [`Self`] with a constant rate returned on every lookup.
    pub fn with_constant_rate(mut self, rate: f64) -> Self {
        self.constant_rate = Some(rate);
        self
    }

    /// Spawns the HTTP price feed.
    pub fn spawn_feed(&self, url: Url, refresh_interval: Duration) -> JoinHandle<()> {
        debug!(%url, ?refresh_interval, "Launching price feed.");
        PriceFeed::launch(url, refresh_interval, self.tx.clone())
    }

    /// Pushes a price as if it was fetched now.
    pub fn update(&self, quote: FeedQuote) {
        let _ = self.tx.send(PriceOracleMessage::Update { quote, received: Instant::now() });
    }

    /// Records a failed fetch.
    pub fn fetch_failed(&self) {
        let _ = self.tx.send(PriceOracleMessage::FetchFailed);
    }

    /// Returns the current native asset quote.
    ///
    /// Never fails: without a usable price the fallback price is returned.
    pub async fn quote(&self) -> Quote {
        if let Some(rate) = self.constant_rate {
            return Quote {
                price: rate,
                timestamp: unix_now(),
                source: "constant".to_string(),
                freshness: Freshness::Live,
            };
        }

        let (req_tx, req_rx) = oneshot::channel();
        let _ = self.tx.send(PriceOracleMessage::Lookup { tx: req_tx });
        req_rx.await.unwrap_or_else(|_| Quote::fallback(self.fallback_price))
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_quote(price: f64) -> FeedQuote {
        FeedQuote { price, timestamp: 1_700_000_000, source: "test".into() }
    }

    #[tokio::test]
    async fn fallback_until_first_price() {
        let oracle = PriceOracle::default();
        let quote = oracle.quote().await;
        assert_eq!(quote.freshness, Freshness::Fallback);
        assert_eq!(quote.price, DEFAULT_NATIVE_PRICE);
        assert!(quote.is_degraded());

        oracle.update(feed_quote(3000.0));
        let quote = oracle.quote().await;
        assert_eq!(quote.freshness, Freshness::Live);
        assert_eq!(quote.price, 3000.0);
        assert_eq!(quote.source, "test");
    }

    #[tokio::test]
    async fn failed_fetch_keeps_last_price() {
        let oracle = PriceOracle::default();
        oracle.update(feed_quote(3000.0));
        oracle.fetch_failed();

        let quote = oracle.quote().await;
        assert_eq!(quote.freshness, Freshness::Degraded);
        assert_eq!(quote.price, 3000.0);

        oracle.update(feed_quote(3100.0));
        assert_eq!(oracle.quote().await.freshness, Freshness::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_price_is_degraded() {
        let oracle = PriceOracle::new(PriceOracleConfig {
            rate_ttl: Duration::from_secs(10),
            ..Default::default()
        });
        oracle.update(feed_quote(3000.0));
        assert_eq!(oracle.quote().await.freshness, Freshness::Live);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(oracle.quote().await.freshness, Freshness::Degraded);
    }

    #[tokio::test]
    async fn constant_rate() {
        let oracle = PriceOracle::default().with_constant_rate(2500.0);
        let quote = oracle.quote().await;
        assert_eq!(quote.freshness, Freshness::Live);
        assert_eq!(quote.price_minor_units().unwrap(), U256::from(2_500_000_000u64));
    }

    #[test]
    fn invalid_price() {
        assert_eq!(Quote::fallback(0.0).price(), Err(AmountError::InvalidPrice));
        assert_eq!(Quote::fallback(0.0000001).price_minor_units(), Err(AmountError::InvalidPrice));
    }
}
