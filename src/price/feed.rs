use crate::{error::FeedError, price::oracle::PriceOracleMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval},
};
use tracing::{error, trace};
use url::Url;

/// A price as returned by the feed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedQuote {
    /// Price of one native asset in the quote currency.
    pub price: f64,
    /// Unix timestamp of the price, in seconds.
    pub timestamp: u64,
    /// Name of the upstream source.
    pub source: String,
}

impl FeedQuote {
    /// Rejects prices that are not finite and positive.
    pub fn validate(self) -> Result<Self, FeedError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(FeedError::InvalidPrice(self.price));
        }
        Ok(self)
    }
}

/// HTTP price feed client.
#[derive(Debug)]
pub struct PriceFeed {
    /// HTTP client.
    client: reqwest::Client,
    /// Endpoint returning a [`FeedQuote`].
    url: Url,
    /// Price oracle sender used to update the price.
    update_tx: mpsc::UnboundedSender<PriceOracleMessage>,
}

impl PriceFeed {
    /// Spawns a task that fetches the price every `refresh_interval` and sends it to the
    /// [`PriceOracle`](crate::price::PriceOracle).
    pub fn launch(
        url: Url,
        refresh_interval: Duration,
        update_tx: mpsc::UnboundedSender<PriceOracleMessage>,
    ) -> JoinHandle<()> {
        let feed = Self { client: reqwest::Client::new(), url, update_tx };

        tokio::spawn(async move {
            let mut clock = interval(refresh_interval);

            loop {
                clock.tick().await;
                let message = match feed.fetch().await {
                    Ok(quote) => PriceOracleMessage::Update { quote, received: Instant::now() },
                    Err(err) => {
                        error!(%err, url = %feed.url, "Failed to fetch price from feed.");
                        PriceOracleMessage::FetchFailed
                    }
                };

                if feed.update_tx.send(message).is_err() {
                    // oracle is gone
                    break;
                }
                clock.reset();
            }
        })
    }

    /// Fetches and validates the current price.
    async fn fetch(&self) -> Result<FeedQuote, FeedError> {
        let quote = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<FeedQuote>()
            .await?;

        trace!(?quote, "Price feed response.");

        quote.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_validate() {
        let quote: FeedQuote =
            serde_json::from_str(r#"{"price":2500.5,"timestamp":1700000000,"source":"coinbase"}"#)
                .unwrap();
        assert_eq!(quote.clone().validate().unwrap(), quote);

        for price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let quote = FeedQuote { price, timestamp: 0, source: "x".into() };
            assert!(matches!(quote.validate(), Err(FeedError::InvalidPrice(_))));
        }
    }
}
