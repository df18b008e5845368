use thiserror::Error;

/// Errors related to the external price feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed could not be reached or returned an unexpected body.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The feed returned a price that cannot be used.
    #[error("price feed returned an invalid price: {0}")]
    InvalidPrice(f64),
}
