//! ETH/USD price source
//!
//! Fetches the ETH price for a block's mine time from an HTTP quote
//! endpoint. Quotes older than the caller's max age are reported as
//! stale (`Ok(None)`); the watcher then falls back to the most recent
//! stored block price, so ingestion never blocks on the price feed.

use anyhow::{Context, Result};
use serde::Deserialize;

/// An ETH/USD price quote.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EthPrice {
    /// Quote timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// USD per ETH
    pub ethusd: f64,
}

/// Whether a quote is close enough to the requested timestamp.
pub fn is_fresh_enough(quote_timestamp: u64, requested: u64, max_age_secs: u64) -> bool {
    quote_timestamp.abs_diff(requested) <= max_age_secs
}

/// Price feed interface.
///
/// `Ok(None)` means the source had no quote within `max_age_secs` of
/// the requested timestamp; transport failures are errors.
pub trait PriceApi {
    fn price_at(
        &self,
        timestamp: u64,
        max_age_secs: u64,
    ) -> impl std::future::Future<Output = Result<Option<EthPrice>>> + Send;
}

/// HTTP price source hitting a JSON quote endpoint.
///
/// The endpoint is expected to return `{"timestamp": <secs>, "ethusd":
/// <float>}` for its latest quote.
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceSource {
    /// Create a new price source for the given quote URL.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl PriceApi for HttpPriceSource {
    async fn price_at(&self, timestamp: u64, max_age_secs: u64) -> Result<Option<EthPrice>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch price quote")?;

        let quote: EthPrice = response
            .json()
            .await
            .context("Failed to parse price quote")?;

        if is_fresh_enough(quote.timestamp, timestamp, max_age_secs) {
            Ok(Some(quote))
        } else {
            tracing::debug!(
                quote_timestamp = quote.timestamp,
                requested = timestamp,
                "price quote too old, reporting stale"
            );
            Ok(None)
        }
    }
}
