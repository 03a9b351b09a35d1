//! Price feed and token directory clients.
//!
//! The engine consumes two narrow external interfaces: a price feed that
//! returns the current price/volume/market-cap for a token address, and a
//! token directory that lists tokens eligible for new competitions (minimum
//! market cap, age, and similar filters are the directory's responsibility,
//! not the engine's).
//!
//! Both are traits so the scheduler and factory can be driven by stub
//! implementations in tests; `HttpPriceFeed` and `HttpTokenDirectory` are the
//! production clients.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use arena_common::{PriceQuote, TokenAddress};

/// Default request timeout for feed calls; the sampler applies its own
/// (configurable) outer timeout on top.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Errors from the price feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Feed unreachable or returned an error status. Retried next tick.
    #[error("price feed unavailable: {0}")]
    Unavailable(String),

    /// Response could not be parsed.
    #[error("price feed response invalid: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Unavailable(err.to_string())
    }
}

/// Current price reading for a token address.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current price/volume/market-cap for a token.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Unavailable` when the feed cannot be reached;
    /// callers treat this as recoverable and retry on the next tick.
    async fn quote(&self, token: &TokenAddress) -> Result<PriceQuote, FeedError>;
}

// ============================================================================
// HTTP price feed
// ============================================================================

/// JSON shape returned by the feed's `/price/{token}` endpoint.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Decimal,
    #[serde(default)]
    volume: Decimal,
    #[serde(default)]
    market_cap: Decimal,
}

/// Price feed backed by an HTTP JSON service.
pub struct HttpPriceFeed {
    http: Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn quote(&self, token: &TokenAddress) -> Result<PriceQuote, FeedError> {
        let url = format!("{}/price/{}", self.base_url, token);
        debug!(token = %token, "Fetching price quote");

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "status {} from {}",
                response.status(),
                url
            )));
        }

        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        if body.price <= Decimal::ZERO {
            return Err(FeedError::Parse(format!(
                "non-positive price {} for {}",
                body.price, token
            )));
        }

        Ok(PriceQuote {
            price: body.price,
            volume: body.volume,
            market_cap: body.market_cap,
            timestamp: Utc::now(),
        })
    }
}

// ============================================================================
// Token directory
// ============================================================================

/// A token the directory considers eligible for new competitions.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleToken {
    pub address: TokenAddress,
    pub market_cap: Decimal,
}

/// Errors from the token directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("token directory unavailable: {0}")]
    Unavailable(String),

    #[error("token directory response invalid: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        DirectoryError::Unavailable(err.to_string())
    }
}

/// Source of eligible tokens for the factory.
///
/// Eligibility filters (minimum market cap, listing age, liquidity) are the
/// directory's concern; the factory only pairs what it is given.
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn eligible_tokens(&self) -> Result<Vec<EligibleToken>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    address: String,
    market_cap: Decimal,
}

/// Token directory backed by the same HTTP service as the price feed.
pub struct HttpTokenDirectory {
    http: Client,
    base_url: String,
}

impl HttpTokenDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenDirectory for HttpTokenDirectory {
    async fn eligible_tokens(&self) -> Result<Vec<EligibleToken>, DirectoryError> {
        let url = format!("{}/tokens/eligible", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "status {} from {}",
                response.status(),
                url
            )));
        }

        let entries: Vec<DirectoryEntry> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Parse(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|e| EligibleToken {
                address: TokenAddress::new(e.address),
                market_cap: e.market_cap,
            })
            .collect())
    }
}
