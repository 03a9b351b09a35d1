//! Price sampling.
//!
//! `PriceSampler` pulls a quote from the feed under a hard timeout, stamps it
//! with the engine clock, and appends it to the store's immutable sample
//! series. Transitions that need a fresh price go through here so a hung feed
//! can only cost one timeout budget per token per tick.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use arena_common::{PriceSample, TokenAddress};

use crate::clock::Clock;
use crate::feed::{FeedError, PriceFeed};
use crate::store::{CompetitionStore, StoreError};

/// Errors from a sampling attempt. All variants are recoverable: the caller
/// defers the transition and retries next tick.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("feed call for {token} timed out after {timeout:?}")]
    Timeout { token: TokenAddress, timeout: Duration },

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fetches quotes and persists them as timestamped samples.
pub struct PriceSampler {
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn CompetitionStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl PriceSampler {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn CompetitionStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            clock,
            timeout,
        }
    }

    /// Fetch one quote for `token`, persist it, and return the stored sample.
    ///
    /// The sample is stamped with the engine clock at observation time, not
    /// with whatever timestamp the feed reports.
    pub async fn sample(&self, token: &TokenAddress) -> Result<PriceSample, SampleError> {
        let quote = match tokio::time::timeout(self.timeout, self.feed.quote(token)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(token = %token, timeout = ?self.timeout, "Price feed call timed out");
                return Err(SampleError::Timeout {
                    token: token.clone(),
                    timeout: self.timeout,
                });
            }
        };

        let sample = PriceSample::from_quote(token.clone(), &quote, self.clock.now());
        self.store.append_sample(sample.clone()).await?;
        Ok(sample)
    }
}
