//! Time-weighted average price over a trailing window.
//!
//! Each sample's price is weighted by the time until the next sample, with
//! the last sample's weight extending to the window end. A single price
//! briefly spiked between ticks therefore moves the anchor far less than a
//! plain mean of samples would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use arena_common::{PriceSample, TokenAddress};

use crate::store::{CompetitionStore, StoreError};

/// Errors from TWAP computation.
#[derive(Debug, Error)]
pub enum TwapError {
    /// No sample exists at or before the window end. The caller defers the
    /// transition until sampling has produced at least one point.
    #[error("no price data for {0}")]
    NoData(TokenAddress),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Computes TWAP anchors from the store's sample series.
pub struct TwapCalculator {
    store: Arc<dyn CompetitionStore>,
    window: chrono::Duration,
}

impl TwapCalculator {
    pub fn new(store: Arc<dyn CompetitionStore>, window: chrono::Duration) -> Self {
        Self { store, window }
    }

    /// TWAP for `token` over `[window_end - window, window_end]`.
    ///
    /// When the window holds no samples, falls back to the most recent sample
    /// at or before `window_end` so a freshly listed or sparsely sampled token
    /// still anchors to its prevailing price.
    pub async fn compute(
        &self,
        token: &TokenAddress,
        window_end: DateTime<Utc>,
    ) -> Result<Decimal, TwapError> {
        let from = window_end - self.window;
        let samples = self.store.samples_in_window(token, from, window_end).await?;

        if samples.is_empty() {
            let fallback = self
                .store
                .latest_sample_at_or_before(token, window_end)
                .await?
                .ok_or_else(|| TwapError::NoData(token.clone()))?;
            debug!(token = %token, price = %fallback.price, "TWAP window empty, using last known price");
            return Ok(fallback.price);
        }

        Ok(weighted_average(&samples, window_end))
    }
}

/// Time-weighted mean of `samples` (ascending by timestamp) up to
/// `window_end`. Falls back to the last price when all weights are zero,
/// which happens when the only sample sits exactly on the window end.
fn weighted_average(samples: &[PriceSample], window_end: DateTime<Utc>) -> Decimal {
    let mut weighted_sum = Decimal::ZERO;
    let mut total_weight = Decimal::ZERO;

    for (i, sample) in samples.iter().enumerate() {
        let until = samples
            .get(i + 1)
            .map(|next| next.timestamp)
            .unwrap_or(window_end);
        let weight = Decimal::from((until - sample.timestamp).num_seconds().max(0));
        weighted_sum += sample.price * weight;
        total_weight += weight;
    }

    if total_weight.is_zero() {
        samples.last().map(|s| s.price).unwrap_or(Decimal::ZERO)
    } else {
        weighted_sum / total_weight
    }
}
