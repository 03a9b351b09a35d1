//! Competition creation.
//!
//! The factory pulls the eligible token set from the directory, sorts it by
//! market cap, and pairs neighbours whose caps sit within a configured
//! tolerance of each other. Pairs that are currently in flight or were used
//! within the cool-down window are skipped. Created competitions start in
//! `Upcoming` with the voting window offset into the near future.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use arena_common::{Competition, DomainError, TokenAddress};

use crate::clock::Clock;
use crate::config::FactoryConfig;
use crate::feed::{DirectoryError, EligibleToken, TokenDirectory};
use crate::store::{CompetitionStore, StoreError};

/// Errors from batch creation.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The eligible set yielded no usable pair. Operator-visible; the factory
    /// retries on its next scheduled run.
    #[error("no eligible token pairs available")]
    NoEligiblePairs,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Creates batches of upcoming competitions.
pub struct CompetitionFactory {
    directory: Arc<dyn TokenDirectory>,
    store: Arc<dyn CompetitionStore>,
    clock: Arc<dyn Clock>,
    config: FactoryConfig,
}

impl CompetitionFactory {
    pub fn new(
        directory: Arc<dyn TokenDirectory>,
        store: Arc<dyn CompetitionStore>,
        clock: Arc<dyn Clock>,
        config: FactoryConfig,
    ) -> Self {
        Self {
            directory,
            store,
            clock,
            config,
        }
    }

    /// Create up to `n` new competitions from similarly sized token pairs.
    ///
    /// Fails with `NoEligiblePairs` only when not a single pair could be
    /// formed; a partial batch is a success.
    pub async fn create_batch(&self, n: usize) -> Result<Vec<Competition>, FactoryError> {
        let mut tokens = self.directory.eligible_tokens().await?;
        tokens.sort_by(|a, b| b.market_cap.cmp(&a.market_cap));

        let now = self.clock.now();
        let blocked: HashSet<(TokenAddress, TokenAddress)> = self
            .store
            .recent_pairs(now - self.config.pair_cooldown)
            .await?
            .into_iter()
            .map(|(a, b)| ordered_pair(a, b))
            .collect();

        let start_time = now + self.config.start_offset;
        let voting_end_time = start_time + self.config.voting_duration;
        let end_time = voting_end_time + self.config.competition_duration;

        let mut created = Vec::new();
        let mut i = 0;
        while i + 1 < tokens.len() && created.len() < n {
            let (first, second) = (&tokens[i], &tokens[i + 1]);
            if !self.caps_match(first, second) {
                debug!(
                    a = %first.address,
                    b = %second.address,
                    "Market caps outside pairing tolerance"
                );
                i += 1;
                continue;
            }
            if blocked.contains(&ordered_pair(
                first.address.clone(),
                second.address.clone(),
            )) {
                debug!(
                    a = %first.address,
                    b = %second.address,
                    "Pair in flight or inside cool-down, skipping"
                );
                i += 1;
                continue;
            }

            let comp = Competition::new(
                first.address.clone(),
                second.address.clone(),
                start_time,
                voting_end_time,
                end_time,
                now,
            )?;
            self.store.create_competition(comp.clone()).await?;
            info!(
                competition = %comp.id,
                token_a = %comp.token_a,
                token_b = %comp.token_b,
                start = %comp.start_time,
                "Created competition"
            );
            created.push(comp);
            // Both tokens are consumed; a token appears in at most one
            // competition per batch.
            i += 2;
        }

        if created.is_empty() {
            return Err(FactoryError::NoEligiblePairs);
        }
        Ok(created)
    }

    /// Caps are close enough when the smaller is at least `1 - tolerance`
    /// of the larger.
    fn caps_match(&self, a: &EligibleToken, b: &EligibleToken) -> bool {
        let (min, max) = if a.market_cap <= b.market_cap {
            (a.market_cap, b.market_cap)
        } else {
            (b.market_cap, a.market_cap)
        };
        if max <= Decimal::ZERO {
            return false;
        }
        min / max >= Decimal::ONE - self.config.pair_tolerance
    }
}

/// Order-insensitive pair key.
fn ordered_pair(a: TokenAddress, b: TokenAddress) -> (TokenAddress, TokenAddress) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
