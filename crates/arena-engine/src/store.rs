//! Persistence interface for competitions, wagers, and price samples.
//!
//! `CompetitionStore` is the engine's only view of storage. The contract
//! encodes the invariants the scheduler relies on:
//!
//! - `update_phase` is compare-and-swap on the current phase, so a stale or
//!   duplicate tick can never move a competition backwards or skip a phase.
//! - `record_twap` is write-once per (competition, token, slot); re-recording
//!   the same value is an idempotent no-op, a different value is an error.
//! - `commit_resolution` applies winner, end TWAPs, performances, payouts,
//!   and the `Closed → Resolved` phase write as one unit or not at all.
//!
//! `MemoryStore` is the reference implementation; a database-backed store
//! implements the same trait behind a transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use arena_common::{
    BettorId, Competition, CompetitionId, Phase, PriceSample, TokenAddress, TwapSlot, Wager,
    WagerId,
};

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("competition {0} not found")]
    NotFound(CompetitionId),

    /// Compare-and-swap failure: the stored phase was not the expected one.
    #[error("competition {id}: expected phase {expected}, found {actual}")]
    PhaseConflict {
        id: CompetitionId,
        expected: Phase,
        actual: Phase,
    },

    /// A TWAP snapshot slot was already written with a different value.
    #[error("competition {id}: {slot} TWAP for {token} already recorded")]
    TwapAlreadyRecorded {
        id: CompetitionId,
        token: TokenAddress,
        slot: TwapSlot,
    },

    #[error("token {token} is not part of competition {id}")]
    UnknownToken {
        id: CompetitionId,
        token: TokenAddress,
    },

    #[error("bettor {bettor} already has a wager on competition {id}")]
    DuplicateWager { id: CompetitionId, bettor: BettorId },

    #[error("wager rejected: {0}")]
    WagerRejected(String),

    /// The resolution pre-conditions did not hold; nothing was written.
    #[error("resolution rejected for {id}: {reason}")]
    ResolutionRejected { id: CompetitionId, reason: String },

    /// Backend write failure. The enclosing operation rolled back.
    #[error("store write failed: {0}")]
    WriteFailed(String),
}

/// Everything `commit_resolution` persists as one atomic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub winner: TokenAddress,
    pub token_a_end_twap: Decimal,
    pub token_b_end_twap: Decimal,
    pub token_a_performance: Decimal,
    pub token_b_performance: Decimal,
    /// Per-wager payout amounts; losing wagers appear with zero.
    pub payouts: BTreeMap<WagerId, Decimal>,
}

/// Storage operations consumed by the engine.
#[async_trait]
pub trait CompetitionStore: Send + Sync {
    async fn create_competition(&self, competition: Competition) -> Result<(), StoreError>;

    async fn competition(&self, id: CompetitionId) -> Result<Competition, StoreError>;

    async fn competitions_by_phase(&self, phase: Phase) -> Result<Vec<Competition>, StoreError>;

    /// Move `id` from `from` to `to`. Fails with `PhaseConflict` when the
    /// stored phase differs from `from`.
    async fn update_phase(
        &self,
        id: CompetitionId,
        from: Phase,
        to: Phase,
    ) -> Result<(), StoreError>;

    /// Record one TWAP anchor. Write-once: recording an identical value again
    /// succeeds (idempotent retry), a conflicting value fails.
    async fn record_twap(
        &self,
        id: CompetitionId,
        token: &TokenAddress,
        slot: TwapSlot,
        value: Decimal,
    ) -> Result<(), StoreError>;

    /// Persist a wager and fold its amount into the competition pools.
    /// Rejects wagers outside the Voting phase and duplicate bettors.
    async fn place_wager(&self, wager: Wager) -> Result<(), StoreError>;

    async fn wagers_for(&self, id: CompetitionId) -> Result<Vec<Wager>, StoreError>;

    /// Atomically persist winner, end TWAPs, performances, per-wager payouts,
    /// and the `Closed → Resolved` phase write. Either all of it lands or the
    /// competition is left exactly as it was.
    async fn commit_resolution(
        &self,
        id: CompetitionId,
        outcome: &ResolutionOutcome,
    ) -> Result<(), StoreError>;

    /// Operator cancellation. Valid from any non-terminal phase.
    async fn cancel(&self, id: CompetitionId) -> Result<(), StoreError>;

    /// Mark a competition for manual intervention; flagged competitions are
    /// excluded from automatic processing.
    async fn flag_for_review(&self, id: CompetitionId, reason: &str) -> Result<(), StoreError>;

    async fn append_sample(&self, sample: PriceSample) -> Result<(), StoreError>;

    /// Samples for `token` with timestamp in `[from, to]`, ascending.
    async fn samples_in_window(
        &self,
        token: &TokenAddress,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>, StoreError>;

    /// Most recent sample at or before `at`, if any.
    async fn latest_sample_at_or_before(
        &self,
        token: &TokenAddress,
        at: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, StoreError>;

    /// Token pairs that are in-flight or were created after `since`.
    /// Used by the factory's cool-down check.
    async fn recent_pairs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(TokenAddress, TokenAddress)>, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    competitions: HashMap<CompetitionId, Competition>,
    wagers: HashMap<CompetitionId, Vec<Wager>>,
    samples: HashMap<TokenAddress, Vec<PriceSample>>,
}

/// In-memory reference store.
///
/// A single mutex over the whole state makes every operation, in particular
/// `commit_resolution`, trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    min_wager: Decimal,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects wagers below `min_wager`.
    pub fn with_min_wager(min_wager: Decimal) -> Self {
        Self {
            inner: Mutex::default(),
            min_wager,
        }
    }
}

#[async_trait]
impl CompetitionStore for MemoryStore {
    async fn create_competition(&self, competition: Competition) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.wagers.entry(competition.id).or_default();
        inner.competitions.insert(competition.id, competition);
        Ok(())
    }

    async fn competition(&self, id: CompetitionId) -> Result<Competition, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .competitions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn competitions_by_phase(&self, phase: Phase) -> Result<Vec<Competition>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Competition> = inner
            .competitions
            .values()
            .filter(|c| c.phase == phase)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.start_time, c.id));
        Ok(found)
    }

    async fn update_phase(
        &self,
        id: CompetitionId,
        from: Phase,
        to: Phase,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let comp = inner
            .competitions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        if comp.phase != from {
            return Err(StoreError::PhaseConflict {
                id,
                expected: from,
                actual: comp.phase,
            });
        }
        comp.phase = to;
        Ok(())
    }

    async fn record_twap(
        &self,
        id: CompetitionId,
        token: &TokenAddress,
        slot: TwapSlot,
        value: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let comp = inner
            .competitions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;

        let snapshot = if token == &comp.token_a {
            &mut comp.token_a_twap
        } else if token == &comp.token_b {
            &mut comp.token_b_twap
        } else {
            return Err(StoreError::UnknownToken {
                id,
                token: token.clone(),
            });
        };

        let field = match slot {
            TwapSlot::Start => &mut snapshot.start,
            TwapSlot::End => &mut snapshot.end,
        };
        match field {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(StoreError::TwapAlreadyRecorded {
                id,
                token: token.clone(),
                slot,
            }),
            None => {
                *field = Some(value);
                Ok(())
            }
        }
    }

    async fn place_wager(&self, wager: Wager) -> Result<(), StoreError> {
        if wager.amount < self.min_wager {
            return Err(StoreError::WagerRejected(format!(
                "amount {} below minimum {}",
                wager.amount, self.min_wager
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let id = wager.competition_id;

        let comp = inner
            .competitions
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        if comp.phase != Phase::Voting {
            return Err(StoreError::WagerRejected(format!(
                "competition {id} is {}, wagers only accepted during voting",
                comp.phase
            )));
        }
        if !comp.contains_token(&wager.chosen_token) {
            return Err(StoreError::UnknownToken {
                id,
                token: wager.chosen_token,
            });
        }
        let on_token_a = wager.chosen_token == comp.token_a;

        let existing = inner.wagers.entry(id).or_default();
        if existing.iter().any(|w| w.bettor == wager.bettor) {
            return Err(StoreError::DuplicateWager {
                id,
                bettor: wager.bettor,
            });
        }

        let amount = wager.amount;
        existing.push(wager);

        let comp = inner.competitions.get_mut(&id).expect("checked above");
        comp.total_pool += amount;
        if on_token_a {
            comp.token_a_pool += amount;
        } else {
            comp.token_b_pool += amount;
        }
        Ok(())
    }

    async fn wagers_for(&self, id: CompetitionId) -> Result<Vec<Wager>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.wagers.get(&id).cloned().unwrap_or_default())
    }

    async fn commit_resolution(
        &self,
        id: CompetitionId,
        outcome: &ResolutionOutcome,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        // Validate everything before touching any state.
        let comp = inner
            .competitions
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        if comp.phase != Phase::Closed {
            return Err(StoreError::ResolutionRejected {
                id,
                reason: format!("phase is {}, expected closed", comp.phase),
            });
        }
        if comp.token_a_twap.start.is_none() || comp.token_b_twap.start.is_none() {
            return Err(StoreError::ResolutionRejected {
                id,
                reason: "start TWAP missing".to_string(),
            });
        }
        if !comp.contains_token(&outcome.winner) {
            return Err(StoreError::ResolutionRejected {
                id,
                reason: format!("winner {} not part of competition", outcome.winner),
            });
        }
        let wagers = inner.wagers.get(&id).cloned().unwrap_or_default();
        for wager in &wagers {
            if !outcome.payouts.contains_key(&wager.id) {
                return Err(StoreError::ResolutionRejected {
                    id,
                    reason: format!("payout mapping missing wager {}", wager.id),
                });
            }
        }

        // All checks passed; apply every write.
        let comp = inner.competitions.get_mut(&id).expect("checked above");
        comp.token_a_twap.end = Some(outcome.token_a_end_twap);
        comp.token_b_twap.end = Some(outcome.token_b_end_twap);
        comp.token_a_performance = Some(outcome.token_a_performance);
        comp.token_b_performance = Some(outcome.token_b_performance);
        comp.winner_token = Some(outcome.winner.clone());
        comp.phase = Phase::Resolved;

        if let Some(wagers) = inner.wagers.get_mut(&id) {
            for wager in wagers.iter_mut() {
                if let Some(amount) = outcome.payouts.get(&wager.id) {
                    wager.payout_amount = *amount;
                }
            }
        }
        Ok(())
    }

    async fn cancel(&self, id: CompetitionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let comp = inner
            .competitions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        if comp.phase.is_terminal() {
            return Err(StoreError::PhaseConflict {
                id,
                expected: Phase::Cancelled,
                actual: comp.phase,
            });
        }
        comp.phase = Phase::Cancelled;
        Ok(())
    }

    async fn flag_for_review(&self, id: CompetitionId, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let comp = inner
            .competitions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        if comp.flagged.is_none() {
            comp.flagged = Some(reason.to_string());
        }
        Ok(())
    }

    async fn append_sample(&self, sample: PriceSample) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let series = inner.samples.entry(sample.token.clone()).or_default();
        series.push(sample);
        series.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    async fn samples_in_window(
        &self,
        token: &TokenAddress,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .samples
            .get(token)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp >= from && s.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_sample_at_or_before(
        &self,
        token: &TokenAddress,
        at: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.samples.get(token).and_then(|series| {
            series
                .iter()
                .filter(|s| s.timestamp <= at)
                .max_by_key(|s| s.timestamp)
                .cloned()
        }))
    }

    async fn recent_pairs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(TokenAddress, TokenAddress)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .competitions
            .values()
            .filter(|c| !c.is_terminal() || c.created_at >= since)
            .map(|c| (c.token_a.clone(), c.token_b.clone()))
            .collect())
    }
}
