//! The phase state machine.
//!
//! Every tick the scheduler samples prices for the tokens of voting and
//! active competitions, then scans all non-terminal competitions and applies
//! whatever transitions are due. Transitions for one competition run under a
//! per-competition lock and are applied one step at a time, so a tick that
//! arrives late walks `Upcoming → Voting → Active → Closed → Resolved` in
//! order within that single tick rather than skipping phases.
//!
//! Failure policy: transitions that cannot complete (feed down, no price
//! data, store write failure) leave the phase untouched and are retried next
//! tick. After a configurable number of consecutive failures the competition
//! is flagged for manual intervention and dropped from automatic processing.
//! Flagged and terminal competitions are never touched.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use arena_common::{Competition, CompetitionId, Phase, TokenAddress, TwapSlot};

use crate::clock::Clock;
use crate::notify::{EngineEvent, Notifier};
use crate::payout::PayoutCalculator;
use crate::sampler::{PriceSampler, SampleError};
use crate::store::{CompetitionStore, ResolutionOutcome, StoreError};
use crate::twap::{TwapCalculator, TwapError};

/// Scheduler failure policy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Consecutive failed evaluations before a competition is flagged.
    pub max_consecutive_failures: u32,
}

/// Errors from evaluating one competition.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Twap(#[from] TwapError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invariant violation (e.g. a closed competition with no start TWAP).
    /// Never retried; the competition is flagged immediately.
    #[error("inconsistent state for {id}: {reason}")]
    Inconsistent { id: CompetitionId, reason: String },
}

impl EvalError {
    /// Recoverable errors defer the transition to the next tick; everything
    /// else flags the competition for manual intervention right away.
    pub fn recoverable(&self) -> bool {
        match self {
            EvalError::Sample(_) => true,
            EvalError::Twap(_) => true,
            EvalError::Store(StoreError::TwapAlreadyRecorded { .. }) => false,
            EvalError::Store(_) => true,
            EvalError::Inconsistent { .. } => false,
        }
    }
}

/// Drives competitions through their lifecycle.
pub struct CompetitionScheduler {
    store: Arc<dyn CompetitionStore>,
    sampler: Arc<PriceSampler>,
    twap: Arc<TwapCalculator>,
    payout: PayoutCalculator,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// Per-competition evaluation locks. An evaluation that finds the lock
    /// held skips the competition; the next tick picks it up.
    locks: DashMap<CompetitionId, Arc<tokio::sync::Mutex<()>>>,
    /// Consecutive failure counts, cleared on any successful evaluation.
    failures: DashMap<CompetitionId, u32>,
}

impl CompetitionScheduler {
    pub fn new(
        store: Arc<dyn CompetitionStore>,
        sampler: Arc<PriceSampler>,
        twap: Arc<TwapCalculator>,
        payout: PayoutCalculator,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sampler,
            twap,
            payout,
            notifier,
            clock,
            config,
            locks: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Run one tick: sample prices for tokens with an open TWAP window, then
    /// evaluate every non-terminal competition. Returns the number of phase
    /// transitions applied.
    pub async fn tick(&self) -> usize {
        let mut pending = Vec::new();
        for phase in [Phase::Upcoming, Phase::Voting, Phase::Active, Phase::Closed] {
            match self.store.competitions_by_phase(phase).await {
                Ok(comps) => pending.extend(comps),
                Err(e) => {
                    error!(%phase, error = %e, "Failed to load competitions for tick");
                    return 0;
                }
            }
        }

        self.sampling_pass(&pending).await;

        let evaluations = pending.iter().map(|comp| self.evaluate_guarded(comp.id));
        join_all(evaluations).await.into_iter().sum()
    }

    /// Sample every token that belongs to a voting or active competition.
    /// These samples are what the TWAP anchors read later; a failed sample
    /// here just thins the series and is not counted against any competition.
    async fn sampling_pass(&self, pending: &[Competition]) {
        let tokens: BTreeSet<TokenAddress> = pending
            .iter()
            .filter(|c| {
                matches!(c.phase, Phase::Voting | Phase::Active) && c.flagged.is_none()
            })
            .flat_map(|c| [c.token_a.clone(), c.token_b.clone()])
            .collect();

        let samples = tokens.iter().map(|token| self.sampler.sample(token));
        for (token, result) in tokens.iter().zip(join_all(samples).await) {
            if let Err(e) = result {
                warn!(token = %token, error = %e, "Periodic price sample failed");
            }
        }
    }

    /// Operator cancellation. Valid from any non-terminal phase; publishes
    /// the phase change on success.
    pub async fn cancel(&self, id: CompetitionId) -> Result<(), StoreError> {
        let before = self.store.competition(id).await?.phase;
        self.store.cancel(id).await?;
        info!(competition = %id, from = %before, "Competition cancelled");
        self.notifier.publish(EngineEvent::PhaseChanged {
            competition_id: id,
            from: before,
            to: Phase::Cancelled,
            timestamp: self.clock.now(),
        });
        Ok(())
    }

    /// Evaluate one competition under its lock; skip if already running.
    async fn evaluate_guarded(&self, id: CompetitionId) -> usize {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            debug!(competition = %id, "Evaluation already in flight, skipping");
            return 0;
        };

        match self.evaluate(id).await {
            Ok(applied) => {
                self.failures.remove(&id);
                applied
            }
            Err(e) if e.recoverable() => {
                let count = {
                    let mut entry = self.failures.entry(id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                warn!(
                    competition = %id,
                    failures = count,
                    error = %e,
                    "Transition failed, will retry next tick"
                );
                if count >= self.config.max_consecutive_failures {
                    self.failures.remove(&id);
                    self.flag(id, &format!("{count} consecutive failed transitions: {e}"))
                        .await;
                }
                0
            }
            Err(e) => {
                error!(competition = %id, error = %e, "Unrecoverable evaluation error");
                self.failures.remove(&id);
                self.flag(id, &e.to_string()).await;
                0
            }
        }
    }

    /// Apply every transition currently due for `id`, one step at a time.
    async fn evaluate(&self, id: CompetitionId) -> Result<usize, EvalError> {
        let mut applied = 0;
        loop {
            let comp = self.store.competition(id).await?;
            if comp.is_terminal() {
                self.locks.remove(&id);
                break;
            }
            if comp.flagged.is_some() {
                debug!(competition = %id, "Flagged for review, skipping");
                break;
            }

            let now = self.clock.now();
            let Some(next) = comp.due_transition(now) else {
                break;
            };

            match next {
                Phase::Voting => {
                    self.store
                        .update_phase(id, Phase::Upcoming, Phase::Voting)
                        .await?;
                    self.announce(&comp, Phase::Voting);
                }
                Phase::Active => {
                    self.activate(&comp).await?;
                    self.announce(&comp, Phase::Active);
                }
                Phase::Closed => {
                    self.store
                        .update_phase(id, Phase::Active, Phase::Closed)
                        .await?;
                    self.announce(&comp, Phase::Closed);
                }
                Phase::Resolved => {
                    self.resolve(&comp).await?;
                }
                Phase::Upcoming | Phase::Cancelled => {
                    // due_transition never yields these
                    break;
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// `Voting → Active`: anchor the start TWAP for both tokens, then flip
    /// the phase. TWAPs are recorded before the phase write so a retry after
    /// a partial failure re-runs against write-once slots and an unchanged
    /// phase.
    async fn activate(&self, comp: &Competition) -> Result<(), EvalError> {
        let anchor = comp.voting_end_time;
        for token in [&comp.token_a, &comp.token_b] {
            let already = comp.twap_for(token).and_then(|s| s.start).is_some();
            if already {
                continue;
            }
            self.sampler.sample(token).await?;
            let twap = self.twap.compute(token, anchor).await?;
            self.store
                .record_twap(comp.id, token, TwapSlot::Start, twap)
                .await?;
            debug!(competition = %comp.id, token = %token, %twap, "Recorded start TWAP");
        }
        self.store
            .update_phase(comp.id, Phase::Voting, Phase::Active)
            .await?;
        Ok(())
    }

    /// `Closed → Resolved`: compute end TWAPs and performances, judge the
    /// winner, compute payouts, and commit everything atomically.
    async fn resolve(&self, comp: &Competition) -> Result<(), EvalError> {
        let (Some(start_a), Some(start_b)) = (comp.token_a_twap.start, comp.token_b_twap.start)
        else {
            return Err(EvalError::Inconsistent {
                id: comp.id,
                reason: "closed without start TWAPs".to_string(),
            });
        };
        if start_a.is_zero() || start_b.is_zero() {
            return Err(EvalError::Inconsistent {
                id: comp.id,
                reason: "start TWAP is zero".to_string(),
            });
        }

        let anchor = comp.end_time;
        self.sampler.sample(&comp.token_a).await?;
        self.sampler.sample(&comp.token_b).await?;
        let end_a = self.twap.compute(&comp.token_a, anchor).await?;
        let end_b = self.twap.compute(&comp.token_b, anchor).await?;

        let perf_a = (end_a - start_a) / start_a;
        let perf_b = (end_b - start_b) / start_b;

        // Strictly better performance wins; an exact tie goes to token A.
        let winner: TokenAddress = if perf_b > perf_a {
            comp.token_b.clone()
        } else {
            comp.token_a.clone()
        };

        let wagers = self.store.wagers_for(comp.id).await?;
        let payouts = self.payout.compute(&wagers, &winner);

        let outcome = ResolutionOutcome {
            winner: winner.clone(),
            token_a_end_twap: end_a,
            token_b_end_twap: end_b,
            token_a_performance: perf_a,
            token_b_performance: perf_b,
            payouts,
        };
        self.store.commit_resolution(comp.id, &outcome).await?;

        info!(
            competition = %comp.id,
            winner = %winner,
            %perf_a,
            %perf_b,
            "Competition resolved"
        );
        self.notifier.publish(EngineEvent::PhaseChanged {
            competition_id: comp.id,
            from: Phase::Closed,
            to: Phase::Resolved,
            timestamp: self.clock.now(),
        });
        self.notifier.publish(EngineEvent::Resolved {
            competition_id: comp.id,
            winner_token: winner,
            token_a_performance: perf_a,
            token_b_performance: perf_b,
        });
        Ok(())
    }

    fn announce(&self, comp: &Competition, to: Phase) {
        info!(competition = %comp.id, from = %comp.phase, %to, "Phase transition");
        self.notifier.publish(EngineEvent::PhaseChanged {
            competition_id: comp.id,
            from: comp.phase,
            to,
            timestamp: self.clock.now(),
        });
    }

    async fn flag(&self, id: CompetitionId, reason: &str) {
        warn!(competition = %id, reason, "Flagging competition for manual intervention");
        if let Err(e) = self.store.flag_for_review(id, reason).await {
            error!(competition = %id, error = %e, "Failed to flag competition");
        }
    }
}
