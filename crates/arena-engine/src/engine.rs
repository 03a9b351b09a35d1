//! Tick driver.
//!
//! One fixed-interval loop drives both the scheduler and the factory. Missed
//! ticks are skipped, never queued: a slow tick simply means the next one
//! runs the same scan a little later, and per-competition locks inside the
//! scheduler keep overlapping runs from touching the same competition.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::factory::{CompetitionFactory, FactoryError};
use crate::scheduler::CompetitionScheduler;

/// Shared run-state flags.
///
/// Flags are atomics for lock-free access; shutdown additionally wakes the
/// run loop so it exits without waiting out the current interval.
#[derive(Debug, Default)]
pub struct EngineControl {
    /// Graceful shutdown requested.
    shutdown_requested: AtomicBool,

    /// Ticks completed since startup.
    ticks_completed: AtomicU64,

    shutdown_notify: Notify,
}

impl EngineControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request graceful shutdown; the loop exits after the current tick.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    #[inline]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    /// Resolves once shutdown has been requested.
    pub async fn shutdown_signal(&self) {
        let notified = self.shutdown_notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// The engine run loop: scheduler every tick, factory every N ticks.
pub struct Engine {
    scheduler: Arc<CompetitionScheduler>,
    factory: Arc<CompetitionFactory>,
    control: Arc<EngineControl>,
    tick_interval: Duration,
    factory_interval_ticks: u32,
    factory_batch_size: usize,
}

impl Engine {
    pub fn new(
        scheduler: Arc<CompetitionScheduler>,
        factory: Arc<CompetitionFactory>,
        control: Arc<EngineControl>,
        tick_interval: Duration,
        factory_interval_ticks: u32,
        factory_batch_size: usize,
    ) -> Self {
        Self {
            scheduler,
            factory,
            control,
            tick_interval,
            factory_interval_ticks,
            factory_batch_size,
        }
    }

    /// Run until shutdown is requested.
    pub async fn run(&self) {
        info!(
            tick_interval = ?self.tick_interval,
            factory_every = self.factory_interval_ticks,
            "Engine started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.control.shutdown_signal() => break,
            }

            let tick = self.control.ticks_completed.fetch_add(1, Ordering::Relaxed);
            let applied = self.scheduler.tick().await;
            if applied > 0 {
                debug!(tick, transitions = applied, "Tick complete");
            }

            if tick % u64::from(self.factory_interval_ticks) == 0 {
                self.run_factory().await;
            }
        }

        info!("Engine stopped");
    }

    async fn run_factory(&self) {
        match self.factory.create_batch(self.factory_batch_size).await {
            Ok(created) => {
                info!(count = created.len(), "Factory created competitions");
            }
            Err(FactoryError::NoEligiblePairs) => {
                debug!("Factory found no eligible pairs");
            }
            Err(e) => {
                warn!(error = %e, "Factory run failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use arena_common::{PriceQuote, TokenAddress};

    use crate::clock::SystemClock;
    use crate::feed::{DirectoryError, EligibleToken, FeedError, PriceFeed, TokenDirectory};
    use crate::notify::Notifier;
    use crate::payout::PayoutCalculator;
    use crate::sampler::PriceSampler;
    use crate::scheduler::SchedulerConfig;
    use crate::store::MemoryStore;
    use crate::twap::TwapCalculator;

    struct EmptyDirectory;

    #[async_trait]
    impl TokenDirectory for EmptyDirectory {
        async fn eligible_tokens(&self) -> Result<Vec<EligibleToken>, DirectoryError> {
            Ok(Vec::new())
        }
    }

    struct NoFeed;

    #[async_trait]
    impl PriceFeed for NoFeed {
        async fn quote(&self, _token: &TokenAddress) -> Result<PriceQuote, FeedError> {
            Err(FeedError::Unavailable("test feed".to_string()))
        }
    }

    #[test]
    fn test_control_flags() {
        let control = EngineControl::new();
        assert!(!control.is_shutdown_requested());
        control.request_shutdown();
        assert!(control.is_shutdown_requested());
        assert_eq!(control.ticks_completed(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_resolves_after_request() {
        let control = Arc::new(EngineControl::new());
        control.request_shutdown();
        // Already requested: resolves immediately.
        control.shutdown_signal().await;
    }

    #[tokio::test]
    async fn test_run_loop_exits_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(SystemClock);
        let sampler = Arc::new(PriceSampler::new(
            Arc::new(NoFeed),
            store.clone(),
            clock.clone(),
            Duration::from_millis(50),
        ));
        let twap = Arc::new(TwapCalculator::new(
            store.clone(),
            chrono::Duration::minutes(30),
        ));
        let scheduler = Arc::new(CompetitionScheduler::new(
            store.clone(),
            sampler,
            twap,
            PayoutCalculator::new(dec!(0.15)),
            Arc::new(Notifier::new()),
            clock.clone(),
            SchedulerConfig {
                max_consecutive_failures: 5,
            },
        ));
        let factory = Arc::new(CompetitionFactory::new(
            Arc::new(EmptyDirectory),
            store,
            clock,
            crate::config::EngineConfig::default().factory,
        ));

        let control = Arc::new(EngineControl::new());
        let engine = Engine::new(
            scheduler,
            factory,
            control.clone(),
            Duration::from_millis(10),
            10,
            1,
        );

        let task = tokio::spawn(async move { engine.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.request_shutdown();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("engine did not stop after shutdown request")
            .unwrap();
        assert!(control.ticks_completed() > 0);
    }
}
