//! End-to-end lifecycle tests.
//!
//! These tests verify:
//! - A competition walks Upcoming → Voting → Active → Closed → Resolved
//!   under a manual clock, with wagers, TWAP anchors, and payouts
//! - The reference payout scenario (pool $100, fee 15%, stakes 10/20/30)
//! - Phase monotonicity and event ordering on the notification bus
//! - Idempotent ticks once a competition is terminal

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use arena_common::{BettorId, Competition, Phase, PriceQuote, PriceSample, TokenAddress, Wager};
use arena_engine::{
    Clock, CompetitionScheduler, CompetitionStore, EngineEvent, FeedError, ManualClock, MemoryStore,
    Notifier, PayoutCalculator, PriceFeed, PriceSampler, SchedulerConfig, TwapCalculator,
};

// =============================================================================
// Test harness
// =============================================================================

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

struct StubFeed {
    prices: DashMap<TokenAddress, Decimal>,
}

impl StubFeed {
    fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    fn set_price(&self, token: &str, price: Decimal) {
        self.prices.insert(TokenAddress::from(token), price);
    }
}

#[async_trait]
impl PriceFeed for StubFeed {
    async fn quote(&self, token: &TokenAddress) -> Result<PriceQuote, FeedError> {
        let price = self
            .prices
            .get(token)
            .map(|p| *p)
            .ok_or_else(|| FeedError::Unavailable(format!("no price for {token}")))?;
        Ok(PriceQuote {
            price,
            volume: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }
}

struct Harness {
    scheduler: CompetitionScheduler,
    store: Arc<MemoryStore>,
    feed: Arc<StubFeed>,
    clock: Arc<ManualClock>,
    notifier: Arc<Notifier>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let feed = Arc::new(StubFeed::new());
    let clock = Arc::new(ManualClock::new(ts(0)));
    let notifier = Arc::new(Notifier::new());
    let sampler = Arc::new(PriceSampler::new(
        feed.clone(),
        store.clone(),
        clock.clone(),
        std::time::Duration::from_secs(5),
    ));
    let twap = Arc::new(TwapCalculator::new(
        store.clone(),
        chrono::Duration::seconds(120),
    ));
    let scheduler = CompetitionScheduler::new(
        store.clone(),
        sampler,
        twap,
        PayoutCalculator::new(dec!(0.15)),
        notifier.clone(),
        clock.clone(),
        SchedulerConfig {
            max_consecutive_failures: 5,
        },
    );
    Harness {
        scheduler,
        store,
        feed,
        clock,
        notifier,
    }
}

// Voting opens at 100, closes at 200, performance window ends at 300.
fn competition() -> Competition {
    Competition::new(
        TokenAddress::from("tokA"),
        TokenAddress::from("tokB"),
        ts(100),
        ts(200),
        ts(300),
        ts(0),
    )
    .unwrap()
}

async fn seed_sample(store: &MemoryStore, token: &str, secs: i64, price: Decimal) {
    store
        .append_sample(PriceSample {
            token: TokenAddress::from(token),
            timestamp: ts(secs),
            price,
            volume: Decimal::ZERO,
            market_cap: Decimal::ZERO,
        })
        .await
        .unwrap();
}

async fn place(h: &Harness, comp: &Competition, bettor: &str, token: &str, amount: Decimal) -> Wager {
    let wager = Wager::new(
        comp,
        BettorId::new(bettor),
        TokenAddress::from(token),
        amount,
        h.clock.now(),
    )
    .unwrap();
    h.store.place_wager(wager.clone()).await.unwrap();
    wager
}

// =============================================================================
// Reference scenario
// =============================================================================

/// Token A gains 10% (TWAP 100 → 110), token B loses 10% (50 → 45), pool
/// $100 at 15% fee with three wagers of 10/20/30 on the winner: the $85
/// distributable splits 14.16/28.33/42.51 with cent truncation.
#[tokio::test]
async fn test_reference_scenario_end_to_end() {
    let h = harness();
    let comp = competition();
    h.store.create_competition(comp.clone()).await.unwrap();

    // Prices that prevailed during voting anchor the start TWAPs.
    seed_sample(&h.store, "tokA", 150, dec!(100)).await;
    seed_sample(&h.store, "tokB", 150, dec!(50)).await;
    // The feed serves the end-of-window prices from here on.
    h.feed.set_price("tokA", dec!(110));
    h.feed.set_price("tokB", dec!(45));

    let mut events = h.notifier.subscribe();

    h.clock.set(ts(100));
    assert_eq!(h.scheduler.tick().await, 1);

    let w1 = place(&h, &comp, "alice", "tokA", dec!(10)).await;
    let w2 = place(&h, &comp, "bob", "tokA", dec!(20)).await;
    let w3 = place(&h, &comp, "carol", "tokA", dec!(30)).await;
    let w4 = place(&h, &comp, "dave", "tokB", dec!(40)).await;

    h.clock.set(ts(210));
    assert_eq!(h.scheduler.tick().await, 1);
    let active = h.store.competition(comp.id).await.unwrap();
    assert_eq!(active.phase, Phase::Active);
    assert_eq!(active.token_a_twap.start, Some(dec!(100)));
    assert_eq!(active.token_b_twap.start, Some(dec!(50)));
    assert_eq!(active.total_pool, dec!(100));

    h.clock.set(ts(310));
    assert_eq!(h.scheduler.tick().await, 2);

    let resolved = h.store.competition(comp.id).await.unwrap();
    assert_eq!(resolved.phase, Phase::Resolved);
    assert_eq!(resolved.winner_token, Some(TokenAddress::from("tokA")));
    assert_eq!(resolved.token_a_twap.end, Some(dec!(110)));
    assert_eq!(resolved.token_b_twap.end, Some(dec!(45)));
    assert_eq!(resolved.token_a_performance, Some(dec!(0.1)));
    assert_eq!(resolved.token_b_performance, Some(dec!(-0.1)));

    // Payouts: $85 distributable, truncated shares, residual to the
    // largest stake, losers at zero.
    let wagers = h.store.wagers_for(comp.id).await.unwrap();
    let payout_of = |id| {
        wagers
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.payout_amount)
            .unwrap()
    };
    assert_eq!(payout_of(w1.id), dec!(14.16));
    assert_eq!(payout_of(w2.id), dec!(28.33));
    assert_eq!(payout_of(w3.id), dec!(42.51));
    assert_eq!(payout_of(w4.id), dec!(0));
    let total: Decimal = wagers.iter().map(|w| w.payout_amount).sum();
    assert_eq!(total, dec!(85.00));

    // Event stream: one PhaseChanged per transition, in order, then the
    // resolution event last.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let transitions: Vec<(Phase, Phase)> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PhaseChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (Phase::Upcoming, Phase::Voting),
            (Phase::Voting, Phase::Active),
            (Phase::Active, Phase::Closed),
            (Phase::Closed, Phase::Resolved),
        ]
    );
    assert!(matches!(
        seen.last(),
        Some(EngineEvent::Resolved {
            winner_token,
            ..
        }) if winner_token == &TokenAddress::from("tokA")
    ));
}

// =============================================================================
// Lifecycle invariants
// =============================================================================

#[tokio::test]
async fn test_phase_never_reverts() {
    let h = harness();
    h.feed.set_price("tokA", dec!(10));
    h.feed.set_price("tokB", dec!(5));
    let comp = competition();
    h.store.create_competition(comp.clone()).await.unwrap();
    seed_sample(&h.store, "tokA", 150, dec!(10)).await;
    seed_sample(&h.store, "tokB", 150, dec!(5)).await;

    let order = [
        Phase::Upcoming,
        Phase::Voting,
        Phase::Active,
        Phase::Closed,
        Phase::Resolved,
    ];
    let rank = |p: Phase| order.iter().position(|x| *x == p).unwrap();

    let mut last = Phase::Upcoming;
    for secs in [0, 50, 100, 150, 210, 250, 310, 400, 400] {
        h.clock.set(ts(secs));
        h.scheduler.tick().await;
        let phase = h.store.competition(comp.id).await.unwrap().phase;
        assert!(
            rank(phase) >= rank(last),
            "phase went backwards: {last} -> {phase}"
        );
        last = phase;
    }
    assert_eq!(last, Phase::Resolved);
}

#[tokio::test]
async fn test_resolved_competition_is_absorbing() {
    let h = harness();
    h.feed.set_price("tokA", dec!(10));
    h.feed.set_price("tokB", dec!(5));
    let comp = competition();
    h.store.create_competition(comp.clone()).await.unwrap();
    seed_sample(&h.store, "tokA", 150, dec!(10)).await;
    seed_sample(&h.store, "tokB", 150, dec!(5)).await;

    h.clock.set(ts(310));
    h.scheduler.tick().await;
    let first = h.store.competition(comp.id).await.unwrap();
    assert_eq!(first.phase, Phase::Resolved);

    // Later ticks (and wild clock jumps) change nothing.
    h.clock.set(ts(100_000));
    h.scheduler.tick().await;
    let second = h.store.competition(comp.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_wagers_rejected_outside_voting() {
    let h = harness();
    h.feed.set_price("tokA", dec!(10));
    h.feed.set_price("tokB", dec!(5));
    let comp = competition();
    h.store.create_competition(comp.clone()).await.unwrap();
    seed_sample(&h.store, "tokA", 150, dec!(10)).await;
    seed_sample(&h.store, "tokB", 150, dec!(5)).await;

    // Upcoming: no wagers yet.
    let early = Wager::new(
        &comp,
        BettorId::new("alice"),
        TokenAddress::from("tokA"),
        dec!(1),
        ts(50),
    )
    .unwrap();
    assert!(h.store.place_wager(early).await.is_err());

    // Voting: accepted.
    h.clock.set(ts(100));
    h.scheduler.tick().await;
    place(&h, &comp, "alice", "tokA", dec!(1)).await;

    // Active: locked again.
    h.clock.set(ts(210));
    h.scheduler.tick().await;
    let late = Wager::new(
        &comp,
        BettorId::new("bob"),
        TokenAddress::from("tokB"),
        dec!(1),
        ts(210),
    )
    .unwrap();
    assert!(h.store.place_wager(late).await.is_err());

    let fetched = h.store.competition(comp.id).await.unwrap();
    assert_eq!(fetched.total_pool, dec!(1));
}

#[tokio::test]
async fn test_one_sided_market_refunds_without_fee() {
    let h = harness();
    h.feed.set_price("tokA", dec!(10));
    h.feed.set_price("tokB", dec!(5));
    let comp = competition();
    h.store.create_competition(comp.clone()).await.unwrap();
    seed_sample(&h.store, "tokA", 150, dec!(10)).await;
    seed_sample(&h.store, "tokB", 150, dec!(5)).await;

    h.clock.set(ts(100));
    h.scheduler.tick().await;

    // Everyone bet on token B; token A wins on a tie of zero performances.
    let w1 = place(&h, &comp, "alice", "tokB", dec!(7)).await;
    let w2 = place(&h, &comp, "bob", "tokB", dec!(13)).await;

    h.clock.set(ts(310));
    h.scheduler.tick().await;

    let resolved = h.store.competition(comp.id).await.unwrap();
    assert_eq!(resolved.winner_token, Some(TokenAddress::from("tokA")));

    let wagers = h.store.wagers_for(comp.id).await.unwrap();
    let payout_of = |id| {
        wagers
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.payout_amount)
            .unwrap()
    };
    assert_eq!(payout_of(w1.id), dec!(7));
    assert_eq!(payout_of(w2.id), dec!(13));
    let total: Decimal = wagers.iter().map(|w| w.payout_amount).sum();
    assert_eq!(total, resolved.total_pool);
}

#[tokio::test]
async fn test_independent_competitions_advance_in_one_tick() {
    let h = harness();
    for token in ["tokA", "tokB", "tokC", "tokD"] {
        h.feed.set_price(token, dec!(10));
        seed_sample(&h.store, token, 150, dec!(10)).await;
    }

    let first = competition();
    let second = Competition::new(
        TokenAddress::from("tokC"),
        TokenAddress::from("tokD"),
        ts(100),
        ts(200),
        ts(300),
        ts(0),
    )
    .unwrap();
    h.store.create_competition(first.clone()).await.unwrap();
    h.store.create_competition(second.clone()).await.unwrap();

    h.clock.set(ts(310));
    // Four transitions each, evaluated concurrently in the same tick.
    assert_eq!(h.scheduler.tick().await, 8);
    for id in [first.id, second.id] {
        assert_eq!(
            h.store.competition(id).await.unwrap().phase,
            Phase::Resolved
        );
    }
}
