//! Competition lifecycle engine for token-vs-token prediction markets.
//!
//! The engine drives competitions through their phase state machine on a
//! fixed tick: it samples prices, anchors time-weighted average prices (TWAP)
//! at the phase boundaries, judges a winner, computes pro-rata payouts, and
//! persists the result atomically.
//!
//! ## Architecture
//!
//! - **Single tick driver**: one `tokio::time::interval` scans all in-flight
//!   competitions; there are no per-competition timers to track or cancel,
//!   so restart safety reduces to whatever the store holds.
//! - **Per-competition serialization**: evaluation of one competition never
//!   overlaps itself; independent competitions evaluate concurrently.
//! - **Decimal end to end**: all price and pool math uses `rust_decimal`.
//!
//! ## Modules
//!
//! - `config`: configuration loading and validation
//! - `clock`: time source abstraction (system clock, manual clock for tests)
//! - `feed`: price feed and token directory clients
//! - `store`: persistence interface and in-memory reference store
//! - `sampler` / `twap` / `payout`: the three leaf calculators
//! - `scheduler`: the phase state machine
//! - `factory`: periodic competition creation
//! - `notify`: phase-change and resolution event bus
//! - `engine`: tick driver wiring scheduler and factory together

pub mod clock;
pub mod config;
pub mod engine;
pub mod factory;
pub mod feed;
pub mod notify;
pub mod payout;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod twap;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, EngineControl};
pub use factory::{CompetitionFactory, FactoryError};
pub use feed::{
    DirectoryError, EligibleToken, FeedError, HttpPriceFeed, HttpTokenDirectory, PriceFeed,
    TokenDirectory,
};
pub use notify::{EngineEvent, Notifier};
pub use payout::PayoutCalculator;
pub use sampler::{PriceSampler, SampleError};
pub use scheduler::{CompetitionScheduler, EvalError, SchedulerConfig};
pub use store::{CompetitionStore, MemoryStore, ResolutionOutcome, StoreError};
pub use twap::{TwapCalculator, TwapError};
