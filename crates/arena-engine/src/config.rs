//! Configuration for the competition engine.
//!
//! Supports loading from a TOML file with environment variable and CLI
//! overrides. All lifecycle parameters (tick interval, TWAP window, fee
//! rate, pairing tolerance, phase durations) are defined here.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Logging level.
    pub log_level: String,

    /// Tick driver and failure policy.
    pub engine: TickConfig,

    /// TWAP window parameters.
    pub twap: TwapConfig,

    /// Fee and wager parameters.
    pub payout: PayoutConfig,

    /// Competition creation parameters.
    pub factory: FactoryConfig,

    /// Price feed endpoint.
    pub feed: FeedConfig,
}

/// Tick driver parameters.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Interval between scheduler ticks.
    pub tick_interval: Duration,

    /// Timeout on any single price feed call; a transition that cannot get a
    /// price inside this budget is deferred to the next tick.
    pub feed_timeout: Duration,

    /// Consecutive failed transition attempts before a competition is flagged
    /// for manual intervention.
    pub max_consecutive_failures: u32,
}

/// TWAP parameters.
#[derive(Debug, Clone)]
pub struct TwapConfig {
    /// Length of the trailing window both TWAP anchors are computed over.
    pub window: chrono::Duration,
}

/// Fee and wager parameters.
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    /// Platform fee as a ratio (0.15 = 15%).
    pub fee_rate: Decimal,

    /// Minimum accepted wager amount.
    pub min_wager: Decimal,
}

/// Competition factory parameters.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Maximum market-cap ratio deviation when pairing tokens
    /// (0.10 = caps within 10% of each other).
    pub pair_tolerance: Decimal,

    /// A token pair is not reused within this window.
    pub pair_cooldown: chrono::Duration,

    /// Offset from creation to `start_time`.
    pub start_offset: chrono::Duration,

    /// Length of the voting phase.
    pub voting_duration: chrono::Duration,

    /// Length of the active (performance) phase.
    pub competition_duration: chrono::Duration,

    /// Competitions created per factory run.
    pub batch_size: usize,

    /// Factory runs every N scheduler ticks.
    pub interval_ticks: u32,
}

/// Price feed endpoint configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL of the price/directory service.
    pub base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            engine: TickConfig {
                tick_interval: Duration::from_secs(60),
                feed_timeout: Duration::from_secs(10),
                max_consecutive_failures: 5,
            },
            twap: TwapConfig {
                window: chrono::Duration::minutes(30),
            },
            payout: PayoutConfig {
                fee_rate: Decimal::new(15, 2),  // 0.15 = 15%
                min_wager: Decimal::new(1, 1),  // 0.1
            },
            factory: FactoryConfig {
                pair_tolerance: Decimal::new(10, 2), // 0.10 = 10%
                pair_cooldown: chrono::Duration::hours(24),
                start_offset: chrono::Duration::minutes(5),
                voting_duration: chrono::Duration::hours(1),
                competition_duration: chrono::Duration::hours(1),
                batch_size: 4,
                interval_ticks: 10,
            },
            feed: FeedConfig {
                base_url: "http://localhost:8900".to_string(),
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ARENA_FEED_URL") {
            self.feed.base_url = url;
        }
        if let Ok(level) = std::env::var("ARENA_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(
        &mut self,
        tick_interval_secs: Option<u64>,
        log_level: Option<String>,
        feed_url: Option<String>,
    ) {
        if let Some(secs) = tick_interval_secs {
            self.engine.tick_interval = Duration::from_secs(secs);
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if let Some(url) = feed_url {
            self.feed.base_url = url;
        }
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_interval.is_zero() {
            bail!("tick_interval_secs must be positive");
        }
        if self.engine.max_consecutive_failures == 0 {
            bail!("max_consecutive_failures must be at least 1");
        }
        if self.twap.window <= chrono::Duration::zero() {
            bail!("twap window_secs must be positive");
        }
        if self.payout.fee_rate < Decimal::ZERO || self.payout.fee_rate >= Decimal::ONE {
            bail!("fee_rate must be in [0, 1)");
        }
        if self.payout.min_wager <= Decimal::ZERO {
            bail!("min_wager must be positive");
        }
        if self.factory.pair_tolerance <= Decimal::ZERO
            || self.factory.pair_tolerance >= Decimal::ONE
        {
            bail!("pair_tolerance must be in (0, 1)");
        }
        if self.factory.voting_duration <= chrono::Duration::zero()
            || self.factory.competition_duration <= chrono::Duration::zero()
        {
            bail!("phase durations must be positive");
        }
        if self.factory.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.factory.interval_ticks == 0 {
            bail!("interval_ticks must be at least 1");
        }
        if self.feed.base_url.is_empty() {
            bail!("feed base_url must not be empty");
        }
        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    engine: EngineToml,
    #[serde(default)]
    twap: TwapToml,
    #[serde(default)]
    payout: PayoutToml,
    #[serde(default)]
    factory: FactoryToml,
    #[serde(default)]
    feed: FeedToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EngineToml {
    tick_interval_secs: u64,
    feed_timeout_secs: u64,
    max_consecutive_failures: u32,
}

impl Default for EngineToml {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            feed_timeout_secs: 10,
            max_consecutive_failures: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TwapToml {
    window_secs: i64,
}

impl Default for TwapToml {
    fn default() -> Self {
        Self { window_secs: 1800 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PayoutToml {
    fee_rate_pct: f64,
    min_wager: f64,
}

impl Default for PayoutToml {
    fn default() -> Self {
        Self {
            fee_rate_pct: 15.0,
            min_wager: 0.1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FactoryToml {
    pair_tolerance_pct: f64,
    pair_cooldown_secs: i64,
    start_offset_secs: i64,
    voting_duration_secs: i64,
    competition_duration_secs: i64,
    batch_size: usize,
    interval_ticks: u32,
}

impl Default for FactoryToml {
    fn default() -> Self {
        Self {
            pair_tolerance_pct: 10.0,
            pair_cooldown_secs: 86_400,
            start_offset_secs: 300,
            voting_duration_secs: 3600,
            competition_duration_secs: 3600,
            batch_size: 4,
            interval_ticks: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FeedToml {
    base_url: String,
}

impl Default for FeedToml {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8900".to_string(),
        }
    }
}

/// Convert f64 percentage to Decimal ratio (e.g., 15.0 -> 0.15).
fn pct_to_decimal(pct: f64) -> Decimal {
    Decimal::try_from(pct / 100.0).unwrap_or(Decimal::ZERO)
}

/// Convert f64 to Decimal.
fn f64_to_decimal(val: f64) -> Decimal {
    Decimal::try_from(val).unwrap_or(Decimal::ZERO)
}

impl From<TomlConfig> for EngineConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            log_level: toml.general.log_level,
            engine: TickConfig {
                tick_interval: Duration::from_secs(toml.engine.tick_interval_secs),
                feed_timeout: Duration::from_secs(toml.engine.feed_timeout_secs),
                max_consecutive_failures: toml.engine.max_consecutive_failures,
            },
            twap: TwapConfig {
                window: chrono::Duration::seconds(toml.twap.window_secs),
            },
            payout: PayoutConfig {
                fee_rate: pct_to_decimal(toml.payout.fee_rate_pct),
                min_wager: f64_to_decimal(toml.payout.min_wager),
            },
            factory: FactoryConfig {
                pair_tolerance: pct_to_decimal(toml.factory.pair_tolerance_pct),
                pair_cooldown: chrono::Duration::seconds(toml.factory.pair_cooldown_secs),
                start_offset: chrono::Duration::seconds(toml.factory.start_offset_secs),
                voting_duration: chrono::Duration::seconds(toml.factory.voting_duration_secs),
                competition_duration: chrono::Duration::seconds(
                    toml.factory.competition_duration_secs,
                ),
                batch_size: toml.factory.batch_size,
                interval_ticks: toml.factory.interval_ticks,
            },
            feed: FeedConfig {
                base_url: toml.feed.base_url,
            },
        }
    }
}
