//! Arena-engine: competition lifecycle engine for token-vs-token markets.
//!
//! Usage:
//!   arena-engine [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>         Config file path (default: config/engine.toml)
//!   --tick-interval <SECS>      Scheduler tick interval (overrides config)
//!   --feed-url <URL>            Price feed base URL (overrides config)
//!   --log-level <LEVEL>         Log level: trace, debug, info, warn, error

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use arena_engine::config::EngineConfig;
use arena_engine::{
    CompetitionFactory, CompetitionScheduler, Engine, EngineControl, HttpPriceFeed,
    HttpTokenDirectory, MemoryStore, Notifier, PayoutCalculator, PriceSampler, SchedulerConfig,
    SystemClock, TwapCalculator,
};

/// CLI arguments for arena-engine.
#[derive(Parser, Debug)]
#[command(name = "arena-engine")]
#[command(about = "Competition lifecycle engine for token-vs-token markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Scheduler tick interval in seconds (overrides config file)
    #[arg(long)]
    tick_interval: Option<u64>,

    /// Price feed base URL (overrides config file)
    #[arg(long)]
    feed_url: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        EngineConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        EngineConfig::default()
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(args.tick_interval, args.log_level, args.feed_url);

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    config.validate().context("Configuration validation failed")?;

    info!("Starting arena-engine");
    info!("Feed URL: {}", config.feed.base_url);
    info!(
        "Tick: {:?}, TWAP window: {}s, fee: {}",
        config.engine.tick_interval,
        config.twap.window.num_seconds(),
        config.payout.fee_rate
    );

    // Wire the components
    let store = Arc::new(MemoryStore::with_min_wager(config.payout.min_wager));
    let clock = Arc::new(SystemClock);
    let feed = Arc::new(HttpPriceFeed::new(config.feed.base_url.clone()));
    let directory = Arc::new(HttpTokenDirectory::new(config.feed.base_url.clone()));
    let notifier = Arc::new(Notifier::new());

    let sampler = Arc::new(PriceSampler::new(
        feed,
        store.clone(),
        clock.clone(),
        config.engine.feed_timeout,
    ));
    let twap = Arc::new(TwapCalculator::new(store.clone(), config.twap.window));
    let payout = PayoutCalculator::new(config.payout.fee_rate);

    let scheduler = Arc::new(CompetitionScheduler::new(
        store.clone(),
        sampler,
        twap,
        payout,
        notifier.clone(),
        clock.clone(),
        SchedulerConfig {
            max_consecutive_failures: config.engine.max_consecutive_failures,
        },
    ));
    let factory = Arc::new(CompetitionFactory::new(
        directory,
        store,
        clock,
        config.factory.clone(),
    ));

    let control = Arc::new(EngineControl::new());
    let engine = Engine::new(
        scheduler,
        factory,
        control.clone(),
        config.engine.tick_interval,
        config.factory.interval_ticks,
        config.factory.batch_size,
    );

    // Log resolutions as they happen
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "Engine event");
        }
    });

    let engine_task = tokio::spawn(async move { engine.run().await });

    wait_for_shutdown().await?;
    info!("Shutting down");
    control.request_shutdown();

    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
