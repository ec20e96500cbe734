//! DIPHEDGE: dump/pump triggered two-leg hedge agent.
//!
//! Entry point. Loads configuration, applies command-line overrides,
//! initialises structured logging, picks the feed and executor, and runs
//! the cycle loop until the feed ends or Ctrl+C.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

use diphedge::config::{AppConfig, CliOverrides, FeedMode};
use diphedge::data::polling::PollingFeed;
use diphedge::data::replay::ReplayFeed;
use diphedge::data::PriceFeed;
use diphedge::engine::executor::{DryRunExecutor, LiveExecutor, OrderExecutor};
use diphedge::engine::orchestrator::{Clock, CycleOrchestrator};
use diphedge::platforms::polymarket::ClobClient;
use diphedge::storage::JsonlTradeLog;

const BANNER: &str = r#"
 ____  ___ ____  _   _ _____ ____   ____ _____
|  _ \|_ _|  _ \| | | | ____|  _ \ / ___| ____|
| | | || || |_) | |_| |  _| | | | | |  _|  _|
| |_| || ||  __/|  _  | |___| |_| | |_| | |___
|____/|___|_|   |_| |_|_____|____/ \____|_____|

  Dump/pump triggered two-leg hedging
  v0.1.0
"#;

/// Dump/pump triggered two-leg hedge agent for binary prediction markets
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via DIPHEDGE_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// Simulate fills instead of placing orders
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,

    /// Place real orders
    #[arg(long)]
    live: bool,

    /// Market identifier
    #[arg(long)]
    market: Option<String>,

    #[arg(long)]
    max_usd_per_leg: Option<Decimal>,

    #[arg(long)]
    move_pct_threshold: Option<Decimal>,

    #[arg(long)]
    sum_target: Option<Decimal>,

    /// Run detection once per hour
    #[arg(long)]
    hourly_scan: bool,

    /// Replay a JSON Lines recording instead of polling
    #[arg(long, value_name = "PATH")]
    replay: Option<String>,

    /// Log level for the diphedge target; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        let dry_run = match (self.dry_run, self.live) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        CliOverrides {
            dry_run,
            market: self.market.clone(),
            max_usd_per_leg: self.max_usd_per_leg,
            move_pct_threshold: self.move_pct_threshold,
            sum_target: self.sum_target,
            hourly_scan: self.hourly_scan,
            replay: self.replay.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("DIPHEDGE_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());

    let mut cfg = AppConfig::load(&config_path)?;
    args.overrides().apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        error!(config_path = %config_path, error = %e, "Refusing to start");
        return Err(e.into());
    }

    println!("{BANNER}");
    info!(
        market = %cfg.agent.market,
        dry_run = cfg.agent.dry_run,
        feed = ?cfg.feed.mode,
        bankroll = format!("${:.2}", cfg.risk.bankroll),
        max_usd_per_leg = format!("${:.2}", cfg.risk.max_usd_per_leg),
        sum_target = %cfg.strategy.sum_target,
        move_pct_threshold = %cfg.strategy.move_pct_threshold,
        hourly_scan = cfg.agent.hourly_scan,
        "DIPHEDGE starting up"
    );

    // -- Components --------------------------------------------------------

    let (feed, clock) = match cfg.feed.mode {
        FeedMode::Polling => {
            let source = ClobClient::for_feed(&cfg.feed)?;
            let feed = PollingFeed::new(
                source,
                cfg.agent.market.clone(),
                cfg.feed.yes_token_id.clone(),
                cfg.feed.no_token_id.clone(),
                Duration::from_millis(cfg.feed.poll_interval_ms),
                Duration::from_secs(cfg.feed.backoff_max_secs),
            );
            let feed: Box<dyn PriceFeed> = Box::new(feed);
            (feed, Clock::Wall)
        }
        FeedMode::Replay => {
            let path = cfg
                .feed
                .replay_path
                .as_deref()
                .context("feed.replay_path is required for replay mode")?;
            let feed: Box<dyn PriceFeed> = Box::new(ReplayFeed::from_jsonl(path)?);
            (feed, Clock::Feed)
        }
    };

    let executor: Box<dyn OrderExecutor> = if cfg.agent.dry_run {
        Box::new(DryRunExecutor)
    } else {
        warn!("LIVE TRADING enabled, orders will reach the venue");
        let venue = ClobClient::for_execution(&cfg.execution)
            .context("Live trading needs CLOB credentials")?;
        Box::new(LiveExecutor::new(
            venue,
            cfg.retry_policy(),
            Duration::from_secs(cfg.execution.request_timeout_secs),
            Duration::from_secs(cfg.execution.order_ttl_secs),
        ))
    };

    let journal = JsonlTradeLog::open(&cfg.agent.journal_path)?;
    info!(path = %journal.path().display(), "Trade journal ready");

    // -- Run ---------------------------------------------------------------

    let mut orchestrator =
        CycleOrchestrator::new(&cfg, feed, executor, Box::new(journal), clock, Utc::now());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let reason = orchestrator.run(shutdown).await?;
    info!(reason = ?reason, "DIPHEDGE shut down cleanly.");
    Ok(())
}

/// Initialise tracing. `--log-level` wins over `RUST_LOG`; the default is
/// `diphedge=info`. Set `DIPHEDGE_LOG_JSON` for JSON lines.
fn init_logging(level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = match level {
        Some(level) => EnvFilter::new(format!("diphedge={level}")),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("diphedge=info")),
    };

    let json_logging = std::env::var("DIPHEDGE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
