//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every field has a default, so a minimal file only names the market.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.
//!
//! The configuration is read once at startup and never mutated during a run.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::breaker::CircuitBreakerConfig;
use crate::engine::executor::RetryPolicy;
use crate::strategy::controller::ControllerConfig;
use crate::strategy::edge::{EdgeConfig, TriggerMode};
use crate::strategy::risk::RiskConfig;
use crate::types::BotError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Market identifier (slug or condition id).
    pub market: String,
    pub dry_run: bool,
    /// Heartbeat interval of the orchestrator loop.
    pub poll_interval_secs: u64,
    /// Run edge detection once per hour instead of on every tick.
    pub hourly_scan: bool,
    /// Append-only JSON Lines trade log.
    pub journal_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            market: String::new(),
            dry_run: true,
            poll_interval_secs: 30,
            hourly_scan: false,
            journal_path: "logs/trades.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Polling,
    Replay,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub mode: FeedMode,
    pub rest_url: String,
    pub book_path: String,
    /// CLOB token id of the "yes" outcome.
    pub yes_token_id: String,
    /// CLOB token id of the "no" outcome.
    pub no_token_id: String,
    pub poll_interval_ms: u64,
    pub backoff_max_secs: u64,
    /// JSON Lines file of recorded observations (replay mode).
    pub replay_path: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::Polling,
            rest_url: "https://clob.polymarket.com".to_string(),
            book_path: "/book".to_string(),
            yes_token_id: String::new(),
            no_token_id: String::new(),
            poll_interval_ms: 1000,
            backoff_max_secs: 15,
            replay_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub rest_url: String,
    pub order_path: String,
    /// `{order_id}` is substituted.
    pub order_status_path: String,
    /// `{order_id}` is substituted.
    pub cancel_path: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// How long a resting order is given before its status is reconciled.
    pub order_ttl_secs: u64,
    pub slippage_bps: Decimal,
    pub api_key_env: String,
    pub api_secret_env: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://clob.polymarket.com".to_string(),
            order_path: "/orders".to_string(),
            order_status_path: "/orders/{order_id}".to_string(),
            cancel_path: "/orders/{order_id}".to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            order_ttl_secs: 15,
            slippage_bps: Decimal::ZERO,
            api_key_env: "POLYMARKET_API_KEY".to_string(),
            api_secret_env: "POLYMARKET_API_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub trigger_mode: TriggerMode,
    pub rolling_window_seconds: u64,
    /// Percent move over the window that fires a trigger.
    pub move_pct_threshold: Decimal,
    pub min_edge_bps: Decimal,
    pub sum_target: Decimal,
    pub sum_target_max: Decimal,
    /// 0 disables the profit lock.
    pub profit_lock_bps: Decimal,
    pub leg2_timeout_seconds: u64,
    pub defensive_hedge_on_timeout: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Both,
            rolling_window_seconds: 3,
            move_pct_threshold: dec!(10),
            min_edge_bps: dec!(50),
            sum_target: dec!(0.95),
            sum_target_max: dec!(0.99),
            profit_lock_bps: Decimal::ZERO,
            leg2_timeout_seconds: 180,
            defensive_hedge_on_timeout: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskSection {
    pub bankroll: Decimal,
    pub risk_per_trade_pct: Decimal,
    pub max_usd_per_leg: Decimal,
    pub max_trades_per_day: u32,
    pub daily_loss_limit_pct: Decimal,
    pub max_consecutive_losses: u32,
    pub cooldown_hours: u32,
    pub market_cooldown_hours: u32,
    pub max_orders_per_hour: u32,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            bankroll: dec!(50),
            risk_per_trade_pct: dec!(0.10),
            max_usd_per_leg: dec!(1.5),
            max_trades_per_day: 10,
            daily_loss_limit_pct: dec!(0.10),
            max_consecutive_losses: 3,
            cooldown_hours: 6,
            market_cooldown_hours: 1,
            max_orders_per_hour: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub max_consecutive_failures: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown_secs: 1800,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret, keeping it out of `Debug` output.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }

    /// Reject configurations the agent must not start with.
    pub fn validate(&self) -> Result<(), BotError> {
        let s = &self.strategy;
        let r = &self.risk;
        let invalid = |msg: &str| Err(BotError::ConfigInvalid(msg.to_string()));

        if self.agent.market.trim().is_empty() {
            return invalid("agent.market must be set");
        }
        if self.agent.poll_interval_secs == 0 {
            return invalid("agent.poll_interval_secs must be at least 1");
        }
        if s.rolling_window_seconds == 0 {
            return invalid("strategy.rolling_window_seconds must be at least 1");
        }
        if s.move_pct_threshold <= Decimal::ZERO {
            return invalid("strategy.move_pct_threshold must be positive");
        }
        if s.sum_target <= Decimal::ZERO || s.sum_target > s.sum_target_max {
            return invalid("strategy.sum_target must be in (0, sum_target_max]");
        }
        if s.sum_target_max > Decimal::ONE {
            return invalid("strategy.sum_target_max must not exceed 1");
        }
        if s.profit_lock_bps < Decimal::ZERO {
            return invalid("strategy.profit_lock_bps must not be negative");
        }
        if s.leg2_timeout_seconds == 0 {
            return invalid("strategy.leg2_timeout_seconds must be at least 1");
        }
        if r.bankroll <= Decimal::ZERO {
            return invalid("risk.bankroll must be positive");
        }
        if r.risk_per_trade_pct <= Decimal::ZERO || r.risk_per_trade_pct > Decimal::ONE {
            return invalid("risk.risk_per_trade_pct must be in (0, 1]");
        }
        if r.daily_loss_limit_pct <= Decimal::ZERO || r.daily_loss_limit_pct > Decimal::ONE {
            return invalid("risk.daily_loss_limit_pct must be in (0, 1]");
        }
        if r.max_usd_per_leg <= Decimal::ZERO {
            return invalid("risk.max_usd_per_leg must be positive");
        }
        if r.max_trades_per_day == 0 || r.max_consecutive_losses == 0 {
            return invalid("risk.max_trades_per_day and risk.max_consecutive_losses must be at least 1");
        }
        if self.execution.slippage_bps < Decimal::ZERO {
            return invalid("execution.slippage_bps must not be negative");
        }
        if self.execution.request_timeout_secs == 0 {
            return invalid("execution.request_timeout_secs must be at least 1");
        }
        if self.circuit_breaker.max_consecutive_failures == 0 {
            return invalid("circuit_breaker.max_consecutive_failures must be at least 1");
        }
        match self.feed.mode {
            FeedMode::Polling => {
                if self.feed.yes_token_id.is_empty() || self.feed.no_token_id.is_empty() {
                    return invalid("feed.yes_token_id and feed.no_token_id are required for polling");
                }
            }
            FeedMode::Replay => {
                if self.feed.replay_path.is_none() {
                    return invalid("feed.replay_path is required for replay mode");
                }
            }
        }
        Ok(())
    }

    // -- Component configs ------------------------------------------------

    pub fn edge_config(&self) -> EdgeConfig {
        EdgeConfig {
            move_pct_threshold: self.strategy.move_pct_threshold,
            min_edge_bps: self.strategy.min_edge_bps,
            trigger_mode: self.strategy.trigger_mode,
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            bankroll: self.risk.bankroll,
            risk_per_trade_pct: self.risk.risk_per_trade_pct,
            max_trades_per_day: self.risk.max_trades_per_day,
            daily_loss_limit_pct: self.risk.daily_loss_limit_pct,
            max_consecutive_losses: self.risk.max_consecutive_losses,
            cooldown: chrono::Duration::hours(i64::from(self.risk.cooldown_hours)),
            market_cooldown: chrono::Duration::hours(i64::from(self.risk.market_cooldown_hours)),
            max_orders_per_hour: self.risk.max_orders_per_hour,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            market_id: self.agent.market.clone(),
            sum_target: self.strategy.sum_target,
            sum_target_max: self.strategy.sum_target_max,
            profit_lock_bps: self.strategy.profit_lock_bps,
            leg2_timeout: chrono::Duration::seconds(self.strategy.leg2_timeout_seconds as i64),
            defensive_hedge_on_timeout: self.strategy.defensive_hedge_on_timeout,
            max_usd_per_leg: self.risk.max_usd_per_leg,
            slippage_bps: self.execution.slippage_bps,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_consecutive_failures: self.circuit_breaker.max_consecutive_failures,
            cooldown: chrono::Duration::seconds(self.circuit_breaker.cooldown_secs as i64),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.execution.max_retries,
            base_delay: Duration::from_millis(self.execution.backoff_base_ms),
            max_delay: Duration::from_millis(self.execution.backoff_max_ms),
        }
    }

    pub fn rolling_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.strategy.rolling_window_seconds as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.agent.poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Command-line overrides
// ---------------------------------------------------------------------------

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dry_run: Option<bool>,
    pub market: Option<String>,
    pub max_usd_per_leg: Option<Decimal>,
    pub move_pct_threshold: Option<Decimal>,
    pub sum_target: Option<Decimal>,
    pub hourly_scan: bool,
    pub replay: Option<String>,
}

impl CliOverrides {
    /// Apply onto a loaded config. Must run before `validate`.
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(dry_run) = self.dry_run {
            cfg.agent.dry_run = dry_run;
        }
        if let Some(market) = &self.market {
            cfg.agent.market = market.clone();
        }
        if let Some(v) = self.max_usd_per_leg {
            cfg.risk.max_usd_per_leg = v;
        }
        if let Some(v) = self.move_pct_threshold {
            cfg.strategy.move_pct_threshold = v;
        }
        if let Some(v) = self.sum_target {
            cfg.strategy.sum_target = v;
        }
        if self.hourly_scan {
            cfg.agent.hourly_scan = true;
        }
        if let Some(path) = &self.replay {
            cfg.feed.mode = FeedMode::Replay;
            cfg.feed.replay_path = Some(path.clone());
        }
    }
}
