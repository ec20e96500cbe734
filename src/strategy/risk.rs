//! Risk ledger.
//!
//! Authorizes or denies every proposed order and accounts for finished
//! cycles: bankroll, daily P&L, trade count, loss streak, cooldowns and
//! the hourly order budget. `RiskState` is a plain value; its transitions
//! (`rolled`, `check`, `with_outcome`, `with_order`) are pure, and the
//! ledger only swaps in the new value.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Starting bankroll in USD.
    pub bankroll: Decimal,
    /// Per-trade cap as a fraction of the current bankroll.
    pub risk_per_trade_pct: Decimal,
    pub max_trades_per_day: u32,
    /// Daily loss limit as a fraction of the current bankroll.
    pub daily_loss_limit_pct: Decimal,
    pub max_consecutive_losses: u32,
    pub cooldown: Duration,
    pub market_cooldown: Duration,
    /// 0 disables the hourly order budget.
    pub max_orders_per_hour: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            bankroll: dec!(50),
            risk_per_trade_pct: dec!(0.10),
            max_trades_per_day: 10,
            daily_loss_limit_pct: dec!(0.10),
            max_consecutive_losses: 3,
            cooldown: Duration::hours(6),
            market_cooldown: Duration::hours(1),
            max_orders_per_hour: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    DailyLossLimit,
    TradeCap,
    CooldownActive,
    MarketCooldownActive,
    OrderRateLimit,
    ZeroSize,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::DailyLossLimit => "daily_loss_limit",
            DenyReason::TradeCap => "trade_cap",
            DenyReason::CooldownActive => "cooldown_active",
            DenyReason::MarketCooldownActive => "market_cooldown_active",
            DenyReason::OrderRateLimit => "order_rate_limit",
            DenyReason::ZeroSize => "zero_size",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a risk check. A denial is a normal value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allow { size_usd: Decimal },
    Deny(DenyReason),
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allow { .. })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub bankroll: Decimal,
    pub risk_per_trade_pct: Decimal,
    /// UTC day the daily counters belong to.
    pub day: NaiveDate,
    pub trades_today: u32,
    pub daily_pnl: Decimal,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub market_cooldown_until: HashMap<String, DateTime<Utc>>,
    /// Submission times within the trailing hour, oldest first.
    pub recent_orders: VecDeque<DateTime<Utc>>,
}

impl RiskState {
    pub fn new(config: &RiskConfig, now: DateTime<Utc>) -> Self {
        Self {
            bankroll: config.bankroll,
            risk_per_trade_pct: config.risk_per_trade_pct,
            day: now.date_naive(),
            trades_today: 0,
            daily_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            cooldown_until: None,
            market_cooldown_until: HashMap::new(),
            recent_orders: VecDeque::new(),
        }
    }

    /// Bring the state up to `now`: reset daily counters on a new UTC day,
    /// clear an expired loss cooldown together with its streak, and forget
    /// orders older than an hour.
    pub fn rolled(&self, now: DateTime<Utc>) -> RiskState {
        let mut next = self.clone();
        let today = now.date_naive();
        if today != next.day {
            next.day = today;
            next.trades_today = 0;
            next.daily_pnl = Decimal::ZERO;
        }
        if next.cooldown_until.is_some_and(|until| now >= until) {
            next.cooldown_until = None;
            next.consecutive_losses = 0;
        }
        next.market_cooldown_until.retain(|_, until| now < *until);
        let cutoff = now - Duration::hours(1);
        while next.recent_orders.front().is_some_and(|t| *t <= cutoff) {
            next.recent_orders.pop_front();
        }
        next
    }

    /// Run the checks in order; the first failure wins.
    pub fn check(
        &self,
        config: &RiskConfig,
        proposed_size_usd: Decimal,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> Authorization {
        if self.daily_pnl <= -(self.bankroll * config.daily_loss_limit_pct) {
            return Authorization::Deny(DenyReason::DailyLossLimit);
        }
        if self.trades_today >= config.max_trades_per_day {
            return Authorization::Deny(DenyReason::TradeCap);
        }
        if self.cooldown_until.is_some_and(|until| now < until) {
            return Authorization::Deny(DenyReason::CooldownActive);
        }
        if self
            .market_cooldown_until
            .get(market_id)
            .is_some_and(|until| now < *until)
        {
            return Authorization::Deny(DenyReason::MarketCooldownActive);
        }
        if config.max_orders_per_hour > 0
            && self.recent_orders.len() >= config.max_orders_per_hour as usize
        {
            return Authorization::Deny(DenyReason::OrderRateLimit);
        }
        let size_usd = proposed_size_usd.min(self.max_trade_usd());
        if size_usd <= Decimal::ZERO {
            return Authorization::Deny(DenyReason::ZeroSize);
        }
        Authorization::Allow { size_usd }
    }

    /// Apply a finished cycle's P&L.
    pub fn with_outcome(
        &self,
        config: &RiskConfig,
        pnl: Decimal,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> RiskState {
        let mut next = self.rolled(now);
        next.trades_today += 1;
        next.daily_pnl += pnl;
        next.bankroll += pnl;
        if pnl < Decimal::ZERO {
            next.consecutive_losses += 1;
        } else {
            next.consecutive_losses = 0;
        }
        if next.consecutive_losses >= config.max_consecutive_losses {
            next.cooldown_until = Some(now + config.cooldown);
        }
        next.market_cooldown_until
            .insert(market_id.to_string(), now + config.market_cooldown);
        next
    }

    /// Count one order submission against the hourly budget.
    pub fn with_order(&self, now: DateTime<Utc>) -> RiskState {
        let mut next = self.rolled(now);
        next.recent_orders.push_back(now);
        next
    }

    pub fn max_trade_usd(&self) -> Decimal {
        self.bankroll * self.risk_per_trade_pct
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct RiskLedger {
    config: RiskConfig,
    state: RiskState,
}

impl RiskLedger {
    pub fn new(config: RiskConfig, now: DateTime<Utc>) -> Self {
        let state = RiskState::new(&config, now);
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Authorize a trade of up to `proposed_size_usd`.
    ///
    /// The allowed size is never larger than requested.
    pub fn authorize(
        &mut self,
        proposed_size_usd: Decimal,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> Authorization {
        self.state = self.state.rolled(now);
        let decision = self
            .state
            .check(&self.config, proposed_size_usd, market_id, now);
        if let Authorization::Deny(reason) = decision {
            info!(
                market = %market_id,
                reason = %reason,
                trades_today = self.state.trades_today,
                daily_pnl = %format!("${:.2}", self.state.daily_pnl),
                "Risk denied"
            );
        }
        decision
    }

    pub fn record_outcome(&mut self, pnl: Decimal, market_id: &str, now: DateTime<Utc>) {
        let was_cooling = self.state.cooldown_until.is_some_and(|until| now < until);
        self.state = self.state.with_outcome(&self.config, pnl, market_id, now);
        info!(
            market = %market_id,
            pnl = %format!("${:.4}", pnl),
            daily_pnl = %format!("${:.2}", self.state.daily_pnl),
            bankroll = %format!("${:.2}", self.state.bankroll),
            trades_today = self.state.trades_today,
            losses_in_row = self.state.consecutive_losses,
            "Outcome recorded"
        );
        if !was_cooling {
            if let Some(until) = self.state.cooldown_until {
                warn!(
                    losses = self.state.consecutive_losses,
                    until = %until,
                    "Loss streak limit reached, cooling down"
                );
            }
        }
    }

    pub fn note_order(&mut self, now: DateTime<Utc>) {
        self.state = self.state.with_order(now);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
