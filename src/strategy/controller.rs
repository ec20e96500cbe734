//! Two-leg cycle controller.
//!
//! Owns the single trade cycle: arms on a trigger, buys the moved side
//! (Leg1), then waits for the opposite side to get cheap enough that
//! both legs together cost at most `sum_target` (Leg2). If the wait runs
//! past `leg2_timeout` it either places a capped defensive hedge or
//! leaves Leg1 open.
//!
//! ```text
//! IDLE -> ARMED -> LEG1_PENDING -> LEG1_FILLED -> LEG2_WAITING
//!      -> LEG2_FILLED | LEG2_TIMEOUT_HEDGE | LEG2_TIMEOUT_SKIP | ABORTED
//! ```
//!
//! Each `tick` performs at most one step. ARMED and LEG1_PENDING only
//! exist while the Leg1 submission of a single tick is in flight.
//! Terminal states are settled in the tick that reaches them: P&L is
//! computed, the risk ledger is told (when Leg1 filled), a
//! `TradeRecord` is produced, and the controller goes back to IDLE.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::fmt;
use tracing::{debug, info, warn};

use crate::data::Quotes;
use crate::engine::executor::OrderExecutor;
use crate::strategy::risk::{Authorization, RiskLedger};
use crate::types::{
    generate_client_order_id, CycleOutcome, Fill, Leg1Record, Leg2Record, LegRole, OrderIntent,
    SubmitOutcome, TradeRecord, TriggerEvent,
};

/// Share sizes are rounded down to this many decimals.
const SIZE_DP: u32 = 6;
/// Limit prices are rounded to this many decimals after slippage.
const PRICE_DP: u32 = 4;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub market_id: String,
    pub sum_target: Decimal,
    pub sum_target_max: Decimal,
    /// 0 disables the profit lock.
    pub profit_lock_bps: Decimal,
    pub leg2_timeout: Duration,
    pub defensive_hedge_on_timeout: bool,
    pub max_usd_per_leg: Decimal,
    pub slippage_bps: Decimal,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            market_id: String::new(),
            sum_target: dec!(0.95),
            sum_target_max: dec!(0.99),
            profit_lock_bps: Decimal::ZERO,
            leg2_timeout: Duration::seconds(180),
            defensive_hedge_on_timeout: true,
            max_usd_per_leg: dec!(1.5),
            slippage_bps: Decimal::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Flat name of a cycle state, for reports and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    Armed,
    Leg1Pending,
    Leg1Filled,
    Leg2Waiting,
    Leg2Filled,
    Leg2TimeoutHedge,
    Leg2TimeoutSkip,
    Aborted,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "IDLE",
            CycleState::Armed => "ARMED",
            CycleState::Leg1Pending => "LEG1_PENDING",
            CycleState::Leg1Filled => "LEG1_FILLED",
            CycleState::Leg2Waiting => "LEG2_WAITING",
            CycleState::Leg2Filled => "LEG2_FILLED",
            CycleState::Leg2TimeoutHedge => "LEG2_TIMEOUT_HEDGE",
            CycleState::Leg2TimeoutSkip => "LEG2_TIMEOUT_SKIP",
            CycleState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleState::Leg2Filled
                | CycleState::Leg2TimeoutHedge
                | CycleState::Leg2TimeoutSkip
                | CycleState::Aborted
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the open cycle.
#[derive(Debug, Clone)]
pub struct OpenCycle {
    pub cycle_id: String,
    pub trigger: TriggerEvent,
    pub opened_at: DateTime<Utc>,
}

/// Phases that persist between ticks, each carrying what it needs.
///
/// ARMED and LEG1_PENDING live only inside `enter_leg1`.
#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Leg1Filled {
        cycle: OpenCycle,
        leg1: Leg1Record,
    },
    Leg2Waiting {
        cycle: OpenCycle,
        leg1: Leg1Record,
        deadline: DateTime<Utc>,
    },
}

impl Phase {
    fn state(&self) -> CycleState {
        match self {
            Phase::Idle => CycleState::Idle,
            Phase::Leg1Filled { .. } => CycleState::Leg1Filled,
            Phase::Leg2Waiting { .. } => CycleState::Leg2Waiting,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone)]
enum Terminal {
    Leg2Filled { leg1: Leg1Record, fill: Fill },
    TimeoutHedge { leg1: Leg1Record, fill: Fill, cap: Decimal },
    TimeoutSkip { leg1: Leg1Record, reason: String },
    Aborted { reason: String },
}

impl Terminal {
    fn state(&self) -> CycleState {
        match self {
            Terminal::Leg2Filled { .. } => CycleState::Leg2Filled,
            Terminal::TimeoutHedge { .. } => CycleState::Leg2TimeoutHedge,
            Terminal::TimeoutSkip { .. } => CycleState::Leg2TimeoutSkip,
            Terminal::Aborted { .. } => CycleState::Aborted,
        }
    }
}

/// Result of one step.
enum Step {
    Stay(Phase),
    Close(OpenCycle, Terminal),
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// One executor call made during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEvent {
    pub role: LegRole,
    pub client_order_id: String,
    pub outcome: SubmitOutcome,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    /// State after the tick; a terminal state when a cycle just closed.
    pub state: CycleState,
    pub executions: Vec<ExecutionEvent>,
    /// Set when a cycle closed during this tick.
    pub record: Option<TradeRecord>,
    /// A trigger arrived while a cycle was already active.
    pub trigger_ignored: bool,
}

impl TickReport {
    fn new() -> Self {
        Self {
            state: CycleState::Idle,
            executions: Vec::new(),
            record: None,
            trigger_ignored: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct TwoLegController {
    config: ControllerConfig,
    phase: Phase,
}

impl TwoLegController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> CycleState {
        self.phase.state()
    }

    /// True while a cycle is open.
    pub fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    pub fn active_cycle(&self) -> Option<&OpenCycle> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Leg1Filled { cycle, .. }
            | Phase::Leg2Waiting { cycle, .. } => Some(cycle),
        }
    }

    /// The filled Leg1 of the open cycle, if any.
    pub fn open_leg1(&self) -> Option<&Leg1Record> {
        match &self.phase {
            Phase::Leg1Filled { leg1, .. } | Phase::Leg2Waiting { leg1, .. } => Some(leg1),
            Phase::Idle => None,
        }
    }

    /// Advance the state machine by at most one step.
    ///
    /// `trigger` is only acted on while idle; otherwise it is ignored and
    /// flagged in the report.
    pub async fn tick<E>(
        &mut self,
        now: DateTime<Utc>,
        trigger: Option<TriggerEvent>,
        quotes: &Quotes,
        ledger: &mut RiskLedger,
        executor: &E,
    ) -> TickReport
    where
        E: OrderExecutor + ?Sized,
    {
        let mut report = TickReport::new();
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);

        let step = match phase {
            Phase::Idle => match trigger {
                None => Step::Stay(Phase::Idle),
                Some(trigger) => {
                    let cycle = OpenCycle {
                        cycle_id: generate_client_order_id("cycle"),
                        trigger,
                        opened_at: now,
                    };
                    info!(
                        cycle = %cycle.cycle_id,
                        trigger = %cycle.trigger,
                        "Cycle armed"
                    );
                    self.enter_leg1(cycle, now, quotes, ledger, executor, &mut report)
                        .await
                }
            },
            Phase::Leg1Filled { cycle, leg1 } => {
                if trigger.is_some() {
                    report.trigger_ignored = true;
                }
                let deadline = leg1.filled_at + self.config.leg2_timeout;
                debug!(cycle = %cycle.cycle_id, deadline = %deadline, "Waiting for Leg2");
                Step::Stay(Phase::Leg2Waiting {
                    cycle,
                    leg1,
                    deadline,
                })
            }
            Phase::Leg2Waiting {
                cycle,
                leg1,
                deadline,
            } => {
                if trigger.is_some() {
                    report.trigger_ignored = true;
                }
                self.await_leg2(cycle, leg1, deadline, now, quotes, ledger, executor, &mut report)
                    .await
            }
        };

        match step {
            Step::Stay(phase) => {
                report.state = phase.state();
                self.phase = phase;
            }
            Step::Close(cycle, terminal) => {
                report.state = terminal.state();
                report.record = Some(self.settle(cycle, terminal, now, quotes, ledger));
                self.phase = Phase::Idle;
            }
        }
        report
    }

    // -- Leg1 ---------------------------------------------------------------

    async fn enter_leg1<E>(
        &self,
        cycle: OpenCycle,
        now: DateTime<Utc>,
        quotes: &Quotes,
        ledger: &mut RiskLedger,
        executor: &E,
        report: &mut TickReport,
    ) -> Step
    where
        E: OrderExecutor + ?Sized,
    {
        debug!(cycle = %cycle.cycle_id, state = %CycleState::Armed, "Authorizing Leg1");
        let abort = |cycle: OpenCycle, reason: String| {
            Step::Close(cycle, Terminal::Aborted { reason })
        };

        let size_usd = match ledger.authorize(self.config.max_usd_per_leg, &self.config.market_id, now) {
            Authorization::Allow { size_usd } => size_usd,
            Authorization::Deny(reason) => return abort(cycle, format!("risk_denied:{reason}")),
        };

        let side = cycle.trigger.side;
        let ask = quotes
            .best_ask(side)
            .unwrap_or(cycle.trigger.reference_price);
        let price = self.with_slippage(ask);
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return abort(cycle, format!("invalid_price:{price}"));
        }
        let size = shares_for(size_usd, price);
        if size <= Decimal::ZERO {
            return abort(cycle, "zero_size".to_string());
        }

        let intent = OrderIntent::limit_gtc(LegRole::Leg1, &self.config.market_id, side, price, size);
        debug!(cycle = %cycle.cycle_id, state = %CycleState::Leg1Pending, order = %intent, "Submitting Leg1");

        ledger.note_order(now);
        let outcome = executor.submit(&intent).await;
        report.executions.push(ExecutionEvent {
            role: LegRole::Leg1,
            client_order_id: intent.client_order_id.clone(),
            outcome: outcome.clone(),
        });

        match outcome {
            SubmitOutcome::Filled(fill) => {
                let leg1 = Leg1Record {
                    side,
                    entry_price: fill.price,
                    size: fill.size,
                    filled_at: now,
                };
                info!(
                    cycle = %cycle.cycle_id,
                    side = %side,
                    price = %fill.price,
                    size = %fill.size,
                    cost = %format!("${:.2}", fill.price * fill.size),
                    "Leg1 filled"
                );
                Step::Stay(Phase::Leg1Filled { cycle, leg1 })
            }
            SubmitOutcome::Timeout { order_id } => {
                cancel_resting(executor, order_id.as_deref()).await;
                abort(cycle, "leg1_timeout".to_string())
            }
            SubmitOutcome::Failed { reason } => abort(cycle, format!("leg1_failed:{reason}")),
        }
    }

    // -- Leg2 ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn await_leg2<E>(
        &self,
        cycle: OpenCycle,
        leg1: Leg1Record,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
        quotes: &Quotes,
        ledger: &mut RiskLedger,
        executor: &E,
        report: &mut TickReport,
    ) -> Step
    where
        E: OrderExecutor + ?Sized,
    {
        let opposite = leg1.side.opposite();
        let opp_ask = quotes.best_ask(opposite);

        if let Some(ask) = opp_ask {
            let sum = leg1.entry_price + ask;
            debug!(
                cycle = %cycle.cycle_id,
                sum = %sum,
                unrealized = %format!("${:.4}", (Decimal::ONE - sum) * leg1.size),
                "Leg2 watch"
            );
        }

        let reason = if self.profit_lock_hit(&leg1, quotes) {
            Some("profit_lock")
        } else if opp_ask.is_some_and(|ask| leg1.entry_price + ask <= self.config.sum_target) {
            Some("sum_target")
        } else {
            None
        };

        if let (Some(reason), Some(ask)) = (reason, opp_ask) {
            let price = self.with_slippage(ask);
            let waiting = |cycle, leg1| Step::Stay(Phase::Leg2Waiting { cycle, leg1, deadline });
            let Some(fill) = self
                .place_second_leg(LegRole::Leg2, &cycle, &leg1, price, now, ledger, executor, report)
                .await
            else {
                return waiting(cycle, leg1);
            };
            info!(
                cycle = %cycle.cycle_id,
                reason,
                side = %opposite,
                price = %fill.price,
                size = %fill.size,
                sum = %(leg1.entry_price + fill.price),
                "Leg2 filled"
            );
            return Step::Close(cycle, Terminal::Leg2Filled { leg1, fill });
        }

        if now < deadline {
            return Step::Stay(Phase::Leg2Waiting {
                cycle,
                leg1,
                deadline,
            });
        }

        if !self.config.defensive_hedge_on_timeout {
            info!(cycle = %cycle.cycle_id, "Leg2 timeout, leaving Leg1 open");
            return Step::Close(
                cycle,
                Terminal::TimeoutSkip {
                    leg1,
                    reason: "leg2_timeout".to_string(),
                },
            );
        }

        let cap = self.config.sum_target_max - leg1.entry_price;
        let price = match opp_ask {
            Some(ask) => self.with_slippage(ask).min(cap),
            None => cap,
        };
        if price <= Decimal::ZERO {
            warn!(cycle = %cycle.cycle_id, cap = %cap, "No room for a defensive hedge");
            return Step::Close(
                cycle,
                Terminal::TimeoutSkip {
                    leg1,
                    reason: "hedge_cap_exhausted".to_string(),
                },
            );
        }
        match self
            .place_second_leg(LegRole::Hedge, &cycle, &leg1, price, now, ledger, executor, report)
            .await
        {
            Some(fill) => {
                info!(
                    cycle = %cycle.cycle_id,
                    price = %fill.price,
                    size = %fill.size,
                    cap = %cap,
                    "Defensive hedge filled"
                );
                Step::Close(cycle, Terminal::TimeoutHedge { leg1, fill, cap })
            }
            None => Step::Close(
                cycle,
                Terminal::TimeoutSkip {
                    leg1,
                    reason: "hedge_unfilled".to_string(),
                },
            ),
        }
    }

    /// Authorize and submit a buy of the opposite side, sized to Leg1.
    ///
    /// Returns the fill, or None when denied or not filled.
    #[allow(clippy::too_many_arguments)]
    async fn place_second_leg<E>(
        &self,
        role: LegRole,
        cycle: &OpenCycle,
        leg1: &Leg1Record,
        price: Decimal,
        now: DateTime<Utc>,
        ledger: &mut RiskLedger,
        executor: &E,
        report: &mut TickReport,
    ) -> Option<Fill>
    where
        E: OrderExecutor + ?Sized,
    {
        let wanted_usd = price * leg1.size;
        let size_usd = match ledger.authorize(wanted_usd, &self.config.market_id, now) {
            Authorization::Allow { size_usd } => size_usd,
            Authorization::Deny(reason) => {
                warn!(cycle = %cycle.cycle_id, role = %role, reason = %reason, "Second leg denied");
                return None;
            }
        };
        let size = leg1.size.min(shares_for(size_usd, price));
        if size <= Decimal::ZERO {
            return None;
        }

        let intent = OrderIntent::limit_gtc(
            role,
            &self.config.market_id,
            leg1.side.opposite(),
            price,
            size,
        );
        ledger.note_order(now);
        let outcome = executor.submit(&intent).await;
        report.executions.push(ExecutionEvent {
            role,
            client_order_id: intent.client_order_id.clone(),
            outcome: outcome.clone(),
        });
        match outcome {
            SubmitOutcome::Filled(fill) => Some(fill),
            SubmitOutcome::Timeout { order_id } => {
                warn!(cycle = %cycle.cycle_id, role = %role, "Order not filled in time");
                cancel_resting(executor, order_id.as_deref()).await;
                None
            }
            SubmitOutcome::Failed { reason } => {
                warn!(cycle = %cycle.cycle_id, role = %role, reason = %reason, "Order failed");
                None
            }
        }
    }

    fn profit_lock_hit(&self, leg1: &Leg1Record, quotes: &Quotes) -> bool {
        if self.config.profit_lock_bps <= Decimal::ZERO || leg1.entry_price.is_zero() {
            return false;
        }
        let Some(bid) = quotes.best_bid(leg1.side) else {
            return false;
        };
        (bid - leg1.entry_price) / leg1.entry_price * dec!(10000) >= self.config.profit_lock_bps
    }

    fn with_slippage(&self, price: Decimal) -> Decimal {
        (price * (Decimal::ONE + self.config.slippage_bps / dec!(10000))).round_dp(PRICE_DP)
    }

    // -- Settlement ---------------------------------------------------------

    /// Compute P&L, inform the ledger and build the persisted record.
    fn settle(
        &self,
        cycle: OpenCycle,
        terminal: Terminal,
        now: DateTime<Utc>,
        quotes: &Quotes,
        ledger: &mut RiskLedger,
    ) -> TradeRecord {
        let state = terminal.state();
        let mark = |leg1: &Leg1Record| quotes.best_bid(leg1.side).unwrap_or(Decimal::ZERO);
        let second = |leg1: &Leg1Record, target_sum: Decimal, fill: Option<&Fill>, timed_out: bool| {
            Leg2Record {
                side: leg1.side.opposite(),
                target_sum,
                price: fill.map(|f| f.price),
                size: fill.map(|f| f.size),
                filled_at: fill.map(|_| now),
                timeout_at: timed_out.then_some(now),
            }
        };

        let (leg1, leg2, pnl, reason) = match &terminal {
            Terminal::Leg2Filled { leg1, fill } => (
                Some(leg1.clone()),
                Some(second(leg1, self.config.sum_target, Some(fill), false)),
                hedged_pnl(leg1, fill, mark(leg1)),
                "completed".to_string(),
            ),
            Terminal::TimeoutHedge { leg1, fill, cap } => (
                Some(leg1.clone()),
                Some(second(leg1, leg1.entry_price + *cap, Some(fill), true)),
                hedged_pnl(leg1, fill, mark(leg1)),
                "defensive_hedge".to_string(),
            ),
            Terminal::TimeoutSkip { leg1, reason } => (
                Some(leg1.clone()),
                Some(second(leg1, self.config.sum_target, None, true)),
                (mark(leg1) - leg1.entry_price) * leg1.size,
                reason.clone(),
            ),
            Terminal::Aborted { reason } => (None, None, Decimal::ZERO, reason.clone()),
        };

        let outcome = match terminal {
            Terminal::Aborted { .. } => CycleOutcome::Aborted,
            Terminal::TimeoutHedge { .. } => CycleOutcome::DefensiveHedge,
            _ if pnl < Decimal::ZERO => CycleOutcome::Loss,
            _ => CycleOutcome::Profit,
        };

        if leg1.is_some() {
            ledger.record_outcome(pnl, &self.config.market_id, now);
        }

        let record = TradeRecord {
            cycle_id: cycle.cycle_id,
            market_id: self.config.market_id.clone(),
            state: state.as_str().to_string(),
            trigger: cycle.trigger,
            leg1,
            leg2,
            opened_at: cycle.opened_at,
            closed_at: now,
            outcome,
            realized_pnl: pnl,
            reason,
        };
        match outcome {
            CycleOutcome::Aborted => info!(record = %record, "Cycle aborted"),
            _ => info!(record = %record, "Cycle closed"),
        }
        record
    }
}

/// Shares affordable with `usd` at `price`, rounded down.
fn shares_for(usd: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (usd / price).round_dp_with_strategy(SIZE_DP, RoundingStrategy::ToZero)
}

/// Realized P&L of the hedged shares plus the marked value of any
/// Leg1 shares left unhedged.
fn hedged_pnl(leg1: &Leg1Record, fill: &Fill, leg1_bid: Decimal) -> Decimal {
    let hedged = fill.size.min(leg1.size);
    let realized = (Decimal::ONE - leg1.entry_price - fill.price) * hedged;
    let unhedged = leg1.size - hedged;
    realized + (leg1_bid - leg1.entry_price) * unhedged
}

async fn cancel_resting<E>(executor: &E, order_id: Option<&str>)
where
    E: OrderExecutor + ?Sized,
{
    let Some(id) = order_id else {
        return;
    };
    if let Err(e) = executor.cancel(id).await {
        warn!(order_id = %id, error = %e, "Cancel failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
