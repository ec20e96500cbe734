//! Accountant: session statistics and P&L tracking.
//!
//! Reconciles each finished cycle into running session totals and logs
//! them, so the operator sees cycles by outcome, realized P&L and the
//! bankroll after every cycle and once more at shutdown.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::strategy::controller::ExecutionEvent;
use crate::types::{CycleOutcome, SubmitOutcome, TradeRecord};

// ---------------------------------------------------------------------------
// Session statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub observations: u64,
    pub triggers_seen: u64,
    pub triggers_ineligible: u64,
    pub triggers_blocked: u64,
    pub orders_submitted: u64,
    pub fills: u64,
    pub order_failures: u64,
    pub cycles: HashMap<CycleOutcome, u64>,
    pub realized_pnl: Decimal,
    pub bankroll: Decimal,
    pub peak_bankroll: Decimal,
}

impl SessionStats {
    pub fn new(bankroll: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            observations: 0,
            triggers_seen: 0,
            triggers_ineligible: 0,
            triggers_blocked: 0,
            orders_submitted: 0,
            fills: 0,
            order_failures: 0,
            cycles: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            bankroll,
            peak_bankroll: bankroll,
        }
    }

    pub fn cycles_with(&self, outcome: CycleOutcome) -> u64 {
        self.cycles.get(&outcome).copied().unwrap_or(0)
    }

    pub fn total_cycles(&self) -> u64 {
        self.cycles.values().sum()
    }

    /// Drawdown from the session peak, as a fraction.
    pub fn drawdown(&self) -> Decimal {
        if self.peak_bankroll <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_bankroll - self.bankroll) / self.peak_bankroll).max(Decimal::ZERO)
    }
}

/// Summary of one reconciled cycle.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle_number: u64,
    pub outcome: CycleOutcome,
    pub pnl: Decimal,
    pub bankroll_before: Decimal,
    pub bankroll_after: Decimal,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Count the executor calls of a tick.
    pub fn record_executions(stats: &mut SessionStats, events: &[ExecutionEvent]) {
        for event in events {
            stats.orders_submitted += 1;
            match event.outcome {
                SubmitOutcome::Filled(_) => stats.fills += 1,
                SubmitOutcome::Timeout { .. } | SubmitOutcome::Failed { .. } => {
                    stats.order_failures += 1
                }
            }
        }
    }

    /// Fold a finished cycle into the session totals.
    ///
    /// `bankroll` is the ledger bankroll after the cycle was recorded.
    pub fn reconcile(
        stats: &mut SessionStats,
        record: &TradeRecord,
        bankroll: Decimal,
    ) -> CycleSummary {
        let bankroll_before = stats.bankroll;
        *stats.cycles.entry(record.outcome).or_insert(0) += 1;
        stats.realized_pnl += record.realized_pnl;
        stats.bankroll = bankroll;
        stats.peak_bankroll = stats.peak_bankroll.max(bankroll);

        let summary = CycleSummary {
            cycle_number: stats.total_cycles(),
            outcome: record.outcome,
            pnl: record.realized_pnl,
            bankroll_before,
            bankroll_after: bankroll,
        };

        info!(
            cycle = summary.cycle_number,
            outcome = %summary.outcome,
            pnl = format!("${:.4}", summary.pnl),
            session_pnl = format!("${:.4}", stats.realized_pnl),
            bankroll = format!("${:.2}", bankroll),
            "Cycle reconciled"
        );
        if record.outcome == CycleOutcome::Loss && record.leg2.as_ref().is_some_and(|l| l.price.is_none()) {
            warn!(cycle = %record.cycle_id, "Leg1 left unhedged");
        }
        summary
    }

    /// Log the end-of-session summary.
    pub fn log_summary(stats: &SessionStats, now: DateTime<Utc>) {
        let minutes = (now - stats.started_at).num_minutes();
        info!(
            minutes,
            observations = stats.observations,
            triggers = stats.triggers_seen,
            ineligible = stats.triggers_ineligible,
            blocked = stats.triggers_blocked,
            orders = stats.orders_submitted,
            fills = stats.fills,
            failures = stats.order_failures,
            profit = stats.cycles_with(CycleOutcome::Profit),
            loss = stats.cycles_with(CycleOutcome::Loss),
            hedged = stats.cycles_with(CycleOutcome::DefensiveHedge),
            aborted = stats.cycles_with(CycleOutcome::Aborted),
            realized_pnl = format!("${:.4}", stats.realized_pnl),
            bankroll = format!("${:.2}", stats.bankroll),
            drawdown = format!("{:.1}%", stats.drawdown() * Decimal::ONE_HUNDRED),
            "Session summary"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
