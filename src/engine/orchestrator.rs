//! Cycle orchestrator: the main feed → detect → trade loop.
//!
//! One task owns the feed, the detector, the risk ledger and the two-leg
//! controller. Every accepted observation triggers a tick, and a
//! heartbeat ticks on its own so a waiting Leg2 times out even when the
//! feed goes quiet.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::data::{FeedState, PriceFeed};
use crate::engine::accountant::{Accountant, SessionStats};
use crate::engine::breaker::CircuitBreaker;
use crate::engine::executor::OrderExecutor;
use crate::engine::scanner::ScanSchedule;
use crate::storage::TradeLog;
use crate::strategy::controller::{TickReport, TwoLegController};
use crate::strategy::edge::EdgeDetector;
use crate::strategy::risk::RiskLedger;
use crate::types::{PriceObservation, Side, SubmitOutcome, TriggerEvent};

/// Where "now" comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// `Utc::now()`; live feeds. The heartbeat runs.
    Wall,
    /// Timestamp of the latest observation; replay. No heartbeat.
    Feed,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Shutdown,
}

enum LoopEvent {
    Observation(Result<Option<PriceObservation>>),
    Heartbeat,
    Shutdown,
}

pub struct CycleOrchestrator {
    feed: Box<dyn PriceFeed>,
    executor: Box<dyn OrderExecutor>,
    journal: Box<dyn TradeLog>,
    state: FeedState,
    detector: EdgeDetector,
    ledger: RiskLedger,
    controller: TwoLegController,
    breaker: CircuitBreaker,
    schedule: ScanSchedule,
    stats: SessionStats,
    clock: Clock,
    heartbeat: Duration,
    last_feed_time: Option<DateTime<Utc>>,
}

impl CycleOrchestrator {
    /// Assemble the loop from the run configuration.
    pub fn new(
        config: &AppConfig,
        feed: Box<dyn PriceFeed>,
        executor: Box<dyn OrderExecutor>,
        journal: Box<dyn TradeLog>,
        clock: Clock,
        now: DateTime<Utc>,
    ) -> Self {
        let risk = config.risk_config();
        let bankroll = risk.bankroll;
        Self {
            feed,
            executor,
            journal,
            state: FeedState::new(config.agent.market.clone(), config.rolling_window()),
            detector: EdgeDetector::new(config.edge_config()),
            ledger: RiskLedger::new(risk, now),
            controller: TwoLegController::new(config.controller_config()),
            breaker: CircuitBreaker::new(config.breaker_config()),
            schedule: ScanSchedule::from_hourly_flag(config.agent.hourly_scan),
            stats: SessionStats::new(bankroll, now),
            clock,
            heartbeat: config.poll_interval(),
            last_feed_time: None,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn ledger(&self) -> &RiskLedger {
        &self.ledger
    }

    pub fn controller(&self) -> &TwoLegController {
        &self.controller
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn feed_state(&self) -> &FeedState {
        &self.state
    }

    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Clock::Wall => Utc::now(),
            Clock::Feed => self.last_feed_time.unwrap_or(self.stats.started_at),
        }
    }

    // -- Main loop ---------------------------------------------------------

    /// Drive the loop until the feed ends or `shutdown` resolves.
    pub async fn run<S>(&mut self, shutdown: S) -> Result<StopReason>
    where
        S: Future<Output = ()>,
    {
        info!(
            feed = self.feed.name(),
            executor = self.executor.name(),
            market = %self.state.market_id(),
            clock = ?self.clock,
            scan = ?self.schedule.mode(),
            "Orchestrator started"
        );

        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let wall_clock = self.clock == Clock::Wall;
        tokio::pin!(shutdown);

        let reason = loop {
            let event = tokio::select! {
                next = self.feed.next() => LoopEvent::Observation(next),
                _ = heartbeat.tick(), if wall_clock => LoopEvent::Heartbeat,
                _ = &mut shutdown => LoopEvent::Shutdown,
            };

            match event {
                LoopEvent::Observation(Ok(Some(obs))) => {
                    self.on_observation(obs).await?;
                }
                LoopEvent::Observation(Ok(None)) => {
                    info!(feed = self.feed.name(), "Feed exhausted");
                    break StopReason::EndOfStream;
                }
                LoopEvent::Observation(Err(e)) => {
                    warn!(feed = self.feed.name(), error = %e, "Feed error, continuing");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                LoopEvent::Heartbeat => {
                    let now = self.now();
                    self.tick(now).await?;
                }
                LoopEvent::Shutdown => {
                    info!("Shutdown signal received.");
                    break StopReason::Shutdown;
                }
            }
        };

        if let Some(cycle) = self.controller.active_cycle() {
            warn!(
                cycle = %cycle.cycle_id,
                state = %self.controller.state(),
                trigger = %cycle.trigger,
                leg1 = ?self.controller.open_leg1(),
                "Stopping with an active cycle"
            );
        }
        Accountant::log_summary(&self.stats, self.now());
        Ok(reason)
    }

    /// Feed one observation in; ticks when it was accepted.
    pub async fn on_observation(&mut self, obs: PriceObservation) -> Result<Option<TickReport>> {
        self.stats.observations += 1;
        let ts = obs.timestamp;
        if !self.state.accept(obs) {
            return Ok(None);
        }
        if self.clock == Clock::Feed {
            match self.last_feed_time {
                None => self.start_feed_clock(ts),
                Some(t) => self.last_feed_time = Some(t.max(ts)),
            }
        }
        let now = self.now();
        self.tick(now).await.map(Some)
    }

    /// First accepted observation on the feed clock: the session and the
    /// risk day start at the recording's time, not at process start.
    fn start_feed_clock(&mut self, ts: DateTime<Utc>) {
        debug!(started_at = %ts, "Feed clock started");
        self.last_feed_time = Some(ts);
        self.stats.started_at = ts;
        self.ledger = RiskLedger::new(self.ledger.config().clone(), ts);
    }

    // -- Tick --------------------------------------------------------------

    /// One pass: evict, detect, gate, advance the cycle, account.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        self.state.evict(now);

        let trigger = if !self.controller.is_active() && self.schedule.due(now) {
            self.detect(now)
        } else {
            None
        };

        let report = self
            .controller
            .tick(
                now,
                trigger,
                self.state.quotes(),
                &mut self.ledger,
                self.executor.as_ref(),
            )
            .await;

        for event in &report.executions {
            match &event.outcome {
                SubmitOutcome::Filled(_) => self.breaker.record_success(),
                other => self
                    .breaker
                    .record_failure(now, &format!("{} {other}", event.role)),
            }
        }
        Accountant::record_executions(&mut self.stats, &report.executions);

        if let Some(record) = &report.record {
            if let Err(e) = self.journal.append(record) {
                error!(cycle = %record.cycle_id, error = %e, "Failed to journal trade record");
            }
            Accountant::reconcile(&mut self.stats, record, self.ledger.state().bankroll);
            self.state.clear_windows();
        }

        Ok(report)
    }

    fn detect(&mut self, now: DateTime<Utc>) -> Option<TriggerEvent> {
        let trigger = self
            .detector
            .evaluate(self.state.window(Side::Yes), self.state.window(Side::No))?;
        self.stats.triggers_seen += 1;

        if !self.detector.is_eligible(&trigger) {
            self.stats.triggers_ineligible += 1;
            debug!(trigger = %trigger, "Trigger below minimum edge");
            return None;
        }
        if !self.breaker.allows_arming(now) {
            self.stats.triggers_blocked += 1;
            warn!(trigger = %trigger, state = ?self.breaker.state(now), "Circuit breaker open, trigger dropped");
            return None;
        }
        Some(trigger)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
