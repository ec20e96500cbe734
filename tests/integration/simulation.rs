//! Session simulations.
//!
//! Replays recorded or generated observation streams through the full
//! orchestrator (feed state, detector, risk ledger, controller, breaker,
//! journal) on the feed clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;

use diphedge::config::AppConfig;
use diphedge::data::replay::ReplayFeed;
use diphedge::engine::orchestrator::{Clock, CycleOrchestrator, StopReason};
use diphedge::storage::{read_journal, JsonlTradeLog, MemoryTradeLog};
use diphedge::types::{CycleOutcome, PriceObservation, Side, SubmitOutcome, TradeRecord};

use crate::mock_executor::MockExecutor;

const MARKET: &str = "sim-market";

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap() + Duration::seconds(secs)
}

fn q(side: Side, ask: Decimal, secs: i64) -> PriceObservation {
    PriceObservation::new(MARKET, side, ask - dec!(0.01), ask, t(secs))
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.agent.market = MARKET.into();
    cfg.strategy.sum_target = dec!(0.97);
    cfg.strategy.sum_target_max = dec!(0.99);
    cfg.strategy.min_edge_bps = dec!(0);
    cfg.feed.yes_token_id = "1".into();
    cfg.feed.no_token_id = "2".into();
    cfg
}

/// No steady at 0.55 while Yes dumps 0.50 -> 0.40 one second later.
fn dump(start: i64) -> Vec<PriceObservation> {
    vec![
        q(Side::No, dec!(0.55), start),
        q(Side::Yes, dec!(0.50), start),
        q(Side::Yes, dec!(0.40), start + 1),
    ]
}

/// A dump whose opposite side then runs away until Leg2 times out.
fn dump_then_stall(start: i64) -> Vec<PriceObservation> {
    let mut obs = dump(start);
    obs.push(q(Side::No, dec!(0.65), start + 2));
    obs.push(q(Side::No, dec!(0.66), start + 3));
    obs.push(q(Side::No, dec!(0.66), start + 200));
    obs
}

async fn run_session(
    cfg: &AppConfig,
    observations: Vec<PriceObservation>,
    executor: MockExecutor,
) -> (CycleOrchestrator, Vec<TradeRecord>) {
    let journal = MemoryTradeLog::new();
    let mut orch = CycleOrchestrator::new(
        cfg,
        Box::new(ReplayFeed::from_observations(observations)),
        Box::new(executor),
        Box::new(journal.clone()),
        Clock::Feed,
        t(0),
    );
    let reason = orch.run(std::future::pending()).await.unwrap();
    assert_eq!(reason, StopReason::EndOfStream);
    (orch, journal.records())
}

#[tokio::test]
async fn test_recorded_session_completes_cycle() {
    let dir = std::env::temp_dir().join(format!("diphedge_sim_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let recording = dir.join("session.jsonl");
    let journal_path = dir.join("trades.jsonl");

    let mut observations = dump(0);
    observations.push(q(Side::No, dec!(0.55), 2));
    observations.push(q(Side::No, dec!(0.55), 3));
    let mut file = std::fs::File::create(&recording).unwrap();
    for obs in &observations {
        writeln!(file, "{}", serde_json::to_string(obs).unwrap()).unwrap();
    }
    drop(file);

    let exec = MockExecutor::filling();
    let mut orch = CycleOrchestrator::new(
        &config(),
        Box::new(ReplayFeed::from_jsonl(&recording).unwrap()),
        Box::new(exec.clone()),
        Box::new(JsonlTradeLog::open(&journal_path).unwrap()),
        Clock::Feed,
        t(0),
    );
    orch.run(std::future::pending()).await.unwrap();

    // Leg1 buys Yes at 0.40, then No at 0.55 the first time Leg2 is
    // evaluated: 0.95 <= 0.97.
    let submitted = exec.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].side, Side::Yes);
    assert_eq!(submitted[0].price, dec!(0.40));
    assert_eq!(submitted[0].size, dec!(3.75));
    assert_eq!(submitted[1].side, Side::No);
    assert_eq!(submitted[1].price, dec!(0.55));
    assert!(submitted[1].client_order_id.starts_with("leg2-"));

    let records = read_journal(&journal_path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, "LEG2_FILLED");
    assert_eq!(records[0].outcome, CycleOutcome::Profit);
    assert_eq!(records[0].realized_pnl, dec!(0.1875));
    assert_eq!(orch.stats().realized_pnl, dec!(0.1875));
    assert_eq!(orch.ledger().state().bankroll, dec!(50.1875));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_leg2_timeout_hedges_at_cap() {
    let (orch, records) =
        run_session(&config(), dump_then_stall(0), MockExecutor::filling()).await;

    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.state, "LEG2_TIMEOUT_HEDGE");
    assert_eq!(r.outcome, CycleOutcome::DefensiveHedge);
    let leg2 = r.leg2.as_ref().unwrap();
    assert_eq!(leg2.price, Some(dec!(0.59)));
    assert_eq!(leg2.target_sum, dec!(0.99));
    assert!(leg2.timeout_at.is_some());
    assert_eq!(r.realized_pnl, dec!(0.0375));
    assert_eq!(orch.stats().cycles_with(CycleOutcome::DefensiveHedge), 1);
}

#[tokio::test]
async fn test_leg2_timeout_without_hedge_leaves_leg1_open() {
    let mut cfg = config();
    cfg.strategy.defensive_hedge_on_timeout = false;
    let exec = MockExecutor::filling();
    let (orch, records) = run_session(&cfg, dump_then_stall(0), exec.clone()).await;

    assert_eq!(exec.submitted().len(), 1);
    let r = &records[0];
    assert_eq!(r.state, "LEG2_TIMEOUT_SKIP");
    assert_eq!(r.reason, "leg2_timeout");
    assert_eq!(r.leg2.as_ref().unwrap().price, None);
    // 3.75 Yes shares marked at the 0.39 bid against a 0.40 entry.
    assert_eq!(r.realized_pnl, dec!(-0.0375));
    assert_eq!(r.outcome, CycleOutcome::Loss);
    assert_eq!(orch.ledger().state().consecutive_losses, 1);
}

#[tokio::test]
async fn test_consecutive_losses_start_cooldown() {
    let mut cfg = config();
    cfg.strategy.defensive_hedge_on_timeout = false;
    cfg.risk.market_cooldown_hours = 0;

    let mut observations = Vec::new();
    for start in [0, 1000, 2000, 3000] {
        observations.extend(dump_then_stall(start));
    }
    let exec = MockExecutor::filling();
    let (orch, records) = run_session(&cfg, observations, exec.clone()).await;

    assert_eq!(records.len(), 4);
    assert!(records[..3].iter().all(|r| r.outcome == CycleOutcome::Loss));
    assert_eq!(records[3].outcome, CycleOutcome::Aborted);
    assert_eq!(records[3].reason, "risk_denied:cooldown_active");
    assert!(orch.ledger().state().cooldown_until.is_some());
    assert_eq!(exec.submitted().len(), 3);
}

#[tokio::test]
async fn test_resting_leg1_is_cancelled_on_timeout() {
    let exec = MockExecutor::scripted(vec![SubmitOutcome::Timeout {
        order_id: Some("resting-1".into()),
    }]);
    let (orch, records) = run_session(&config(), dump(0), exec.clone()).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, "leg1_timeout");
    assert_eq!(records[0].outcome, CycleOutcome::Aborted);
    assert_eq!(exec.cancelled(), vec!["resting-1".to_string()]);
    assert_eq!(orch.ledger().state().trades_today, 0);
}

#[tokio::test]
async fn test_executor_failures_trip_breaker() {
    let failed = || SubmitOutcome::Failed {
        reason: "HTTP 503".into(),
    };
    let exec = MockExecutor::scripted(vec![failed(), failed(), failed()]);

    let mut observations = Vec::new();
    for start in [0, 10, 20, 30] {
        observations.extend(dump(start));
    }
    let (orch, records) = run_session(&config(), observations, exec.clone()).await;

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.reason.starts_with("leg1_failed:")));
    assert_eq!(exec.submitted().len(), 3);
    assert_eq!(orch.stats().triggers_blocked, 1);
    assert_eq!(orch.breaker().total_trips(), 1);
}

#[tokio::test]
async fn test_other_market_and_stale_quotes_are_ignored() {
    let mut observations = vec![PriceObservation::new(
        "other-market",
        Side::Yes,
        dec!(0.10),
        dec!(0.11),
        t(0),
    )];
    observations.extend(dump(1));
    observations.push(q(Side::Yes, dec!(0.80), 1));
    let (orch, _) = run_session(&config(), observations, MockExecutor::filling()).await;

    assert_eq!(orch.feed_state().dropped(), 2);
    assert_eq!(orch.stats().observations, 5);
}

// ---------------------------------------------------------------------------
// Randomized single-active-cycle invariant
// ---------------------------------------------------------------------------

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn random_walk(rng: &mut XorShift, len: usize) -> Vec<PriceObservation> {
    let mut asks = [dec!(0.50), dec!(0.50)];
    (0..len)
        .map(|i| {
            let side_idx = rng.below(2) as usize;
            let step = match rng.below(10) {
                0 => dec!(-0.10),
                1 => dec!(0.10),
                n => Decimal::from(n as i64 - 5) / dec!(100),
            };
            asks[side_idx] = (asks[side_idx] + step).clamp(dec!(0.05), dec!(0.95));
            let side = if side_idx == 0 { Side::Yes } else { Side::No };
            q(side, asks[side_idx], i as i64 * 2)
        })
        .collect()
}

#[tokio::test]
async fn test_randomized_triggers_keep_one_active_cycle() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);

    let mut cfg = config();
    cfg.strategy.min_edge_bps = dec!(-10000);
    cfg.strategy.leg2_timeout_seconds = 30;
    cfg.risk.max_trades_per_day = 10_000;
    cfg.risk.max_consecutive_losses = 10_000;
    cfg.risk.daily_loss_limit_pct = dec!(1);
    cfg.risk.market_cooldown_hours = 0;
    cfg.risk.max_orders_per_hour = 0;
    cfg.circuit_breaker.max_consecutive_failures = 10_000;

    let exec = MockExecutor::filling();
    for i in 0..4000 {
        let outcome = match rng.below(20) {
            0..=2 => SubmitOutcome::Timeout {
                order_id: Some(format!("resting-{i}")),
            },
            3..=5 => SubmitOutcome::Failed {
                reason: "HTTP 500".into(),
            },
            _ => SubmitOutcome::Filled(diphedge::types::Fill {
                order_id: String::new(),
                price: Decimal::ZERO,
                size: Decimal::ZERO,
            }),
        };
        exec.push(outcome);
    }

    let journal = MemoryTradeLog::new();
    let mut orch = CycleOrchestrator::new(
        &cfg,
        Box::new(ReplayFeed::from_observations(Vec::new())),
        Box::new(exec.clone()),
        Box::new(journal.clone()),
        Clock::Feed,
        t(0),
    );

    let mut active: Option<String> = None;
    let mut closed = 0usize;
    for obs in random_walk(&mut rng, 3000) {
        let Some(report) = orch.on_observation(obs).await.unwrap() else {
            continue;
        };
        if let Some(record) = &report.record {
            if let Some(id) = &active {
                assert_eq!(&record.cycle_id, id, "a cycle closed that was not the active one");
            }
            assert!(!orch.controller().is_active());
            active = None;
            closed += 1;
        }
        if let Some(cycle) = orch.controller().active_cycle() {
            match &active {
                Some(id) => assert_eq!(id, &cycle.cycle_id, "second cycle opened while one was active"),
                None => active = Some(cycle.cycle_id.clone()),
            }
        }
    }

    assert!(closed > 0);
    let records = journal.records();
    assert_eq!(records.len(), closed);
    for pair in records.windows(2) {
        assert!(pair[1].opened_at >= pair[0].closed_at);
    }
}
