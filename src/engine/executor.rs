//! Order execution.
//!
//! `OrderExecutor` is what the controller talks to: submit an intent,
//! get back Filled / Timeout / Failed, cancel by id. Two implementations:
//!
//! - `DryRunExecutor` fills every order at its limit price instantly.
//! - `LiveExecutor` wraps an `OrderVenue` with a per-call timeout,
//!   exponential backoff on transient errors, and status reconciliation
//!   after the order TTL.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::platforms::{OrderVenue, VenueError, VenueOrder, VenueOrderStatus};
use crate::types::{BotError, Fill, OrderIntent, SubmitOutcome};

/// Submits and cancels orders on behalf of the controller.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Submit an order and wait for a terminal answer.
    async fn submit(&self, intent: &OrderIntent) -> SubmitOutcome;

    async fn cancel(&self, order_id: &str) -> Result<(), BotError>;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl OrderExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn submit(&self, intent: &OrderIntent) -> SubmitOutcome {
        info!(
            order = %intent,
            "DRY RUN: simulated fill"
        );
        SubmitOutcome::Filled(Fill {
            order_id: format!("dry-{}", uuid::Uuid::new_v4()),
            price: intent.price,
            size: intent.size,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<(), BotError> {
        debug!(order_id = %order_id, "DRY RUN: cancel is a no-op");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Live executor
// ---------------------------------------------------------------------------

pub struct LiveExecutor<V: OrderVenue> {
    venue: V,
    retry: RetryPolicy,
    request_timeout: Duration,
    order_ttl: Duration,
}

/// Failure of a single retried venue call.
enum CallError {
    TimedOut,
    Venue(VenueError),
}

impl<V: OrderVenue> LiveExecutor<V> {
    pub fn new(venue: V, retry: RetryPolicy, request_timeout: Duration, order_ttl: Duration) -> Self {
        Self {
            venue,
            retry,
            request_timeout,
            order_ttl,
        }
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    /// Run `call` under the request timeout, retrying transient venue errors.
    ///
    /// A timeout is returned immediately when `retry_timeouts` is false:
    /// the request may have reached the venue, so repeating it could
    /// duplicate an order.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        retry_timeouts: bool,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                debug!(what, attempt, delay_ms = delay.as_millis() as u64, "Retrying venue call");
                tokio::time::sleep(delay).await;
            }
            let last = attempt >= self.retry.max_retries;
            match tokio::time::timeout(self.request_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() && !last => {
                    warn!(what, attempt, error = %e, "Transient venue error");
                }
                Ok(Err(e)) => return Err(CallError::Venue(e)),
                Err(_) if retry_timeouts && !last => {
                    warn!(what, attempt, "Venue call timed out");
                }
                Err(_) => return Err(CallError::TimedOut),
            }
            attempt += 1;
        }
    }

    /// Ask the venue what became of an order and turn it into an outcome.
    async fn reconcile(&self, intent: &OrderIntent, order_id: &str) -> SubmitOutcome {
        let snapshot = self
            .with_retry("order_status", true, || self.venue.order_status(order_id))
            .await;
        match snapshot {
            Ok(order) => self.settle(intent, order).await,
            Err(_) => {
                warn!(order_id = %order_id, "Order status unknown after TTL");
                SubmitOutcome::Timeout {
                    order_id: Some(order_id.to_string()),
                }
            }
        }
    }

    /// Map a post-TTL snapshot to an outcome.
    ///
    /// A partial fill still resting is cancelled here and reported as a
    /// fill of the executed quantity. So is a partial fill on an order the
    /// venue already closed.
    async fn settle(&self, intent: &OrderIntent, order: VenueOrder) -> SubmitOutcome {
        match order.status {
            VenueOrderStatus::Filled => SubmitOutcome::Filled(to_fill(intent, &order)),
            VenueOrderStatus::Open if order.filled_size > Decimal::ZERO => {
                if let Err(e) = self.cancel(&order.order_id).await {
                    warn!(order_id = %order.order_id, error = %e, "Failed to cancel partial remainder");
                }
                info!(
                    order_id = %order.order_id,
                    filled = %order.filled_size,
                    requested = %intent.size,
                    "Partial fill accepted"
                );
                SubmitOutcome::Filled(to_fill(intent, &order))
            }
            VenueOrderStatus::Open => SubmitOutcome::Timeout {
                order_id: Some(order.order_id),
            },
            VenueOrderStatus::Cancelled | VenueOrderStatus::Rejected
                if order.filled_size > Decimal::ZERO =>
            {
                info!(
                    order_id = %order.order_id,
                    status = ?order.status,
                    filled = %order.filled_size,
                    requested = %intent.size,
                    "Closed order had a partial fill"
                );
                SubmitOutcome::Filled(to_fill(intent, &order))
            }
            VenueOrderStatus::Cancelled | VenueOrderStatus::Rejected => {
                SubmitOutcome::Timeout { order_id: None }
            }
        }
    }
}

fn to_fill(intent: &OrderIntent, order: &VenueOrder) -> Fill {
    let size = if order.filled_size > Decimal::ZERO {
        order.filled_size
    } else {
        intent.size
    };
    Fill {
        order_id: order.order_id.clone(),
        price: order.avg_price.unwrap_or(intent.price),
        size,
    }
}

#[async_trait]
impl<V: OrderVenue> OrderExecutor for LiveExecutor<V> {
    fn name(&self) -> &str {
        "live"
    }

    async fn submit(&self, intent: &OrderIntent) -> SubmitOutcome {
        info!(order = %intent, "Submitting order");
        let placed = self
            .with_retry("place_order", false, || self.venue.place_order(intent))
            .await;

        let order = match placed {
            Ok(order) => order,
            Err(CallError::TimedOut) => {
                warn!(
                    client_order_id = %intent.client_order_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Order placement timed out, reconciling"
                );
                return self.reconcile(intent, &intent.client_order_id).await;
            }
            Err(CallError::Venue(e)) => {
                warn!(client_order_id = %intent.client_order_id, error = %e, "Order placement failed");
                return SubmitOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match order.status {
            VenueOrderStatus::Filled => SubmitOutcome::Filled(to_fill(intent, &order)),
            VenueOrderStatus::Rejected | VenueOrderStatus::Cancelled => SubmitOutcome::Failed {
                reason: format!("order {} {:?} at placement", order.order_id, order.status),
            },
            VenueOrderStatus::Open => {
                debug!(
                    order_id = %order.order_id,
                    ttl_ms = self.order_ttl.as_millis() as u64,
                    "Order resting, waiting for TTL"
                );
                tokio::time::sleep(self.order_ttl).await;
                self.reconcile(intent, &order.order_id).await
            }
        }
    }

    async fn cancel(&self, order_id: &str) -> Result<(), BotError> {
        match self
            .with_retry("cancel_order", true, || self.venue.cancel_order(order_id))
            .await
        {
            Ok(()) => {
                info!(order_id = %order_id, "Order cancelled");
                Ok(())
            }
            Err(CallError::TimedOut) => Err(BotError::ExecutionTimeout {
                order_id: Some(order_id.to_string()),
                after_secs: self.request_timeout.as_secs(),
            }),
            Err(CallError::Venue(e)) => Err(BotError::Execution {
                transient: e.is_transient(),
                message: e.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockOrderVenue;
    use crate::types::{LegRole, Side};
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent::limit_gtc(LegRole::Leg1, "m", Side::Yes, dec!(0.40), dec!(3.75))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn live(venue: MockOrderVenue) -> LiveExecutor<MockOrderVenue> {
        LiveExecutor::new(venue, policy(), Duration::from_secs(5), Duration::ZERO)
    }

    fn snapshot(id: &str, status: VenueOrderStatus, filled: Decimal) -> VenueOrder {
        VenueOrder {
            order_id: id.to_string(),
            status,
            filled_size: filled,
            avg_price: Some(dec!(0.40)),
        }
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
        assert_eq!(p.delay_for(4), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_dry_run_fills_at_limit() {
        let exec = DryRunExecutor;
        match exec.submit(&intent()).await {
            SubmitOutcome::Filled(fill) => {
                assert_eq!(fill.price, dec!(0.40));
                assert_eq!(fill.size, dec!(3.75));
                assert!(fill.order_id.starts_with("dry-"));
            }
            other => panic!("expected fill, got {other}"),
        }
        assert!(exec.cancel("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_immediate_fill() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .times(1)
            .returning(|_| Ok(snapshot("o1", VenueOrderStatus::Filled, dec!(3.75))));
        let outcome = live(venue).submit(&intent()).await;
        assert_eq!(
            outcome,
            SubmitOutcome::Filled(Fill {
                order_id: "o1".into(),
                price: dec!(0.40),
                size: dec!(3.75),
            })
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mut venue = MockOrderVenue::new();
        let mut seq = Sequence::new();
        venue
            .expect_place_order()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(VenueError::Http { status: 503, body: "busy".into() }));
        venue
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(snapshot("o2", VenueOrderStatus::Filled, dec!(3.75))));
        assert!(live(venue).submit(&intent()).await.is_fill());
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_failed() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .times(3)
            .returning(|_| Err(VenueError::Transport("reset".into())));
        let outcome = live(venue).submit(&intent()).await;
        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .times(1)
            .returning(|_| Err(VenueError::Http { status: 400, body: "bad price".into() }));
        let outcome = live(venue).submit(&intent()).await;
        match outcome {
            SubmitOutcome::Failed { reason } => assert!(reason.contains("bad price")),
            other => panic!("expected failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_resting_order_reported_as_timeout_with_id() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .returning(|_| Ok(snapshot("o3", VenueOrderStatus::Open, Decimal::ZERO)));
        venue
            .expect_order_status()
            .withf(|id| id == "o3")
            .returning(|_| Ok(snapshot("o3", VenueOrderStatus::Open, Decimal::ZERO)));
        venue.expect_cancel_order().times(0);
        let outcome = live(venue).submit(&intent()).await;
        assert_eq!(
            outcome,
            SubmitOutcome::Timeout {
                order_id: Some("o3".into())
            }
        );
    }

    #[tokio::test]
    async fn test_resting_order_filled_after_ttl() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .returning(|_| Ok(snapshot("o4", VenueOrderStatus::Open, Decimal::ZERO)));
        venue
            .expect_order_status()
            .returning(|_| Ok(snapshot("o4", VenueOrderStatus::Filled, dec!(3.75))));
        assert!(live(venue).submit(&intent()).await.is_fill());
    }

    #[tokio::test]
    async fn test_partial_fill_cancels_remainder() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .returning(|_| Ok(snapshot("o5", VenueOrderStatus::Open, Decimal::ZERO)));
        venue
            .expect_order_status()
            .returning(|_| Ok(snapshot("o5", VenueOrderStatus::Open, dec!(1.5))));
        venue
            .expect_cancel_order()
            .withf(|id| id == "o5")
            .times(1)
            .returning(|_| Ok(()));
        match live(venue).submit(&intent()).await {
            SubmitOutcome::Filled(fill) => assert_eq!(fill.size, dec!(1.5)),
            other => panic!("expected partial fill, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_partial_fill_on_closed_order_is_kept() {
        for status in [VenueOrderStatus::Cancelled, VenueOrderStatus::Rejected] {
            let mut venue = MockOrderVenue::new();
            venue
                .expect_place_order()
                .returning(|_| Ok(snapshot("o7", VenueOrderStatus::Open, Decimal::ZERO)));
            venue
                .expect_order_status()
                .returning(move |_| Ok(snapshot("o7", status, dec!(2))));
            venue.expect_cancel_order().times(0);
            match live(venue).submit(&intent()).await {
                SubmitOutcome::Filled(fill) => {
                    assert_eq!(fill.order_id, "o7");
                    assert_eq!(fill.size, dec!(2));
                    assert_eq!(fill.price, dec!(0.40));
                }
                other => panic!("expected partial fill, got {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_without_fill_is_timeout() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_place_order()
            .returning(|_| Ok(snapshot("o8", VenueOrderStatus::Open, Decimal::ZERO)));
        venue
            .expect_order_status()
            .returning(|_| Ok(snapshot("o8", VenueOrderStatus::Cancelled, Decimal::ZERO)));
        assert_eq!(
            live(venue).submit(&intent()).await,
            SubmitOutcome::Timeout { order_id: None }
        );
    }

    #[tokio::test]
    async fn test_cancel_error_maps_to_bot_error() {
        let mut venue = MockOrderVenue::new();
        venue
            .expect_cancel_order()
            .returning(|_| Err(VenueError::Http { status: 404, body: "unknown order".into() }));
        let err = live(venue).cancel("o6").await.unwrap_err();
        assert!(matches!(err, BotError::Execution { transient: false, .. }));
    }
}
