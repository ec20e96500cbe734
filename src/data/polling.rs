//! REST polling feed.
//!
//! Polls the top of book for the yes and no outcome tokens every
//! `poll_interval`, emitting one observation per side per round.
//! Transport errors are logged and retried with a doubling backoff
//! capped at `backoff_max`; they never end the stream.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use super::PriceFeed;
use crate::types::{PriceObservation, Side};

/// Best bid and ask of one outcome token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookTop {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

/// Anything that can report the top of book for a token.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn top_of_book(&self, token_id: &str) -> Result<BookTop>;
}

pub struct PollingFeed<S: BookSource> {
    source: S,
    market_id: String,
    yes_token_id: String,
    no_token_id: String,
    poll_interval: Duration,
    backoff_max: Duration,
    backoff: Duration,
    pending: VecDeque<PriceObservation>,
    rounds: u64,
}

impl<S: BookSource> PollingFeed<S> {
    pub fn new(
        source: S,
        market_id: impl Into<String>,
        yes_token_id: impl Into<String>,
        no_token_id: impl Into<String>,
        poll_interval: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            source,
            market_id: market_id.into(),
            yes_token_id: yes_token_id.into(),
            no_token_id: no_token_id.into(),
            poll_interval,
            backoff_max,
            backoff: poll_interval,
            pending: VecDeque::new(),
            rounds: 0,
        }
    }

    fn token_for(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.yes_token_id,
            Side::No => &self.no_token_id,
        }
    }

    /// Fetch both sides once. Either both observations are queued or none.
    async fn poll_round(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(2);
        for side in Side::ALL {
            let top = self.source.top_of_book(self.token_for(side)).await?;
            batch.push(PriceObservation::new(
                self.market_id.clone(),
                side,
                top.best_bid,
                top.best_ask,
                Utc::now(),
            ));
        }
        self.pending.extend(batch);
        self.rounds += 1;
        Ok(())
    }

    /// Current error backoff; equals the poll interval while healthy.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn next_backoff(&self) -> Duration {
        (self.backoff * 2).min(self.backoff_max)
    }
}

#[async_trait]
impl<S: BookSource> PriceFeed for PollingFeed<S> {
    fn name(&self) -> &str {
        "polling"
    }

    async fn next(&mut self) -> Result<Option<PriceObservation>> {
        loop {
            if let Some(obs) = self.pending.pop_front() {
                return Ok(Some(obs));
            }
            if self.rounds > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            match self.poll_round().await {
                Ok(()) => {
                    self.backoff = self.poll_interval;
                    debug!(round = self.rounds, "Polled order book");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Book polling failed, backing off"
                    );
                    tokio::time::sleep(self.backoff).await;
                    self.backoff = self.next_backoff();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls, then quotes a fixed book.
    struct FlakySource {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BookSource for FlakySource {
        async fn top_of_book(&self, token_id: &str) -> Result<BookTop> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("connection reset");
            }
            let best_ask = if token_id == "yes-token" { dec!(0.52) } else { dec!(0.47) };
            Ok(BookTop {
                best_bid: best_ask - dec!(0.02),
                best_ask,
            })
        }
    }

    fn feed(failures: u32) -> (PollingFeed<FlakySource>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let source = FlakySource {
            failures,
            calls: calls.clone(),
        };
        let feed = PollingFeed::new(
            source,
            "m",
            "yes-token",
            "no-token",
            Duration::from_millis(1),
            Duration::from_millis(4),
        );
        (feed, calls)
    }

    #[tokio::test]
    async fn test_emits_both_sides_per_round() {
        let (mut feed, _) = feed(0);
        let first = feed.next().await.unwrap().unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(first.side, Side::Yes);
        assert_eq!(first.best_ask, dec!(0.52));
        assert_eq!(second.side, Side::No);
        assert_eq!(second.best_ask, dec!(0.47));
        assert_eq!(second.market_id, "m");
    }

    #[tokio::test]
    async fn test_recovers_after_errors_and_resets_backoff() {
        let (mut feed, calls) = feed(3);
        let obs = feed.next().await.unwrap().unwrap();
        assert_eq!(obs.side, Side::Yes);
        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert_eq!(feed.backoff(), Duration::from_millis(1));
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let (mut feed, _) = feed(0);
        feed.backoff = feed.next_backoff();
        assert_eq!(feed.backoff(), Duration::from_millis(2));
        feed.backoff = feed.next_backoff();
        feed.backoff = feed.next_backoff();
        assert_eq!(feed.backoff(), Duration::from_millis(4));
    }
}
