//! Time-bounded window of observations for one side of the market.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::types::{PriceObservation, Side};

/// Ordered observations for one side, oldest first.
///
/// After `evict(now)` every retained timestamp lies in `[now - span, now]`
/// as long as `now` is not older than the newest entry. Both clocks keep
/// that: the feed clock is the newest accepted timestamp and the polling
/// feed stamps observations with the wall clock.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    side: Side,
    span: Duration,
    entries: VecDeque<PriceObservation>,
}

impl RollingWindow {
    pub fn new(side: Side, span: Duration) -> Self {
        Self {
            side,
            span,
            entries: VecDeque::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    /// Append an observation and drop entries older than the span.
    ///
    /// Observations must arrive in timestamp order; `FeedState` guarantees it.
    pub fn push(&mut self, obs: PriceObservation) {
        let now = obs.timestamp;
        self.entries.push_back(obs);
        self.evict(now);
    }

    /// Drop entries older than `now - span`. Newer entries are kept.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        while self
            .entries
            .front()
            .is_some_and(|o| o.timestamp < cutoff)
        {
            self.entries.pop_front();
        }
    }

    pub fn oldest(&self) -> Option<&PriceObservation> {
        self.entries.front()
    }

    pub fn newest(&self) -> Option<&PriceObservation> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceObservation> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
