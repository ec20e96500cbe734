//! Price feeds.
//!
//! Defines the `PriceFeed` trait and the bookkeeping that turns a raw
//! observation stream into per-side rolling windows. Concrete feeds:
//! REST polling of the CLOB book, an in-process channel, and replay of
//! a recorded session.

pub mod channel;
pub mod polling;
pub mod replay;
pub mod window;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{PriceObservation, Side};
use window::RollingWindow;

/// Source of top-of-book observations for both sides of one market.
///
/// `Ok(None)` marks the end of the stream.
#[async_trait]
pub trait PriceFeed: Send {
    /// Human-readable feed name for logs.
    fn name(&self) -> &str;

    /// Next observation, waiting if necessary.
    async fn next(&mut self) -> Result<Option<PriceObservation>>;
}

/// Latest accepted quote per side.
#[derive(Debug, Clone, Default)]
pub struct Quotes {
    pub yes: Option<PriceObservation>,
    pub no: Option<PriceObservation>,
}

impl Quotes {
    pub fn get(&self, side: Side) -> Option<&PriceObservation> {
        match side {
            Side::Yes => self.yes.as_ref(),
            Side::No => self.no.as_ref(),
        }
    }

    pub fn best_ask(&self, side: Side) -> Option<Decimal> {
        self.get(side).map(|o| o.best_ask)
    }

    pub fn best_bid(&self, side: Side) -> Option<Decimal> {
        self.get(side).map(|o| o.best_bid)
    }

    fn set(&mut self, obs: PriceObservation) {
        match obs.side {
            Side::Yes => self.yes = Some(obs),
            Side::No => self.no = Some(obs),
        }
    }
}

/// Rolling windows and latest quotes for the configured market.
#[derive(Debug, Clone)]
pub struct FeedState {
    market_id: String,
    yes: RollingWindow,
    no: RollingWindow,
    quotes: Quotes,
    accepted: u64,
    dropped: u64,
}

impl FeedState {
    pub fn new(market_id: impl Into<String>, window: Duration) -> Self {
        Self {
            market_id: market_id.into(),
            yes: RollingWindow::new(Side::Yes, window),
            no: RollingWindow::new(Side::No, window),
            quotes: Quotes::default(),
            accepted: 0,
            dropped: 0,
        }
    }

    /// Accept an observation into its side's window.
    ///
    /// Returns false (and drops it) when it belongs to another market or
    /// is not newer than the last accepted observation for its side.
    pub fn accept(&mut self, obs: PriceObservation) -> bool {
        if obs.market_id != self.market_id {
            debug!(market = %obs.market_id, "Dropping observation for another market");
            self.dropped += 1;
            return false;
        }
        if let Some(last) = self.quotes.get(obs.side) {
            if obs.timestamp <= last.timestamp {
                debug!(side = %obs.side, ts = %obs.timestamp, "Dropping out-of-order observation");
                self.dropped += 1;
                return false;
            }
        }
        self.quotes.set(obs.clone());
        self.window_mut(obs.side).push(obs);
        self.accepted += 1;
        true
    }

    /// Evict stale entries from both windows.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        self.yes.evict(now);
        self.no.evict(now);
    }

    /// Empty both windows, keeping the latest quotes.
    ///
    /// Called after a cycle closes so the same dislocation cannot arm twice.
    pub fn clear_windows(&mut self) {
        self.yes.clear();
        self.no.clear();
    }

    pub fn window(&self, side: Side) -> &RollingWindow {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    fn window_mut(&mut self, side: Side) -> &mut RollingWindow {
        match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        }
    }

    pub fn quotes(&self) -> &Quotes {
        &self.quotes
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
