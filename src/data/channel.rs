//! Push feed over a tokio channel.
//!
//! Lets any producer (a WebSocket task, a test) push observations into
//! the orchestrator. The stream ends when every sender is dropped.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::PriceFeed;
use crate::types::PriceObservation;

pub struct ChannelFeed {
    rx: mpsc::Receiver<PriceObservation>,
}

impl ChannelFeed {
    /// Create a feed and the sender that drives it.
    pub fn new(capacity: usize) -> (mpsc::Sender<PriceObservation>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl PriceFeed for ChannelFeed {
    fn name(&self) -> &str {
        "channel"
    }

    async fn next(&mut self) -> Result<Option<PriceObservation>> {
        Ok(self.rx.recv().await)
    }
}
