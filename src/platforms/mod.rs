//! Venue integrations.
//!
//! Defines the `OrderVenue` trait: the raw order API of an exchange,
//! without retries or reconciliation (those live in
//! `engine::executor::LiveExecutor`). The Polymarket CLOB client is the
//! one implementation.

pub mod polymarket;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::OrderIntent;

/// Lifecycle state of an order as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueOrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
}

impl VenueOrderStatus {
    /// Map a venue status string. Unknown strings count as open.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "filled" | "matched" => VenueOrderStatus::Filled,
            "cancelled" | "canceled" => VenueOrderStatus::Cancelled,
            "rejected" | "unmatched" => VenueOrderStatus::Rejected,
            _ => VenueOrderStatus::Open,
        }
    }
}

/// Snapshot of one order at the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueOrder {
    pub order_id: String,
    pub status: VenueOrderStatus,
    pub filled_size: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VenueError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl VenueError {
    /// Whether a retry may succeed: transport failures, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            VenueError::Transport(_) => true,
            VenueError::Http { status, .. } => *status == 429 || *status >= 500,
            VenueError::Decode(_) | VenueError::Rejected(_) => false,
        }
    }
}

/// Raw order API of a venue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Place a limit order. The returned snapshot may already be filled.
    async fn place_order(&self, intent: &OrderIntent) -> Result<VenueOrder, VenueError>;

    /// Look up an order by venue id or client order id.
    async fn order_status(&self, order_id: &str) -> Result<VenueOrder, VenueError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError>;
}
