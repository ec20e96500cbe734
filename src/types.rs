//! Shared types for the DIPHEDGE agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that feed, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Both sides, in a fixed order.
    pub const ALL: [Side; 2] = [Side::Yes, Side::No];

    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt to parse a string into a Side (case-insensitive).
impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" | "up" => Ok(Side::Yes),
            "no" | "down" => Ok(Side::No),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Direction of a windowed price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerDirection {
    Pump,
    Dump,
}

impl fmt::Display for TriggerDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerDirection::Pump => write!(f, "pump"),
            TriggerDirection::Dump => write!(f, "dump"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
}

// ---------------------------------------------------------------------------
// Price observations
// ---------------------------------------------------------------------------

/// Top-of-book snapshot for one side of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub market_id: String,
    pub side: Side,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceObservation {
    /// Build an observation, deriving the mid from bid and ask.
    pub fn new(
        market_id: impl Into<String>,
        side: Side,
        best_bid: Decimal,
        best_ask: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / dec!(2),
            timestamp,
        }
    }

    pub fn spread(&self) -> Decimal {
        (self.best_ask - self.best_bid).max(Decimal::ZERO)
    }
}

impl fmt::Display for PriceObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} bid={} ask={} mid={} @ {}",
            self.market_id,
            self.side,
            self.best_bid,
            self.best_ask,
            self.mid,
            self.timestamp.format("%H:%M:%S%.3f"),
        )
    }
}

// ---------------------------------------------------------------------------
// Trigger events
// ---------------------------------------------------------------------------

/// A windowed price dislocation on one side of the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub side: Side,
    pub direction: TriggerDirection,
    /// Signed move over the window, in percent (-11 means an 11% drop).
    pub magnitude_pct: Decimal,
    /// Best ask of the moved side at the newest observation.
    pub reference_price: Decimal,
    /// Static edge `(1 - (ask_yes + ask_no)) * 10000`, if both sides are quoted.
    pub edge_bps: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.2}% ref={}",
            self.side, self.direction, self.magnitude_pct, self.reference_price,
        )?;
        if let Some(edge) = self.edge_bps {
            write!(f, " edge={edge:.0}bps")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Which leg of a trade cycle an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    Leg1,
    Leg2,
    Hedge,
}

impl LegRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegRole::Leg1 => "leg1",
            LegRole::Leg2 => "leg2",
            LegRole::Hedge => "hedge",
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A limit order to buy `size` shares of `side` at `price`.
///
/// Never mutated after submission; a cancel is a separate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

impl OrderIntent {
    pub fn limit_gtc(
        role: LegRole,
        market_id: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            client_order_id: generate_client_order_id(role.as_str()),
            market_id: market_id.into(),
            side,
            price,
            size,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
        }
    }

    /// USD cost of the order if fully filled.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BUY {} {} x{} @ {} (${:.2}) [{}]",
            self.market_id,
            self.side,
            self.size,
            self.price,
            self.notional(),
            self.client_order_id,
        )
    }
}

/// `<prefix>-<YYYYmmddHHMMSS>-<8 hex chars>`
pub fn generate_client_order_id(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{stamp}-{}", &suffix[..8])
}

/// Execution of an order at the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub price: Decimal,
    pub size: Decimal,
}

/// Result of submitting an order.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Filled(Fill),
    /// No fill within the allowed time. `order_id` is set when the order
    /// is known to exist at the venue and may still be resting.
    Timeout { order_id: Option<String> },
    Failed { reason: String },
}

impl SubmitOutcome {
    pub fn is_fill(&self) -> bool {
        matches!(self, SubmitOutcome::Filled(_))
    }
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitOutcome::Filled(fill) => {
                write!(f, "filled x{} @ {} [{}]", fill.size, fill.price, fill.order_id)
            }
            SubmitOutcome::Timeout { order_id: Some(id) } => write!(f, "timeout [{id}]"),
            SubmitOutcome::Timeout { order_id: None } => write!(f, "timeout"),
            SubmitOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade records
// ---------------------------------------------------------------------------

/// How a trade cycle ended, for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Profit,
    Loss,
    Aborted,
    DefensiveHedge,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Profit => write!(f, "profit"),
            CycleOutcome::Loss => write!(f, "loss"),
            CycleOutcome::Aborted => write!(f, "aborted"),
            CycleOutcome::DefensiveHedge => write!(f, "defensive_hedge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg1Record {
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg2Record {
    pub side: Side,
    pub target_sum: Decimal,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
}

/// Persisted form of a finished trade cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub cycle_id: String,
    pub market_id: String,
    /// Terminal state name, e.g. `LEG2_FILLED`.
    pub state: String,
    pub trigger: TriggerEvent,
    pub leg1: Option<Leg1Record>,
    pub leg2: Option<Leg2Record>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub realized_pnl: Decimal,
    pub reason: String,
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.realized_pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "[{}] {} {} -> {} ({sign}{:.4}) {}",
            self.cycle_id, self.market_id, self.trigger, self.state, self.realized_pnl, self.reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DIPHEDGE.
///
/// A risk denial is not an error; see `strategy::risk::Authorization`.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Execution timed out after {after_secs}s (order {order_id:?})")]
    ExecutionTimeout {
        order_id: Option<String>,
        after_secs: u64,
    },

    #[error("Execution error: {message}")]
    Execution { message: String, transient: bool },

    #[error("Feed gap on {side}: {detail}")]
    FeedGap { side: Side, detail: String },

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Yes.to_string(), "yes");
        assert_eq!(Side::No.to_string(), "no");
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn test_side_from_str() {
        assert_eq!("YES".parse::<Side>().unwrap(), Side::Yes);
        assert_eq!("down".parse::<Side>().unwrap(), Side::No);
        assert!("maybe".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::No).unwrap(), "\"no\"");
    }

    #[test]
    fn test_observation_mid_and_spread() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let obs = PriceObservation::new("m", Side::Yes, dec!(0.40), dec!(0.44), ts);
        assert_eq!(obs.mid, dec!(0.42));
        assert_eq!(obs.spread(), dec!(0.04));
    }

    #[test]
    fn test_crossed_book_spread_is_zero() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let obs = PriceObservation::new("m", Side::No, dec!(0.50), dec!(0.49), ts);
        assert_eq!(obs.spread(), Decimal::ZERO);
    }

    #[test]
    fn test_order_intent_limit_gtc() {
        let intent = OrderIntent::limit_gtc(LegRole::Leg1, "m", Side::Yes, dec!(0.40), dec!(3.75));
        assert_eq!(intent.order_type, OrderType::Limit);
        assert_eq!(intent.time_in_force, TimeInForce::Gtc);
        assert_eq!(intent.notional(), dec!(1.5));
        assert!(intent.client_order_id.starts_with("leg1-"));
    }

    #[test]
    fn test_client_order_id_shape() {
        let id = generate_client_order_id("hedge");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "hedge");
        assert_eq!(parts[1].len(), 14);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_order_type_serialization() {
        assert_eq!(serde_json::to_string(&OrderType::Limit).unwrap(), "\"LIMIT\"");
        assert_eq!(serde_json::to_string(&TimeInForce::Gtc).unwrap(), "\"GTC\"");
    }

    #[test]
    fn test_cycle_outcome_display() {
        assert_eq!(CycleOutcome::DefensiveHedge.to_string(), "defensive_hedge");
        assert_eq!(
            serde_json::to_string(&CycleOutcome::DefensiveHedge).unwrap(),
            "\"defensive_hedge\""
        );
    }

    #[test]
    fn test_submit_outcome_display() {
        let fill = SubmitOutcome::Filled(Fill {
            order_id: "o1".into(),
            price: dec!(0.4),
            size: dec!(2),
        });
        assert!(fill.is_fill());
        assert_eq!(fill.to_string(), "filled x2 @ 0.4 [o1]");
        assert_eq!(
            SubmitOutcome::Timeout { order_id: None }.to_string(),
            "timeout"
        );
    }

    #[test]
    fn test_bot_error_display() {
        let err = BotError::ConfigInvalid("sum_target must be positive".into());
        assert_eq!(err.to_string(), "Invalid configuration: sum_target must be positive");

        let err = BotError::FeedGap {
            side: Side::No,
            detail: "1 observation in window".into(),
        };
        assert!(err.to_string().contains("no"));
    }
}
