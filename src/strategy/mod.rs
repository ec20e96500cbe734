//! Strategy: dislocation detection, risk gating and the two-leg cycle.

pub mod controller;
pub mod edge;
pub mod risk;

pub use controller::{ControllerConfig, CycleState, TickReport, TwoLegController};
pub use edge::{EdgeConfig, EdgeDetector, TriggerMode};
pub use risk::{Authorization, DenyReason, RiskConfig, RiskLedger, RiskState};
