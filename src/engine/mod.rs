//! Core engine: order execution, the cycle loop and its bookkeeping.

pub mod accountant;
pub mod breaker;
pub mod executor;
pub mod orchestrator;
pub mod scanner;
