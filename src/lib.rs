//! DIPHEDGE: dump/pump triggered two-leg hedging for binary prediction markets.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod data;
pub mod engine;
pub mod platforms;
pub mod storage;
pub mod strategy;
pub mod types;
