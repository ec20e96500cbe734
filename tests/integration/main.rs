//! Integration tests: whole sessions through the orchestrator.

mod mock_executor;
mod simulation;
