//! Scripted executor for integration testing.
//!
//! Returns queued outcomes in order and fills at the limit price once the
//! script runs out. Every submitted intent and every cancel is recorded.
//! Clones share state, so a test keeps a handle after boxing one copy
//! into the orchestrator.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use diphedge::engine::executor::OrderExecutor;
use diphedge::types::{BotError, Fill, OrderIntent, SubmitOutcome};

#[derive(Default)]
struct Inner {
    script: VecDeque<SubmitOutcome>,
    submitted: Vec<OrderIntent>,
    cancelled: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl MockExecutor {
    /// Fills everything at the limit price.
    pub fn filling() -> Self {
        Self::default()
    }

    pub fn scripted(outcomes: Vec<SubmitOutcome>) -> Self {
        let exec = Self::default();
        exec.inner.lock().unwrap().script = outcomes.into();
        exec
    }

    pub fn push(&self, outcome: SubmitOutcome) {
        self.inner.lock().unwrap().script.push_back(outcome);
    }

    pub fn submitted(&self) -> Vec<OrderIntent> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }
}

pub fn fill_at_limit(intent: &OrderIntent) -> SubmitOutcome {
    SubmitOutcome::Filled(Fill {
        order_id: format!("mock-{}", intent.client_order_id),
        price: intent.price,
        size: intent.size,
    })
}

#[async_trait]
impl OrderExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, intent: &OrderIntent) -> SubmitOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.submitted.push(intent.clone());
        match inner.script.pop_front() {
            // A scripted fill takes the intent's price and size.
            Some(SubmitOutcome::Filled(_)) | None => fill_at_limit(intent),
            Some(other) => other,
        }
    }

    async fn cancel(&self, order_id: &str) -> Result<(), BotError> {
        self.inner.lock().unwrap().cancelled.push(order_id.to_string());
        Ok(())
    }
}
