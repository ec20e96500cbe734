//! Replay of a recorded session.
//!
//! Observations come from memory or from a JSON Lines file with one
//! serialized `PriceObservation` per line. Replay runs as fast as the
//! consumer pulls; the orchestrator uses the observation timestamps as
//! its clock so results are deterministic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::info;

use super::PriceFeed;
use crate::types::PriceObservation;

pub struct ReplayFeed {
    name: String,
    queue: VecDeque<PriceObservation>,
}

impl ReplayFeed {
    pub fn from_observations(observations: Vec<PriceObservation>) -> Self {
        Self {
            name: "replay".to_string(),
            queue: observations.into(),
        }
    }

    /// Load a JSON Lines recording. Blank lines are skipped.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
        let queue = Self::parse_jsonl(&contents)
            .with_context(|| format!("Failed to parse replay file: {}", path.display()))?;
        info!(path = %path.display(), observations = queue.len(), "Loaded replay session");
        Ok(Self {
            name: format!("replay:{}", path.display()),
            queue,
        })
    }

    fn parse_jsonl(contents: &str) -> Result<VecDeque<PriceObservation>> {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next(&mut self) -> Result<Option<PriceObservation>> {
        Ok(self.queue.pop_front())
    }
}
