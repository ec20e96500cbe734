//! Trade journal.
//!
//! Every finished cycle is appended as one JSON line. The core only ever
//! writes; `read_journal` exists for inspection and tests.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::types::{BotError, TradeRecord};

/// Sink for finished trade cycles.
pub trait TradeLog: Send {
    fn append(&mut self, record: &TradeRecord) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON Lines file
// ---------------------------------------------------------------------------

pub struct JsonlTradeLog {
    path: PathBuf,
    written: u64,
}

impl JsonlTradeLog {
    /// Open (or create) the journal, creating missing parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;
        Ok(Self { path, written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended by this handle.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl TradeLog for JsonlTradeLog {
    fn append(&mut self, record: &TradeRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| BotError::Storage(format!("serialise {}: {e}", record.cycle_id)))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to append to journal {}", self.path.display()))?;
        self.written += 1;
        debug!(path = %self.path.display(), cycle = %record.cycle_id, "Trade record appended");
        Ok(())
    }
}

/// Read every record of a journal file.
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<TradeRecord>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read journal {}", path.display()))?;
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Failed to parse journal line {}", i + 1))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Journal kept in memory; clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryTradeLog {
    records: Arc<Mutex<Vec<TradeRecord>>>,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TradeLog for MemoryTradeLog {
    fn append(&mut self, record: &TradeRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| BotError::Storage("memory journal poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
