//! Detection pacing.
//!
//! `Continuous` runs edge detection on every tick; `Hourly` runs it at
//! most once per hour. Ticks still service an open cycle either way.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Continuous,
    Hourly,
}

#[derive(Debug, Clone)]
pub struct ScanSchedule {
    mode: ScanMode,
    last_scan: Option<DateTime<Utc>>,
}

impl ScanSchedule {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            last_scan: None,
        }
    }

    pub fn from_hourly_flag(hourly: bool) -> Self {
        Self::new(if hourly { ScanMode::Hourly } else { ScanMode::Continuous })
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Whether detection should run at `now`. Marks the scan as done.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        match self.mode {
            ScanMode::Continuous => true,
            ScanMode::Hourly => {
                let due = self
                    .last_scan
                    .map_or(true, |last| now - last >= Duration::hours(1));
                if due {
                    debug!(at = %now, "Hourly scan");
                    self.last_scan = Some(now);
                }
                due
            }
        }
    }
}
