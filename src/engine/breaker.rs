//! Infrastructure circuit breaker.
//!
//! Counts consecutive executor failures (timeouts and errors) across
//! cycles. Reaching the limit opens the breaker for the cooldown, during
//! which no new cycle may arm. Any fill resets the count. Independent of
//! the risk ledger's loss cooldown.

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_consecutive_failures: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
    total_trips: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            open_until: None,
            total_trips: 0,
        }
    }

    /// Whether new cycles may arm at `now`. Closes an expired breaker.
    pub fn allows_arming(&mut self, now: DateTime<Utc>) -> bool {
        match self.state(now) {
            BreakerState::Closed => {
                if self.open_until.take().is_some() {
                    info!("Circuit breaker closed after cooldown");
                    self.consecutive_failures = 0;
                }
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
        match self.open_until {
            Some(until) if now < until => BreakerState::Open { until },
            _ => BreakerState::Closed,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, detail: &str) {
        if self.state(now) == BreakerState::Closed && self.open_until.take().is_some() {
            // Expired trip: count this failure from a fresh streak.
            self.consecutive_failures = 0;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_consecutive_failures
            && self.state(now) == BreakerState::Closed
        {
            let until = now + self.config.cooldown;
            self.open_until = Some(until);
            self.total_trips += 1;
            error!(
                failures = self.consecutive_failures,
                last = %detail,
                until = %until,
                "Circuit breaker tripped, pausing new cycles"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_trips(&self) -> u64 {
        self.total_trips
    }
}
