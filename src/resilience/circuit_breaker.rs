//! Circuit breaker gating calls to the marketplace.
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Closed: recovery_timeout elapsed since opening
//! ```
//!
//! There is no half-open probe. Closing re-enables the normal poll path and
//! the next failure re-opens the breaker if the fault persists.

use crate::metrics::MetricsCollector;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    open: bool,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            open: false,
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Called after a failed poll cycle. Returns `true` if this call opened the breaker.
    pub fn record_failure(&mut self, metrics: &MetricsCollector, now: Instant) -> bool {
        if self.open || metrics.consecutive_failures() < self.failure_threshold {
            return false;
        }
        self.open = true;
        self.opened_at = Some(now);
        true
    }

    /// Closes the breaker once the recovery timeout has elapsed.
    /// Returns `true` if the breaker is closed after the call.
    pub fn try_close(&mut self, now: Instant) -> bool {
        if !self.open {
            return true;
        }
        let elapsed = self
            .opened_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(self.recovery_timeout);
        if elapsed >= self.recovery_timeout {
            self.open = false;
            self.opened_at = None;
            true
        } else {
            false
        }
    }
}
