use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub items_processed: u64,
    pub changes_detected: u64,
    pub avg_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub error_counts: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Fraction of successful polls, `1.0` before any poll has been recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_polls == 0 {
            1.0
        } else {
            self.successful_polls as f64 / self.total_polls as f64
        }
    }

    /// Derived on every call; never stored.
    pub fn health_status(&self) -> HealthStatus {
        if self.consecutive_failures >= 10 {
            HealthStatus::Critical
        } else if self.consecutive_failures >= 5 {
            HealthStatus::Unhealthy
        } else if self.success_rate() < 0.9 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
