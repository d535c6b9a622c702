use crate::metrics::snapshot::{HealthStatus, MetricsSnapshot};
use chrono::Utc;
use std::collections::VecDeque;

/// Number of recent response times kept for the rolling average.
pub const RESPONSE_WINDOW: usize = 100;

/// Rolling poll statistics.
///
/// Owned by the polling loop; only [`MetricsCollector::record_poll`] mutates it.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    stats: MetricsSnapshot,
    response_times: VecDeque<f64>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            stats: MetricsSnapshot::default(),
            response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll(
        &mut self,
        success: bool,
        response_time_ms: f64,
        items_count: u64,
        changes_count: u64,
        error: Option<&str>,
    ) {
        let now = Utc::now();
        let stats = &mut self.stats;

        stats.total_polls += 1;
        stats.last_poll_time = Some(now);

        if success {
            stats.successful_polls += 1;
            stats.consecutive_failures = 0;
            stats.items_processed += items_count;
            stats.changes_detected += changes_count;
            stats.last_success_time = Some(now);
        } else {
            stats.failed_polls += 1;
            stats.consecutive_failures += 1;
            stats.last_failure_time = Some(now);
            if let Some(error) = error {
                *stats.error_counts.entry(error.to_string()).or_insert(0) += 1;
            }
        }

        if self.response_times.len() == RESPONSE_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time_ms);
        stats.avg_response_time_ms =
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.stats.consecutive_failures
    }

    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }

    pub fn health_status(&self) -> HealthStatus {
        self.stats.health_status()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.stats.clone()
    }
}
