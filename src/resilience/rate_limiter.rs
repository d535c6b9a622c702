//! Sliding-window request budget.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const WINDOW: Duration = Duration::from_secs(60);

/// Allows at most `max_requests_per_minute` acquisitions in any rolling
/// 60-second window, suspending callers once the budget is spent.
pub struct RateLimiter {
    max_requests_per_minute: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: usize) -> Self {
        Self {
            max_requests_per_minute,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests_per_minute)),
        }
    }

    pub async fn acquire(&self) {
        // Held across the wait so that concurrent callers queue behind it.
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        prune(&mut timestamps, now);

        if timestamps.len() >= self.max_requests_per_minute {
            if let Some(oldest) = timestamps.front().copied() {
                let wait = (oldest + WINDOW).saturating_duration_since(now);
                if !wait.is_zero() {
                    log::debug!("Rate limit reached, waiting {:.1}s", wait.as_secs_f64());
                    sleep(wait).await;
                }
            }
            prune(&mut timestamps, Instant::now());
        }

        timestamps.push_back(Instant::now());
    }

    /// Requests recorded in the current window.
    pub async fn requests_in_window(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        prune(&mut timestamps, Instant::now());
        timestamps.len()
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = timestamps.front() {
        if now.duration_since(*front) >= WINDOW {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_under_budget_does_not_wait() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.requests_in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_budget_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        limiter.acquire().await;
        sleep(Duration::from_secs(10)).await;
        limiter.acquire().await;

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_window() {
        let limiter = Arc::new(RateLimiter::new(5));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut completed = Vec::new();
        for handle in handles {
            completed.push(handle.await.unwrap());
        }
        completed.sort();

        for (i, at) in completed.iter().enumerate() {
            let in_window = completed[i..]
                .iter()
                .take_while(|t| t.duration_since(*at) < WINDOW)
                .count();
            assert!(in_window <= 5, "{} completions within 60s", in_window);
        }
        assert!(completed.last().unwrap().duration_since(start) >= Duration::from_secs(120));
    }
}
