//! Retry delay calculation.
//!
//! All delays are expressed in seconds and clamped to `[0, max_delay]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
    /// Full jitter: `uniform(0, min(max_delay, base * 2^attempt))`.
    ExponentialJitter,
    /// Drawn relative to the previous delay: `uniform(base, last * 3)`.
    DecorrelatedJitter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,

    #[serde(default = "default_base_delay")]
    pub base_delay: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    /// Upper bound on the attempt number fed into the formulas.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Extra proportional jitter for the deterministic strategies, in `[0, 1]`.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter_factor: 0.0,
        }
    }
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::ExponentialJitter
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_max_attempts() -> u32 {
    10
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay in seconds before the next attempt.
    ///
    /// `last_delay` is only consulted by [`BackoffStrategy::DecorrelatedJitter`];
    /// pass `0.0` when there is no previous delay.
    pub fn calculate_delay(&self, attempt: u32, last_delay: f64) -> f64 {
        let cfg = &self.config;
        let attempt = attempt.min(cfg.max_attempts);
        let exponential = cfg.base_delay * 2f64.powi(attempt as i32);

        let delay = match cfg.strategy {
            BackoffStrategy::Constant => self.with_jitter(cfg.base_delay),
            BackoffStrategy::Linear => self.with_jitter(cfg.base_delay * (attempt as f64 + 1.0)),
            BackoffStrategy::Exponential => self.with_jitter(exponential),
            BackoffStrategy::ExponentialJitter => uniform(0.0, exponential.min(cfg.max_delay)),
            BackoffStrategy::DecorrelatedJitter => {
                if last_delay == 0.0 {
                    cfg.base_delay
                } else {
                    uniform(cfg.base_delay, last_delay * 3.0)
                }
            }
        };

        delay.clamp(0.0, cfg.max_delay)
    }

    fn with_jitter(&self, delay: f64) -> f64 {
        if self.config.jitter_factor > 0.0 {
            delay + uniform(0.0, delay * self.config.jitter_factor)
        } else {
            delay
        }
    }
}

fn uniform(low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rand::thread_rng().gen_range(low..=high)
}
