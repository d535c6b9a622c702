use crate::market::SortOrder;
use crate::resilience::backoff::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PollerConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    #[validate]
    pub polling: PollingConfig,

    #[serde(default)]
    pub output: Option<OutputConfig>,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Root of the marketplace API; keep the trailing slash when it has a path.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            currency: default_currency(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Everything the polling engine itself consumes. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_polling"))]
pub struct PollingConfig {
    #[serde(default = "default_base_interval")]
    pub base_interval: f64,

    #[serde(default = "default_min_interval")]
    pub min_interval: f64,

    #[serde(default = "default_max_interval")]
    pub max_interval: f64,

    #[serde(default = "default_true")]
    pub adaptive_enabled: bool,

    #[serde(default = "default_true")]
    pub speed_up_on_changes: bool,

    #[serde(default = "default_true")]
    pub slow_down_on_idle: bool,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default = "default_max_requests_per_minute")]
    #[validate(range(min = 1))]
    pub max_requests_per_minute: usize,

    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout: f64,

    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,

    #[serde(default = "default_max_concurrent_requests")]
    #[validate(range(min = 1))]
    pub max_concurrent_requests: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: f64,

    #[serde(default = "default_significant_change")]
    pub significant_change_percent: f64,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub markets: Vec<String>,

    #[serde(default = "default_sort_field")]
    pub sort_field: String,

    #[serde(default = "default_sort_dir")]
    pub sort_dir: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval: default_base_interval(),
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
            adaptive_enabled: true,
            speed_up_on_changes: true,
            slow_down_on_idle: true,
            backoff: BackoffConfig::default(),
            max_requests_per_minute: default_max_requests_per_minute(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            batch_size: default_batch_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
            cache_ttl_seconds: default_cache_ttl(),
            significant_change_percent: default_significant_change(),
            markets: Vec::new(),
            sort_field: default_sort_field(),
            sort_dir: default_sort_dir(),
        }
    }
}

impl PollingConfig {
    pub fn sort_order(&self) -> SortOrder {
        SortOrder {
            field: self.sort_field.clone(),
            direction: self.sort_dir.clone(),
        }
    }
}

/// Upper bound for every configured duration (30 days).
pub const MAX_DURATION_SECS: f64 = 30.0 * 24.0 * 3600.0;

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Owned(message));
    err
}

fn validate_polling(cfg: &PollingConfig) -> Result<(), ValidationError> {
    let durations = [
        cfg.base_interval,
        cfg.min_interval,
        cfg.max_interval,
        cfg.recovery_timeout,
        cfg.cache_ttl_seconds,
        cfg.backoff.base_delay,
        cfg.backoff.max_delay,
    ];
    if durations.iter().any(|d| !d.is_finite()) {
        return Err(invalid(
            "non_finite",
            "intervals, delays and timeouts must be finite".to_string(),
        ));
    }
    if durations.iter().any(|d| *d > MAX_DURATION_SECS) {
        return Err(invalid(
            "duration_too_long",
            format!("intervals, delays and timeouts must not exceed {} seconds", MAX_DURATION_SECS),
        ));
    }
    if !(cfg.min_interval > 0.0) {
        return Err(invalid(
            "min_interval",
            format!("min_interval must be positive, got {}", cfg.min_interval),
        ));
    }
    if !(cfg.min_interval <= cfg.base_interval && cfg.base_interval <= cfg.max_interval) {
        return Err(invalid(
            "interval_order",
            format!(
                "expected min_interval <= base_interval <= max_interval, got {} / {} / {}",
                cfg.min_interval, cfg.base_interval, cfg.max_interval
            ),
        ));
    }

    let backoff = &cfg.backoff;
    if !(backoff.base_delay >= 0.0 && backoff.base_delay <= backoff.max_delay) {
        return Err(invalid(
            "backoff_delay",
            format!(
                "expected 0 <= base_delay <= max_delay, got {} / {}",
                backoff.base_delay, backoff.max_delay
            ),
        ));
    }
    if !(0.0..=1.0).contains(&backoff.jitter_factor) {
        return Err(invalid(
            "jitter_factor",
            format!("jitter_factor must be within [0, 1], got {}", backoff.jitter_factor),
        ));
    }

    if !(cfg.recovery_timeout >= 0.0) {
        return Err(invalid(
            "recovery_timeout",
            format!("recovery_timeout must not be negative, got {}", cfg.recovery_timeout),
        ));
    }
    if !(cfg.cache_ttl_seconds > 0.0) {
        return Err(invalid(
            "cache_ttl_seconds",
            format!("cache_ttl_seconds must be positive, got {}", cfg.cache_ttl_seconds),
        ));
    }
    if !(cfg.significant_change_percent >= 0.0) {
        return Err(invalid(
            "significant_change_percent",
            format!(
                "significant_change_percent must not be negative, got {}",
                cfg.significant_change_percent
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Console,
    Log,
    Json {
        path: String,
    },
    Csv {
        path: String,
    },
    Sqlite {
        path: String,
        #[serde(default = "default_table_name")]
        table: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.dmarket.com/".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_timeout() -> f64 {
    10.0
}

fn default_user_agent() -> String {
    "Market-Poller/1.0".to_string()
}

fn default_base_interval() -> f64 {
    30.0
}

fn default_min_interval() -> f64 {
    5.0
}

fn default_max_interval() -> f64 {
    120.0
}

fn default_max_requests_per_minute() -> usize {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> f64 {
    60.0
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent_requests() -> usize {
    3
}

fn default_cache_ttl() -> f64 {
    300.0
}

fn default_significant_change() -> f64 {
    1.0
}

fn default_sort_field() -> String {
    "updated".to_string()
}

fn default_sort_dir() -> String {
    "desc".to_string()
}

fn default_table_name() -> String {
    "market_events".to_string()
}
