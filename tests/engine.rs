//! End-to-end behaviour of the polling engine under tokio's paused clock.

mod common;

use common::{
    BrokenSink, RecordingSink, ScriptedClient, SlowClient, config, fixed_interval, item,
};
use market_poller::config::PollingConfig;
use market_poller::metrics::HealthStatus;
use market_poller::resilience::{BackoffConfig, BackoffStrategy};
use market_poller::{Error, PollerStatus, PollingEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn constant_backoff(delay: f64) -> BackoffConfig {
    BackoffConfig {
        strategy: BackoffStrategy::Constant,
        base_delay: delay,
        max_delay: delay,
        max_attempts: 10,
        jitter_factor: 0.0,
    }
}

fn engine(
    config: PollingConfig,
    client: &Arc<ScriptedClient>,
    sink: &Arc<RecordingSink>,
) -> PollingEngine {
    PollingEngine::new(config, client.clone(), sink.clone()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_listings_then_baseline_then_change() {
    let client = Arc::new(ScriptedClient::new(|_, nth| {
        Ok(match nth {
            0 | 1 => vec![item("a", 1000), item("b", 2000)],
            _ => vec![item("a", 1100), item("b", 2005)],
        })
    }));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(config(&["a8db"]), &client, &sink);

    engine.start().await.unwrap();

    // t=0: both items are new listings, no changes, so the interval slows to 33s.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.listing_count(), 2);
    let metrics = engine.metrics();
    assert_eq!(metrics.known_items_count, 2);
    assert_eq!(metrics.cached_items_count, 0);
    assert!((metrics.current_interval - 33.0).abs() < 1e-9);

    // t=33: second sighting sets baselines; t=69.3: "a" moved 10%, "b" 0.25%.
    sleep(Duration::from_secs(69)).await;
    assert_eq!(client.total_calls(), 3);

    let changes = sink.changes.lock().unwrap().clone();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].item_id, "a");
    assert_eq!(changes[0].old_price, 1000.0);
    assert_eq!(changes[0].new_price, 1100.0);
    assert!((changes[0].change_percent - 10.0).abs() < 1e-9);

    let metrics = engine.metrics();
    assert_eq!(metrics.poll.total_polls, 3);
    assert_eq!(metrics.poll.items_processed, 6);
    assert_eq!(metrics.poll.changes_detected, 1);
    assert_eq!(metrics.cached_items_count, 2);
    assert!((metrics.current_interval - 33.0 * 1.1 * 0.8).abs() < 1e-9);
    assert_eq!(metrics.health_status, HealthStatus::Healthy);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_market_does_not_abort_cycle() {
    let client = Arc::new(ScriptedClient::new(|market, _| {
        if market == "broken" {
            Err(Error::Api {
                status: 503,
                body: String::new(),
            })
        } else {
            Ok(vec![item("a", 100), item("b", 200)])
        }
    }));
    let sink = Arc::new(RecordingSink::default());
    let cfg = PollingConfig {
        backoff: constant_backoff(2.0),
        ..config(&["a8db", "broken"])
    };
    let engine = engine(cfg, &client, &sink);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(sink.listing_count(), 2);
    let metrics = engine.metrics();
    assert_eq!(metrics.poll.failed_polls, 1);
    assert_eq!(metrics.poll.consecutive_failures, 1);
    assert_eq!(metrics.poll.error_counts.get("api_503"), Some(&1));
    assert_eq!(metrics.current_interval, 2.0);
    assert!(!metrics.circuit_open);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_stops_fetches_until_recovery() {
    let client = Arc::new(ScriptedClient::failing());
    let sink = Arc::new(RecordingSink::default());
    let cfg = PollingConfig {
        failure_threshold: 3,
        recovery_timeout: 30.0,
        backoff: constant_backoff(1.0),
        ..config(&["a8db"])
    };
    let engine = engine(cfg, &client, &sink);

    engine.start().await.unwrap();

    // Failures at t=0, 1, 2; the third opens the breaker.
    sleep(Duration::from_millis(10_500)).await;
    assert_eq!(client.total_calls(), 3);
    let metrics = engine.metrics();
    assert!(metrics.circuit_open);
    assert_eq!(metrics.poll.consecutive_failures, 3);

    sleep(Duration::from_secs(21)).await;
    assert_eq!(client.total_calls(), 3);

    // Recovery at t=32 lets exactly one more attempt through, which re-opens it.
    sleep(Duration::from_secs(9)).await;
    assert_eq!(client.total_calls(), 4);
    assert!(engine.metrics().circuit_open);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let client = Arc::new(ScriptedClient::new(|_, _| Ok(vec![item("a", 100)])));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(fixed_interval(&["a8db"], 5.0), &client, &sink);

    engine.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.total_calls(), 1);

    engine.pause();
    assert_eq!(engine.status(), PollerStatus::Paused);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(client.total_calls(), 1);

    engine.resume();
    assert_eq!(engine.status(), PollerStatus::Running);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(client.total_calls(), 2);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_requires_pause_or_stop() {
    let client = Arc::new(ScriptedClient::new(|_, _| {
        Ok(vec![item("a", 100), item("b", 200)])
    }));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(fixed_interval(&["a8db"], 10.0), &client, &sink);

    engine.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.metrics().known_items_count, 2);

    assert!(matches!(
        engine.clear_cache().await,
        Err(Error::InvalidState(_))
    ));

    engine.pause();
    engine.clear_cache().await.unwrap();
    let metrics = engine.metrics();
    assert_eq!(metrics.known_items_count, 0);
    assert_eq!(metrics.cached_items_count, 0);

    // Forgotten items are announced again on the next cycle (t=10).
    engine.resume();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.listing_count(), 4);

    engine.stop().await;
    engine.clear_cache().await.unwrap();
    assert_eq!(engine.metrics().known_items_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_does_not_wait_for_next_cycle() {
    let client = Arc::new(ScriptedClient::new(|_, _| Ok(vec![item("a", 100)])));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(fixed_interval(&["a8db"], 120.0), &client, &sink);

    engine.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    engine.pause();

    let before = Instant::now();
    engine.clear_cache().await.unwrap();
    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.metrics().known_items_count, 0);

    let before = Instant::now();
    engine.stop().await;
    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(client.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetches_are_bounded_and_callbacks_keep_market_order() {
    let markets = ["m0", "m1", "m2", "m3", "m4", "m5"];
    let client = Arc::new(SlowClient::new(Duration::from_secs(1)));
    let sink = Arc::new(RecordingSink::default());
    let cfg = PollingConfig {
        max_concurrent_requests: 2,
        ..fixed_interval(&markets, 30.0)
    };
    let engine = PollingEngine::new(cfg, client.clone(), sink.clone()).unwrap();

    engine.start().await.unwrap();
    sleep(Duration::from_millis(5_500)).await;

    assert_eq!(client.total_calls(), markets.len());
    assert_eq!(client.peak_in_flight(), 2);

    let expected: Vec<String> = markets
        .iter()
        .flat_map(|m| (1..=3).map(move |n| format!("{}-{}", m, n)))
        .collect();
    assert_eq!(sink.listing_ids(), expected);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_response_time_excludes_rate_limit_wait() {
    let client = Arc::new(SlowClient::new(Duration::from_millis(250)));
    let sink = Arc::new(RecordingSink::default());
    let cfg = PollingConfig {
        max_requests_per_minute: 1,
        ..fixed_interval(&["m0", "m1"], 300.0)
    };
    let engine = PollingEngine::new(cfg, client.clone(), sink.clone()).unwrap();

    engine.start().await.unwrap();
    // Second market waits a full minute for the limiter.
    sleep(Duration::from_secs(61)).await;

    assert_eq!(client.total_calls(), 2);
    let metrics = engine.metrics();
    assert_eq!(metrics.poll.total_polls, 1);
    assert!(metrics.poll.avg_response_time_ms >= 250.0);
    assert!(metrics.poll.avg_response_time_ms < 300.0);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_final_and_restart_keeps_state() {
    let client = Arc::new(ScriptedClient::new(|_, _| Ok(vec![item("a", 100)])));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(fixed_interval(&["a8db"], 5.0), &client, &sink);

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.total_calls(), 1);

    engine.stop().await;
    assert_eq!(engine.status(), PollerStatus::Stopped);
    sleep(Duration::from_secs(100)).await;
    assert_eq!(client.total_calls(), 1);
    assert_eq!(sink.listing_count(), 1);

    engine.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.total_calls(), 2);
    assert_eq!(sink.listing_count(), 1);
    assert_eq!(engine.metrics().poll.total_polls, 2);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_bounds_requests_per_minute() {
    let client = Arc::new(ScriptedClient::new(|_, _| Ok(vec![])));
    let sink = Arc::new(RecordingSink::default());
    let cfg = PollingConfig {
        max_requests_per_minute: 2,
        ..fixed_interval(&["a8db"], 1.0)
    };
    let engine = engine(cfg, &client, &sink);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(59_500)).await;
    assert_eq!(client.total_calls(), 2);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.total_calls(), 3);
    assert_eq!(sink.change_count(), 0);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_callback_failures_do_not_affect_health() {
    let client = Arc::new(ScriptedClient::new(|_, nth| {
        Ok(vec![item("a", 100 + 50 * nth as i64)])
    }));
    let engine = PollingEngine::new(
        fixed_interval(&["a8db"], 5.0),
        client.clone(),
        Arc::new(BrokenSink),
    )
    .unwrap();

    engine.start().await.unwrap();
    sleep(Duration::from_secs(11)).await;

    let metrics = engine.metrics();
    assert_eq!(client.total_calls(), 3);
    assert_eq!(metrics.poll.successful_polls, 3);
    assert_eq!(metrics.poll.changes_detected, 1);
    assert_eq!(metrics.health_status, HealthStatus::Healthy);

    engine.stop().await;
}

#[test]
fn test_invalid_config_fails_at_construction() {
    let cfg = PollingConfig {
        min_interval: -1.0,
        ..config(&["a8db"])
    };
    let result = PollingEngine::new(
        cfg,
        Arc::new(ScriptedClient::failing()),
        Arc::new(RecordingSink::default()),
    );
    assert!(matches!(result, Err(Error::Validation(_))));

    let cfg = PollingConfig {
        recovery_timeout: 1e20,
        ..config(&["a8db"])
    };
    let result = PollingEngine::new(
        cfg,
        Arc::new(ScriptedClient::failing()),
        Arc::new(RecordingSink::default()),
    );
    assert!(matches!(result, Err(Error::Validation(_))));
}
