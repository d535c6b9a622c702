//! The polling engine.
//!
//! One spawned task owns all mutable engine state (`PollerState`) for the
//! lifetime of a run. `stop` cancels that task and takes the state back, so
//! a later `start` continues with the same caches and metrics. Only the rate
//! limiter is shared between concurrent market fetches and carries its own lock.

use crate::cache::{ChangeCache, ChangeEvent};
use crate::config::schema::PollingConfig;
use crate::error::{Error, Result};
use crate::market::{Item, MarketClient};
use crate::metrics::{HealthStatus, MetricsCollector, MetricsSnapshot};
use crate::resilience::{BackoffCalculator, CircuitBreaker, RateLimiter};
use crate::sink::EventSink;
use chrono::Utc;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use validator::Validate;

const PAUSE_TICK: Duration = Duration::from_secs(1);
// Keeps an open circuit from spinning when base_delay is zero.
const MIN_CIRCUIT_CHECK: Duration = Duration::from_millis(100);
const SPEED_UP_FACTOR: f64 = 0.8;
const SLOW_DOWN_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollerStatus {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    #[serde(flatten)]
    pub poll: MetricsSnapshot,
    pub success_rate: f64,
    pub health_status: HealthStatus,
    /// Seconds until the next cycle.
    pub current_interval: f64,
    pub circuit_open: bool,
    pub cached_items_count: usize,
    pub known_items_count: usize,
}

/// Next interval after a successful cycle.
pub fn adapt_interval(config: &PollingConfig, current: f64, changes_count: u64) -> f64 {
    if !config.adaptive_enabled {
        return current;
    }
    if changes_count > 0 && config.speed_up_on_changes {
        (current * SPEED_UP_FACTOR).max(config.min_interval)
    } else if changes_count == 0 && config.slow_down_on_idle {
        (current * SLOW_DOWN_FACTOR).min(config.max_interval)
    } else {
        current
    }
}

pub struct PollerState {
    metrics: MetricsCollector,
    cache: ChangeCache,
    known_items: HashSet<String>,
    circuit: CircuitBreaker,
    current_interval: f64,
    last_delay: f64,
}

impl PollerState {
    fn new(config: &PollingConfig) -> Self {
        Self {
            metrics: MetricsCollector::new(),
            cache: ChangeCache::new(config.cache_ttl_seconds, config.significant_change_percent),
            known_items: HashSet::new(),
            circuit: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs_f64(config.recovery_timeout),
            ),
            current_interval: config.base_interval,
            last_delay: 0.0,
        }
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        self.known_items.clear();
    }

    fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            poll: self.metrics.snapshot(),
            success_rate: self.metrics.success_rate(),
            health_status: self.metrics.health_status(),
            current_interval: self.current_interval,
            circuit_open: self.circuit.is_open(),
            cached_items_count: self.cache.len(),
            known_items_count: self.known_items.len(),
        }
    }
}

enum Command {
    ClearCache(oneshot::Sender<()>),
}

struct LoopContext {
    state: PollerState,
    commands: mpsc::Receiver<Command>,
}

struct RunningLoop {
    handle: JoinHandle<LoopContext>,
    cancel: CancellationToken,
}

struct Lifecycle {
    idle: Option<LoopContext>,
    running: Option<RunningLoop>,
    commands: mpsc::Sender<Command>,
}

struct Shared {
    config: PollingConfig,
    client: Arc<dyn MarketClient>,
    sink: Arc<dyn EventSink>,
    backoff: BackoffCalculator,
    rate_limiter: RateLimiter,
    running: AtomicBool,
    paused: AtomicBool,
    metrics_tx: watch::Sender<EngineMetrics>,
}

pub struct PollingEngine {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    metrics_rx: watch::Receiver<EngineMetrics>,
}

impl PollingEngine {
    pub fn new(
        config: PollingConfig,
        client: Arc<dyn MarketClient>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let state = PollerState::new(&config);
        let (metrics_tx, metrics_rx) = watch::channel(state.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(8);

        let shared = Arc::new(Shared {
            backoff: BackoffCalculator::new(config.backoff.clone()),
            rate_limiter: RateLimiter::new(config.max_requests_per_minute),
            config,
            client,
            sink,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            metrics_tx,
        });

        Ok(Self {
            shared,
            lifecycle: Mutex::new(Lifecycle {
                idle: Some(LoopContext {
                    state,
                    commands: commands_rx,
                }),
                running: None,
                commands: commands_tx,
            }),
            metrics_rx,
        })
    }

    /// Spawns the polling loop. Does nothing if it is already running.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            log::debug!("Polling engine already running");
            return Ok(());
        }

        let ctx = lifecycle
            .idle
            .take()
            .ok_or_else(|| Error::InvalidState("engine state is unavailable".to_string()))?;

        let cancel = CancellationToken::new();
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(self.shared.clone().run(ctx, cancel.clone()));
        lifecycle.running = Some(RunningLoop { handle, cancel });

        log::info!(
            "Polling engine started for {} market(s)",
            self.shared.config.markets.len()
        );
        Ok(())
    }

    /// Cancels the loop and waits for it to unwind. No callback runs after this returns.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            return;
        };

        running.cancel.cancel();
        let ctx = match running.handle.await {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("Polling loop terminated abnormally: {}", e);
                let (commands_tx, commands_rx) = mpsc::channel(8);
                lifecycle.commands = commands_tx;
                let ctx = LoopContext {
                    state: PollerState::new(&self.shared.config),
                    commands: commands_rx,
                };
                self.shared.publish(&ctx.state);
                ctx
            }
        };

        lifecycle.idle = Some(ctx);
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        log::info!("Polling engine stopped");
    }

    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            log::info!("Polling paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            log::info!("Polling resumed");
        }
    }

    pub fn status(&self) -> PollerStatus {
        if !self.shared.running.load(Ordering::SeqCst) {
            PollerStatus::Stopped
        } else if self.shared.paused.load(Ordering::SeqCst) {
            PollerStatus::Paused
        } else {
            PollerStatus::Running
        }
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics_rx.borrow().clone()
    }

    /// Receiver updated after every cycle and state transition.
    pub fn watch_metrics(&self) -> watch::Receiver<EngineMetrics> {
        self.metrics_rx.clone()
    }

    /// Forgets every known item and price baseline.
    ///
    /// Only allowed while the engine is paused or stopped.
    pub async fn clear_cache(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(ctx) = lifecycle.idle.as_mut() {
            ctx.state.clear_cache();
            self.shared.publish(&ctx.state);
            log::info!("Cache cleared");
            return Ok(());
        }

        if !self.shared.paused.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(
                "cache can only be cleared while paused or stopped".to_string(),
            ));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        lifecycle
            .commands
            .send(Command::ClearCache(ack_tx))
            .await
            .map_err(|_| Error::InvalidState("polling loop is not accepting commands".to_string()))?;
        ack_rx
            .await
            .map_err(|_| Error::InvalidState("polling loop exited before clearing".to_string()))?;
        log::info!("Cache cleared");
        Ok(())
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().running.as_ref() {
            running.cancel.cancel();
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, mut ctx: LoopContext, cancel: CancellationToken) -> LoopContext {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.iterate(&mut ctx) => {}
            }
        }
        log::debug!("Polling loop exited");
        ctx
    }

    async fn iterate(&self, ctx: &mut LoopContext) {
        while let Ok(command) = ctx.commands.try_recv() {
            self.handle_command(&mut ctx.state, command);
        }

        if self.paused.load(Ordering::SeqCst) {
            let command = tokio::select! {
                _ = sleep(PAUSE_TICK) => None,
                command = ctx.commands.recv() => command,
            };
            if let Some(command) = command {
                self.handle_command(&mut ctx.state, command);
            }
            return;
        }

        let state = &mut ctx.state;
        if state.circuit.is_open() {
            if !state.circuit.try_close(Instant::now()) {
                let recheck =
                    Duration::from_secs_f64(self.config.backoff.base_delay).max(MIN_CIRCUIT_CHECK);
                self.wait_for_next_cycle(ctx, recheck).await;
                return;
            }
            log::info!("Circuit breaker closed, resuming polling");
            self.publish(state);
        }

        self.poll_cycle(state).await;
        let interval = Duration::from_secs_f64(state.current_interval);
        self.wait_for_next_cycle(ctx, interval).await;
    }

    /// Sleeps until the next cycle while still serving commands.
    async fn wait_for_next_cycle(&self, ctx: &mut LoopContext, interval: Duration) {
        let next_cycle = sleep(interval);
        tokio::pin!(next_cycle);
        loop {
            let command = tokio::select! {
                _ = &mut next_cycle => return,
                command = ctx.commands.recv() => command,
            };
            match command {
                Some(command) => self.handle_command(&mut ctx.state, command),
                None => {
                    next_cycle.as_mut().await;
                    return;
                }
            }
        }
    }

    fn handle_command(&self, state: &mut PollerState, command: Command) {
        match command {
            Command::ClearCache(ack) => {
                state.clear_cache();
                self.publish(state);
                let _ = ack.send(());
            }
        }
    }

    async fn poll_cycle(&self, state: &mut PollerState) {
        let sort = &self.config.sort_order();
        let limit = self.config.batch_size;

        let fetches: Vec<_> = self
            .config
            .markets
            .iter()
            .map(|market| {
                let market = market.as_str();
                async move {
                    self.rate_limiter.acquire().await;
                    let started = Instant::now();
                    let result = self.client.fetch_items(market, limit, sort).await;
                    (market, result, started.elapsed())
                }
            })
            .collect();
        let results: Vec<(&str, Result<Vec<Item>>, Duration)> = stream::iter(fetches)
            .buffered(self.config.max_concurrent_requests)
            .collect()
            .await;

        // Slowest request of the cycle; limiter waits and callbacks are excluded.
        let response_time_ms = results
            .iter()
            .map(|(_, _, elapsed)| elapsed.as_secs_f64() * 1000.0)
            .fold(0.0, f64::max);

        let mut items_count = 0u64;
        let mut changes_count = 0u64;
        let mut last_error: Option<String> = None;

        for (market, result, _) in results {
            match result {
                Ok(items) => {
                    items_count += items.len() as u64;
                    let changes = self.poll_market(state, market, items).await;
                    changes_count += changes.len() as u64;
                }
                Err(e) => {
                    log::warn!("Failed to poll market {}: {}", market, e);
                    last_error = Some(e.kind());
                }
            }
        }

        let success = last_error.is_none();
        state.metrics.record_poll(
            success,
            response_time_ms,
            items_count,
            changes_count,
            last_error.as_deref(),
        );

        if success {
            state.last_delay = 0.0;
            state.current_interval =
                adapt_interval(&self.config, state.current_interval, changes_count);
            log::debug!(
                "Cycle ok: {} items, {} changes, next in {:.1}s",
                items_count,
                changes_count,
                state.current_interval
            );
        } else {
            let attempt = state.metrics.consecutive_failures();
            let delay = self.backoff.calculate_delay(attempt, state.last_delay);
            state.last_delay = delay;
            state.current_interval = delay;
            log::debug!("Cycle failed ({} in a row), retrying in {:.1}s", attempt, delay);

            if state.circuit.record_failure(&state.metrics, Instant::now()) {
                log::warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    attempt
                );
            }
        }

        self.publish(state);
    }

    /// Runs change detection over one market's items, in the order they were returned.
    async fn poll_market(
        &self,
        state: &mut PollerState,
        market: &str,
        items: Vec<Item>,
    ) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();

        for item in items {
            if state.known_items.insert(item.id.clone()) {
                let id = item.id.clone();
                self.notify("new listing", &id, self.sink.on_new_listing(item))
                    .await;
                continue;
            }

            if let Some(change) =
                state
                    .cache
                    .observe(&item.id, item.price as f64, item.quantity, Utc::now())
            {
                log::debug!(
                    "{}: {} moved {:.2}%",
                    market,
                    change.item_id,
                    change.change_percent
                );
                self.notify(
                    "price change",
                    &item.id,
                    self.sink.on_price_change(change.clone()),
                )
                .await;
                changes.push(change);
            }
        }

        changes
    }

    async fn notify<F>(&self, what: &str, item_id: &str, callback: F)
    where
        F: Future<Output = Result<()>>,
    {
        match AssertUnwindSafe(callback).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("{} callback failed for {}: {}", what, item_id, e),
            Err(_) => log::error!("{} callback panicked for {}", what, item_id),
        }
    }

    fn publish(&self, state: &PollerState) {
        self.metrics_tx.send_replace(state.snapshot());
    }
}
