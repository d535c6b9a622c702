//! Shared fakes for engine integration tests.

use async_trait::async_trait;
use market_poller::cache::ChangeEvent;
use market_poller::config::PollingConfig;
use market_poller::market::{Item, MarketClient, SortOrder};
use market_poller::sink::EventSink;
use market_poller::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Script = Box<dyn Fn(&str, usize) -> Result<Vec<Item>> + Send + Sync>;

/// Answers each fetch with `script(market, nth_call_for_that_market)`.
pub struct ScriptedClient {
    script: Script,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedClient {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Vec<Item>> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::new(|_, _| {
            Err(Error::Api {
                status: 503,
                body: "unavailable".to_string(),
            })
        })
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketClient for ScriptedClient {
    async fn fetch_items(&self, market: &str, _limit: usize, _sort: &SortOrder) -> Result<Vec<Item>> {
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            let counter = calls.entry(market.to_string()).or_insert(0);
            let nth = *counter;
            *counter += 1;
            nth
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        (self.script)(market, nth)
    }
}

/// Takes `delay` per fetch and tracks how many fetches overlap.
/// Every market answers with `{market}-1`, `{market}-2`, `{market}-3`.
pub struct SlowClient {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl SlowClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketClient for SlowClient {
    async fn fetch_items(&self, market: &str, _limit: usize, _sort: &SortOrder) -> Result<Vec<Item>> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok((1..=3)
            .map(|n| item(&format!("{}-{}", market, n), 100 * n))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub changes: Mutex<Vec<ChangeEvent>>,
    pub listings: Mutex<Vec<Item>>,
}

impl RecordingSink {
    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }

    pub fn listing_count(&self) -> usize {
        self.listings.lock().unwrap().len()
    }

    pub fn listing_ids(&self) -> Vec<String> {
        self.listings
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.id.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn on_price_change(&self, change: ChangeEvent) -> Result<()> {
        self.changes.lock().unwrap().push(change);
        Ok(())
    }

    async fn on_new_listing(&self, item: Item) -> Result<()> {
        self.listings.lock().unwrap().push(item);
        Ok(())
    }
}

/// Errors on price changes and panics on new listings.
pub struct BrokenSink;

#[async_trait]
impl EventSink for BrokenSink {
    async fn on_price_change(&self, _change: ChangeEvent) -> Result<()> {
        Err(Error::Internal("sink offline".to_string()))
    }

    async fn on_new_listing(&self, _item: Item) -> Result<()> {
        panic!("listing handler crashed");
    }
}

pub fn item(id: &str, price: i64) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Item {}", id),
        price,
        quantity: 1,
    }
}

pub fn config(markets: &[&str]) -> PollingConfig {
    PollingConfig {
        markets: markets.iter().map(|m| m.to_string()).collect(),
        base_interval: 30.0,
        min_interval: 5.0,
        max_interval: 120.0,
        ..PollingConfig::default()
    }
}

/// Fixed cadence, no adaptation.
pub fn fixed_interval(markets: &[&str], seconds: f64) -> PollingConfig {
    PollingConfig {
        base_interval: seconds,
        min_interval: seconds,
        max_interval: seconds,
        adaptive_enabled: false,
        ..config(markets)
    }
}
