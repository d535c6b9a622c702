//! Per-item price baselines with TTL expiry and a significance threshold.
//!
//! The baseline only moves when a change is reported. Sub-threshold moves
//! leave it untouched, so slow drift accumulates until the total move from
//! the last reported price crosses the threshold.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub item_id: String,
    pub price: f64,
    pub quantity: u32,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub item_id: String,
    pub old_price: f64,
    pub new_price: f64,
    pub change_percent: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChangeCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    significant_change_percent: f64,
}

impl ChangeCache {
    pub fn new(ttl_seconds: f64, significant_change_percent: f64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::milliseconds((ttl_seconds * 1000.0) as i64),
            significant_change_percent,
        }
    }

    pub fn observe(
        &mut self,
        item_id: &str,
        current_price: f64,
        current_quantity: u32,
        now: DateTime<Utc>,
    ) -> Option<ChangeEvent> {
        if self
            .entries
            .get(item_id)
            .is_some_and(|entry| now - entry.cached_at > self.ttl)
        {
            log::debug!("Baseline for {} expired", item_id);
            self.entries.remove(item_id);
        }

        let Some(entry) = self.entries.get_mut(item_id) else {
            self.entries.insert(
                item_id.to_string(),
                CacheEntry {
                    item_id: item_id.to_string(),
                    price: current_price,
                    quantity: current_quantity,
                    cached_at: now,
                },
            );
            return None;
        };

        let change_percent = if entry.price == 0.0 {
            100.0
        } else {
            (current_price - entry.price).abs() / entry.price * 100.0
        };

        if change_percent < self.significant_change_percent {
            return None;
        }

        let old_price = entry.price;
        entry.price = current_price;
        entry.quantity = current_quantity;
        entry.cached_at = now;

        Some(ChangeEvent {
            item_id: item_id.to_string(),
            old_price,
            new_price: current_price,
            change_percent,
            detected_at: now,
        })
    }

    pub fn get(&self, item_id: &str) -> Option<&CacheEntry> {
        self.entries.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
