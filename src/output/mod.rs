use crate::cache::ChangeEvent;
use crate::error::Result;
use crate::market::Item;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod console;
pub mod csv;
pub mod json;
pub mod sqlite;

/// Flat row shared by both event kinds, so tabular outputs get one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: String,
    pub item_id: String,
    pub title: Option<String>,
    pub quantity: Option<u32>,
    pub price: Option<i64>,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&ChangeEvent> for EventRecord {
    fn from(change: &ChangeEvent) -> Self {
        Self {
            event: "price_change".to_string(),
            item_id: change.item_id.clone(),
            title: None,
            quantity: None,
            price: None,
            old_price: Some(change.old_price),
            new_price: Some(change.new_price),
            change_percent: Some(change.change_percent),
            timestamp: change.detected_at,
        }
    }
}

impl From<&Item> for EventRecord {
    fn from(item: &Item) -> Self {
        Self {
            event: "new_listing".to_string(),
            item_id: item.id.clone(),
            title: Some(item.title.clone()),
            quantity: Some(item.quantity),
            price: Some(item.price),
            old_price: None,
            new_price: None,
            change_percent: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn write(&mut self, record: &EventRecord) -> Result<()>;
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
