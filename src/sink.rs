//! Downstream consumers of engine events.

use crate::cache::ChangeEvent;
use crate::error::Result;
use crate::market::Item;
use crate::output::{EventRecord, OutputHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Receives change notifications from the polling engine.
///
/// May be called from any task; implementations must not assume loop affinity.
/// Returned errors are logged by the engine and otherwise ignored.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_price_change(&self, change: ChangeEvent) -> Result<()>;
    async fn on_new_listing(&self, item: Item) -> Result<()>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes every event through an [`OutputHandler`].
pub struct OutputSink {
    handler: Mutex<Box<dyn OutputHandler>>,
}

impl OutputSink {
    pub fn new(handler: Box<dyn OutputHandler>) -> Self {
        Self {
            handler: Mutex::new(handler),
        }
    }

    async fn write(&self, record: EventRecord) -> Result<()> {
        let mut handler = self.handler.lock().await;
        handler.write(&record).await
    }
}

#[async_trait]
impl EventSink for OutputSink {
    async fn on_price_change(&self, change: ChangeEvent) -> Result<()> {
        self.write(EventRecord::from(&change)).await
    }

    async fn on_new_listing(&self, item: Item) -> Result<()> {
        self.write(EventRecord::from(&item)).await
    }

    async fn close(&self) -> Result<()> {
        let mut handler = self.handler.lock().await;
        handler.close().await
    }
}

pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn on_price_change(&self, change: ChangeEvent) -> Result<()> {
        log::info!(
            "Price change {}: {:.2} -> {:.2} ({:.2}%)",
            change.item_id,
            change.old_price,
            change.new_price,
            change.change_percent
        );
        Ok(())
    }

    async fn on_new_listing(&self, item: Item) -> Result<()> {
        log::info!("New listing {} '{}' at {}", item.id, item.title, item.price);
        Ok(())
    }
}

/// Forwards each event to every inner sink; one sink failing does not stop the rest.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn on_price_change(&self, change: ChangeEvent) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_price_change(change.clone()).await {
                log::error!("Sink failed on price change for {}: {}", change.item_id, e);
            }
        }
        Ok(())
    }

    async fn on_new_listing(&self, item: Item) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_new_listing(item.clone()).await {
                log::error!("Sink failed on new listing {}: {}", item.id, e);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}
