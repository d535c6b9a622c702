pub mod cache;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod output;
pub mod poller;
pub mod resilience;
pub mod sink;

pub use cache::{ChangeCache, ChangeEvent};
pub use error::{Error, Result};
pub use market::{HttpMarketClient, Item, MarketClient};
pub use metrics::collector::MetricsCollector;
pub use metrics::snapshot::{HealthStatus, MetricsSnapshot};
pub use poller::{EngineMetrics, PollerStatus, PollingEngine};
pub use sink::EventSink;
