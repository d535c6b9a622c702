use super::{EventRecord, OutputHandler};
use crate::error::{Error, Result};
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::Arc;

/// Prints one line per event, routed through the progress display when present.
pub struct ConsoleOutput {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleOutput {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }

    fn format(record: &EventRecord) -> String {
        match (record.old_price, record.new_price, record.change_percent) {
            (Some(old), Some(new), Some(pct)) => format!(
                "[{}] {} price {:.0} -> {:.0} ({:.2}%)",
                record.timestamp.format("%H:%M:%S"),
                record.item_id,
                old,
                new,
                pct
            ),
            _ => format!(
                "[{}] {} new listing '{}' x{} at {}",
                record.timestamp.format("%H:%M:%S"),
                record.item_id,
                record.title.as_deref().unwrap_or(""),
                record.quantity.unwrap_or(0),
                record.price.unwrap_or(0)
            ),
        }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl OutputHandler for ConsoleOutput {
    async fn write(&mut self, record: &EventRecord) -> Result<()> {
        let line = Self::format(record);
        if let Some(multi) = &self.multi {
            multi
                .println(line)
                .map_err(|e| Error::Internal(e.to_string()))?;
        } else {
            println!("{}", line);
        }
        Ok(())
    }
}
