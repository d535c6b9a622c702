use super::{EventRecord, OutputHandler};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// CSV export; the header row comes from the first serialized record.
pub struct CsvOutput {
    writer: csv::Writer<std::fs::File>,
}

impl CsvOutput {
    pub fn new(path: PathBuf) -> Result<Self> {
        let writer = csv::Writer::from_path(path).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { writer })
    }
}

#[async_trait]
impl OutputHandler for CsvOutput {
    async fn write(&mut self, record: &EventRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .map_err(|e| Error::Internal(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
