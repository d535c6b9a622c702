use super::{EventRecord, OutputHandler};
use crate::error::Result;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Appends events as JSON Lines, one object per line.
pub struct JsonOutput {
    writer: BufWriter<File>,
}

impl JsonOutput {
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl OutputHandler for JsonOutput {
    async fn write(&mut self, record: &EventRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        writeln!(self.writer)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
