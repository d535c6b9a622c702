use super::{EventRecord, OutputHandler};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

pub struct SqliteOutput {
    pool: SqlitePool,
    table_name: String,
}

impl SqliteOutput {
    pub async fn new(path: PathBuf, table_name: String) -> Result<Self> {
        if !table_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!("invalid table name: {}", table_name)));
        }

        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&conn_str).await?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                event TEXT NOT NULL,
                item_id TEXT NOT NULL,
                title TEXT,
                quantity INTEGER,
                price INTEGER,
                old_price REAL,
                new_price REAL,
                change_percent REAL,
                timestamp TEXT NOT NULL
            )",
            table_name
        );
        sqlx::query(&query).execute(&pool).await?;

        Ok(Self { pool, table_name })
    }
}

#[async_trait]
impl OutputHandler for SqliteOutput {
    async fn write(&mut self, record: &EventRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (event, item_id, title, quantity, price, old_price, new_price, change_percent, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            self.table_name
        );

        sqlx::query(&query)
            .bind(&record.event)
            .bind(&record.item_id)
            .bind(&record.title)
            .bind(record.quantity.map(i64::from))
            .bind(record.price)
            .bind(record.old_price)
            .bind(record.new_price)
            .bind(record.change_percent)
            .bind(record.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
