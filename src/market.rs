use crate::config::schema::{ApiConfig, MAX_DURATION_SECS};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// A marketplace listing as seen by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    /// Price in minor currency units (cents).
    pub price: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub direction: String,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            field: "updated".to_string(),
            direction: "desc".to_string(),
        }
    }
}

/// Source of marketplace listings. Transport, auth and decoding live behind it.
#[async_trait]
pub trait MarketClient: Send + Sync {
    async fn fetch_items(&self, market: &str, limit: usize, sort: &SortOrder) -> Result<Vec<Item>>;
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    objects: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    item_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    price: HashMap<String, String>,
    #[serde(default = "default_amount")]
    amount: u32,
}

fn default_amount() -> u32 {
    1
}

pub struct HttpMarketClient {
    client: Client,
    items_url: Url,
    currency: String,
    api_key: Option<String>,
}

impl HttpMarketClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(config.timeout_secs)
            .ok()
            .filter(|t| !t.is_zero() && t.as_secs_f64() <= MAX_DURATION_SECS)
            .ok_or_else(|| {
                Error::Config(format!("invalid timeout_secs: {}", config.timeout_secs))
            })?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        let items_url = Url::parse(&config.base_url)
            .and_then(|base| base.join("exchange/v1/market/items"))
            .map_err(|e| Error::Config(format!("invalid base_url {}: {}", config.base_url, e)))?;

        Ok(Self {
            client,
            items_url,
            currency: config.currency.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn convert(&self, raw: RawItem) -> Result<Item> {
        let price = match raw.price.get(&self.currency) {
            Some(value) => value.trim().parse::<i64>().map_err(|_| {
                Error::Decode(format!("item {} has invalid price {:?}", raw.item_id, value))
            })?,
            None => {
                return Err(Error::Decode(format!(
                    "item {} has no {} price",
                    raw.item_id, self.currency
                )));
            }
        };

        Ok(Item {
            id: raw.item_id,
            title: raw.title,
            price,
            quantity: raw.amount,
        })
    }
}

#[async_trait]
impl MarketClient for HttpMarketClient {
    async fn fetch_items(&self, market: &str, limit: usize, sort: &SortOrder) -> Result<Vec<Item>> {
        let mut url = self.items_url.clone();
        url.query_pairs_mut()
            .append_pair("gameId", market)
            .append_pair("limit", &limit.to_string())
            .append_pair("orderBy", &sort.field)
            .append_pair("orderDir", &sort.direction)
            .append_pair("currency", &self.currency);

        log::debug!("Fetching: {}", url);

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ItemsResponse = res.json().await?;
        log::debug!("{} returned {} items", market, payload.objects.len());

        payload
            .objects
            .into_iter()
            .map(|raw| self.convert(raw))
            .collect()
    }
}
