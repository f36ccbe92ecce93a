use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;

use crate::config::SourceConfig;

/// One record from the inventory API (product, supplier or order).
pub type Record = Value;

/// Result of fetching one entity collection.
#[derive(Debug, Clone)]
pub enum Fetched {
    Data(Vec<Record>),
    Error(String),
}

impl Fetched {
    /// Treat an error marker as a failure of the whole computation.
    pub fn into_result(self, entity: &str) -> Result<Vec<Record>> {
        match self {
            Fetched::Data(records) => Ok(records),
            Fetched::Error(e) => anyhow::bail!("Failed to fetch {entity}: {e}"),
        }
    }

    /// Treat an error marker as an empty collection.
    pub fn into_records_or_empty(self) -> Vec<Record> {
        match self {
            Fetched::Data(records) => records,
            Fetched::Error(_) => Vec::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, entity: &str) -> Fetched;
}

/// Fetches entity collections from `{base_url}/api/{entity}`, which answers
/// `{"data": [...]}` on success or `{"error": "..."}` on failure.
pub struct HttpDataSource {
    client: Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        // Scheduled jobs each run on their own short-lived runtime, so pooled
        // connections must not outlive a request.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn try_fetch(&self, entity: &str) -> Result<Vec<Record>> {
        let url = format!("{}/api/{entity}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to call {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Inventory API error ({status}): {body}");
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {entity} response"))?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            anyhow::bail!("Inventory API reported an error: {msg}");
        }

        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(&self, entity: &str) -> Fetched {
        match self.try_fetch(entity).await {
            Ok(records) => Fetched::Data(records),
            Err(e) => {
                tracing::error!("Failed to fetch {entity}: {e:#}");
                Fetched::Error(format!("{e:#}"))
            }
        }
    }
}

// --- Record field access ---
//
// The inventory API is loosely typed: numbers may arrive as JSON numbers or as
// strings, and optional fields may be missing or null.

pub fn int_field(record: &Record, key: &str, default: i64) -> i64 {
    match record.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(default)
        }
        _ => default,
    }
}

pub fn float_field(record: &Record, key: &str, default: f64) -> f64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub fn str_field(record: &Record, key: &str, default: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Raw field value, `null` when missing. Used for ids, which may be numbers or strings.
pub fn raw_field(record: &Record, key: &str) -> Value {
    record.get(key).cloned().unwrap_or(Value::Null)
}
