//! Airtable REST backend
//!
//! Talks to `https://api.airtable.com/v0/{base}/{table}`. Transient failures
//! (network errors, 429 and 5xx) are retried with jittered backoff.
//! `compare_and_update` is read-check-write here: Airtable has no conditional
//! update, so the guard only protects against writers that re-read.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{Fields, Formula, Record, RecordStore};
use crate::error::{StoreError, StoreResult};

const API_ROOT: &str = "https://api.airtable.com/v0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: usize = 3;
/// Airtable caps pages at 100 records
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
}

impl AirtableConfig {
    pub fn from_env() -> StoreResult<Self> {
        Ok(Self {
            api_key: std::env::var("AIRTABLE_API_KEY")
                .map_err(|_| StoreError::Config("AIRTABLE_API_KEY not set".to_string()))?,
            base_id: std::env::var("AIRTABLE_BASE_ID")
                .map_err(|_| StoreError::Config("AIRTABLE_BASE_ID not set".to_string()))?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default)]
    fields: Fields,
    #[serde(rename = "createdTime", with = "time::serde::rfc3339")]
    created_time: OffsetDateTime,
}

impl From<AirtableRecord> for Record {
    fn from(r: AirtableRecord) -> Self {
        Record {
            id: r.id,
            fields: r.fields,
            created_time: r.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AirtableList {
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Outcome of one HTTP attempt, split for the retry loop
enum Attempt {
    Done(StoreResult<reqwest::Response>),
    Transient(StoreError),
}

#[derive(Clone)]
pub struct AirtableStore {
    client: Client,
    config: AirtableConfig,
}

impl AirtableStore {
    pub fn new(config: AirtableConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", API_ROOT, self.config.base_id, table)
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Attempt {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.config.api_key)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        match request.send().await {
            Err(e) => Attempt::Transient(StoreError::from(e)),
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                Attempt::Transient(StoreError::Upstream(format!(
                    "airtable answered {}",
                    resp.status()
                )))
            }
            Ok(resp) => Attempt::Done(Ok(resp)),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> StoreResult<reqwest::Response> {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(strategy, || async {
            match self.send_once(method.clone(), url, query, body).await {
                Attempt::Done(result) => Ok(result),
                Attempt::Transient(e) => {
                    tracing::debug!(url = %url, error = %e, "Transient Airtable error - will retry");
                    Err(e)
                }
            }
        })
        .await?
    }

    async fn read_record(resp: reqwest::Response, table: &str, key: &str) -> StoreResult<Record> {
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(table, key));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Upstream(format!("airtable {}: {}", status, body)));
        }
        let record: AirtableRecord = resp.json().await?;
        Ok(record.into())
    }

    async fn list_page(
        &self,
        table: &str,
        mut query: Vec<(String, String)>,
        offset: Option<String>,
    ) -> StoreResult<AirtableList> {
        if let Some(offset) = offset {
            query.push(("offset".to_string(), offset));
        }
        let resp = self
            .send(Method::GET, &self.table_url(table), &query, None)
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Upstream(format!("airtable {}: {}", status, body)));
        }
        Ok(resp.json().await?)
    }

    /// Every page of a (filtered) listing, newest first
    async fn collect(
        &self,
        table: &str,
        formula: Option<&Formula>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset = None;
        loop {
            let mut query = vec![("pageSize".to_string(), PAGE_SIZE.to_string())];
            if let Some(formula) = formula {
                query.push(("filterByFormula".to_string(), formula.to_string()));
            }
            let page = self.list_page(table, query, offset).await?;
            records.extend(page.records.into_iter().map(Record::from));
            offset = page.offset;
            if offset.is_none() {
                break;
            }
        }

        records.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Record> {
        let url = format!("{}/{}", self.table_url(table), key);
        let resp = self.send(Method::GET, &url, &[], None).await?;
        Self::read_record(resp, table, key).await
    }

    async fn update(&self, table: &str, key: &str, fields: Fields) -> StoreResult<Record> {
        let url = format!("{}/{}", self.table_url(table), key);
        let body = serde_json::json!({ "fields": fields });
        let resp = self.send(Method::PATCH, &url, &[], Some(&body)).await?;
        Self::read_record(resp, table, key).await
    }

    async fn create(&self, table: &str, fields: Fields) -> StoreResult<Record> {
        let body = serde_json::json!({ "fields": fields, "typecast": true });
        let resp = self
            .send(Method::POST, &self.table_url(table), &[], Some(&body))
            .await?;
        Self::read_record(resp, table, "(new)").await
    }

    async fn first(&self, table: &str, formula: &Formula) -> StoreResult<Option<Record>> {
        let query = vec![
            ("filterByFormula".to_string(), formula.to_string()),
            ("maxRecords".to_string(), "1".to_string()),
        ];
        let page = self.list_page(table, query, None).await?;
        Ok(page.records.into_iter().next().map(Record::from))
    }

    async fn all(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Record>> {
        self.collect(table, None, limit).await
    }

    async fn select(
        &self,
        table: &str,
        formula: &Formula,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        self.collect(table, Some(formula), limit).await
    }

    async fn compare_and_update(
        &self,
        table: &str,
        key: &str,
        guard_field: &str,
        expected: &serde_json::Value,
        fields: Fields,
    ) -> StoreResult<bool> {
        let current = self.get(table, key).await?;
        let actual = current
            .fields
            .get(guard_field)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if actual != *expected {
            return Ok(false);
        }
        self.update(table, key, fields).await?;
        Ok(true)
    }
}
