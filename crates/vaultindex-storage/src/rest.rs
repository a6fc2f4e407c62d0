//! PostgREST-style HTTP projection store (e.g. a Supabase project).
//!
//! | Operation | Request                                                                    |
//! |-----------|----------------------------------------------------------------------------|
//! | upsert    | `POST /rest/v1/{table}?on_conflict=owner_wallet`, `Prefer: resolution=merge-duplicates` |
//! | update    | `PATCH /rest/v1/{table}?owner_wallet=eq.{key}`, `Prefer: return=representation` |
//! | get       | `GET /rest/v1/{table}?owner_wallet=eq.{key}&select=*&limit=1`              |
//!
//! Every request carries the service key both as `apikey` and as a bearer token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;

use vaultindex_core::error::IndexerError;
use vaultindex_core::projector::ProjectionStore;
use vaultindex_core::records::{Row, Table, KEY_COLUMN};
use vaultindex_core::types::Address;

/// Projection store backed by a PostgREST endpoint.
pub struct RestStore {
    base_url: String,
    api_key: String,
    table_names: HashMap<Table, String>,
    http: reqwest::Client,
}

impl RestStore {
    /// Create a store for the project at `base_url` (without `/rest/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table_names: HashMap::new(),
            http,
        })
    }

    /// Map `table` to a differently named remote table.
    pub fn with_table_name(mut self, table: Table, name: impl Into<String>) -> Self {
        self.table_names.insert(table, name.into());
        self
    }

    /// Remote name of `table`.
    pub fn table_name(&self, table: Table) -> &str {
        self.table_names
            .get(&table)
            .map(String::as_str)
            .unwrap_or_else(|| table.name())
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table_name(table));
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn key_filter(key: &Address) -> [(&'static str, String); 1] {
        [(KEY_COLUMN, format!("eq.{key}"))]
    }

    fn upsert_request(&self, table: Table, key: &Address, row: Row) -> RequestBuilder {
        let mut row = row;
        row.insert(KEY_COLUMN.into(), key.as_str().into());
        self.request(Method::POST, table)
            .query(&[("on_conflict", KEY_COLUMN)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[Value::Object(row)])
    }

    fn update_request(&self, table: Table, key: &Address, patch: Row) -> RequestBuilder {
        self.request(Method::PATCH, table)
            .query(&Self::key_filter(key))
            .header("Prefer", "return=representation")
            .json(&Value::Object(patch))
    }

    fn get_request(&self, table: Table, key: &Address) -> RequestBuilder {
        self.request(Method::GET, table)
            .query(&Self::key_filter(key))
            .query(&[("select", "*"), ("limit", "1")])
    }

    async fn send(&self, req: RequestBuilder, table: Table, key: &Address) -> Result<Response, IndexerError> {
        let resp = req
            .send()
            .await
            .map_err(|e| IndexerError::Connectivity(format!("projection store: {e}")))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(IndexerError::ProjectionWrite {
            table: self.table_name(table).to_string(),
            owner: key.to_string(),
            reason: format!("HTTP {status}: {body}"),
        })
    }
}

#[async_trait]
impl ProjectionStore for RestStore {
    async fn upsert(&self, table: Table, key: &Address, row: Row) -> Result<(), IndexerError> {
        self.send(self.upsert_request(table, key, row), table, key).await?;
        tracing::debug!(table = self.table_name(table), %key, "row upserted");
        Ok(())
    }

    async fn update(&self, table: Table, key: &Address, patch: Row) -> Result<u64, IndexerError> {
        let resp = self.send(self.update_request(table, key, patch), table, key).await?;
        let rows: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| IndexerError::Storage(format!("update response: {e}")))?;
        tracing::debug!(table = self.table_name(table), %key, matched = rows.len(), "row updated");
        Ok(rows.len() as u64)
    }

    async fn get(&self, table: Table, key: &Address) -> Result<Option<Row>, IndexerError> {
        let resp = self
            .send(self.get_request(table, key), table, key)
            .await
            .map_err(|e| match e {
                IndexerError::ProjectionWrite { reason, .. } => IndexerError::Storage(reason),
                other => other,
            })?;
        let rows: Vec<Row> = resp
            .json()
            .await
            .map_err(|e| IndexerError::Storage(format!("select response: {e}")))?;
        Ok(rows.into_iter().next())
    }
}
