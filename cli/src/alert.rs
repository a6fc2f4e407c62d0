//! Alert delivery beyond the log banner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use vaultindex_core::error::IndexerError;
use vaultindex_core::projector::{Alert, AlertSink};

/// POSTs each alert as JSON to a fixed URL.
pub struct WebhookAlertSink {
    url: String,
    http: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    fn payload(alert: &Alert) -> Value {
        json!({
            "event": "ProtocolInitiated",
            "owner": alert.owner,
            "chain_timestamp": alert.chain_timestamp,
            "observed_at": alert.observed_at,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), IndexerError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&Self::payload(alert))
            .send()
            .await
            .map_err(|e| IndexerError::Alert(format!("webhook: {e}")))?;
        if !resp.status().is_success() {
            return Err(IndexerError::Alert(format!("webhook returned HTTP {}", resp.status())));
        }
        tracing::debug!(owner = %alert.owner, "alert delivered to webhook");
        Ok(())
    }
}

/// Notifies every sink in order. All sinks are tried; the first error is returned.
pub struct AlertFanout {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertFanout {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for AlertFanout {
    async fn notify(&self, alert: &Alert) -> Result<(), IndexerError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(alert).await {
                tracing::error!(owner = %alert.owner, error = %e, "alert sink failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
