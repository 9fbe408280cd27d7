//! HTTP access to the permit server.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use fop_shared::cache::{CachedFeeRates, CachedPermits, PublicKeySet};
use fop_shared::sync::{SyncBatch, SyncResult};
use fop_shared::telemetry::TelemetryBatch;

use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};

/// Everything a field station needs from the server. Implemented over HTTP
/// by [`SyncClient`].
pub trait SyncTransport {
    fn fetch_public_keys(&self) -> impl Future<Output = Result<PublicKeySet>> + Send;

    fn fetch_permits(
        &self,
        operator_id: Option<&str>,
        max_results: Option<u32>,
    ) -> impl Future<Output = Result<CachedPermits>> + Send;

    fn fetch_fee_rates(&self) -> impl Future<Output = Result<CachedFeeRates>> + Send;

    fn push_batch(&self, batch: &SyncBatch) -> impl Future<Output = Result<SyncResult>> + Send;

    fn push_telemetry(&self, batch: &TelemetryBatch) -> impl Future<Output = Result<usize>> + Send;
}

#[derive(Debug, Clone)]
pub struct SyncClient {
    http: Client,
    base_url: String,
}

impl SyncClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fop-device/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Self::new(&config.server_url, config.request_timeout)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.endpoint(path);
        debug!(url = %url, "GET");
        let resp = self.http.get(&url).query(query).send().await?;
        decode(resp).await
    }
}

/// Turn a non-2xx answer into [`DeviceError::Server`], carrying the
/// server's `{"error": …}` message when present.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);
    Err(DeviceError::Server {
        status: status.as_u16(),
        message,
    })
}

impl SyncTransport for SyncClient {
    async fn fetch_public_keys(&self) -> Result<PublicKeySet> {
        self.get_json("/public-key", &[]).await
    }

    async fn fetch_permits(
        &self,
        operator_id: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<CachedPermits> {
        let mut query = Vec::new();
        if let Some(op) = operator_id {
            query.push(("operatorId", op.to_string()));
        }
        if let Some(n) = max_results {
            query.push(("maxResults", n.to_string()));
        }
        self.get_json("/cache/permits", &query).await
    }

    async fn fetch_fee_rates(&self) -> Result<CachedFeeRates> {
        self.get_json("/cache/fee-rates", &[]).await
    }

    async fn push_batch(&self, batch: &SyncBatch) -> Result<SyncResult> {
        let url = self.endpoint("/sync");
        debug!(url = %url, records = batch.records.len(), "POST sync batch");
        let resp = self.http.post(&url).json(batch).send().await?;
        decode(resp).await
    }

    async fn push_telemetry(&self, batch: &TelemetryBatch) -> Result<usize> {
        #[derive(serde::Deserialize)]
        struct Accepted {
            accepted: usize,
        }

        let resp = self
            .http
            .post(self.endpoint("/telemetry"))
            .json(batch)
            .send()
            .await?;
        let accepted: Accepted = decode(resp).await?;
        Ok(accepted.accepted)
    }
}
