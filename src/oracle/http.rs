//! HTTP oracle client: POSTs an `OracleRequest` and reads back a `RawOracleResponse`

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::{OracleRequest, RawOracleResponse, SignalOracle};
use crate::error::{FeedError, FeedResult};

#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpOracle {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout_ms,
        })
    }
}

#[async_trait]
impl SignalOracle for HttpOracle {
    fn name(&self) -> &'static str {
        "http-oracle"
    }

    async fn analyze(&self, request: &OracleRequest) -> FeedResult<RawOracleResponse> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| FeedError::from_http(e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Oracle API error");
            return Err(FeedError::Unavailable(format!("oracle returned {}", status)));
        }

        let raw: RawOracleResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))?;

        tracing::info!(
            instrument = %request.indicators.instrument,
            signal = ?raw.signal,
            confidence = ?raw.confidence,
            "🤖 Oracle analysis received"
        );
        Ok(raw)
    }
}
