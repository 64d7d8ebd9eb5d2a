//! JSON-over-HTTP market data client
//!
//! Expects a gateway exposing:
//! - `GET {base}/snapshot/{INSTRUMENT}` -> `MarketSnapshot`
//! - `GET {base}/spot/{INSTRUMENT}` -> `{"spot": f64}`
//! - `GET {base}/volatility-index` -> `{"value": f64}`
//! - `GET {base}/context/{INSTRUMENT}` -> `MarketContext`

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{validate_snapshot, MarketContext, MarketDataProvider};
use crate::error::{FeedError, FeedResult};
use crate::types::{Instrument, MarketSnapshot};

#[derive(Debug, Deserialize)]
struct SpotResponse {
    spot: f64,
}

#[derive(Debug, Deserialize)]
struct ValueResponse {
    value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpMarketData {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpMarketData {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> FeedResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::from_http(e, self.timeout_ms))?;

        if !response.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    fn name(&self) -> &'static str {
        "http-gateway"
    }

    async fn fetch_snapshot(&self, instrument: Instrument) -> FeedResult<MarketSnapshot> {
        let mut snapshot: MarketSnapshot = self.get_json(&format!("snapshot/{}", instrument)).await?;
        snapshot.instrument = instrument;
        if snapshot.ts == 0 {
            snapshot.ts = chrono::Utc::now().timestamp_millis();
        }
        validate_snapshot(&snapshot)?;

        tracing::debug!(
            instrument = %instrument,
            strikes = snapshot.strikes.len(),
            candles = snapshot.candles.len(),
            spot = snapshot.spot,
            "📥 Snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn fetch_spot(&self, instrument: Instrument) -> FeedResult<f64> {
        let quote: SpotResponse = self.get_json(&format!("spot/{}", instrument)).await?;
        if !quote.spot.is_finite() || quote.spot <= 0.0 {
            return Err(FeedError::Malformed(format!("spot {}", quote.spot)));
        }
        Ok(quote.spot)
    }

    async fn fetch_volatility_index(&self) -> FeedResult<Option<f64>> {
        let v: ValueResponse = self.get_json("volatility-index").await?;
        Ok(v.value)
    }

    async fn fetch_context(&self, instrument: Instrument) -> FeedResult<MarketContext> {
        self.get_json(&format!("context/{}", instrument)).await
    }
}
