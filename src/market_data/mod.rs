//! Market data provider boundary
//!
//! The provider hands back one option-chain snapshot per instrument plus a
//! cheap spot quote for the mark-to-market loop. Any error or empty result
//! means the instrument is skipped for that cycle. Context for the oracle
//! (volatility index, sentiment, news, chart patterns) is best effort.

mod http;

pub use http::HttpMarketData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};
use crate::types::{Instrument, MarketSnapshot};

/// Free-text market context, passed through to the oracle as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Global cues, e.g. US and Asian session moves
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub news: Option<String>,
    /// Candlestick and chart patterns on the intraday candles
    #[serde(default)]
    pub pattern_summary: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Option chain, spot, intraday candles and expiry
    async fn fetch_snapshot(&self, instrument: Instrument) -> FeedResult<MarketSnapshot>;

    /// Latest spot price of the underlying
    async fn fetch_spot(&self, instrument: Instrument) -> FeedResult<f64>;

    /// Volatility index level (e.g. India VIX), if the provider has one
    async fn fetch_volatility_index(&self) -> FeedResult<Option<f64>>;

    /// Sentiment, news and pattern text for one instrument
    async fn fetch_context(&self, instrument: Instrument) -> FeedResult<MarketContext>;
}

/// Reject snapshots the indicator engine cannot use
pub fn validate_snapshot(snapshot: &MarketSnapshot) -> FeedResult<()> {
    if snapshot.strikes.is_empty() {
        return Err(FeedError::EmptySnapshot);
    }
    if !snapshot.spot.is_finite() || snapshot.spot <= 0.0 {
        return Err(FeedError::Malformed(format!(
            "{} spot price {}",
            snapshot.instrument, snapshot.spot
        )));
    }
    Ok(())
}
