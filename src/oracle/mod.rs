//! Oracle module - external signal oracle boundary
//!
//! The oracle receives the indicator set plus macro context and answers with a
//! loosely-shaped JSON verdict. Everything it returns is validated here into a
//! `CandidateSignal` or an explicit failure; failures send the cycle to the
//! rule engine.

mod http;

pub use http::HttpOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FeedResult;
use crate::indicators::MarketIndicatorSet;
use crate::types::{CandidateSignal, Direction, SignalSource, TradeHorizon};

pub const UNAVAILABLE_RATIONALE: &str = "unavailable";
/// Leading text of an oracle answer that carries no analysis
const UNAVAILABLE_PREFIX: &str = "analysis unavailable";

/// Context the oracle gets beyond the option chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroContext {
    pub volatility_index: Option<f64>,
    pub sentiment: Option<String>,
    pub news: Option<String>,
    /// Recent performance summary so the oracle can learn from outcomes
    pub learnings: Option<String>,
    /// Opaque candlestick/chart pattern text
    pub pattern_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub indicators: MarketIndicatorSet,
    pub market_bias: String,
    pub expiry: String,
    pub context: MacroContext,
}

/// Oracle answer as received. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOracleResponse {
    #[serde(default, alias = "direction")]
    pub signal: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "rationale")]
    pub reasoning: Option<String>,
    #[serde(default, alias = "strike")]
    pub entry_strike: Option<i64>,
    #[serde(default)]
    pub target_points: Option<f64>,
    #[serde(default)]
    pub stop_loss_points: Option<f64>,
    #[serde(default, alias = "horizon")]
    pub trade_horizon: Option<String>,
    #[serde(default)]
    pub market_bias: Option<String>,
    #[serde(default)]
    pub factors_aligned: Option<u32>,
    /// Set by the oracle when it could not produce an analysis
    #[serde(default)]
    pub error: Option<String>,
}

impl RawOracleResponse {
    /// What an unreachable oracle is equivalent to
    pub fn unavailable(reason: &str) -> Self {
        Self {
            signal: Some(Direction::Neutral.to_string()),
            confidence: Some(0.0),
            reasoning: Some(format!("analysis {}: {}", UNAVAILABLE_RATIONALE, reason)),
            error: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Fallbacks applied when the oracle omits trade parameters
#[derive(Debug, Clone, Copy)]
pub struct OracleDefaults {
    pub target_points: f64,
    pub stop_loss_points: f64,
}

impl Default for OracleDefaults {
    fn default() -> Self {
        Self {
            target_points: 25.0,
            stop_loss_points: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleVerdict {
    Signal(CandidateSignal),
    /// The oracle answered but the answer means "no analysis"
    Failure(String),
}

impl OracleVerdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, OracleVerdict::Failure(_))
    }
}

/// True for the placeholder rationale or one opening with "(AI) analysis unavailable".
/// A rationale that merely mentions the word is a real answer.
fn is_unavailable_rationale(rationale: &str) -> bool {
    let text = rationale.trim().to_lowercase();
    let text = text.strip_prefix("ai ").unwrap_or(&text);
    text == UNAVAILABLE_RATIONALE || text.starts_with(UNAVAILABLE_PREFIX)
}

/// Fill defaults and classify the response.
///
/// Missing direction becomes NEUTRAL, missing confidence 0, missing rationale
/// "unavailable". An error marker, zero confidence or the unavailability
/// sentinel is a failure. A valid NEUTRAL answer is still a signal; the coordinator drops it.
pub fn validate_response(
    raw: RawOracleResponse,
    set: &MarketIndicatorSet,
    defaults: &OracleDefaults,
) -> OracleVerdict {
    if let Some(err) = raw.error.as_deref().filter(|e| !e.trim().is_empty()) {
        return OracleVerdict::Failure(format!("oracle error: {}", err));
    }

    let direction = raw
        .signal
        .as_deref()
        .and_then(Direction::from_str)
        .unwrap_or(Direction::Neutral);
    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let rationale = raw
        .reasoning
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| UNAVAILABLE_RATIONALE.to_string());

    if confidence <= 0.0 {
        return OracleVerdict::Failure("oracle confidence is zero".to_string());
    }
    if is_unavailable_rationale(&rationale) {
        return OracleVerdict::Failure(format!("oracle unavailable: {}", rationale));
    }

    let strike = raw
        .entry_strike
        .filter(|s| *s > 0)
        .unwrap_or(set.atm_strike);
    let target_points = raw
        .target_points
        .filter(|t| *t > 0.0)
        .unwrap_or(defaults.target_points);
    let stop_loss_points = raw
        .stop_loss_points
        .filter(|s| *s > 0.0)
        .unwrap_or(defaults.stop_loss_points);
    let horizon = raw
        .trade_horizon
        .as_deref()
        .and_then(TradeHorizon::from_str)
        .unwrap_or_default();

    OracleVerdict::Signal(CandidateSignal {
        instrument: set.instrument,
        direction,
        confidence,
        strike,
        target_points,
        stop_loss_points,
        horizon,
        rationale,
        source: SignalSource::Oracle,
    })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalOracle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, request: &OracleRequest) -> FeedResult<RawOracleResponse>;
}
