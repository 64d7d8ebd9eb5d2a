//! Core types used throughout ChainPulse
//!
//! Defines instruments, option-chain snapshots, candles and signal payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported index instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Instrument {
    Nifty,
    BankNifty,
    Sensex,
    FinNifty,
    MidcpNifty,
}

impl Default for Instrument {
    fn default() -> Self {
        Instrument::Nifty
    }
}

impl Instrument {
    pub const ALL: [Instrument; 5] = [
        Instrument::Nifty,
        Instrument::BankNifty,
        Instrument::Sensex,
        Instrument::FinNifty,
        Instrument::MidcpNifty,
    ];

    /// Human readable name for alerts
    pub fn display_name(&self) -> &'static str {
        match self {
            Instrument::Nifty => "NIFTY 50",
            Instrument::BankNifty => "Bank NIFTY",
            Instrument::Sensex => "BSE SENSEX",
            Instrument::FinNifty => "Fin NIFTY",
            Instrument::MidcpNifty => "Midcap NIFTY",
        }
    }

    /// Distance between listed strikes
    pub fn strike_step(&self) -> i64 {
        match self {
            Instrument::Nifty => 50,
            Instrument::BankNifty => 100,
            Instrument::Sensex => 100,
            Instrument::FinNifty => 50,
            Instrument::MidcpNifty => 25,
        }
    }

    /// Exchange lot size for one contract
    pub fn base_lot_size(&self) -> u32 {
        match self {
            Instrument::Nifty => 65,
            Instrument::BankNifty => 30,
            Instrument::Sensex => 10,
            Instrument::FinNifty => 60,
            Instrument::MidcpNifty => 120,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '_', '-'], "").as_str() {
            "NIFTY" | "NIFTY50" => Some(Instrument::Nifty),
            "BANKNIFTY" => Some(Instrument::BankNifty),
            "SENSEX" | "BSESENSEX" => Some(Instrument::Sensex),
            "FINNIFTY" => Some(Instrument::FinNifty),
            "MIDCPNIFTY" | "MIDCAPNIFTY" => Some(Instrument::MidcpNifty),
            _ => None,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Nifty => write!(f, "NIFTY"),
            Instrument::BankNifty => write!(f, "BANKNIFTY"),
            Instrument::Sensex => write!(f, "SENSEX"),
            Instrument::FinNifty => write!(f, "FINNIFTY"),
            Instrument::MidcpNifty => write!(f, "MIDCPNIFTY"),
        }
    }
}

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
    Neutral,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Neutral
    }
}

impl Direction {
    /// The other tradable side. NEUTRAL has none.
    pub fn opposite(&self) -> Option<Direction> {
        match self {
            Direction::Call => Some(Direction::Put),
            Direction::Put => Some(Direction::Call),
            Direction::Neutral => None,
        }
    }

    pub fn is_tradable(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CALL" | "CE" | "BUY_CALL" => Some(Direction::Call),
            "PUT" | "PE" | "BUY_PUT" => Some(Direction::Put),
            "NEUTRAL" | "NONE" | "HOLD" => Some(Direction::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Call => write!(f, "CALL"),
            Direction::Put => write!(f, "PUT"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Intended holding horizon of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeHorizon {
    Scalp,
    Intraday,
    Swing,
}

impl Default for TradeHorizon {
    fn default() -> Self {
        TradeHorizon::Scalp
    }
}

impl TradeHorizon {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SCALP" => Some(TradeHorizon::Scalp),
            "INTRADAY" => Some(TradeHorizon::Intraday),
            "SWING" | "POSITIONAL" => Some(TradeHorizon::Swing),
            _ => None,
        }
    }
}

impl fmt::Display for TradeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeHorizon::Scalp => write!(f, "SCALP"),
            TradeHorizon::Intraday => write!(f, "INTRADAY"),
            TradeHorizon::Swing => write!(f, "SWING"),
        }
    }
}

/// Where a candidate signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    RuleEngine,
    Oracle,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::RuleEngine => write!(f, "rule-engine"),
            SignalSource::Oracle => write!(f, "oracle"),
        }
    }
}

/// Option data for a single strike
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrikeSnapshot {
    pub strike: i64,
    pub call_oi: u64,
    pub put_oi: u64,
    pub call_volume: u64,
    pub put_volume: u64,
    pub call_ltp: f64,
    pub put_ltp: f64,
    #[serde(default)]
    pub call_iv: Option<f64>,
    #[serde(default)]
    pub put_iv: Option<f64>,
    /// % change of call OI vs the prior snapshot of this strike
    #[serde(default)]
    pub call_oi_change_pct: f64,
    /// % change of put OI vs the prior snapshot of this strike
    #[serde(default)]
    pub put_oi_change_pct: f64,
}

impl StrikeSnapshot {
    /// Last traded premium of the given leg, if the leg traded at all
    pub fn premium(&self, direction: Direction) -> Option<f64> {
        let ltp = match direction {
            Direction::Call => self.call_ltp,
            Direction::Put => self.put_ltp,
            Direction::Neutral => return None,
        };
        (ltp > 0.0).then_some(ltp)
    }
}

/// OHLCV candle of the underlying
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Everything the market data provider returns for one instrument
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: Instrument,
    pub spot: f64,
    pub strikes: Vec<StrikeSnapshot>,
    #[serde(default)]
    pub candles: Vec<Candle>,
    /// Expiry date as reported by the provider (e.g. 2026-10-22)
    #[serde(default)]
    pub expiry: String,
    /// Provider timestamp in milliseconds
    #[serde(default)]
    pub ts: i64,
}

/// A directional proposal from the rule engine or the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub instrument: Instrument,
    pub direction: Direction,
    /// Confidence on a 0-100 scale
    pub confidence: f64,
    pub strike: i64,
    pub target_points: f64,
    pub stop_loss_points: f64,
    pub horizon: TradeHorizon,
    pub rationale: String,
    pub source: SignalSource,
}

/// Identity used for repeat-alert deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub instrument: Instrument,
    pub direction: Direction,
    pub strike: i64,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.instrument, self.direction, self.strike)
    }
}

impl CandidateSignal {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            instrument: self.instrument,
            direction: self.direction,
            strike: self.strike,
        }
    }
}

/// A candidate that passed the decision coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedSignal {
    pub candidate: CandidateSignal,
    /// Acceptance time in milliseconds
    pub accepted_at: i64,
    pub key: DedupKey,
    /// False when the repeat-alert cooldown suppressed the outward alert
    pub notify: bool,
}
