//! Configuration sections

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging and CSV
    pub tag: String,
    /// Index instruments to analyze (NIFTY, BANKNIFTY, SENSEX, FINNIFTY, MIDCPNIFTY)
    pub instruments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
    /// Session open, local "HH:MM"
    pub open: String,
    /// Session close, local "HH:MM"
    pub close: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub analysis_interval_secs: u64,
    pub mark_to_market_interval_secs: u64,
    pub flush_interval_secs: u64,
    /// Send a performance summary at the top of each session hour
    pub hourly_summary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorsConfig {
    /// Support/resistance only considers strikes within this many points of spot
    pub sr_range_limit: f64,
    pub top_n: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactorWeightsConfig {
    pub pcr: f64,
    pub oi_build: f64,
    pub oi_unwind: f64,
    pub vwap: f64,
    pub level_proximity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub pcr_bullish_threshold: f64,
    pub pcr_bearish_threshold: f64,
    /// OI change (%) treated as significant
    pub oi_change_significant: f64,
    /// Spot-vs-VWAP deviation (%)
    pub vwap_deviation_pct: f64,
    /// Strikes on each side of ATM
    pub atm_window_strikes: i64,
    pub min_oi: u64,
    pub level_proximity_points: f64,
    pub min_factors: usize,
    pub weights: FactorWeightsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionSection {
    pub oracle_min_confidence: f64,
    pub rule_min_confidence: f64,
    pub flip_flop_window_secs: u64,
    pub repeat_cooldown_secs: u64,
    pub dedup_capacity: usize,
    pub max_rule_candidates_per_cycle: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperTradingCfg {
    pub lot_multiplier: u32,
    /// Used when the chain has no traded premium at the strike
    pub default_entry_premium: f64,
    pub default_target_points: f64,
    pub default_stop_loss_points: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    pub rationale_limit: usize,
    /// In-memory history cap; the CSV log keeps everything
    pub max_records: usize,
    /// Window for summaries and oracle learnings, 0 = all history
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Bearer token; usually supplied as CHAINPULSE__ORACLE__API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// Empty means alerts go to the log only
    #[serde(default)]
    pub webhook_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// JSON log lines instead of the pretty formatter
    pub json: bool,
}
