//! Configuration management for ChainPulse
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::decision::DecisionConfig;
use crate::indicators::IndicatorConfig;
use crate::oracle::OracleDefaults;
use crate::paper_trading::PaperTradingConfig;
use crate::strategy::{FactorWeights, RuleStrategyConfig};
use crate::tracker::TrackerConfig;
use crate::types::Instrument;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub session: SessionConfig,
    pub scheduler: SchedulerConfig,
    pub indicators: IndicatorsConfig,
    pub strategy: StrategyConfig,
    pub decision: DecisionSection,
    pub paper_trading: PaperTradingCfg,
    pub tracker: TrackerSection,
    pub persistence: PersistenceConfig,
    pub oracle: OracleConfig,
    pub market_data: MarketDataConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.instruments", vec!["NIFTY", "BANKNIFTY", "SENSEX"])?
            // Session defaults (NSE/BSE, IST)
            .set_default("session.utc_offset_minutes", 330)?
            .set_default("session.open", "09:15")?
            .set_default("session.close", "15:30")?
            // Scheduler defaults
            .set_default("scheduler.analysis_interval_secs", 60)?
            .set_default("scheduler.mark_to_market_interval_secs", 2)?
            .set_default("scheduler.flush_interval_secs", 30)?
            .set_default("scheduler.hourly_summary", true)?
            // Indicator defaults
            .set_default("indicators.sr_range_limit", 500.0)?
            .set_default("indicators.top_n", 3)?
            // Rule strategy defaults
            .set_default("strategy.pcr_bullish_threshold", 0.7)?
            .set_default("strategy.pcr_bearish_threshold", 1.3)?
            .set_default("strategy.oi_change_significant", 5.0)?
            .set_default("strategy.vwap_deviation_pct", 0.5)?
            .set_default("strategy.atm_window_strikes", 5)?
            .set_default("strategy.min_oi", 10_000)?
            .set_default("strategy.level_proximity_points", 100.0)?
            .set_default("strategy.min_factors", 2)?
            .set_default("strategy.weights.pcr", 0.20)?
            .set_default("strategy.weights.oi_build", 0.25)?
            .set_default("strategy.weights.oi_unwind", 0.20)?
            .set_default("strategy.weights.vwap", 0.15)?
            .set_default("strategy.weights.level_proximity", 0.20)?
            // Decision defaults
            .set_default("decision.oracle_min_confidence", 55.0)?
            .set_default("decision.rule_min_confidence", 40.0)?
            .set_default("decision.flip_flop_window_secs", 300)?
            .set_default("decision.repeat_cooldown_secs", 600)?
            .set_default("decision.dedup_capacity", 100)?
            .set_default("decision.max_rule_candidates_per_cycle", 1)?
            // Paper trading defaults
            .set_default("paper_trading.lot_multiplier", 10)?
            .set_default("paper_trading.default_entry_premium", 100.0)?
            .set_default("paper_trading.default_target_points", 25.0)?
            .set_default("paper_trading.default_stop_loss_points", 12.0)?
            .set_default("paper_trading.delta", 0.5)?
            // Performance tracker defaults
            .set_default("tracker.rationale_limit", 200)?
            .set_default("tracker.max_records", 5000)?
            .set_default("tracker.lookback_days", 7)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // External collaborators
            .set_default("oracle.enabled", false)?
            .set_default("oracle.endpoint", "http://127.0.0.1:8700/analyze")?
            .set_default("oracle.timeout_ms", 20_000)?
            .set_default("market_data.endpoint", "http://127.0.0.1:8600")?
            .set_default("market_data.timeout_ms", 10_000)?
            .set_default("notifier.enabled", true)?
            .set_default("notifier.webhook_url", "")?
            .set_default("notifier.timeout_ms", 5_000)?
            .set_default("logging.json", false)?;
        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder_with_defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CHAINPULSE__*)
            .add_source(
                Environment::with_prefix("CHAINPULSE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bot.instruments"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder_with_defaults()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parsed instrument list. Unknown names are an error.
    pub fn instruments(&self) -> Result<Vec<Instrument>> {
        let mut out = Vec::new();
        for name in &self.bot.instruments {
            let Some(instrument) = Instrument::from_str(name) else {
                bail!("Unknown instrument '{}' in bot.instruments", name);
            };
            if !out.contains(&instrument) {
                out.push(instrument);
            }
        }
        Ok(out)
    }

    pub fn session_open(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.session.open, "%H:%M")
            .with_context(|| format!("Invalid session.open '{}'", self.session.open))
    }

    pub fn session_close(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.session.close, "%H:%M")
            .with_context(|| format!("Invalid session.close '{}'", self.session.close))
    }

    /// Checks that make startup impossible
    pub fn validate(&self) -> Result<()> {
        if self.instruments()?.is_empty() {
            bail!("No instruments enabled (bot.instruments is empty)");
        }
        if self.session_open()? >= self.session_close()? {
            bail!(
                "session.open ({}) must be before session.close ({})",
                self.session.open,
                self.session.close
            );
        }
        if self.scheduler.analysis_interval_secs == 0
            || self.scheduler.mark_to_market_interval_secs == 0
            || self.scheduler.flush_interval_secs == 0
        {
            bail!("Scheduler intervals must be positive");
        }
        if self.paper_trading.lot_multiplier == 0 {
            bail!("paper_trading.lot_multiplier must be positive");
        }
        if self.tracker.max_records == 0 {
            bail!("tracker.max_records must be positive");
        }
        if self.oracle.enabled && self.oracle.endpoint.trim().is_empty() {
            bail!("oracle.enabled requires oracle.endpoint");
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} instruments={:?} session={}-{} analysis={}s mtm={}s oracle={} min_conf(oracle/rule)={:.0}/{:.0} lots={}",
            self.bot.tag,
            self.bot.instruments,
            self.session.open,
            self.session.close,
            self.scheduler.analysis_interval_secs,
            self.scheduler.mark_to_market_interval_secs,
            if self.oracle.enabled { "on" } else { "off" },
            self.decision.oracle_min_confidence,
            self.decision.rule_min_confidence,
            self.paper_trading.lot_multiplier
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

// ─────────────────────────────────────────────────────────────────
// Component configs
// ─────────────────────────────────────────────────────────────────

impl From<&AppConfig> for IndicatorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            sr_range_limit: cfg.indicators.sr_range_limit,
            top_n: cfg.indicators.top_n,
        }
    }
}

impl From<&AppConfig> for RuleStrategyConfig {
    fn from(cfg: &AppConfig) -> Self {
        let s = &cfg.strategy;
        Self {
            pcr_bullish_threshold: s.pcr_bullish_threshold,
            pcr_bearish_threshold: s.pcr_bearish_threshold,
            oi_change_significant: s.oi_change_significant,
            vwap_deviation_pct: s.vwap_deviation_pct,
            atm_window_strikes: s.atm_window_strikes,
            min_oi: s.min_oi,
            level_proximity_points: s.level_proximity_points,
            weights: FactorWeights {
                pcr: s.weights.pcr,
                oi_build: s.weights.oi_build,
                oi_unwind: s.weights.oi_unwind,
                vwap: s.weights.vwap,
                level_proximity: s.weights.level_proximity,
            },
            min_factors: s.min_factors,
            default_target_points: cfg.paper_trading.default_target_points,
            default_stop_loss_points: cfg.paper_trading.default_stop_loss_points,
        }
    }
}

impl From<&AppConfig> for DecisionConfig {
    fn from(cfg: &AppConfig) -> Self {
        let d = &cfg.decision;
        Self {
            oracle_min_confidence: d.oracle_min_confidence,
            rule_min_confidence: d.rule_min_confidence,
            flip_flop_window_ms: d.flip_flop_window_secs as i64 * 1000,
            repeat_cooldown_ms: d.repeat_cooldown_secs as i64 * 1000,
            dedup_capacity: d.dedup_capacity,
            max_rule_candidates_per_cycle: d.max_rule_candidates_per_cycle,
        }
    }
}

impl From<&AppConfig> for PaperTradingConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            lot_multiplier: cfg.paper_trading.lot_multiplier,
            default_entry_premium: cfg.paper_trading.default_entry_premium,
            delta: cfg.paper_trading.delta,
            utc_offset_minutes: cfg.session.utc_offset_minutes,
            ..Default::default()
        }
    }
}

impl From<&AppConfig> for TrackerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            rationale_limit: cfg.tracker.rationale_limit,
            max_records: cfg.tracker.max_records,
            default_lookback_days: cfg.tracker.lookback_days,
        }
    }
}

impl From<&AppConfig> for OracleDefaults {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            target_points: cfg.paper_trading.default_target_points,
            stop_loss_points: cfg.paper_trading.default_stop_loss_points,
        }
    }
}
