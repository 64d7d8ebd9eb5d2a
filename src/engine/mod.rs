//! Signal engine
//!
//! Wires the analytic services to the external collaborators and runs the
//! periodic schedulers:
//! - `analysis-cycle`: snapshot → indicators → oracle or rule engine →
//!   decision coordinator → ledger + tracker + notifier, per instrument
//! - `mark-to-market-cycle`: spot quotes → ledger revaluation and exits
//! - `state-flush`: JSON state and CSV logs
//!
//! All three share one `CancellationToken`. A cancelled engine lets the
//! running cycle finish, then flushes once more.

pub mod alerts;
pub mod session;

pub use alerts::format_signal_alert;
pub use session::SessionWindow;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::decision::{DecisionConfig, Rejection, SignalDecisionCoordinator};
use crate::error::with_timeout;
use crate::indicators::{market_bias, IndicatorConfig, IndicatorEngine, MarketIndicatorSet, OiChangeCache};
use crate::market_data::{validate_snapshot, MarketContext, MarketDataProvider};
use crate::notifier::Notifier;
use crate::oracle::{validate_response, MacroContext, OracleDefaults, OracleRequest, OracleVerdict, SignalOracle};
use crate::paper_trading::{PaperTradingConfig, TradeCloseCallback, VirtualTrade, VirtualTradeLedger};
use crate::persistence::{CsvPersistence, DecisionRecord};
use crate::strategy::{RuleStrategyConfig, RuleStrategyEngine};
use crate::tracker::{SignalPerformanceTracker, TrackerConfig};
use crate::types::{AcceptedSignal, CandidateSignal, Instrument, MarketSnapshot, SignalSource};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub market_data: Arc<dyn MarketDataProvider>,
    /// `None` runs the rule engine only
    pub oracle: Option<Arc<dyn SignalOracle>>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub instruments: Vec<Instrument>,
    pub analysis_interval: Duration,
    pub mark_to_market_interval: Duration,
    pub flush_interval: Duration,
    pub hourly_summary: bool,
    pub market_data_timeout_ms: u64,
    pub oracle_timeout_ms: u64,
    pub notifier_timeout_ms: u64,
    pub oracle_defaults: OracleDefaults,
    pub max_rule_candidates: usize,
    pub data_dir: PathBuf,
    pub csv_enabled: bool,
}

impl EngineConfig {
    pub fn from_app(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            instruments: cfg.instruments()?,
            analysis_interval: Duration::from_secs(cfg.scheduler.analysis_interval_secs),
            mark_to_market_interval: Duration::from_secs(cfg.scheduler.mark_to_market_interval_secs),
            flush_interval: Duration::from_secs(cfg.scheduler.flush_interval_secs),
            hourly_summary: cfg.scheduler.hourly_summary,
            market_data_timeout_ms: cfg.market_data.timeout_ms,
            oracle_timeout_ms: cfg.oracle.timeout_ms,
            notifier_timeout_ms: cfg.notifier.timeout_ms,
            oracle_defaults: OracleDefaults::from(cfg),
            max_rule_candidates: cfg.decision.max_rule_candidates_per_cycle,
            data_dir: PathBuf::from(&cfg.persistence.data_dir),
            csv_enabled: cfg.persistence.csv_enabled,
        })
    }
}

/// What happened to one instrument in one analysis cycle
#[derive(Debug, Clone, Default)]
pub struct InstrumentReport {
    pub instrument: Instrument,
    /// Set when the instrument was skipped (data error)
    pub skipped: Option<String>,
    /// Source of the candidates that went to the coordinator
    pub source: Option<SignalSource>,
    /// Oracle failed or timed out and the rule engine stood in
    pub fell_back: bool,
    pub accepted: Vec<AcceptedSignal>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// False outside session hours
    pub ran: bool,
    pub rolled_over: bool,
    pub instruments: Vec<InstrumentReport>,
}

impl CycleReport {
    pub fn accepted(&self) -> impl Iterator<Item = &AcceptedSignal> {
        self.instruments.iter().flat_map(|r| r.accepted.iter())
    }
}

pub struct SignalEngine {
    config: EngineConfig,
    session: SessionWindow,
    collaborators: Collaborators,
    indicators: IndicatorEngine,
    strategy: RuleStrategyEngine,
    coordinator: Arc<SignalDecisionCoordinator>,
    ledger: Arc<VirtualTradeLedger>,
    tracker: Arc<SignalPerformanceTracker>,
    persistence: Option<Arc<CsvPersistence>>,
    session_date: Mutex<Option<NaiveDate>>,
    last_summary_hour: Mutex<Option<(NaiveDate, u32)>>,
    pending_decisions: Mutex<Vec<DecisionRecord>>,
}

impl SignalEngine {
    /// Build every service from configuration. State files live under `persistence.data_dir`.
    pub fn from_config(cfg: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        let config = EngineConfig::from_app(cfg)?;
        let session = SessionWindow::new(
            cfg.session.utc_offset_minutes,
            cfg.session_open()?,
            cfg.session_close()?,
        )?;
        let dir = config.data_dir.clone();

        let persistence = if config.csv_enabled {
            Some(Arc::new(
                CsvPersistence::new(&cfg.persistence.data_dir)?.with_utc_offset(session.offset()),
            ))
        } else {
            None
        };

        let oi_cache = Arc::new(OiChangeCache::new().with_state_file(dir.join("oi_cache.json")));
        let indicators = IndicatorEngine::new(IndicatorConfig::from(cfg), oi_cache);
        let strategy = RuleStrategyEngine::new(RuleStrategyConfig::from(cfg));
        let coordinator = Arc::new(
            SignalDecisionCoordinator::new(DecisionConfig::from(cfg))
                .with_state_file(dir.join("decision_state.json")),
        );

        let mut tracker = SignalPerformanceTracker::new(TrackerConfig::from(cfg))
            .with_state_file(dir.join("signal_history.json"));
        if let Some(ref p) = persistence {
            tracker = tracker.with_persistence(Arc::clone(p));
        }
        let tracker = Arc::new(tracker);

        let tracker_hook = Arc::clone(&tracker);
        let on_close: Arc<TradeCloseCallback> = Arc::new(Box::new(move |trade: &VirtualTrade| {
            tracker_hook.resolve_trade(trade);
        }));
        let mut ledger = VirtualTradeLedger::new(PaperTradingConfig::from(cfg))
            .with_state_file(dir.join("virtual_trades.json"))
            .with_close_callback(on_close);
        if let Some(ref p) = persistence {
            ledger = ledger.with_persistence(Arc::clone(p));
        }

        Ok(Self {
            config,
            session,
            collaborators,
            indicators,
            strategy,
            coordinator,
            ledger: Arc::new(ledger),
            tracker,
            persistence,
            session_date: Mutex::new(None),
            last_summary_hour: Mutex::new(None),
            pending_decisions: Mutex::new(Vec::new()),
        })
    }

    pub fn ledger(&self) -> &Arc<VirtualTradeLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<SignalPerformanceTracker> {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<SignalDecisionCoordinator> {
        &self.coordinator
    }

    pub fn oi_cache(&self) -> &Arc<OiChangeCache> {
        self.indicators.oi_cache()
    }

    pub fn session(&self) -> &SessionWindow {
        &self.session
    }

    /// Restore every service from its state file. Errors are logged, not fatal.
    pub fn load_state(&self) {
        if let Err(e) = self.oi_cache().load_state() {
            warn!(error = %e, "Failed to load OI cache, starting fresh");
        }
        if let Err(e) = self.coordinator.load_state() {
            warn!(error = %e, "Failed to load decision state, starting fresh");
        }
        if let Err(e) = self.ledger.load_state() {
            warn!(error = %e, "Failed to load virtual trades, starting fresh");
        }
        if let Err(e) = self.tracker.load_state() {
            warn!(error = %e, "Failed to load signal history, starting fresh");
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Analysis cycle
    // ─────────────────────────────────────────────────────────────────

    /// One pass over every instrument. Does nothing outside session hours.
    pub async fn run_analysis_cycle(&self, now_ms: i64) -> CycleReport {
        if !self.session.is_open(now_ms) {
            debug!("Outside session hours, analysis skipped");
            return CycleReport::default();
        }

        let rolled_over = self.handle_rollover(now_ms);

        let instruments = join_all(
            self.config
                .instruments
                .iter()
                .map(|&instrument| self.analyze_instrument(instrument, now_ms)),
        )
        .await;

        self.maybe_send_hourly_summary(now_ms).await;

        CycleReport {
            ran: true,
            rolled_over,
            instruments,
        }
    }

    /// New session date: reset OI baselines and expire signals from earlier sessions
    fn handle_rollover(&self, now_ms: i64) -> bool {
        let Some(today) = self.session.session_date(now_ms) else {
            return false;
        };

        {
            let mut current = self.session_date.lock().unwrap_or_else(PoisonError::into_inner);
            match *current {
                Some(date) if date == today => return false,
                Some(_) => self.oi_cache().reset_all(),
                None => {
                    // First cycle of this process: only a cache restored from another day is stale
                    let restored_day = self
                        .oi_cache()
                        .restored_at()
                        .and_then(|at| self.session.session_date(at));
                    if restored_day.is_some_and(|day| day != today) {
                        self.oi_cache().reset_all();
                    }
                }
            }
            *current = Some(today);
        }

        if let Some(start) = self.session.day_start_ms(today) {
            self.tracker.expire_open_before(start, now_ms);
        }
        info!(date = %today, "📅 Session date set");
        true
    }

    async fn analyze_instrument(&self, instrument: Instrument, now_ms: i64) -> InstrumentReport {
        let mut report = InstrumentReport {
            instrument,
            ..Default::default()
        };

        let provider = &self.collaborators.market_data;
        let fetched = with_timeout(
            self.config.market_data_timeout_ms,
            provider.fetch_snapshot(instrument),
        )
        .await
        .and_then(|snapshot| validate_snapshot(&snapshot).map(|_| snapshot));

        let mut snapshot = match fetched {
            Ok(s) => s,
            Err(e) => {
                warn!(instrument = %instrument, provider = provider.name(), error = %e, "⚠️ Snapshot unavailable, skipping instrument");
                report.skipped = Some(e.to_string());
                return report;
            }
        };
        snapshot.instrument = instrument;

        let set = self.indicators.compute(&mut snapshot);
        info!(
            instrument = %instrument,
            spot = set.spot,
            pcr = set.pcr.pcr_oi,
            vwap = set.vwap,
            support = set.levels.support,
            resistance = set.levels.resistance,
            max_pain = ?set.max_pain,
            "📊 Indicators ready"
        );

        let candidates = match self.oracle_candidates(&set, &snapshot, now_ms).await {
            Some(candidates) => {
                report.source = Some(SignalSource::Oracle);
                candidates
            }
            None => {
                report.fell_back = self.collaborators.oracle.is_some();
                report.source = Some(SignalSource::RuleEngine);
                self.strategy
                    .candidates(&set, &snapshot.strikes, self.config.max_rule_candidates)
            }
        };

        if candidates.is_empty() {
            info!(instrument = %instrument, "⏸️ No candidate this cycle");
        }

        for candidate in candidates {
            match self.coordinator.evaluate(candidate.clone(), now_ms) {
                Ok(accepted) => {
                    self.handle_accepted(&accepted, &set, &snapshot).await;
                    report.accepted.push(accepted);
                }
                Err(rejection) => {
                    self.pending_decisions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(rejection.to_record(&candidate, now_ms));
                    report.rejected.push(rejection);
                }
            }
        }

        report
    }

    /// Oracle candidates, or `None` when the oracle is off, failed or timed out
    async fn oracle_candidates(
        &self,
        set: &MarketIndicatorSet,
        snapshot: &MarketSnapshot,
        now_ms: i64,
    ) -> Option<Vec<CandidateSignal>> {
        let oracle = self.collaborators.oracle.as_ref()?;

        let market = &self.collaborators.market_data;
        let timeout_ms = self.config.market_data_timeout_ms;
        let (volatility_index, context) = tokio::join!(
            with_timeout(timeout_ms, market.fetch_volatility_index()),
            with_timeout(timeout_ms, market.fetch_context(set.instrument)),
        );
        let volatility_index = volatility_index.unwrap_or_else(|e| {
            debug!(error = %e, "Volatility index unavailable");
            None
        });
        let context = context.unwrap_or_else(|e| {
            debug!(instrument = %set.instrument, error = %e, "Market context unavailable");
            MarketContext::default()
        });

        let strategy = self.strategy.config();
        let request = OracleRequest {
            indicators: set.clone(),
            market_bias: market_bias(
                set.pcr.pcr_oi,
                set.spot,
                set.vwap,
                strategy.pcr_bullish_threshold,
                strategy.pcr_bearish_threshold,
            ),
            expiry: snapshot.expiry.clone(),
            context: MacroContext {
                volatility_index,
                sentiment: context.sentiment,
                news: context.news,
                learnings: self.tracker.learnings(set.instrument, now_ms),
                pattern_summary: context.pattern_summary,
            },
        };

        let raw = match with_timeout(self.config.oracle_timeout_ms, oracle.analyze(&request)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(instrument = %set.instrument, oracle = oracle.name(), error = %e, "🤖 Oracle call failed, falling back to rule engine");
                return None;
            }
        };

        match validate_response(raw, set, &self.config.oracle_defaults) {
            OracleVerdict::Signal(candidate) => {
                info!(
                    instrument = %set.instrument,
                    direction = %candidate.direction,
                    confidence = candidate.confidence,
                    strike = candidate.strike,
                    "🤖 Oracle signal"
                );
                Some(vec![candidate])
            }
            OracleVerdict::Failure(reason) => {
                warn!(instrument = %set.instrument, reason = %reason, "🤖 Oracle reported failure, falling back to rule engine");
                None
            }
        }
    }

    async fn handle_accepted(&self, accepted: &AcceptedSignal, set: &MarketIndicatorSet, snapshot: &MarketSnapshot) {
        let c = &accepted.candidate;
        let market_premium = snapshot
            .strikes
            .iter()
            .find(|s| s.strike == c.strike)
            .and_then(|s| s.premium(c.direction));

        let signal_id = self.tracker.next_signal_id();
        let outcome = self.ledger.open_trade(accepted, &signal_id, set.spot, market_premium);
        self.tracker.record_with_id(
            signal_id,
            accepted,
            set.spot,
            market_premium,
            outcome.trade_id().map(str::to_string),
        );

        if accepted.notify {
            self.notify(&format_signal_alert(accepted, set, &outcome)).await;
        } else {
            info!(
                instrument = %c.instrument,
                key = %accepted.key,
                "🔕 Repeat signal within cooldown, alert suppressed"
            );
        }
    }

    async fn notify(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        let notifier = &self.collaborators.notifier;
        if let Err(e) = with_timeout(self.config.notifier_timeout_ms, notifier.send(message)).await {
            warn!(notifier = notifier.name(), error = %e, "Failed to deliver alert");
        }
    }

    async fn maybe_send_hourly_summary(&self, now_ms: i64) {
        if !self.config.hourly_summary {
            return;
        }
        let (Some(date), Some(hour)) = (self.session.session_date(now_ms), self.session.local_hour(now_ms)) else {
            return;
        };

        let due = {
            let mut last = self.last_summary_hour.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = last.replace((date, hour));
            // The first observed hour only arms the schedule
            previous.is_some_and(|p| p != (date, hour))
        };
        if !due {
            return;
        }

        let message = format!(
            "{}\n\n{}",
            self.ledger.showcase_message(now_ms),
            self.tracker.summary_string(None, now_ms)
        );
        info!(hour = hour, "⏰ Hourly performance summary");
        self.notify(&message).await;
    }

    // ─────────────────────────────────────────────────────────────────
    // Mark-to-market cycle
    // ─────────────────────────────────────────────────────────────────

    /// Revalue open trades from fresh spot quotes. Returns how many closed.
    pub async fn run_mark_to_market(&self, now_ms: i64) -> usize {
        let mut closed_total = 0;
        for instrument in self.ledger.instruments_with_open_trades() {
            let spot = match with_timeout(
                self.config.market_data_timeout_ms,
                self.collaborators.market_data.fetch_spot(instrument),
            )
            .await
            {
                Ok(spot) if spot.is_finite() && spot > 0.0 => spot,
                Ok(spot) => {
                    debug!(instrument = %instrument, spot = spot, "Ignoring invalid spot quote");
                    continue;
                }
                Err(e) => {
                    debug!(instrument = %instrument, error = %e, "Spot quote unavailable");
                    continue;
                }
            };

            let closed = self.ledger.mark_to_market(instrument, spot, now_ms);
            for trade in &closed {
                self.notify(&self.ledger.exit_message(trade)).await;
            }
            closed_total += closed.len();
        }
        closed_total
    }

    // ─────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────

    /// Save JSON state and drain CSV queues. Failures are retried next time.
    pub async fn flush(&self) {
        self.coordinator.prune(now_ms());

        if let Err(e) = self.oi_cache().save_state() {
            warn!(error = %e, "Failed to save OI cache");
        }
        if let Err(e) = self.coordinator.save_state() {
            warn!(error = %e, "Failed to save decision state");
        }
        if let Err(e) = self.ledger.save_state() {
            warn!(error = %e, "Failed to save virtual trades");
        }
        if let Err(e) = self.tracker.save_state() {
            warn!(error = %e, "Failed to save signal history");
        }

        self.ledger.flush_archive().await;
        self.tracker.flush_csv().await;
        self.flush_decisions().await;
    }

    async fn flush_decisions(&self) {
        let pending: Vec<DecisionRecord> =
            std::mem::take(&mut *self.pending_decisions.lock().unwrap_or_else(PoisonError::into_inner));
        let Some(ref persistence) = self.persistence else {
            return;
        };

        let mut failed = Vec::new();
        for record in pending {
            if let Err(e) = persistence.save_decision(record.clone()).await {
                warn!(error = %e, "Failed to log decision, will retry");
                failed.push(record);
            }
        }
        if !failed.is_empty() {
            let mut queue = self.pending_decisions.lock().unwrap_or_else(PoisonError::into_inner);
            failed.append(&mut queue);
            *queue = failed;
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Schedulers
    // ─────────────────────────────────────────────────────────────────

    /// Run the schedulers until `shutdown` is cancelled, then flush
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            instruments = ?self.config.instruments,
            analysis_s = self.config.analysis_interval.as_secs(),
            mtm_s = self.config.mark_to_market_interval.as_secs(),
            oracle = self.collaborators.oracle.is_some(),
            "🚀 Signal engine started"
        );

        let analysis = {
            let engine = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.analysis_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut idle_logged = false;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let now = now_ms();
                            let report = engine.run_analysis_cycle(now).await;
                            if report.ran {
                                idle_logged = false;
                                info!(accepted = report.accepted().count(), "✅ [analysis-cycle] complete");
                            } else if !idle_logged {
                                idle_logged = true;
                                let wait_min = engine.session.until_open_ms(now).map(|ms| ms / 60_000);
                                info!(minutes_to_open = ?wait_min, "💤 [analysis-cycle] Market closed, waiting");
                            }
                        }
                    }
                }
                info!("[analysis-cycle] stopped");
            })
        };

        let mark_to_market = {
            let engine = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.mark_to_market_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if engine.ledger.open_count() > 0 {
                                engine.run_mark_to_market(now_ms()).await;
                            }
                        }
                    }
                }
                info!("[mark-to-market-cycle] stopped");
            })
        };

        let flush = {
            let engine = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.flush_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // First tick fires immediately; nothing to save yet
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => engine.flush().await,
                    }
                }
                info!("[state-flush] stopped");
            })
        };

        for (name, handle) in [
            ("analysis-cycle", analysis),
            ("mark-to-market-cycle", mark_to_market),
            ("state-flush", flush),
        ] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Scheduler task ended abnormally");
            }
        }

        info!("💾 Final flush");
        self.flush().await;
        info!("{}", self.ledger.summary_string());
        Ok(())
    }
}
