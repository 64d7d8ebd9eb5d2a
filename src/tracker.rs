//! Signal Performance Tracker
//!
//! Append-only log of accepted signals and their eventual outcome. Each
//! record points at the virtual trade driving it, so resolution follows the
//! ledger. Open records left over from an earlier session are expired at
//! rollover.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::paper_trading::{TradeStatus, VirtualTrade};
use crate::persistence::{read_json_state, write_json_state, CsvPersistence, SignalRecord};
use crate::types::{AcceptedSignal, Direction, Instrument, SignalSource, TradeHorizon};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalOutcome {
    TargetHit,
    SlHit,
    ManualExit,
    Expired,
}

impl SignalOutcome {
    pub fn from_trade_status(status: TradeStatus) -> Option<Self> {
        match status {
            TradeStatus::Open => None,
            TradeStatus::TargetHit => Some(SignalOutcome::TargetHit),
            TradeStatus::SlHit => Some(SignalOutcome::SlHit),
            TradeStatus::ManualExit => Some(SignalOutcome::ManualExit),
        }
    }
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalOutcome::TargetHit => write!(f, "TARGET_HIT"),
            SignalOutcome::SlHit => write!(f, "SL_HIT"),
            SignalOutcome::ManualExit => write!(f, "MANUAL_EXIT"),
            SignalOutcome::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: String,
    pub instrument: Instrument,
    pub direction: Direction,
    pub strike: i64,
    pub confidence: f64,
    pub source: SignalSource,
    pub horizon: TradeHorizon,
    pub spot_at_signal: f64,
    pub entry_premium: Option<f64>,
    pub target_points: f64,
    pub stop_loss_points: f64,
    pub rationale: String,
    pub accepted_at: i64,
    pub notified: bool,
    /// Virtual trade this signal opened or joined
    pub trade_id: Option<String>,
    /// `None` while open
    pub outcome: Option<SignalOutcome>,
    pub exit_premium: Option<f64>,
    pub points_captured: Option<f64>,
    pub resolved_at: Option<i64>,
}

impl PerformanceRecord {
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerStats {
    pub total: usize,
    pub resolved: usize,
    pub open: usize,
    pub target_hit: usize,
    pub sl_hit: usize,
    pub manual_exit: usize,
    pub expired: usize,
    /// Target hits / resolved × 100
    pub success_rate: f64,
    pub total_points: f64,
    pub avg_points: f64,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub rationale_limit: usize,
    /// Oldest records beyond this are dropped from memory (CSV keeps them)
    pub max_records: usize,
    pub default_lookback_days: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            rationale_limit: 200,
            max_records: 5_000,
            default_lookback_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerState {
    pub next_id: u64,
    pub records: Vec<PerformanceRecord>,
    pub saved_at: i64,
}

pub struct SignalPerformanceTracker {
    config: TrackerConfig,
    records: RwLock<Vec<PerformanceRecord>>,
    next_id: RwLock<u64>,
    persistence: Option<Arc<CsvPersistence>>,
    state_file: Option<PathBuf>,
    pending_csv: Mutex<Vec<SignalRecord>>,
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Earliest `accepted_at` inside a lookback window. 0 days means no limit.
fn lookback_cutoff(now_ms: i64, lookback_days: u32) -> i64 {
    if lookback_days == 0 {
        i64::MIN
    } else {
        now_ms - lookback_days as i64 * DAY_MS
    }
}

impl SignalPerformanceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            records: RwLock::new(Vec::new()),
            next_id: RwLock::new(0),
            persistence: None,
            state_file: None,
            pending_csv: Mutex::new(Vec::new()),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<CsvPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Reserve the next signal id, so the trade it drives can carry it
    pub fn next_signal_id(&self) -> String {
        let mut next = self.next_id.write().unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        format!("SIG-{}", *next)
    }

    /// Append an accepted signal under a fresh id. Returns the id.
    pub fn record(
        &self,
        signal: &AcceptedSignal,
        spot: f64,
        entry_premium: Option<f64>,
        trade_id: Option<String>,
    ) -> String {
        self.record_with_id(self.next_signal_id(), signal, spot, entry_premium, trade_id)
    }

    /// Append an accepted signal under an id from `next_signal_id`
    pub fn record_with_id(
        &self,
        id: String,
        signal: &AcceptedSignal,
        spot: f64,
        entry_premium: Option<f64>,
        trade_id: Option<String>,
    ) -> String {
        let c = &signal.candidate;
        let record = PerformanceRecord {
            id: id.clone(),
            instrument: c.instrument,
            direction: c.direction,
            strike: c.strike,
            confidence: c.confidence,
            source: c.source,
            horizon: c.horizon,
            spot_at_signal: spot,
            entry_premium,
            target_points: c.target_points,
            stop_loss_points: c.stop_loss_points,
            rationale: truncate_chars(&c.rationale, self.config.rationale_limit),
            accepted_at: signal.accepted_at,
            notified: signal.notify,
            trade_id,
            outcome: None,
            exit_premium: None,
            points_captured: None,
            resolved_at: None,
        };

        self.pending_csv
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SignalRecord {
                timestamp: record.accepted_at,
                signal_id: record.id.clone(),
                instrument: record.instrument.to_string(),
                direction: record.direction.to_string(),
                strike: record.strike,
                confidence: record.confidence,
                source: record.source.to_string(),
                horizon: record.horizon.to_string(),
                spot,
                target_points: record.target_points,
                stop_loss_points: record.stop_loss_points,
                notified: record.notified,
                trade_id: record.trade_id.clone(),
                rationale: record.rationale.clone(),
            });

        info!(
            signal_id = %id,
            instrument = %record.instrument,
            direction = %record.direction,
            strike = record.strike,
            trade_id = ?record.trade_id,
            "📊 [TRACKER] Signal tracked"
        );

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.push(record);
        let excess = records.len().saturating_sub(self.config.max_records);
        if excess > 0 {
            records.drain(..excess);
        }
        id
    }

    /// Set the outcome of one open record. False if unknown or already resolved.
    pub fn resolve(
        &self,
        signal_id: &str,
        outcome: SignalOutcome,
        exit_premium: Option<f64>,
        points: f64,
        now_ms: i64,
    ) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let Some(r) = records.iter_mut().find(|r| r.id == signal_id && r.is_open()) else {
            return false;
        };
        r.outcome = Some(outcome);
        r.exit_premium = exit_premium;
        r.points_captured = Some(points);
        r.resolved_at = Some(now_ms);
        info!(signal_id = %signal_id, outcome = %outcome, points = points, "📊 [TRACKER] Signal resolved");
        true
    }

    /// Resolve every open record driven by `trade`. Returns how many changed.
    pub fn resolve_trade(&self, trade: &VirtualTrade) -> usize {
        let Some(outcome) = SignalOutcome::from_trade_status(trade.status) else {
            return 0;
        };
        let now = trade.closed_at.unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut resolved = 0;
        for r in records
            .iter_mut()
            .filter(|r| r.is_open() && r.trade_id.as_deref() == Some(trade.id.as_str()))
        {
            r.outcome = Some(outcome);
            r.exit_premium = trade.exit_premium;
            r.points_captured = Some(trade.points_captured);
            r.resolved_at = Some(now);
            resolved += 1;
        }

        if resolved > 0 {
            info!(
                trade_id = %trade.id,
                outcome = %outcome,
                signals = resolved,
                "📊 [TRACKER] Signals resolved by trade close"
            );
        }
        resolved
    }

    /// Mark open records accepted before `cutoff_ms` as EXPIRED
    pub fn expire_open_before(&self, cutoff_ms: i64, now_ms: i64) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut expired = 0;
        for r in records
            .iter_mut()
            .filter(|r| r.is_open() && r.accepted_at < cutoff_ms)
        {
            r.outcome = Some(SignalOutcome::Expired);
            r.points_captured = Some(0.0);
            r.resolved_at = Some(now_ms);
            expired += 1;
        }
        if expired > 0 {
            info!(count = expired, "⏱️ [TRACKER] Stale open signals expired");
        }
        expired
    }

    pub fn open_signals(&self) -> Vec<PerformanceRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    pub fn records(&self) -> Vec<PerformanceRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Aggregate over the last `lookback_days` (0 = everything), optionally one instrument
    pub fn stats(&self, instrument: Option<Instrument>, lookback_days: u32, now_ms: i64) -> TrackerStats {
        let cutoff = lookback_cutoff(now_ms, lookback_days);

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = TrackerStats::default();
        for r in records
            .iter()
            .filter(|r| r.accepted_at >= cutoff)
            .filter(|r| instrument.map_or(true, |i| r.instrument == i))
        {
            stats.total += 1;
            match r.outcome {
                None => stats.open += 1,
                Some(outcome) => {
                    stats.resolved += 1;
                    stats.total_points += r.points_captured.unwrap_or(0.0);
                    match outcome {
                        SignalOutcome::TargetHit => stats.target_hit += 1,
                        SignalOutcome::SlHit => stats.sl_hit += 1,
                        SignalOutcome::ManualExit => stats.manual_exit += 1,
                        SignalOutcome::Expired => stats.expired += 1,
                    }
                }
            }
        }

        if stats.resolved > 0 {
            stats.success_rate = stats.target_hit as f64 / stats.resolved as f64 * 100.0;
            stats.avg_points = stats.total_points / stats.resolved as f64;
        }
        stats
    }

    pub fn summary_string(&self, instrument: Option<Instrument>, now_ms: i64) -> String {
        let s = self.stats(instrument, self.config.default_lookback_days, now_ms);
        let scope = instrument.map(|i| format!(" ({})", i)).unwrap_or_default();
        format!(
            "📊 Signal Performance{}\n\
             ✅ Success Rate: {:.1}%\n\
             📈 Total Signals: {} | 🎯 Target: {} | 🛑 SL: {} | ⏱️ Expired: {} | Open: {}\n\
             💰 Total Points: {:+.0} | Avg Points/Trade: {:+.1}",
            scope,
            s.success_rate,
            s.total,
            s.target_hit,
            s.sl_hit,
            s.expired,
            s.open,
            s.total_points,
            s.avg_points
        )
    }

    /// Short performance digest fed back to the oracle. `None` until something resolved.
    pub fn learnings(&self, instrument: Instrument, now_ms: i64) -> Option<String> {
        let days = self.config.default_lookback_days;
        let overall = self.stats(Some(instrument), days, now_ms);
        if overall.resolved == 0 {
            return None;
        }

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let cutoff = lookback_cutoff(now_ms, days);
        let side_rate = |direction: Direction| -> Option<(usize, f64)> {
            let resolved: Vec<&PerformanceRecord> = records
                .iter()
                .filter(|r| {
                    r.instrument == instrument
                        && r.direction == direction
                        && r.accepted_at >= cutoff
                        && !r.is_open()
                })
                .collect();
            if resolved.is_empty() {
                return None;
            }
            let hits = resolved
                .iter()
                .filter(|r| r.outcome == Some(SignalOutcome::TargetHit))
                .count();
            Some((resolved.len(), hits as f64 / resolved.len() as f64 * 100.0))
        };

        let window = if days == 0 {
            "All time".to_string()
        } else {
            format!("Last {}d", days)
        };
        let mut lines = vec![format!(
            "{} on {}: {} resolved signals, {:.1}% hit target, {} stopped out, avg {:+.1} points",
            window, instrument, overall.resolved, overall.success_rate, overall.sl_hit, overall.avg_points
        )];
        for direction in [Direction::Call, Direction::Put] {
            if let Some((n, rate)) = side_rate(direction) {
                lines.push(format!("{} signals: {} resolved, {:.1}% hit target", direction, n, rate));
            }
        }
        Some(lines.join("\n"))
    }

    // ── CSV ─────────────────────────────────────────────────────

    /// Write queued signal rows. Failed rows stay queued.
    pub async fn flush_csv(&self) {
        let Some(ref persistence) = self.persistence else {
            self.pending_csv
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            return;
        };

        let pending: Vec<SignalRecord> =
            std::mem::take(&mut *self.pending_csv.lock().unwrap_or_else(PoisonError::into_inner));
        let mut failed = Vec::new();
        for record in pending {
            if let Err(e) = persistence.save_signal(record.clone()).await {
                warn!(signal_id = %record.signal_id, error = %e, "Failed to log signal, will retry");
                failed.push(record);
            }
        }
        if !failed.is_empty() {
            let mut queue = self.pending_csv.lock().unwrap_or_else(PoisonError::into_inner);
            failed.append(&mut queue);
            *queue = failed;
        }
    }

    // ── JSON state ──────────────────────────────────────────────

    pub fn save_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let state = TrackerState {
            next_id: *self.next_id.read().unwrap_or_else(PoisonError::into_inner),
            records: self.records(),
            saved_at: Utc::now().timestamp_millis(),
        };
        write_json_state(path, &state)
    }

    pub fn load_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let Some(state) = read_json_state::<TrackerState>(path)? else {
            info!(path = %path.display(), "💾 [TRACKER] No signal history found, starting fresh");
            return Ok(());
        };
        info!(
            path = %path.display(),
            records = state.records.len(),
            "💾 [TRACKER] Signal history loaded"
        );
        *self.next_id.write().unwrap_or_else(PoisonError::into_inner) = state.next_id;
        *self.records.write().unwrap_or_else(PoisonError::into_inner) = state.records;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateSignal;

    const T0: i64 = 1_792_384_200_000;

    fn accepted(instrument: Instrument, direction: Direction, rationale: &str, at: i64) -> AcceptedSignal {
        let candidate = CandidateSignal {
            instrument,
            direction,
            confidence: 65.0,
            strike: 23000,
            target_points: 25.0,
            stop_loss_points: 12.0,
            horizon: TradeHorizon::Scalp,
            rationale: rationale.to_string(),
            source: SignalSource::RuleEngine,
        };
        AcceptedSignal {
            key: candidate.dedup_key(),
            candidate,
            accepted_at: at,
            notify: true,
        }
    }

    fn closed_trade(id: &str, status: TradeStatus, points: f64) -> VirtualTrade {
        VirtualTrade {
            id: id.to_string(),
            signal_id: String::new(),
            instrument: Instrument::Nifty,
            direction: Direction::Call,
            strike: 23000,
            confidence: 65.0,
            rationale: String::new(),
            entry_spot: 23000.0,
            entry_premium: 100.0,
            current_spot: 23000.0,
            current_premium: 100.0 + points,
            highest_premium: 100.0,
            lowest_premium: 100.0,
            lot_count: 10,
            base_lot_size: 65,
            position_size: 650,
            target_points: 25.0,
            stop_loss_points: 12.0,
            status,
            unrealized_pnl: 0.0,
            realized_pnl: points * 650.0,
            exit_premium: Some(100.0 + points),
            exit_spot: Some(23000.0),
            points_captured: points,
            opened_at: T0,
            closed_at: Some(T0 + 60_000),
        }
    }

    #[test]
    fn test_rationale_truncated_to_limit() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let long = "x".repeat(450);
        let id = tracker.record(&accepted(Instrument::Nifty, Direction::Call, &long, T0), 23000.0, None, None);
        let rec = tracker.records().into_iter().find(|r| r.id == id).unwrap();
        assert_eq!(rec.rationale.chars().count(), 200);
    }

    #[test]
    fn test_repeat_signals_resolve_with_shared_trade() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let sig = accepted(Instrument::Nifty, Direction::Call, "r", T0);
        tracker.record(&sig, 23000.0, Some(100.0), Some("VT-1".into()));
        tracker.record(&sig, 23010.0, Some(100.0), Some("VT-1".into()));
        tracker.record(&sig, 23010.0, Some(100.0), Some("VT-2".into()));

        let n = tracker.resolve_trade(&closed_trade("VT-1", TradeStatus::TargetHit, 25.0));
        assert_eq!(n, 2);
        assert_eq!(tracker.open_signals().len(), 1);

        // Already resolved records are not touched again
        assert_eq!(tracker.resolve_trade(&closed_trade("VT-1", TradeStatus::SlHit, -12.0)), 0);
    }

    #[test]
    fn test_resolve_by_id_only_once() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let id = tracker.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0), 23000.0, None, None);
        assert!(tracker.resolve(&id, SignalOutcome::SlHit, Some(88.0), -12.0, T0 + 1));
        assert!(!tracker.resolve(&id, SignalOutcome::TargetHit, Some(125.0), 25.0, T0 + 2));
        assert!(!tracker.resolve("SIG-404", SignalOutcome::TargetHit, None, 0.0, T0));
    }

    #[test]
    fn test_expire_only_older_open_signals() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let old = tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0 - DAY_MS), 23000.0, None, None);
        let resolved = tracker.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0 - DAY_MS), 23000.0, None, None);
        tracker.resolve(&resolved, SignalOutcome::TargetHit, Some(125.0), 25.0, T0 - DAY_MS + 1);
        tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, None);

        assert_eq!(tracker.expire_open_before(T0 - 1000, T0), 1);
        let records = tracker.records();
        let old = records.iter().find(|r| r.id == old).unwrap();
        assert_eq!(old.outcome, Some(SignalOutcome::Expired));
        assert_eq!(tracker.open_signals().len(), 1);
    }

    #[test]
    fn test_stats_by_instrument_and_window() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let a = tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, None);
        let b = tracker.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0), 23000.0, None, None);
        tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, None);
        let old = tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0 - 30 * DAY_MS), 23000.0, None, None);
        tracker.record(&accepted(Instrument::Sensex, Direction::Call, "r", T0), 81000.0, None, None);

        tracker.resolve(&a, SignalOutcome::TargetHit, Some(125.0), 25.0, T0 + 1);
        tracker.resolve(&b, SignalOutcome::SlHit, Some(88.0), -12.0, T0 + 1);
        tracker.resolve(&old, SignalOutcome::TargetHit, Some(125.0), 25.0, T0 + 1);

        let s = tracker.stats(Some(Instrument::Nifty), 7, T0 + 10);
        assert_eq!(s.total, 3);
        assert_eq!(s.resolved, 2);
        assert_eq!(s.open, 1);
        assert_eq!(s.success_rate, 50.0);
        assert_eq!(s.total_points, 13.0);
        assert_eq!(s.avg_points, 6.5);

        let everything = tracker.stats(None, 0, T0 + 10);
        assert_eq!(everything.total, 5);
        assert_eq!(everything.resolved, 3);
    }

    #[test]
    fn test_learnings_need_resolved_history() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let id = tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, None);
        assert!(tracker.learnings(Instrument::Nifty, T0).is_none());

        tracker.resolve(&id, SignalOutcome::TargetHit, Some(125.0), 25.0, T0 + 1);
        let text = tracker.learnings(Instrument::Nifty, T0 + 2).unwrap();
        assert!(text.contains("100.0% hit target"));
        assert!(text.contains("CALL signals: 1 resolved"));
        assert!(!text.contains("PUT signals"));
    }

    #[test]
    fn test_learnings_without_lookback_limit_use_all_history() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig {
            default_lookback_days: 0,
            ..Default::default()
        });
        let old = tracker.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0 - 30 * DAY_MS), 23000.0, None, None);
        tracker.resolve(&old, SignalOutcome::SlHit, Some(88.0), -12.0, T0 - 30 * DAY_MS + 1);

        assert_eq!(tracker.stats(Some(Instrument::Nifty), 0, T0).resolved, 1);
        let text = tracker.learnings(Instrument::Nifty, T0).unwrap();
        assert!(text.starts_with("All time on NIFTY: 1 resolved signals"));
        assert!(text.contains("PUT signals: 1 resolved, 0.0% hit target"));
    }

    #[test]
    fn test_reserved_id_is_used_for_record() {
        let tracker = SignalPerformanceTracker::new(TrackerConfig::default());
        let id = tracker.next_signal_id();
        assert_eq!(id, "SIG-1");
        tracker.record_with_id(id, &accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, Some("VT-7".into()));

        let rec = &tracker.records()[0];
        assert_eq!(rec.id, "SIG-1");
        assert_eq!(rec.trade_id.as_deref(), Some("VT-7"));
        assert_eq!(tracker.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0), 23000.0, None, None), "SIG-2");
    }

    #[tokio::test]
    async fn test_state_and_csv_persist() {
        let dir = std::env::temp_dir().join(format!("chainpulse_tracker_{}", uuid::Uuid::new_v4()));
        let persistence = Arc::new(CsvPersistence::new(dir.to_str().unwrap()).unwrap());
        let path = dir.join("signal_history.json");

        let tracker = SignalPerformanceTracker::new(TrackerConfig::default())
            .with_persistence(persistence)
            .with_state_file(path.clone());
        tracker.record(&accepted(Instrument::Nifty, Direction::Call, "r", T0), 23000.0, None, Some("VT-1".into()));
        tracker.flush_csv().await;
        tracker.save_state().unwrap();

        let signals_dir = dir.join("signals");
        let csv_rows: usize = std::fs::read_dir(&signals_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
            .map(|content| {
                assert!(content.contains(",VT-1,"));
                content.lines().count()
            })
            .sum();
        assert_eq!(csv_rows, 2);

        let restored = SignalPerformanceTracker::new(TrackerConfig::default()).with_state_file(path);
        restored.load_state().unwrap();
        assert_eq!(restored.open_signals().len(), 1);
        let next = restored.record(&accepted(Instrument::Nifty, Direction::Put, "r", T0), 23000.0, None, None);
        assert_eq!(next, "SIG-2");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
