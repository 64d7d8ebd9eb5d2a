//! Virtual Trade Ledger
//!
//! Paper positions opened from accepted signals and revalued from the live
//! spot price. No order ever leaves the process.
//!
//! Key features:
//! - **One position per (instrument, direction, strike)**: repeats leave the open trade alone
//! - **Delta-0.5 premium model**: premium tracks half the spot move, floored at 1
//! - **Target before stop**: exits fill exactly at entry+target or entry−stop
//! - **Archive**: every closed trade is appended to the daily trades CSV
//! - **State persistence**: open trades and counters survive restarts

use anyhow::Result;
use chrono::{FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::persistence::{read_json_state, write_json_state, CsvPersistence, TradeRecord};
use crate::types::{AcceptedSignal, Direction, Instrument};

// ─────────────────────────────────────────────────────────────────
// Trade model
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    TargetHit,
    SlHit,
    ManualExit,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::TargetHit => write!(f, "TARGET_HIT"),
            TradeStatus::SlHit => write!(f, "SL_HIT"),
            TradeStatus::ManualExit => write!(f, "MANUAL_EXIT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualTrade {
    pub id: String,
    pub signal_id: String,
    pub instrument: Instrument,
    pub direction: Direction,
    pub strike: i64,
    pub confidence: f64,
    pub rationale: String,
    pub entry_spot: f64,
    pub entry_premium: f64,
    pub current_spot: f64,
    pub current_premium: f64,
    pub highest_premium: f64,
    pub lowest_premium: f64,
    pub lot_count: u32,
    pub base_lot_size: u32,
    /// Units = base lot size × lot count
    pub position_size: u32,
    pub target_points: f64,
    pub stop_loss_points: f64,
    pub status: TradeStatus,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub exit_premium: Option<f64>,
    pub exit_spot: Option<f64>,
    pub points_captured: f64,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

impl VirtualTrade {
    pub fn target_premium(&self) -> f64 {
        self.entry_premium + self.target_points
    }

    pub fn stop_premium(&self) -> f64 {
        self.entry_premium - self.stop_loss_points
    }

    /// Premium paid for the whole position
    pub fn capital_used(&self) -> f64 {
        self.entry_premium * self.position_size as f64
    }

    pub fn roi_pct(&self) -> f64 {
        let capital = self.capital_used();
        if capital <= 0.0 {
            return 0.0;
        }
        let pnl = if self.status.is_terminal() {
            self.realized_pnl
        } else {
            self.unrealized_pnl
        };
        pnl / capital * 100.0
    }

    pub fn is_winner(&self) -> bool {
        self.status.is_terminal() && self.realized_pnl > 0.0
    }

    fn to_record(&self) -> TradeRecord {
        TradeRecord {
            trade_id: self.id.clone(),
            signal_id: self.signal_id.clone(),
            instrument: self.instrument.to_string(),
            direction: self.direction.to_string(),
            strike: self.strike,
            status: self.status.to_string(),
            entry_spot: self.entry_spot,
            exit_spot: self.exit_spot.unwrap_or(self.current_spot),
            entry_premium: self.entry_premium,
            exit_premium: self.exit_premium.unwrap_or(self.current_premium),
            position_size: self.position_size,
            realized_pnl: self.realized_pnl,
            points_captured: self.points_captured,
            roi_pct: self.roi_pct(),
            opened_at: self.opened_at,
            closed_at: self.closed_at.unwrap_or_default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Configuration & stats
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PaperTradingConfig {
    /// Lots per virtual trade
    pub lot_multiplier: u32,
    /// Entry premium used when the chain has no traded price at the strike
    pub default_entry_premium: f64,
    /// Premium sensitivity to the underlying
    pub delta: f64,
    pub min_premium: f64,
    /// Offset used to decide what "today" is
    pub utc_offset_minutes: i32,
    /// Closed trades kept in memory for stats and showcase; the CSV keeps all
    pub max_archive_in_memory: usize,
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        Self {
            lot_multiplier: 10,
            default_entry_premium: 100.0,
            delta: 0.5,
            min_premium: 1.0,
            utc_offset_minutes: 330,
            max_archive_in_memory: 1_000,
        }
    }
}

/// Cumulative counters, persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerCounters {
    pub next_id: u64,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStats {
    pub total_trades: usize,
    pub open_trades: usize,
    pub wins: u32,
    pub losses: u32,
    /// wins / decided × 100, 0 when nothing is decided
    pub win_rate: f64,
    pub total_pnl: f64,
    pub todays_trades: usize,
    /// Realized P&L of trades opened today and already closed
    pub todays_pnl: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub open: Vec<VirtualTrade>,
    pub closed: Vec<VirtualTrade>,
    pub counters: LedgerCounters,
    pub saved_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(VirtualTrade),
    /// Same (instrument, direction, strike) already open; nothing changed
    AlreadyOpen { trade_id: String },
    Skipped(&'static str),
}

impl OpenOutcome {
    /// Id of the trade driving this signal, new or existing
    pub fn trade_id(&self) -> Option<&str> {
        match self {
            OpenOutcome::Opened(t) => Some(&t.id),
            OpenOutcome::AlreadyOpen { trade_id } => Some(trade_id),
            OpenOutcome::Skipped(_) => None,
        }
    }
}

/// Called once per trade when it reaches a terminal state
pub type TradeCloseCallback = Box<dyn Fn(&VirtualTrade) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────

pub struct VirtualTradeLedger {
    config: PaperTradingConfig,
    open: RwLock<Vec<VirtualTrade>>,
    closed: RwLock<Vec<VirtualTrade>>,
    counters: RwLock<LedgerCounters>,
    persistence: Option<Arc<CsvPersistence>>,
    state_file: Option<PathBuf>,
    close_callback: Option<Arc<TradeCloseCallback>>,
    /// Archive rows not yet written to CSV
    pending_archive: Mutex<Vec<TradeRecord>>,
}

impl VirtualTradeLedger {
    pub fn new(config: PaperTradingConfig) -> Self {
        Self {
            config,
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            counters: RwLock::new(LedgerCounters::default()),
            persistence: None,
            state_file: None,
            close_callback: None,
            pending_archive: Mutex::new(Vec::new()),
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

    /// Register the close hook (the performance tracker)
    pub fn with_close_callback(mut self, callback: Arc<TradeCloseCallback>) -> Self {
        self.close_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &PaperTradingConfig {
        &self.config
    }

    fn premium_at(&self, trade: &VirtualTrade, spot: f64) -> f64 {
        let move_points = self.config.delta * (spot - trade.entry_spot);
        let premium = match trade.direction {
            Direction::Put => trade.entry_premium - move_points,
            _ => trade.entry_premium + move_points,
        };
        premium.max(self.config.min_premium)
    }

    pub fn is_position_open(&self, instrument: Instrument, direction: Direction, strike: i64) -> bool {
        self.open
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.instrument == instrument && t.direction == direction && t.strike == strike)
    }

    /// Open a position for an accepted signal unless an identical one is open.
    ///
    /// `market_premium` is the traded premium at the strike, if the chain had one.
    pub fn open_trade(
        &self,
        signal: &AcceptedSignal,
        signal_id: &str,
        entry_spot: f64,
        market_premium: Option<f64>,
    ) -> OpenOutcome {
        let c = &signal.candidate;
        if !c.direction.is_tradable() {
            return OpenOutcome::Skipped("neutral direction");
        }
        if !entry_spot.is_finite() || entry_spot <= 0.0 {
            return OpenOutcome::Skipped("no spot price");
        }

        let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = open
            .iter()
            .find(|t| t.instrument == c.instrument && t.direction == c.direction && t.strike == c.strike)
        {
            info!(
                trade_id = %existing.id,
                instrument = %c.instrument,
                direction = %c.direction,
                strike = c.strike,
                "[LEDGER] Position already open, leaving it alone"
            );
            return OpenOutcome::AlreadyOpen {
                trade_id: existing.id.clone(),
            };
        }

        let id = {
            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            counters.next_id += 1;
            format!("VT-{}", counters.next_id)
        };

        let entry_premium = market_premium
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(self.config.default_entry_premium);
        let base_lot_size = c.instrument.base_lot_size();
        let lot_count = self.config.lot_multiplier;

        let trade = VirtualTrade {
            id,
            signal_id: signal_id.to_string(),
            instrument: c.instrument,
            direction: c.direction,
            strike: c.strike,
            confidence: c.confidence,
            rationale: c.rationale.clone(),
            entry_spot,
            entry_premium,
            current_spot: entry_spot,
            current_premium: entry_premium,
            highest_premium: entry_premium,
            lowest_premium: entry_premium,
            lot_count,
            base_lot_size,
            position_size: base_lot_size * lot_count,
            target_points: c.target_points,
            stop_loss_points: c.stop_loss_points,
            status: TradeStatus::Open,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            exit_premium: None,
            exit_spot: None,
            points_captured: 0.0,
            opened_at: signal.accepted_at,
            closed_at: None,
        };
        open.push(trade.clone());

        info!(
            trade_id = %trade.id,
            instrument = %trade.instrument,
            direction = %trade.direction,
            strike = trade.strike,
            entry_premium = trade.entry_premium,
            size = trade.position_size,
            "📝 [LEDGER] Virtual trade opened"
        );
        OpenOutcome::Opened(trade)
    }

    /// Revalue every open trade on `instrument` and apply the close rule.
    /// Returns the trades closed by this tick.
    pub fn mark_to_market(&self, instrument: Instrument, spot: f64, now_ms: i64) -> Vec<VirtualTrade> {
        if !spot.is_finite() || spot <= 0.0 {
            return Vec::new();
        }

        let mut exits: Vec<(String, f64, TradeStatus)> = Vec::new();
        {
            let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
            for trade in open.iter_mut().filter(|t| t.instrument == instrument) {
                let premium = self.premium_at(trade, spot);
                trade.current_spot = spot;
                trade.current_premium = premium;
                trade.highest_premium = trade.highest_premium.max(premium);
                trade.lowest_premium = trade.lowest_premium.min(premium);
                trade.unrealized_pnl = (premium - trade.entry_premium) * trade.position_size as f64;

                if premium >= trade.target_premium() {
                    exits.push((trade.id.clone(), trade.target_premium(), TradeStatus::TargetHit));
                } else if premium <= trade.stop_premium() {
                    exits.push((trade.id.clone(), trade.stop_premium(), TradeStatus::SlHit));
                }
            }
        }

        exits
            .into_iter()
            .filter_map(|(id, exit, status)| self.close_trade_at(&id, exit, status, now_ms))
            .collect()
    }

    /// Close an open trade. `None` when the id is unknown or already closed.
    pub fn close_trade(&self, id: &str, exit_premium: f64, status: TradeStatus) -> Option<VirtualTrade> {
        self.close_trade_at(id, exit_premium, status, Utc::now().timestamp_millis())
    }

    pub fn close_trade_at(
        &self,
        id: &str,
        exit_premium: f64,
        status: TradeStatus,
        now_ms: i64,
    ) -> Option<VirtualTrade> {
        if !status.is_terminal() {
            return None;
        }

        let mut trade = {
            let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
            let idx = open.iter().position(|t| t.id == id)?;
            open.remove(idx)
        };

        trade.status = status;
        trade.exit_premium = Some(exit_premium);
        trade.exit_spot = Some(trade.current_spot);
        trade.closed_at = Some(now_ms);
        trade.points_captured = exit_premium - trade.entry_premium;
        trade.realized_pnl = trade.points_captured * trade.position_size as f64;
        trade.unrealized_pnl = 0.0;

        {
            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            counters.total_pnl += trade.realized_pnl;
            if trade.realized_pnl > 0.0 {
                counters.wins += 1;
            } else {
                counters.losses += 1;
            }
        }
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            closed.push(trade.clone());
            let excess = closed.len().saturating_sub(self.config.max_archive_in_memory);
            if excess > 0 {
                closed.drain(..excess);
            }
        }
        self.pending_archive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trade.to_record());

        info!(
            trade_id = %trade.id,
            instrument = %trade.instrument,
            status = %trade.status,
            exit_premium = exit_premium,
            pnl = trade.realized_pnl,
            "📊 [LEDGER] Virtual trade closed"
        );

        if let Some(ref callback) = self.close_callback {
            callback(&trade);
        }
        Some(trade)
    }

    pub fn open_trades(&self) -> Vec<VirtualTrade> {
        self.open.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Instruments with at least one open trade
    pub fn instruments_with_open_trades(&self) -> Vec<Instrument> {
        let mut instruments: Vec<Instrument> = self
            .open
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.instrument)
            .collect();
        instruments.sort();
        instruments.dedup();
        instruments
    }

    pub fn closed_trades(&self) -> Vec<VirtualTrade> {
        self.closed.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn session_date(&self, ts_ms: i64) -> Option<chrono::NaiveDate> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60)?;
        offset
            .timestamp_millis_opt(ts_ms)
            .single()
            .map(|dt| dt.date_naive())
    }

    pub fn ledger_stats(&self, now_ms: i64) -> LedgerStats {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner).clone();
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);

        let today = self.session_date(now_ms);
        let opened_today = |t: &&VirtualTrade| today.is_some() && self.session_date(t.opened_at) == today;

        let todays_closed: Vec<&VirtualTrade> = closed.iter().filter(opened_today).collect();
        let todays_open = open.iter().filter(opened_today).count();

        let decided = counters.wins + counters.losses;
        let win_rate = if decided > 0 {
            counters.wins as f64 / decided as f64 * 100.0
        } else {
            0.0
        };

        LedgerStats {
            total_trades: decided as usize + open.len(),
            open_trades: open.len(),
            wins: counters.wins,
            losses: counters.losses,
            win_rate,
            total_pnl: counters.total_pnl,
            todays_trades: todays_closed.len() + todays_open,
            todays_pnl: todays_closed.iter().map(|t| t.realized_pnl).sum(),
        }
    }

    pub fn summary_string(&self) -> String {
        let stats = self.ledger_stats(Utc::now().timestamp_millis());
        format!(
            "📋 Ledger: {}/{} ({:.1}% WR) | P&L: ₹{:+.0} | Today: ₹{:+.0} ({} trades) | {} open",
            stats.wins,
            stats.wins + stats.losses,
            stats.win_rate,
            stats.total_pnl,
            stats.todays_pnl,
            stats.todays_trades,
            stats.open_trades
        )
    }

    /// Notification text for a closed trade
    pub fn exit_message(&self, trade: &VirtualTrade) -> String {
        let (emoji, pnl_color) = if trade.realized_pnl > 0.0 {
            ("✅", "🟢")
        } else {
            ("❌", "🔴")
        };
        let status_text = match trade.status {
            TradeStatus::TargetHit => "TARGET ACHIEVED 🎯",
            TradeStatus::SlHit => "STOP LOSS HIT 🛑",
            TradeStatus::ManualExit => "MANUAL EXIT 🚪",
            TradeStatus::Open => "OPEN",
        };

        format!(
            "{emoji} VIRTUAL TRADE EXIT: {status_text} {emoji}\n\
             Trade: {} {} {} {} ({} x {} lots)\n\
             Capital Used: ₹{:.2}\n\
             Entry: ₹{:.2} | Exit: ₹{:.2} | Points: {:+.1}\n\
             ROI: {:+.2}%\n\
             {pnl_color} Final P&L: ₹{:+.0}\n\
             Virtual trading analysis. No actual funds used.",
            trade.id,
            trade.instrument,
            trade.direction,
            trade.strike,
            trade.base_lot_size,
            trade.lot_count,
            trade.capital_used(),
            trade.entry_premium,
            trade.exit_premium.unwrap_or(trade.current_premium),
            trade.points_captured,
            trade.roi_pct(),
            trade.realized_pnl,
        )
    }

    /// Hourly performance showcase: totals plus the last five closed trades
    pub fn showcase_message(&self, now_ms: i64) -> String {
        let stats = self.ledger_stats(now_ms);
        let recent: Vec<String> = self
            .closed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(5)
            .map(|t| {
                format!(
                    "{} {} {} {}: ₹{:+.0}",
                    if t.realized_pnl > 0.0 { "✅" } else { "❌" },
                    t.direction,
                    t.instrument,
                    t.strike,
                    t.realized_pnl
                )
            })
            .collect();
        let recent = if recent.is_empty() {
            "No closed trades yet".to_string()
        } else {
            recent.join("\n")
        };

        format!(
            "💰 PAPER TRADING PERFORMANCE 💰\n\
             {} Total P&L: ₹{:+.0}\n\
             {} Today's P&L: ₹{:+.0}\n\
             Trades: {} | Win Rate: {:.1}% | Winning: {} | Losing: {} | Open: {}\n\
             Recent:\n{}",
            if stats.total_pnl >= 0.0 { "🟢" } else { "🔴" },
            stats.total_pnl,
            if stats.todays_pnl >= 0.0 { "📈" } else { "📉" },
            stats.todays_pnl,
            stats.total_trades,
            stats.win_rate,
            stats.wins,
            stats.losses,
            stats.open_trades,
            recent
        )
    }

    // ── CSV archive ─────────────────────────────────────────────

    /// Write queued archive rows. Failed rows stay queued for the next flush.
    pub async fn flush_archive(&self) {
        let Some(ref persistence) = self.persistence else {
            self.pending_archive
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            return;
        };

        let pending: Vec<TradeRecord> = std::mem::take(
            &mut *self.pending_archive.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut failed = Vec::new();
        for record in pending {
            if let Err(e) = persistence.save_trade(record.clone()).await {
                warn!(trade_id = %record.trade_id, error = %e, "Failed to archive trade, will retry");
                failed.push(record);
            }
        }

        if !failed.is_empty() {
            let mut queue = self.pending_archive.lock().unwrap_or_else(PoisonError::into_inner);
            failed.append(&mut queue);
            *queue = failed;
        }
    }

    pub fn pending_archive_len(&self) -> usize {
        self.pending_archive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // ── JSON state ──────────────────────────────────────────────

    pub fn save_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let state = LedgerState {
            open: self.open_trades(),
            closed: self.closed_trades(),
            counters: self.counters.read().unwrap_or_else(PoisonError::into_inner).clone(),
            saved_at: Utc::now().timestamp_millis(),
        };
        write_json_state(path, &state)?;
        info!(path = %path.display(), open = state.open.len(), "💾 [LEDGER] State saved");
        Ok(())
    }

    pub fn load_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let Some(state) = read_json_state::<LedgerState>(path)? else {
            info!(path = %path.display(), "💾 [LEDGER] No state file found, starting fresh");
            return Ok(());
        };

        let open: Vec<VirtualTrade> = state
            .open
            .into_iter()
            .filter(|t| t.status == TradeStatus::Open)
            .collect();
        info!(
            path = %path.display(),
            open = open.len(),
            closed = state.closed.len(),
            total_pnl = state.counters.total_pnl,
            "💾 [LEDGER] State loaded"
        );

        *self.open.write().unwrap_or_else(PoisonError::into_inner) = open;
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = state.closed;
        *self.counters.write().unwrap_or_else(PoisonError::into_inner) = state.counters;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, SignalSource, TradeHorizon};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2026-10-19 10:00 IST
    const T0: i64 = 1_792_384_200_000;

    fn accepted(instrument: Instrument, direction: Direction, strike: i64) -> AcceptedSignal {
        let candidate = CandidateSignal {
            instrument,
            direction,
            confidence: 70.0,
            strike,
            target_points: 25.0,
            stop_loss_points: 12.0,
            horizon: TradeHorizon::Scalp,
            rationale: "test".to_string(),
            source: SignalSource::Oracle,
        };
        AcceptedSignal {
            key: candidate.dedup_key(),
            candidate,
            accepted_at: T0,
            notify: true,
        }
    }

    fn opened(outcome: OpenOutcome) -> VirtualTrade {
        match outcome {
            OpenOutcome::Opened(t) => t,
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_position_size_uses_lot_multiplier() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        let t = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s1", 23000.0, None));
        assert_eq!(t.base_lot_size, 65);
        assert_eq!(t.lot_count, 10);
        assert_eq!(t.position_size, 650);
        assert_eq!(t.entry_premium, 100.0);

        let t = opened(ledger.open_trade(&accepted(Instrument::Sensex, Direction::Put, 81000), "s2", 81000.0, Some(212.5)));
        assert_eq!(t.position_size, 100);
        assert_eq!(t.entry_premium, 212.5);
    }

    #[test]
    fn test_duplicate_open_rejected_until_terminal() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        let sig = accepted(Instrument::Nifty, Direction::Call, 23000);

        let first = opened(ledger.open_trade(&sig, "s1", 23000.0, None));
        match ledger.open_trade(&sig, "s2", 23010.0, None) {
            OpenOutcome::AlreadyOpen { trade_id } => assert_eq!(trade_id, first.id),
            other => panic!("expected AlreadyOpen, got {:?}", other),
        }
        assert_eq!(ledger.open_count(), 1);

        ledger.close_trade(&first.id, 110.0, TradeStatus::ManualExit).unwrap();
        let second = opened(ledger.open_trade(&sig, "s3", 23020.0, None));
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_neutral_never_opens() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        let outcome = ledger.open_trade(&accepted(Instrument::Nifty, Direction::Neutral, 23000), "s", 23000.0, None);
        assert_eq!(outcome, OpenOutcome::Skipped("neutral direction"));
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_target_hit_exactly_at_entry_plus_target() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        let t = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s", 23000.0, None));

        // +48 spot -> premium 124: still open
        assert!(ledger.mark_to_market(Instrument::Nifty, 23048.0, T0 + 1).is_empty());
        let open = ledger.open_trades();
        assert_eq!(open[0].current_premium, 124.0);
        assert_eq!(open[0].unrealized_pnl, 24.0 * 650.0);

        // +50 spot -> premium 125: target
        let closed = ledger.mark_to_market(Instrument::Nifty, 23050.0, T0 + 2);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, t.id);
        assert_eq!(closed[0].status, TradeStatus::TargetHit);
        assert_eq!(closed[0].exit_premium, Some(125.0));
        assert_eq!(closed[0].realized_pnl, 25.0 * 650.0);
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_gap_through_target_fills_at_target() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s", 23000.0, None));
        let closed = ledger.mark_to_market(Instrument::Nifty, 23400.0, T0 + 1);
        assert_eq!(closed[0].exit_premium, Some(125.0));
        assert_eq!(closed[0].highest_premium, 300.0);
    }

    #[test]
    fn test_put_stop_loss_and_premium_floor() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        opened(ledger.open_trade(&accepted(Instrument::BankNifty, Direction::Put, 48000), "s", 48000.0, Some(20.0)));

        // Spot up 60 -> put premium 20 - 30 = floored at 1, below stop (8)
        let closed = ledger.mark_to_market(Instrument::BankNifty, 48060.0, T0 + 1);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::SlHit);
        assert_eq!(closed[0].exit_premium, Some(8.0));
        assert_eq!(closed[0].lowest_premium, 1.0);
        assert_eq!(closed[0].realized_pnl, -12.0 * 300.0);
    }

    #[test]
    fn test_mark_to_market_only_touches_instrument() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s1", 23000.0, None));
        opened(ledger.open_trade(&accepted(Instrument::Sensex, Direction::Call, 81000), "s2", 81000.0, None));

        ledger.mark_to_market(Instrument::Sensex, 81010.0, T0 + 1);
        let nifty = ledger
            .open_trades()
            .into_iter()
            .find(|t| t.instrument == Instrument::Nifty)
            .unwrap();
        assert_eq!(nifty.current_premium, 100.0);
    }

    #[test]
    fn test_close_unknown_or_closed_returns_none() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        assert!(ledger.close_trade("VT-99", 100.0, TradeStatus::ManualExit).is_none());

        let t = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s", 23000.0, None));
        assert!(ledger.close_trade(&t.id, 90.0, TradeStatus::ManualExit).is_some());
        assert!(ledger.close_trade(&t.id, 90.0, TradeStatus::ManualExit).is_none());
    }

    #[test]
    fn test_stats_win_rate_and_today() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        assert_eq!(ledger.ledger_stats(T0).win_rate, 0.0);

        let a = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s1", 23000.0, None));
        let b = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Put, 23000), "s2", 23000.0, None));
        opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23100), "s3", 23000.0, None));

        ledger.close_trade_at(&a.id, 125.0, TradeStatus::TargetHit, T0 + 10);
        ledger.close_trade_at(&b.id, 88.0, TradeStatus::SlHit, T0 + 20);

        let stats = ledger.ledger_stats(T0 + 30);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.open_trades, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.win_rate, 50.0);
        assert_eq!(stats.total_pnl, 25.0 * 650.0 - 12.0 * 650.0);
        assert_eq!(stats.todays_trades, 3);
        assert_eq!(stats.todays_pnl, stats.total_pnl);

        // Next day: nothing opened today
        let tomorrow = ledger.ledger_stats(T0 + 86_400_000);
        assert_eq!(tomorrow.todays_trades, 0);
        assert_eq!(tomorrow.todays_pnl, 0.0);
    }

    #[test]
    fn test_close_callback_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let callback: Arc<TradeCloseCallback> = Arc::new(Box::new(move |_t: &VirtualTrade| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default()).with_close_callback(callback);

        opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s", 23000.0, None));
        ledger.mark_to_market(Instrument::Nifty, 23100.0, T0 + 1);
        ledger.mark_to_market(Instrument::Nifty, 23200.0, T0 + 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exit_message_mentions_status_and_roi() {
        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default());
        let t = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s", 23000.0, None));
        let closed = ledger.close_trade(&t.id, 125.0, TradeStatus::TargetHit).unwrap();
        let msg = ledger.exit_message(&closed);
        assert!(msg.contains("TARGET ACHIEVED"));
        assert!(msg.contains("ROI: +25.00%"));
        assert!(ledger.showcase_message(T0).contains("CALL NIFTY 23000"));
    }

    #[tokio::test]
    async fn test_archive_and_state_round_trip() {
        let dir = std::env::temp_dir().join(format!("chainpulse_ledger_{}", uuid::Uuid::new_v4()));
        let persistence = Arc::new(CsvPersistence::new(dir.to_str().unwrap()).unwrap());
        let state_path = dir.join("virtual_trades.json");

        let ledger = VirtualTradeLedger::new(PaperTradingConfig::default())
            .with_persistence(persistence.clone())
            .with_state_file(state_path.clone());
        let a = opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23000), "s1", 23000.0, None));
        opened(ledger.open_trade(&accepted(Instrument::Nifty, Direction::Put, 23000), "s2", 23000.0, None));
        ledger.close_trade(&a.id, 125.0, TradeStatus::TargetHit).unwrap();

        assert_eq!(ledger.pending_archive_len(), 1);
        ledger.flush_archive().await;
        assert_eq!(ledger.pending_archive_len(), 0);
        assert_eq!(persistence.load_trade_history(1).unwrap().len(), 1);

        ledger.save_state().unwrap();
        let restored = VirtualTradeLedger::new(PaperTradingConfig::default()).with_state_file(state_path);
        restored.load_state().unwrap();
        assert_eq!(restored.open_count(), 1);
        assert_eq!(restored.ledger_stats(T0).wins, 1);

        // Ids keep counting after restart
        let c = opened(restored.open_trade(&accepted(Instrument::Nifty, Direction::Call, 23100), "s3", 23000.0, None));
        assert_eq!(c.id, "VT-3");

        let _ = fs::remove_dir_all(&dir);
    }
}
