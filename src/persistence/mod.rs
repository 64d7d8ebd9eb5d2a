//! Persistence Module
//!
//! Two kinds of storage:
//! - JSON state snapshots owned by each service (`save_state`/`load_state`),
//!   written through a temp file + rename so a crash never leaves half a file
//! - Append-only daily CSV logs of accepted signals, closed trades and
//!   rejected candidates

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// JSON state files
// ─────────────────────────────────────────────────────────────────────────────

/// Pretty-print `state` to `path` atomically
pub fn write_json_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
    }

    let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }

    debug!(path = %path.display(), "💾 State saved");
    Ok(())
}

/// Read a JSON state file. `Ok(None)` when the file does not exist.
pub fn read_json_state<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let state = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(state))
}

// ─────────────────────────────────────────────────────────────────────────────
// CSV records
// ─────────────────────────────────────────────────────────────────────────────

/// Accepted signal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: i64,
    pub signal_id: String,
    pub instrument: String,
    pub direction: String,
    pub strike: i64,
    pub confidence: f64,
    pub source: String,
    pub horizon: String,
    pub spot: f64,
    pub target_points: f64,
    pub stop_loss_points: f64,
    pub notified: bool,
    #[serde(default)]
    pub trade_id: Option<String>,
    pub rationale: String,
}

/// Closed virtual trade row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub signal_id: String,
    pub instrument: String,
    pub direction: String,
    pub strike: i64,
    pub status: String,
    pub entry_spot: f64,
    pub exit_spot: f64,
    pub entry_premium: f64,
    pub exit_premium: f64,
    pub position_size: u32,
    pub realized_pnl: f64,
    pub points_captured: f64,
    pub roi_pct: f64,
    pub opened_at: i64,
    pub closed_at: i64,
}

/// Rejected candidate row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: i64,
    pub instrument: String,
    pub direction: String,
    pub strike: i64,
    pub confidence: f64,
    pub source: String,
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily CSV writers
// ─────────────────────────────────────────────────────────────────────────────

/// Appends to `{dir}/{prefix}_YYYY-MM-DD.csv`, switching file when the date changes.
/// Nothing is created until the first row arrives.
struct DailyWriter {
    dir: PathBuf,
    prefix: &'static str,
    current: Option<(NaiveDate, csv::Writer<fs::File>)>,
}

impl DailyWriter {
    fn new(dir: PathBuf, prefix: &'static str) -> Self {
        Self {
            dir,
            prefix,
            current: None,
        }
    }

    fn file_name(prefix: &str, date: NaiveDate) -> String {
        format!("{}_{}.csv", prefix, date.format("%Y-%m-%d"))
    }

    fn append<T: Serialize>(&mut self, record: &T, date: NaiveDate) -> Result<()> {
        if self.current.as_ref().map(|(d, _)| *d) != Some(date) {
            if let Some((_, mut previous)) = self.current.take() {
                previous.flush().ok();
            }
            let writer =
                CsvPersistence::create_writer(&self.dir, &Self::file_name(self.prefix, date))?;
            self.current = Some((date, writer));
        }

        if let Some((_, writer)) = self.current.as_mut() {
            writer
                .serialize(record)
                .with_context(|| format!("Failed to write {} record", self.prefix))?;
            writer
                .flush()
                .with_context(|| format!("Failed to flush {} writer", self.prefix))?;
        }
        Ok(())
    }
}

/// CSV persistence manager
///
/// Rows land in the file of the local date of their own timestamp, so a
/// record written late still goes to the session it belongs to.
pub struct CsvPersistence {
    data_dir: PathBuf,
    offset: FixedOffset,
    signal_writer: Arc<AsyncRwLock<DailyWriter>>,
    trade_writer: Arc<AsyncRwLock<DailyWriter>>,
    decision_writer: Arc<AsyncRwLock<DailyWriter>>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager. Dates are UTC until `with_utc_offset`.
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        for sub in ["signals", "trades", "decisions"] {
            fs::create_dir_all(data_dir.join(sub))?;
        }

        info!(path = %data_dir.display(), "📁 CSV persistence ready");

        Ok(Self {
            signal_writer: Arc::new(AsyncRwLock::new(DailyWriter::new(data_dir.join("signals"), "signals"))),
            trade_writer: Arc::new(AsyncRwLock::new(DailyWriter::new(data_dir.join("trades"), "trades"))),
            decision_writer: Arc::new(AsyncRwLock::new(DailyWriter::new(
                data_dir.join("decisions"),
                "decisions",
            ))),
            data_dir,
            offset: Utc.fix(),
        })
    }

    /// Name daily files by the session's local date
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    fn local_date(&self, ts_ms: i64) -> NaiveDate {
        self.offset
            .timestamp_millis_opt(ts_ms)
            .single()
            .unwrap_or_else(|| Utc::now().with_timezone(&self.offset))
            .date_naive()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Save an accepted signal
    pub async fn save_signal(&self, record: SignalRecord) -> Result<()> {
        let date = self.local_date(record.timestamp);
        self.signal_writer.write().await.append(&record, date)
    }

    /// Save a closed trade
    pub async fn save_trade(&self, record: TradeRecord) -> Result<()> {
        let date = self.local_date(record.closed_at);
        self.trade_writer.write().await.append(&record, date)
    }

    /// Save a rejected candidate
    pub async fn save_decision(&self, record: DecisionRecord) -> Result<()> {
        let date = self.local_date(record.timestamp);
        self.decision_writer.write().await.append(&record, date)
    }

    /// Load closed trades of the last `days` days
    pub fn load_trade_history(&self, days: u32) -> Result<Vec<TradeRecord>> {
        let mut records = Vec::new();
        let today = Utc::now().with_timezone(&self.offset).date_naive();

        for i in 0..days {
            let date = today - chrono::Duration::days(i as i64);
            let path = self
                .data_dir
                .join("trades")
                .join(DailyWriter::file_name("trades", date));

            if path.exists() {
                let file = fs::File::open(&path).context("Failed to open trade file")?;
                let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
                for result in reader.deserialize() {
                    let record: TradeRecord =
                        result.context("Failed to deserialize trade record")?;
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.closed_at);
        Ok(records)
    }
}
