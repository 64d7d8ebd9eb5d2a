//! Per-instrument OI baseline used for OI-change computation
//!
//! Holds the last seen (call OI, put OI) per strike. Must be reset at session
//! boundaries so yesterday's close is never compared with today's open.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::persistence::{read_json_state, write_json_state};
use crate::types::{Instrument, StrikeSnapshot};

/// Serializable cache state (instrument keyed by display string)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OiCacheState {
    pub instruments: HashMap<String, HashMap<i64, (u64, u64)>>,
    pub saved_at: i64,
}

#[derive(Debug, Default)]
pub struct OiChangeCache {
    baselines: RwLock<HashMap<Instrument, HashMap<i64, (u64, u64)>>>,
    state_file: Option<PathBuf>,
    /// `saved_at` of the state file this cache was restored from
    restored_at: RwLock<Option<i64>>,
}

fn pct_change(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    ((current as f64 - previous as f64) / previous as f64) * 100.0
}

impl OiChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Write OI change % into each strike and replace the baseline.
    /// Strikes without a prior observation get 0.0.
    pub fn apply(&self, instrument: Instrument, strikes: &mut [StrikeSnapshot]) {
        let mut baselines = match self.baselines.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let baseline = baselines.entry(instrument).or_default();

        for s in strikes.iter_mut() {
            match baseline.get(&s.strike) {
                Some(&(prev_call, prev_put)) => {
                    s.call_oi_change_pct = pct_change(s.call_oi, prev_call);
                    s.put_oi_change_pct = pct_change(s.put_oi, prev_put);
                }
                None => {
                    s.call_oi_change_pct = 0.0;
                    s.put_oi_change_pct = 0.0;
                }
            }
            baseline.insert(s.strike, (s.call_oi, s.put_oi));
        }
    }

    /// Forget the baseline of one instrument
    pub fn reset(&self, instrument: Instrument) {
        if let Ok(mut baselines) = self.baselines.write() {
            baselines.remove(&instrument);
        }
        info!(instrument = %instrument, "OI snapshot reset");
    }

    /// Forget every baseline (session boundary)
    pub fn reset_all(&self) {
        if let Ok(mut baselines) = self.baselines.write() {
            baselines.clear();
        }
        info!("OI snapshot reset for all instruments");
    }

    pub fn restored_at(&self) -> Option<i64> {
        self.restored_at.read().map(|r| *r).unwrap_or(None)
    }

    pub fn tracked_strikes(&self, instrument: Instrument) -> usize {
        self.baselines
            .read()
            .map(|b| b.get(&instrument).map(|m| m.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn save_state(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let instruments = match self.baselines.read() {
            Ok(b) => b
                .iter()
                .map(|(instrument, strikes)| (instrument.to_string(), strikes.clone()))
                .collect(),
            Err(_) => HashMap::new(),
        };
        let state = OiCacheState {
            instruments,
            saved_at: chrono::Utc::now().timestamp_millis(),
        };
        write_json_state(path, &state)
    }

    pub fn load_state(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let Some(state) = read_json_state::<OiCacheState>(path)? else {
            info!(path = %path.display(), "No OI cache file found, starting fresh");
            return Ok(());
        };

        if let Ok(mut baselines) = self.baselines.write() {
            baselines.clear();
            for (name, strikes) in state.instruments {
                match Instrument::from_str(&name) {
                    Some(instrument) => {
                        baselines.insert(instrument, strikes);
                    }
                    None => warn!(instrument = %name, "Dropping OI baseline for unknown instrument"),
                }
            }
        }
        if let Ok(mut restored) = self.restored_at.write() {
            *restored = Some(state.saved_at);
        }
        info!(path = %path.display(), "OI cache loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn strike(strike: i64, call_oi: u64, put_oi: u64) -> StrikeSnapshot {
        StrikeSnapshot {
            strike,
            call_oi,
            put_oi,
            ..Default::default()
        }
    }

    #[test]
    fn first_observation_is_zero_change() {
        let cache = OiChangeCache::new();
        let mut chain = vec![strike(23000, 1000, 2000)];
        cache.apply(Instrument::Nifty, &mut chain);
        assert_eq!(chain[0].call_oi_change_pct, 0.0);
        assert_eq!(chain[0].put_oi_change_pct, 0.0);
    }

    #[test]
    fn change_is_relative_to_immediately_prior_snapshot() {
        let cache = OiChangeCache::new();
        cache.apply(Instrument::Nifty, &mut [strike(23000, 1000, 2000)]);
        cache.apply(Instrument::Nifty, &mut [strike(23000, 1100, 1800)]);

        let mut third = vec![strike(23000, 1210, 1800)];
        cache.apply(Instrument::Nifty, &mut third);
        assert!((third[0].call_oi_change_pct - 10.0).abs() < 1e-9);
        assert_eq!(third[0].put_oi_change_pct, 0.0);
    }

    #[test]
    fn instruments_do_not_share_baselines() {
        let cache = OiChangeCache::new();
        cache.apply(Instrument::Nifty, &mut [strike(23000, 1000, 1000)]);

        let mut other = vec![strike(23000, 5000, 5000)];
        cache.apply(Instrument::Sensex, &mut other);
        assert_eq!(other[0].call_oi_change_pct, 0.0);
    }

    #[test]
    fn reset_clears_baseline() {
        let cache = OiChangeCache::new();
        cache.apply(Instrument::Nifty, &mut [strike(23000, 1000, 1000)]);
        cache.reset_all();
        assert_eq!(cache.tracked_strikes(Instrument::Nifty), 0);

        let mut chain = vec![strike(23000, 3000, 3000)];
        cache.apply(Instrument::Nifty, &mut chain);
        assert_eq!(chain[0].call_oi_change_pct, 0.0);
    }

    #[test]
    fn zero_previous_oi_yields_zero_change() {
        let cache = OiChangeCache::new();
        cache.apply(Instrument::Nifty, &mut [strike(23000, 0, 0)]);
        let mut chain = vec![strike(23000, 500, 500)];
        cache.apply(Instrument::Nifty, &mut chain);
        assert_eq!(chain[0].call_oi_change_pct, 0.0);
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = std::env::temp_dir().join(format!("chainpulse_oi_cache_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("oi_cache.json");

        let cache = OiChangeCache::new().with_state_file(path.clone());
        cache.apply(Instrument::BankNifty, &mut [strike(48000, 1000, 2000)]);
        cache.save_state().unwrap();

        let restored = OiChangeCache::new().with_state_file(path);
        restored.load_state().unwrap();
        let mut chain = vec![strike(48000, 1500, 2000)];
        restored.apply(Instrument::BankNifty, &mut chain);
        assert_eq!(chain[0].call_oi_change_pct, 50.0);

        let _ = fs::remove_dir_all(dir);
    }
}
