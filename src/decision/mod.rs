//! Signal Decision Coordinator
//!
//! Guarded acceptance of candidate signals. Checks run in a fixed order:
//! 1. NEUTRAL candidates are dropped
//! 2. Confidence must reach the minimum for the candidate's source
//! 3. Flip-flop guard: the opposite direction on the same instrument was
//!    accepted too recently, so the candidate is suppressed entirely
//! 4. Repeat-alert guard: the same (instrument, direction, strike) was
//!    notified within the cooldown, so the signal is accepted with
//!    `notify = false`
//!
//! State is partitioned per instrument and survives restarts through
//! `decision_state.json`.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::persistence::{read_json_state, write_json_state, DecisionRecord};
use crate::types::{AcceptedSignal, CandidateSignal, Direction, Instrument, SignalSource};

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Minimum confidence (0-100) for oracle candidates
    pub oracle_min_confidence: f64,
    /// Minimum confidence (0-100) for rule-engine candidates
    pub rule_min_confidence: f64,
    pub flip_flop_window_ms: i64,
    /// Repeat alerts for one key are muted for this long after a notification
    pub repeat_cooldown_ms: i64,
    /// Per-instrument alert map size before it is cleared
    pub dedup_capacity: usize,
    pub max_rule_candidates_per_cycle: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            oracle_min_confidence: 55.0,
            rule_min_confidence: 40.0,
            flip_flop_window_ms: 5 * 60 * 1000,
            repeat_cooldown_ms: 10 * 60 * 1000,
            dedup_capacity: 100,
            max_rule_candidates_per_cycle: 1,
        }
    }
}

impl DecisionConfig {
    pub fn min_confidence(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::Oracle => self.oracle_min_confidence,
            SignalSource::RuleEngine => self.rule_min_confidence,
        }
    }
}

/// Why a candidate did not become an `AcceptedSignal`
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Neutral,
    LowConfidence { confidence: f64, minimum: f64 },
    FlipFlop { opposite: Direction, elapsed_ms: i64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Neutral => write!(f, "neutral signal"),
            Rejection::LowConfidence { confidence, minimum } => {
                write!(f, "confidence {:.1} below minimum {:.1}", confidence, minimum)
            }
            Rejection::FlipFlop { opposite, elapsed_ms } => write!(
                f,
                "flip-flop: {} accepted {}s ago",
                opposite,
                elapsed_ms / 1000
            ),
        }
    }
}

impl Rejection {
    pub fn to_record(&self, candidate: &CandidateSignal, now_ms: i64) -> DecisionRecord {
        DecisionRecord {
            timestamp: now_ms,
            instrument: candidate.instrument.to_string(),
            direction: candidate.direction.to_string(),
            strike: candidate.strike,
            confidence: candidate.confidence,
            source: candidate.source.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Guard state for one instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentGuard {
    pub last_call_at: Option<i64>,
    pub last_put_at: Option<i64>,
    /// `"{direction}_{strike}"` → last notification time
    pub last_notified: HashMap<String, i64>,
}

impl InstrumentGuard {
    fn last_accepted(&self, direction: Direction) -> Option<i64> {
        match direction {
            Direction::Call => self.last_call_at,
            Direction::Put => self.last_put_at,
            Direction::Neutral => None,
        }
    }

    fn mark_accepted(&mut self, direction: Direction, now_ms: i64) {
        match direction {
            Direction::Call => self.last_call_at = Some(now_ms),
            Direction::Put => self.last_put_at = Some(now_ms),
            Direction::Neutral => {}
        }
    }

    fn alert_key(direction: Direction, strike: i64) -> String {
        format!("{}_{}", direction, strike)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionState {
    pub instruments: HashMap<Instrument, InstrumentGuard>,
    pub saved_at: i64,
}

pub struct SignalDecisionCoordinator {
    config: DecisionConfig,
    guards: RwLock<HashMap<Instrument, InstrumentGuard>>,
    state_file: Option<PathBuf>,
}

impl SignalDecisionCoordinator {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            guards: RwLock::new(HashMap::new()),
            state_file: None,
        }
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Run the acceptance checks. On success the guard state is updated.
    pub fn evaluate(&self, candidate: CandidateSignal, now_ms: i64) -> Result<AcceptedSignal, Rejection> {
        let Some(opposite) = candidate.direction.opposite() else {
            info!(instrument = %candidate.instrument, source = %candidate.source, "⏸️ [DECISION] Neutral signal dropped");
            return Err(Rejection::Neutral);
        };

        let minimum = self.config.min_confidence(candidate.source);
        if candidate.confidence < minimum {
            let rejection = Rejection::LowConfidence {
                confidence: candidate.confidence,
                minimum,
            };
            info!(
                instrument = %candidate.instrument,
                direction = %candidate.direction,
                confidence = candidate.confidence,
                minimum = minimum,
                "⏸️ [DECISION] Rejected: {}", rejection
            );
            return Err(rejection);
        }

        let mut guards = self.guards.write().unwrap_or_else(PoisonError::into_inner);
        let guard = guards.entry(candidate.instrument).or_default();

        if let Some(last_opposite) = guard.last_accepted(opposite) {
            let elapsed_ms = now_ms - last_opposite;
            if elapsed_ms < self.config.flip_flop_window_ms {
                let rejection = Rejection::FlipFlop { opposite, elapsed_ms };
                info!(
                    instrument = %candidate.instrument,
                    direction = %candidate.direction,
                    strike = candidate.strike,
                    "🔁 [DECISION] Rejected: {}", rejection
                );
                return Err(rejection);
            }
        }

        guard.mark_accepted(candidate.direction, now_ms);

        let alert_key = InstrumentGuard::alert_key(candidate.direction, candidate.strike);
        let notify = match guard.last_notified.get(&alert_key) {
            Some(&last) => now_ms - last > self.config.repeat_cooldown_ms,
            None => true,
        };
        if notify {
            if guard.last_notified.len() >= self.config.dedup_capacity {
                debug!(instrument = %candidate.instrument, "Alert map full, clearing");
                guard.last_notified.clear();
            }
            guard.last_notified.insert(alert_key, now_ms);
        }

        info!(
            instrument = %candidate.instrument,
            direction = %candidate.direction,
            strike = candidate.strike,
            confidence = candidate.confidence,
            source = %candidate.source,
            notify = notify,
            "✅ [DECISION] Signal accepted"
        );

        Ok(AcceptedSignal {
            key: candidate.dedup_key(),
            candidate,
            accepted_at: now_ms,
            notify,
        })
    }

    /// Drop alert entries past the cooldown and direction stamps past the flip-flop window
    pub fn prune(&self, now_ms: i64) -> usize {
        let cooldown = self.config.repeat_cooldown_ms;
        let window = self.config.flip_flop_window_ms;
        let mut guards = self.guards.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for guard in guards.values_mut() {
            let before = guard.last_notified.len();
            guard.last_notified.retain(|_, &mut at| now_ms - at <= cooldown);
            removed += before - guard.last_notified.len();
            if guard.last_call_at.is_some_and(|at| now_ms - at >= window) {
                guard.last_call_at = None;
            }
            if guard.last_put_at.is_some_and(|at| now_ms - at >= window) {
                guard.last_put_at = None;
            }
        }
        guards.retain(|_, g| *g != InstrumentGuard::default());
        removed
    }

    pub fn guard(&self, instrument: Instrument) -> Option<InstrumentGuard> {
        self.guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instrument)
            .cloned()
    }

    pub fn save_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let state = DecisionState {
            instruments: self.guards.read().unwrap_or_else(PoisonError::into_inner).clone(),
            saved_at: Utc::now().timestamp_millis(),
        };
        write_json_state(path, &state)
    }

    pub fn load_state(&self) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let Some(state) = read_json_state::<DecisionState>(path)? else {
            info!(path = %path.display(), "💾 [DECISION] No state file found, starting fresh");
            return Ok(());
        };
        info!(
            path = %path.display(),
            instruments = state.instruments.len(),
            "💾 [DECISION] Guard state restored"
        );
        *self.guards.write().unwrap_or_else(PoisonError::into_inner) = state.instruments;
        Ok(())
    }
}
