//! Rule Strategy Engine - deterministic fallback signal generator
//!
//! Used whenever the oracle is disabled, times out or reports failure.
//!
//! For every liquid strike inside a window around ATM two independent
//! weighted 5-factor scores are evaluated:
//!
//! CALL (bullish):
//! 1. PCR below the bullish threshold
//! 2. Put OI building (support forming)
//! 3. Call OI unwinding at/above resistance
//! 4. Spot above VWAP beyond the deviation threshold
//! 5. Spot near and at/above support (bounce)
//!
//! PUT (bearish) mirrors every factor.
//!
//! A side is emitted only when at least `min_factors` fire; its confidence is
//! the capped sum of the fired weights.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::indicators::MarketIndicatorSet;
use crate::types::{CandidateSignal, Direction, SignalSource, StrikeSnapshot, TradeHorizon};

/// Weight of each factor. The same weights apply to both sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub pcr: f64,
    pub oi_build: f64,
    pub oi_unwind: f64,
    pub vwap: f64,
    pub level_proximity: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            pcr: 0.20,
            oi_build: 0.25,
            oi_unwind: 0.20,
            vwap: 0.15,
            level_proximity: 0.20,
        }
    }
}

/// Rule strategy configuration
#[derive(Debug, Clone)]
pub struct RuleStrategyConfig {
    /// PCR below this is bullish
    pub pcr_bullish_threshold: f64,
    /// PCR above this is bearish
    pub pcr_bearish_threshold: f64,
    /// OI change (%) that counts as significant building/unwinding
    pub oi_change_significant: f64,
    /// Spot-vs-VWAP deviation (%) required for the momentum factor
    pub vwap_deviation_pct: f64,
    /// Strikes on each side of ATM to evaluate
    pub atm_window_strikes: i64,
    /// Strike is skipped unless one leg has at least this much OI
    pub min_oi: u64,
    /// Max distance (points) between spot and a level for the proximity factor
    pub level_proximity_points: f64,
    pub weights: FactorWeights,
    pub min_factors: usize,
    pub default_target_points: f64,
    pub default_stop_loss_points: f64,
}

impl Default for RuleStrategyConfig {
    fn default() -> Self {
        Self {
            pcr_bullish_threshold: 0.7,
            pcr_bearish_threshold: 1.3,
            oi_change_significant: 5.0,
            vwap_deviation_pct: 0.5,
            atm_window_strikes: 5,
            min_oi: 10_000,
            level_proximity_points: 100.0,
            weights: FactorWeights::default(),
            min_factors: 2,
            default_target_points: 25.0,
            default_stop_loss_points: 12.0,
        }
    }
}

/// A rule-engine opportunity on the native 0.0-1.0 confidence scale
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSignal {
    pub direction: Direction,
    pub strike: i64,
    pub confidence: f64,
    pub factors_fired: usize,
    pub reasons: Vec<String>,
    pub pcr: f64,
    /// OI change of the leg being traded
    pub oi_change: f64,
    pub spot: f64,
    pub vwap: f64,
}

pub struct RuleStrategyEngine {
    config: RuleStrategyConfig,
}

impl Default for RuleStrategyEngine {
    fn default() -> Self {
        Self::new(RuleStrategyConfig::default())
    }
}

impl RuleStrategyEngine {
    pub fn new(config: RuleStrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleStrategyConfig {
        &self.config
    }

    /// Evaluate every liquid strike near ATM. Sorted by confidence, highest first.
    pub fn analyze(&self, set: &MarketIndicatorSet, strikes: &[StrikeSnapshot]) -> Vec<RuleSignal> {
        let window = self.config.atm_window_strikes * set.instrument.strike_step();
        let nearby: Vec<&StrikeSnapshot> = strikes
            .iter()
            .filter(|s| (s.strike - set.atm_strike).abs() <= window)
            .collect();

        if nearby.is_empty() {
            warn!(instrument = %set.instrument, atm = set.atm_strike, "No nearby strikes found for analysis");
            return Vec::new();
        }

        let mut signals = Vec::new();
        for strike in nearby {
            if strike.call_oi < self.config.min_oi && strike.put_oi < self.config.min_oi {
                continue;
            }
            if let Some(sig) = self.check_call(strike, set) {
                signals.push(sig);
            }
            if let Some(sig) = self.check_put(strike, set) {
                signals.push(sig);
            }
        }

        signals.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.strike.cmp(&b.strike))
        });

        debug!(
            instrument = %set.instrument,
            count = signals.len(),
            "Rule engine evaluated chain"
        );
        signals
    }

    /// Top `max` opportunities converted to 0-100 candidates
    pub fn candidates(
        &self,
        set: &MarketIndicatorSet,
        strikes: &[StrikeSnapshot],
        max: usize,
    ) -> Vec<CandidateSignal> {
        self.analyze(set, strikes)
            .into_iter()
            .take(max)
            .map(|sig| self.to_candidate(set, sig))
            .collect()
    }

    pub fn to_candidate(&self, set: &MarketIndicatorSet, sig: RuleSignal) -> CandidateSignal {
        CandidateSignal {
            instrument: set.instrument,
            direction: sig.direction,
            confidence: ((sig.confidence * 100.0) * 10.0).round() / 10.0,
            strike: sig.strike,
            target_points: self.config.default_target_points,
            stop_loss_points: self.config.default_stop_loss_points,
            horizon: TradeHorizon::Scalp,
            rationale: sig.reasons.join("; "),
            source: SignalSource::RuleEngine,
        }
    }

    fn vwap_deviation_pct(set: &MarketIndicatorSet) -> Option<f64> {
        if set.vwap > 0.0 {
            Some((set.spot - set.vwap) / set.vwap * 100.0)
        } else {
            None
        }
    }

    fn check_call(&self, strike: &StrikeSnapshot, set: &MarketIndicatorSet) -> Option<RuleSignal> {
        let cfg = &self.config;
        let w = &cfg.weights;
        let pcr = set.pcr.pcr_oi;
        let mut reasons = Vec::new();
        let mut weights = Vec::new();

        if pcr < cfg.pcr_bullish_threshold {
            reasons.push(format!("Low PCR ({:.2}) indicates bullish sentiment", pcr));
            weights.push(w.pcr);
        }

        if strike.put_oi_change_pct >= cfg.oi_change_significant {
            reasons.push(format!(
                "Put OI increased by {:.1}% (support building)",
                strike.put_oi_change_pct
            ));
            weights.push(w.oi_build);
        }

        if set.levels.resistance > 0
            && strike.strike >= set.levels.resistance
            && strike.call_oi_change_pct <= -cfg.oi_change_significant
        {
            reasons.push(format!(
                "Call OI decreased by {:.1}% at resistance (unwinding)",
                strike.call_oi_change_pct.abs()
            ));
            weights.push(w.oi_unwind);
        }

        if let Some(dev) = Self::vwap_deviation_pct(set) {
            if dev > cfg.vwap_deviation_pct {
                reasons.push(format!("Price {:.2}% above VWAP (bullish momentum)", dev));
                weights.push(w.vwap);
            }
        }

        let support = set.levels.support;
        if support > 0
            && (set.spot - support as f64).abs() <= cfg.level_proximity_points
            && set.spot >= support as f64
        {
            reasons.push(format!("Price near support at {} (potential bounce)", support));
            weights.push(w.level_proximity);
        }

        self.build(Direction::Call, strike, set, strike.call_oi_change_pct, reasons, weights)
    }

    fn check_put(&self, strike: &StrikeSnapshot, set: &MarketIndicatorSet) -> Option<RuleSignal> {
        let cfg = &self.config;
        let w = &cfg.weights;
        let pcr = set.pcr.pcr_oi;
        let mut reasons = Vec::new();
        let mut weights = Vec::new();

        if pcr > cfg.pcr_bearish_threshold {
            reasons.push(format!("High PCR ({:.2}) indicates bearish sentiment", pcr));
            weights.push(w.pcr);
        }

        if strike.call_oi_change_pct >= cfg.oi_change_significant {
            reasons.push(format!(
                "Call OI increased by {:.1}% (resistance building)",
                strike.call_oi_change_pct
            ));
            weights.push(w.oi_build);
        }

        if set.levels.support > 0
            && strike.strike <= set.levels.support
            && strike.put_oi_change_pct <= -cfg.oi_change_significant
        {
            reasons.push(format!(
                "Put OI decreased by {:.1}% at support (breaking)",
                strike.put_oi_change_pct.abs()
            ));
            weights.push(w.oi_unwind);
        }

        if let Some(dev) = Self::vwap_deviation_pct(set) {
            if -dev > cfg.vwap_deviation_pct {
                reasons.push(format!("Price {:.2}% below VWAP (bearish momentum)", -dev));
                weights.push(w.vwap);
            }
        }

        let resistance = set.levels.resistance;
        if resistance > 0
            && (set.spot - resistance as f64).abs() <= cfg.level_proximity_points
            && set.spot <= resistance as f64
        {
            reasons.push(format!(
                "Price near resistance at {} (potential rejection)",
                resistance
            ));
            weights.push(w.level_proximity);
        }

        self.build(Direction::Put, strike, set, strike.put_oi_change_pct, reasons, weights)
    }

    fn build(
        &self,
        direction: Direction,
        strike: &StrikeSnapshot,
        set: &MarketIndicatorSet,
        oi_change: f64,
        reasons: Vec<String>,
        weights: Vec<f64>,
    ) -> Option<RuleSignal> {
        if weights.len() < self.config.min_factors {
            return None;
        }
        let confidence = weights.iter().sum::<f64>().min(1.0);

        Some(RuleSignal {
            direction,
            strike: strike.strike,
            confidence,
            factors_fired: weights.len(),
            reasons,
            pcr: set.pcr.pcr_oi,
            oi_change,
            spot: set.spot,
            vwap: set.vwap,
        })
    }
}
