//! Indicator Engine - option-chain positioning and price indicators
//!
//! Computes, per polling cycle:
//! - PCR (Put-Call Ratio) on open interest and on volume
//! - OI change % per strike against the prior snapshot
//! - VWAP of the underlying from intraday candles
//! - ATM strike, max pain, OI-based support/resistance
//! - Top OI and top OI-change strikes per leg
//!
//! Every function degrades to zero/empty on missing input; none of them fail.

pub mod oi_cache;
pub use oi_cache::OiChangeCache;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{Candle, Instrument, MarketSnapshot, StrikeSnapshot};

/// Put-call ratios and chain totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PcrSummary {
    pub pcr_oi: f64,
    pub pcr_volume: f64,
    pub total_call_oi: u64,
    pub total_put_oi: u64,
    pub total_call_volume: u64,
    pub total_put_volume: u64,
}

/// OI-derived support and resistance strikes (0 when the chain is empty)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: i64,
    pub resistance: i64,
}

/// Highest-OI strikes per leg, as (strike, oi)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopOiStrikes {
    pub call: Vec<(i64, u64)>,
    pub put: Vec<(i64, u64)>,
}

/// Largest absolute OI changes per leg, as (strike, change %)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopOiChangeStrikes {
    pub call: Vec<(i64, f64)>,
    pub put: Vec<(i64, f64)>,
}

/// Everything derived from one snapshot. Ephemeral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketIndicatorSet {
    pub instrument: Instrument,
    pub ts: i64,
    pub spot: f64,
    pub atm_strike: i64,
    pub pcr: PcrSummary,
    pub vwap: f64,
    pub levels: SupportResistance,
    pub max_pain: Option<i64>,
    pub top_oi: TopOiStrikes,
    pub top_oi_change: TopOiChangeStrikes,
}

/// Indicator parameters
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    /// Only strikes within this distance of spot count for support/resistance
    pub sr_range_limit: f64,
    /// How many strikes to report in the top-OI lists
    pub top_n: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sr_range_limit: 500.0,
            top_n: 3,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Put-call ratios. A zero denominator yields 0.0.
pub fn compute_pcr(snapshots: &[StrikeSnapshot]) -> PcrSummary {
    if snapshots.is_empty() {
        warn!("No strike data available for PCR calculation");
        return PcrSummary::default();
    }

    let total_call_oi: u64 = snapshots.iter().map(|s| s.call_oi).sum();
    let total_put_oi: u64 = snapshots.iter().map(|s| s.put_oi).sum();
    let total_call_volume: u64 = snapshots.iter().map(|s| s.call_volume).sum();
    let total_put_volume: u64 = snapshots.iter().map(|s| s.put_volume).sum();

    let pcr_oi = if total_call_oi > 0 {
        total_put_oi as f64 / total_call_oi as f64
    } else {
        0.0
    };
    let pcr_volume = if total_call_volume > 0 {
        total_put_volume as f64 / total_call_volume as f64
    } else {
        0.0
    };

    PcrSummary {
        pcr_oi: round_to(pcr_oi, 4),
        pcr_volume: round_to(pcr_volume, 4),
        total_call_oi,
        total_put_oi,
        total_call_volume,
        total_put_volume,
    }
}

/// Annotate each strike with its OI change % against `cache`, then store the
/// current OI as the new baseline.
pub fn compute_oi_change(
    instrument: Instrument,
    snapshots: &mut [StrikeSnapshot],
    cache: &OiChangeCache,
) {
    cache.apply(instrument, snapshots);
}

/// VWAP = Σ(typical × volume) / Σvolume, rounded to 2 decimals. 0.0 without volume.
pub fn compute_vwap(candles: &[Candle]) -> f64 {
    let mut sum_pv = 0.0;
    let mut sum_volume = 0.0;

    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        sum_pv += typical * c.volume;
        sum_volume += c.volume;
    }

    if sum_volume > 0.0 {
        round_to(sum_pv / sum_volume, 2)
    } else {
        0.0
    }
}

/// Nearest multiple of `step` to `spot`, halves rounding up.
pub fn find_atm_strike(spot: f64, step: i64) -> i64 {
    if step <= 0 || !spot.is_finite() {
        return 0;
    }
    let step_f = step as f64;
    ((spot / step_f) + 0.5).floor() as i64 * step
}

fn top_by<T, F>(snapshots: &[StrikeSnapshot], n: usize, value: F) -> Vec<(i64, T)>
where
    T: Copy,
    F: Fn(&StrikeSnapshot) -> (T, f64),
{
    let mut ranked: Vec<(i64, T, f64)> = snapshots
        .iter()
        .map(|s| {
            let (reported, rank) = value(s);
            (s.strike, reported, rank)
        })
        .collect();
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(k, v, _)| (k, v)).collect()
}

/// Top-n strikes by OI per leg, descending; ties go to the lower strike.
pub fn find_top_oi_strikes(snapshots: &[StrikeSnapshot], n: usize) -> TopOiStrikes {
    TopOiStrikes {
        call: top_by(snapshots, n, |s| (s.call_oi, s.call_oi as f64)),
        put: top_by(snapshots, n, |s| (s.put_oi, s.put_oi as f64)),
    }
}

/// Top-n strikes by |OI change %| per leg; the reported change keeps its sign.
pub fn find_top_oi_change_strikes(snapshots: &[StrikeSnapshot], n: usize) -> TopOiChangeStrikes {
    TopOiChangeStrikes {
        call: top_by(snapshots, n, |s| {
            (s.call_oi_change_pct, s.call_oi_change_pct.abs())
        }),
        put: top_by(snapshots, n, |s| {
            (s.put_oi_change_pct, s.put_oi_change_pct.abs())
        }),
    }
}

/// Strike at which option writers lose the least if expiry settles there.
///
/// Loss at candidate c = Σ max(0, c−k)·callOI(k) + max(0, k−c)·putOI(k).
/// Ties resolve to the lowest candidate so the result does not depend on input order.
pub fn compute_max_pain(snapshots: &[StrikeSnapshot]) -> Option<i64> {
    let mut candidates: Vec<i64> = snapshots.iter().map(|s| s.strike).collect();
    candidates.sort_unstable();
    candidates.dedup();

    let mut best: Option<(i64, u128)> = None;
    for &c in &candidates {
        let loss: u128 = snapshots
            .iter()
            .map(|s| {
                let call_intrinsic = (c - s.strike).max(0) as u128;
                let put_intrinsic = (s.strike - c).max(0) as u128;
                call_intrinsic * s.call_oi as u128 + put_intrinsic * s.put_oi as u128
            })
            .sum();

        match best {
            Some((_, min_loss)) if loss >= min_loss => {}
            _ => best = Some((c, loss)),
        }
    }

    best.map(|(strike, _)| strike)
}

fn max_by_oi<'a, F>(strikes: &[&'a StrikeSnapshot], oi: F) -> Option<&'a StrikeSnapshot>
where
    F: Fn(&StrikeSnapshot) -> u64,
{
    strikes
        .iter()
        .copied()
        .max_by(|a, b| oi(a).cmp(&oi(b)).then(b.strike.cmp(&a.strike)))
}

/// Support = highest put-OI strike below spot; resistance = highest call-OI
/// strike above spot. Only strikes within `range_limit` of spot are considered
/// (the whole chain if none are); each side falls back to the overall maximum
/// when no strike lies on the expected side.
pub fn compute_support_resistance(
    snapshots: &[StrikeSnapshot],
    spot: f64,
    range_limit: f64,
) -> SupportResistance {
    if snapshots.is_empty() {
        return SupportResistance::default();
    }

    let all: Vec<&StrikeSnapshot> = snapshots.iter().collect();
    if spot <= 0.0 {
        return SupportResistance {
            support: max_by_oi(&all, |s| s.put_oi).map(|s| s.strike).unwrap_or(0),
            resistance: max_by_oi(&all, |s| s.call_oi).map(|s| s.strike).unwrap_or(0),
        };
    }

    let mut nearby: Vec<&StrikeSnapshot> = all
        .iter()
        .copied()
        .filter(|s| (s.strike as f64 - spot).abs() <= range_limit)
        .collect();
    if nearby.is_empty() {
        nearby = all;
    }

    let below: Vec<&StrikeSnapshot> = nearby
        .iter()
        .copied()
        .filter(|s| (s.strike as f64) < spot)
        .collect();
    let above: Vec<&StrikeSnapshot> = nearby
        .iter()
        .copied()
        .filter(|s| (s.strike as f64) > spot)
        .collect();

    let support = max_by_oi(&below, |s| s.put_oi).or_else(|| max_by_oi(&nearby, |s| s.put_oi));
    let resistance =
        max_by_oi(&above, |s| s.call_oi).or_else(|| max_by_oi(&nearby, |s| s.call_oi));

    SupportResistance {
        support: support.map(|s| s.strike).unwrap_or(0),
        resistance: resistance.map(|s| s.strike).unwrap_or(0),
    }
}

/// Textual market bias, e.g. `BULLISH (Low PCR) | Price above VWAP`
pub fn market_bias(pcr: f64, spot: f64, vwap: f64, bullish_below: f64, bearish_above: f64) -> String {
    let mut parts = Vec::with_capacity(2);
    if pcr < bullish_below {
        parts.push("BULLISH (Low PCR)");
    } else if pcr > bearish_above {
        parts.push("BEARISH (High PCR)");
    } else {
        parts.push("NEUTRAL (Normal PCR)");
    }

    if vwap > 0.0 {
        if spot > vwap {
            parts.push("Price above VWAP");
        } else {
            parts.push("Price below VWAP");
        }
    }

    parts.join(" | ")
}

/// Stateful wrapper: owns the OI cache and produces full indicator sets.
pub struct IndicatorEngine {
    config: IndicatorConfig,
    oi_cache: Arc<OiChangeCache>,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig, oi_cache: Arc<OiChangeCache>) -> Self {
        Self { config, oi_cache }
    }

    pub fn oi_cache(&self) -> &Arc<OiChangeCache> {
        &self.oi_cache
    }

    /// Annotate OI changes in place and derive the indicator set.
    pub fn compute(&self, snapshot: &mut MarketSnapshot) -> MarketIndicatorSet {
        compute_oi_change(snapshot.instrument, &mut snapshot.strikes, &self.oi_cache);

        let strikes = &snapshot.strikes;
        let pcr = compute_pcr(strikes);
        let vwap = compute_vwap(&snapshot.candles);
        let levels = compute_support_resistance(strikes, snapshot.spot, self.config.sr_range_limit);
        let max_pain = compute_max_pain(strikes);

        let set = MarketIndicatorSet {
            instrument: snapshot.instrument,
            ts: snapshot.ts,
            spot: snapshot.spot,
            atm_strike: find_atm_strike(snapshot.spot, snapshot.instrument.strike_step()),
            pcr,
            vwap,
            levels,
            max_pain,
            top_oi: find_top_oi_strikes(strikes, self.config.top_n),
            top_oi_change: find_top_oi_change_strikes(strikes, self.config.top_n),
        };

        debug!(
            instrument = %set.instrument,
            pcr_oi = set.pcr.pcr_oi,
            vwap = set.vwap,
            support = set.levels.support,
            resistance = set.levels.resistance,
            max_pain = ?set.max_pain,
            "Indicators computed"
        );

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strike(strike: i64, call_oi: u64, put_oi: u64) -> StrikeSnapshot {
        StrikeSnapshot {
            strike,
            call_oi,
            put_oi,
            ..Default::default()
        }
    }

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            ts: 0,
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn pcr_is_zero_without_call_oi() {
        let chain = vec![strike(23000, 0, 5000), strike(23100, 0, 2000)];
        let pcr = compute_pcr(&chain);
        assert_eq!(pcr.pcr_oi, 0.0);
        assert_eq!(pcr.total_put_oi, 7000);
    }

    #[test]
    fn pcr_rounds_to_four_decimals() {
        let mut a = strike(23000, 3000, 1000);
        a.call_volume = 300;
        a.put_volume = 200;
        let pcr = compute_pcr(&[a]);
        assert_eq!(pcr.pcr_oi, 0.3333);
        assert_eq!(pcr.pcr_volume, 0.6667);
    }

    #[test]
    fn pcr_of_empty_chain_is_default() {
        assert_eq!(compute_pcr(&[]), PcrSummary::default());
    }

    #[test]
    fn vwap_single_candle_is_typical_price() {
        assert_eq!(compute_vwap(&[candle(10.0, 8.0, 9.0, 100.0)]), 9.00);
    }

    #[test]
    fn vwap_zero_volume_is_zero() {
        assert_eq!(compute_vwap(&[candle(10.0, 8.0, 9.0, 0.0)]), 0.0);
        assert_eq!(compute_vwap(&[]), 0.0);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let candles = vec![candle(10.0, 10.0, 10.0, 100.0), candle(20.0, 20.0, 20.0, 300.0)];
        assert_eq!(compute_vwap(&candles), 17.5);
    }

    #[test]
    fn atm_rounds_half_up() {
        assert_eq!(find_atm_strike(23124.0, 50), 23100);
        assert_eq!(find_atm_strike(23125.0, 50), 23150);
        assert_eq!(find_atm_strike(48049.9, 100), 48000);
        assert_eq!(find_atm_strike(48050.0, 100), 48100);
        assert_eq!(find_atm_strike(100.0, 0), 0);
    }

    #[test]
    fn top_oi_breaks_ties_by_lower_strike() {
        let chain = vec![
            strike(23200, 500, 10),
            strike(23100, 500, 30),
            strike(23000, 100, 30),
        ];
        let top = find_top_oi_strikes(&chain, 2);
        assert_eq!(top.call, vec![(23100, 500), (23200, 500)]);
        assert_eq!(top.put, vec![(23000, 30), (23100, 30)]);
    }

    #[test]
    fn top_oi_change_ranks_by_magnitude_keeps_sign() {
        let mut a = strike(23000, 0, 0);
        a.call_oi_change_pct = -12.0;
        let mut b = strike(23100, 0, 0);
        b.call_oi_change_pct = 8.0;
        let mut c = strike(23200, 0, 0);
        c.call_oi_change_pct = 3.0;
        let top = find_top_oi_change_strikes(&[c, b, a], 2);
        assert_eq!(top.call, vec![(23000, -12.0), (23100, 8.0)]);
    }

    #[test]
    fn max_pain_picks_minimum_writer_loss() {
        let chain = vec![
            strike(100, 10, 0),
            strike(110, 0, 0),
            strike(120, 0, 10),
        ];
        // Loss at 100: put 120 -> 20*10 = 200; at 110: 10*10 + 10*10 = 200; at 120: 20*10 = 200.
        // All tie -> lowest strike.
        assert_eq!(compute_max_pain(&chain), Some(100));

        let chain = vec![strike(100, 50, 0), strike(110, 0, 0), strike(120, 0, 10)];
        // at 100: 200, at 110: 500 + 100 = 600, at 120: 1000
        assert_eq!(compute_max_pain(&chain), Some(100));
    }

    #[test]
    fn max_pain_is_order_invariant() {
        let chain = vec![
            strike(22900, 120_000, 400_000),
            strike(23000, 200_000, 480_000),
            strike(23100, 500_000, 450_000),
            strike(23200, 520_000, 90_000),
            strike(23300, 610_000, 20_000),
        ];
        let forward = compute_max_pain(&chain);
        let mut reversed = chain.clone();
        reversed.reverse();
        let mut shuffled = chain.clone();
        shuffled.swap(0, 3);
        shuffled.swap(1, 4);

        assert!(forward.is_some());
        assert_eq!(forward, compute_max_pain(&reversed));
        assert_eq!(forward, compute_max_pain(&shuffled));
        assert!(chain.iter().any(|s| Some(s.strike) == forward));
    }

    #[test]
    fn max_pain_of_empty_chain_is_none() {
        assert_eq!(compute_max_pain(&[]), None);
    }

    #[test]
    fn support_resistance_around_spot() {
        let chain = vec![
            strike(23000, 0, 480_000),
            strike(23100, 500_000, 450_000),
            strike(23200, 520_000, 0),
        ];
        let levels = compute_support_resistance(&chain, 23150.0, 500.0);
        assert_eq!(levels.support, 23000);
        assert_eq!(levels.resistance, 23200);
    }

    #[test]
    fn support_resistance_falls_back_when_side_is_empty() {
        let chain = vec![strike(23000, 100, 900), strike(23100, 700, 200)];
        // Spot above every strike: no call strike above, resistance falls back to max call OI.
        let levels = compute_support_resistance(&chain, 23400.0, 500.0);
        assert_eq!(levels.support, 23000);
        assert_eq!(levels.resistance, 23100);
    }

    #[test]
    fn support_resistance_uses_full_chain_when_nothing_in_range() {
        let chain = vec![strike(20000, 10, 900), strike(20100, 700, 5)];
        let levels = compute_support_resistance(&chain, 23000.0, 500.0);
        assert_eq!(levels.support, 20000);
        assert_eq!(levels.resistance, 20100);
    }

    #[test]
    fn support_resistance_empty_chain_is_zero() {
        assert_eq!(
            compute_support_resistance(&[], 23000.0, 500.0),
            SupportResistance::default()
        );
    }

    #[test]
    fn bias_text() {
        assert_eq!(
            market_bias(0.6, 101.0, 100.0, 0.7, 1.3),
            "BULLISH (Low PCR) | Price above VWAP"
        );
        assert_eq!(market_bias(1.0, 99.0, 0.0, 0.7, 1.3), "NEUTRAL (Normal PCR)");
        assert_eq!(
            market_bias(1.5, 99.0, 100.0, 0.7, 1.3),
            "BEARISH (High PCR) | Price below VWAP"
        );
    }

    #[test]
    fn engine_builds_full_set_and_tracks_oi_change() {
        let engine = IndicatorEngine::new(IndicatorConfig::default(), Arc::new(OiChangeCache::new()));
        let mut snap = MarketSnapshot {
            instrument: Instrument::Nifty,
            spot: 23150.0,
            strikes: vec![
                strike(23000, 100_000, 480_000),
                strike(23100, 500_000, 450_000),
                strike(23200, 520_000, 100_000),
            ],
            candles: vec![candle(23160.0, 23140.0, 23150.0, 1000.0)],
            ..Default::default()
        };

        let first = engine.compute(&mut snap.clone());
        assert_eq!(first.atm_strike, 23150);
        assert_eq!(first.vwap, 23150.0);
        assert_eq!(first.levels.support, 23000);
        assert_eq!(first.levels.resistance, 23200);
        assert!(first.top_oi_change.put.iter().all(|(_, c)| *c == 0.0));

        snap.strikes[0].put_oi = 528_000;
        let second = engine.compute(&mut snap);
        assert_eq!(snap.strikes[0].put_oi_change_pct, 10.0);
        assert_eq!(second.top_oi_change.put[0], (23000, 10.0));
    }
}
