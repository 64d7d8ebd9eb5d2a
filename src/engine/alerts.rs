//! Alert text handed to the notifier

use crate::indicators::MarketIndicatorSet;
use crate::paper_trading::OpenOutcome;
use crate::types::{AcceptedSignal, Direction, SignalSource, TradeHorizon};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━";

fn hold_hint(horizon: TradeHorizon) -> &'static str {
    match horizon {
        TradeHorizon::Scalp => "15-30m",
        TradeHorizon::Intraday => "1-2 hrs",
        TradeHorizon::Swing => "multi-session",
    }
}

/// Entry alert for an accepted signal. Empty for NEUTRAL.
pub fn format_signal_alert(signal: &AcceptedSignal, set: &MarketIndicatorSet, trade: &OpenOutcome) -> String {
    let c = &signal.candidate;
    let (emoji, option_type, bias) = match c.direction {
        Direction::Call => ("🟢", "CE", "BULLISH"),
        Direction::Put => ("🔴", "PE", "BEARISH"),
        Direction::Neutral => return String::new(),
    };
    let origin = match c.source {
        SignalSource::Oracle => "AI SIGNAL",
        SignalSource::RuleEngine => "RULE SIGNAL",
    };
    let vwap = if set.vwap > 0.0 {
        format!("{:.2}", set.vwap)
    } else {
        "N/A".to_string()
    };
    let risk_reward = if c.stop_loss_points > 0.0 {
        format!("1:{:.1}", c.target_points / c.stop_loss_points)
    } else {
        "N/A".to_string()
    };
    let paper = match trade {
        OpenOutcome::Opened(t) => format!(
            "📝 Paper trade {} opened: {} qty @ ₹{:.2}",
            t.id, t.position_size, t.entry_premium
        ),
        OpenOutcome::AlreadyOpen { trade_id } => format!("📝 Paper trade {} already running", trade_id),
        OpenOutcome::Skipped(reason) => format!("📝 No paper trade ({})", reason),
    };

    format!(
        "{emoji} {name} {origin} - {dir} {emoji}\n\
         \n\
         🎯 Confidence: {conf:.0}%\n\
         ⏳ Horizon: {horizon} (Hold: {hold})\n\
         📊 Strike: {strike} {option_type}\n\
         \n\
         {RULE}\n\
         📈 MARKET CONTEXT\n\
         {RULE}\n\
         • Spot: {spot:.2}\n\
         • Direction: {bias}\n\
         • PCR: {pcr:.2}\n\
         • VWAP: {vwap}\n\
         • Support: {support}\n\
         • Resistance: {resistance}\n\
         \n\
         {RULE}\n\
         🎯 TRADE SETUP\n\
         {RULE}\n\
         • Target: +{target:.0} points\n\
         • Stop Loss: -{stop:.0} points\n\
         • Risk:Reward: {risk_reward}\n\
         \n\
         {RULE}\n\
         💡 REASONING\n\
         {RULE}\n\
         {rationale}\n\
         \n\
         {paper}",
        name = c.instrument.display_name(),
        dir = c.direction,
        conf = c.confidence,
        horizon = c.horizon,
        hold = hold_hint(c.horizon),
        strike = c.strike,
        spot = set.spot,
        pcr = set.pcr.pcr_oi,
        support = set.levels.support,
        resistance = set.levels.resistance,
        target = c.target_points,
        stop = c.stop_loss_points,
        rationale = c.rationale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, Instrument};

    fn signal(direction: Direction) -> AcceptedSignal {
        let candidate = CandidateSignal {
            instrument: Instrument::Nifty,
            direction,
            confidence: 72.0,
            strike: 23100,
            target_points: 25.0,
            stop_loss_points: 12.5,
            horizon: TradeHorizon::Scalp,
            rationale: "Put writing at support".into(),
            source: SignalSource::Oracle,
        };
        AcceptedSignal {
            key: candidate.dedup_key(),
            candidate,
            accepted_at: 0,
            notify: true,
        }
    }

    #[test]
    fn call_alert_contains_setup() {
        let set = MarketIndicatorSet {
            spot: 23112.4,
            vwap: 23080.0,
            ..Default::default()
        };
        let text = format_signal_alert(
            &signal(Direction::Call),
            &set,
            &OpenOutcome::AlreadyOpen { trade_id: "VT-3".into() },
        );
        assert!(text.starts_with("🟢 NIFTY 50 AI SIGNAL - CALL"));
        assert!(text.contains("Strike: 23100 CE"));
        assert!(text.contains("Risk:Reward: 1:2.0"));
        assert!(text.contains("VWAP: 23080.00"));
        assert!(text.contains("VT-3 already running"));
    }

    #[test]
    fn neutral_has_no_alert() {
        let set = MarketIndicatorSet::default();
        let text = format_signal_alert(&signal(Direction::Neutral), &set, &OpenOutcome::Skipped("neutral"));
        assert!(text.is_empty());
    }
}
