// =============================================================================
// Strategy Bank — six named strategies with best-signal and consensus selection
// =============================================================================
//
// Each strategy reads the same candle window and emits a
// `{signal, strength, confidence, reason, levels?}` verdict. The bank runs
// every enabled strategy, then derives:
//   - `best`      — the actionable signal (confidence >= 50) maximising
//                   strength * confidence,
//   - `consensus` — a direction at least two actionable signals agree on,
//   - `consensus_strength` — the mean strength of that agreeing subset.
// =============================================================================

pub mod breakout;
pub mod grid;
pub mod mean_reversion;
pub mod momentum;
pub mod scalping;
pub mod swing;

use serde::Serialize;

use crate::settings::Settings;
use crate::types::{Candle, SignalKind, StrategyKind, TradeDirection};

/// Entry/stop/target levels a strategy proposes alongside its signal.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// A single strategy's verdict.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    pub strategy: StrategyKind,
    pub signal: SignalKind,
    pub strength: f64,
    pub confidence: f64,
    pub reason: String,
    pub levels: Option<TradeLevels>,
}

impl StrategySignal {
    /// A neutral verdict with a reason, used when preconditions fail.
    pub fn hold(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            signal: SignalKind::Hold,
            strength: 0.0,
            confidence: 0.0,
            reason: reason.into(),
            levels: None,
        }
    }

    fn score(&self) -> f64 {
        self.strength * self.confidence
    }
}

/// Combined output of the bank.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyAnalysis {
    pub signals: Vec<StrategySignal>,
    pub best: Option<StrategySignal>,
    pub consensus: Option<SignalKind>,
    pub consensus_strength: f64,
}

/// Run every enabled strategy over the candle window.
pub fn analyze_all(candles: &[Candle], settings: &Settings) -> StrategyAnalysis {
    let mut signals = Vec::with_capacity(settings.enabled_strategies.len());

    for kind in &settings.enabled_strategies {
        let signal = match kind {
            StrategyKind::Breakout => breakout::analyze(candles, settings),
            StrategyKind::Scalping => scalping::analyze(candles, settings),
            StrategyKind::Momentum => momentum::analyze(candles, settings),
            StrategyKind::MeanReversion => mean_reversion::analyze(candles, settings),
            StrategyKind::Swing => swing::analyze(candles, settings),
            StrategyKind::GridTrading => grid::analyze(candles, settings),
        };
        signals.push(signal);
    }

    let best = signals
        .iter()
        .filter(|s| s.signal.is_actionable() && s.confidence >= 50.0)
        .max_by(|a, b| {
            a.score()
                .partial_cmp(&b.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();

    // Consensus: at least two actionable signals agreeing on one direction.
    let actionable: Vec<&StrategySignal> = signals
        .iter()
        .filter(|s| s.signal.is_actionable())
        .collect();
    let buy_count = actionable
        .iter()
        .filter(|s| s.signal == SignalKind::Buy)
        .count();
    let sell_count = actionable.len() - buy_count;

    let (consensus, consensus_strength) = if buy_count >= 2 && buy_count > sell_count {
        let agreeing: Vec<&&StrategySignal> = actionable
            .iter()
            .filter(|s| s.signal == SignalKind::Buy)
            .collect();
        let avg = agreeing.iter().map(|s| s.strength).sum::<f64>() / agreeing.len() as f64;
        (Some(SignalKind::Buy), avg)
    } else if sell_count >= 2 && sell_count > buy_count {
        let agreeing: Vec<&&StrategySignal> = actionable
            .iter()
            .filter(|s| s.signal == SignalKind::Sell)
            .collect();
        let avg = agreeing.iter().map(|s| s.strength).sum::<f64>() / agreeing.len() as f64;
        (Some(SignalKind::Sell), avg)
    } else {
        (None, 0.0)
    };

    StrategyAnalysis {
        signals,
        best,
        consensus,
        consensus_strength,
    }
}

/// Default levels: stop at `atr_multiplier * atr` from entry, target at
/// `risk_reward_ratio` times the stop distance on the profit side.
pub fn levels_from_atr(
    direction: TradeDirection,
    entry: f64,
    atr: f64,
    atr_multiplier: f64,
    risk_reward_ratio: f64,
) -> TradeLevels {
    let stop_distance = atr * atr_multiplier;
    match direction {
        TradeDirection::Long => TradeLevels {
            entry,
            stop_loss: entry - stop_distance,
            take_profit: entry + stop_distance * risk_reward_ratio,
        },
        TradeDirection::Short => TradeLevels {
            entry,
            stop_loss: entry + stop_distance,
            take_profit: entry - stop_distance * risk_reward_ratio,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle::new(0, 100.0, 100.5, 99.5, 100.0, 100.0, 0))
            .collect()
    }

    fn signal(kind: StrategyKind, s: SignalKind, strength: f64, confidence: f64) -> StrategySignal {
        StrategySignal {
            strategy: kind,
            signal: s,
            strength,
            confidence,
            reason: String::new(),
            levels: None,
        }
    }

    #[test]
    fn all_enabled_strategies_report() {
        let settings = Settings::default();
        let analysis = analyze_all(&flat_candles(120), &settings);
        assert_eq!(analysis.signals.len(), settings.enabled_strategies.len());
    }

    #[test]
    fn disabled_strategies_are_skipped() {
        let mut settings = Settings::default();
        settings.enabled_strategies = vec![StrategyKind::Breakout];
        let analysis = analyze_all(&flat_candles(120), &settings);
        assert_eq!(analysis.signals.len(), 1);
        assert_eq!(analysis.signals[0].strategy, StrategyKind::Breakout);
    }

    #[test]
    fn best_requires_confidence_floor() {
        let signals = vec![
            signal(StrategyKind::Breakout, SignalKind::Buy, 90.0, 40.0), // below floor
            signal(StrategyKind::Momentum, SignalKind::Buy, 50.0, 60.0),
        ];
        let best = signals
            .iter()
            .filter(|s| s.signal.is_actionable() && s.confidence >= 50.0)
            .max_by(|a, b| a.score().partial_cmp(&b.score()).unwrap())
            .cloned()
            .unwrap();
        assert_eq!(best.strategy, StrategyKind::Momentum);
    }

    #[test]
    fn consensus_needs_two_agreeing() {
        // Exercise the consensus math through analyze_all on a flat market:
        // no strategy fires, so no consensus.
        let analysis = analyze_all(&flat_candles(120), &Settings::default());
        assert!(analysis.consensus.is_none());
        assert!((analysis.consensus_strength - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn atr_levels_long_short_symmetry() {
        let long = levels_from_atr(TradeDirection::Long, 100.0, 2.0, 1.5, 2.0);
        assert!((long.stop_loss - 97.0).abs() < 1e-10);
        assert!((long.take_profit - 106.0).abs() < 1e-10);

        let short = levels_from_atr(TradeDirection::Short, 100.0, 2.0, 1.5, 2.0);
        assert!((short.stop_loss - 103.0).abs() < 1e-10);
        assert!((short.take_profit - 94.0).abs() < 1e-10);
    }

    #[test]
    fn atr_levels_recover_rr_ratio() {
        // |TP - entry| / |entry - stop| must reproduce the configured ratio.
        for rr in [1.0, 2.0, 3.5] {
            let levels = levels_from_atr(TradeDirection::Long, 250.0, 4.0, 2.0, rr);
            let recovered =
                (levels.take_profit - levels.entry).abs() / (levels.entry - levels.stop_loss).abs();
            assert!((recovered - rr).abs() < 1e-10, "rr {rr} recovered {recovered}");
        }
    }
}
