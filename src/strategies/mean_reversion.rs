// =============================================================================
// Mean Reversion Strategy — Bollinger extremes with RSI agreement
// =============================================================================
//
// Buys when price is pinned under the lower Bollinger band (%B < 0.1) with RSI
// in oversold territory; symmetric for sells at the upper band. The target is
// the band midline — mean reversion does not chase beyond the mean.
// =============================================================================

use crate::indicators::atr::calculate_atr;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::rsi::latest_rsi;
use crate::settings::Settings;
use crate::strategies::{StrategySignal, TradeLevels};
use crate::types::{Candle, SignalKind, StrategyKind};

const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;
/// %B below this reads as pinned to the lower band.
const LOWER_PIN: f64 = 0.1;
const UPPER_PIN: f64 = 0.9;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    if candles.len() < 30 {
        return StrategySignal::hold(StrategyKind::MeanReversion, "insufficient data");
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let Some(bb) = calculate_bollinger(&closes, BB_PERIOD, BB_STD) else {
        return StrategySignal::hold(StrategyKind::MeanReversion, "bands unavailable");
    };
    let rsi = latest_rsi(&closes, settings.rsi_period);
    let entry = *closes.last().unwrap_or(&0.0);
    let Some(atr) = calculate_atr(candles, settings.atr_period) else {
        return StrategySignal::hold(StrategyKind::MeanReversion, "ATR unavailable");
    };

    if bb.percent_b < LOWER_PIN && rsi < settings.rsi_oversold {
        let depth = (LOWER_PIN - bb.percent_b) * 100.0 + (settings.rsi_oversold - rsi);
        return StrategySignal {
            strategy: StrategyKind::MeanReversion,
            signal: SignalKind::Buy,
            strength: (50.0 + depth * 2.0).min(100.0),
            confidence: 65.0,
            reason: format!("%B {:.2} with RSI {rsi:.0} — stretched below the band", bb.percent_b),
            levels: Some(TradeLevels {
                entry,
                stop_loss: entry - atr * settings.atr_multiplier,
                take_profit: bb.middle,
            }),
        };
    }

    if bb.percent_b > UPPER_PIN && rsi > settings.rsi_overbought {
        let depth = (bb.percent_b - UPPER_PIN) * 100.0 + (rsi - settings.rsi_overbought);
        return StrategySignal {
            strategy: StrategyKind::MeanReversion,
            signal: SignalKind::Sell,
            strength: (50.0 + depth * 2.0).min(100.0),
            confidence: 65.0,
            reason: format!("%B {:.2} with RSI {rsi:.0} — stretched above the band", bb.percent_b),
            levels: Some(TradeLevels {
                entry,
                stop_loss: entry + atr * settings.atr_multiplier,
                take_profit: bb.middle,
            }),
        };
    }

    StrategySignal::hold(StrategyKind::MeanReversion, "price inside the bands")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle::new(0, close, close + 0.3, close - 0.3, close, 100.0, 0)
    }

    /// Stable range, then a waterfall that pins %B near zero and crushes RSI.
    fn oversold_series() -> Vec<Candle> {
        let mut closes: Vec<f64> = (0..30).map(|_| 100.0).collect();
        closes.extend((1..=15).map(|i| 100.0 - i as f64 * 1.2));
        closes.into_iter().map(candle).collect()
    }

    #[test]
    fn pinned_lower_band_buys_to_the_middle() {
        let signal = analyze(&oversold_series(), &Settings::default());
        assert_eq!(signal.signal, SignalKind::Buy, "reason: {}", signal.reason);
        let levels = signal.levels.unwrap();
        // Target is the band midline, above entry.
        assert!(levels.take_profit > levels.entry);
        assert!(levels.stop_loss < levels.entry);
    }

    #[test]
    fn pinned_upper_band_sells() {
        let mut closes: Vec<f64> = (0..30).map(|_| 100.0).collect();
        closes.extend((1..=15).map(|i| 100.0 + i as f64 * 1.2));
        let candles: Vec<Candle> = closes.into_iter().map(candle).collect();

        let signal = analyze(&candles, &Settings::default());
        assert_eq!(signal.signal, SignalKind::Sell, "reason: {}", signal.reason);
        let levels = signal.levels.unwrap();
        assert!(levels.take_profit < levels.entry);
    }

    #[test]
    fn mid_band_holds() {
        let candles: Vec<Candle> = (0..60).map(|_| candle(100.0)).collect();
        let signal = analyze(&candles, &Settings::default());
        assert_eq!(signal.signal, SignalKind::Hold);
    }
}
