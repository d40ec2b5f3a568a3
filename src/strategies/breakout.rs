// =============================================================================
// Breakout Strategy
// =============================================================================
//
// Fires when price closes beyond a nearby support/resistance level (within
// ±1.5 % before the break) on volume at least `volume_multiplier` times the
// 20-bar average. The broken level becomes the stop anchor: the stop sits at
// the tighter of the level and the ATR distance.
// =============================================================================

use crate::indicators::atr::calculate_atr;
use crate::indicators::levels::find_levels;
use crate::settings::Settings;
use crate::strategies::{StrategySignal, TradeLevels};
use crate::types::{Candle, SignalKind, StrategyKind};

/// How close (fraction) price must have been to the level for a valid break.
const LEVEL_PROXIMITY: f64 = 0.015;
/// Bars in the volume baseline.
const VOLUME_LOOKBACK: usize = 20;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    if candles.len() < 30 {
        return StrategySignal::hold(StrategyKind::Breakout, "insufficient data");
    }

    let last = &candles[candles.len() - 1];
    let close = last.close;

    // Volume confirmation against the prior 20 bars.
    let window = &candles[candles.len() - 1 - VOLUME_LOOKBACK.min(candles.len() - 1)
        ..candles.len() - 1];
    let avg_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
    let volume_ok = avg_volume > 0.0 && last.volume >= avg_volume * settings.volume_multiplier;

    let levels = find_levels(&candles[..candles.len() - 1]);
    let Some(atr) = calculate_atr(candles, settings.atr_period) else {
        return StrategySignal::hold(StrategyKind::Breakout, "ATR unavailable");
    };

    // Resistance broken upward: close above a level we were hugging.
    let broken_resistance = levels
        .resistance
        .iter()
        .copied()
        .filter(|&r| close > r && (close - r) / r <= LEVEL_PROXIMITY)
        .fold(None::<f64>, |best, r| match best {
            Some(b) if b >= r => Some(b),
            _ => Some(r),
        });

    // Support broken downward.
    let broken_support = levels
        .support
        .iter()
        .copied()
        .filter(|&s| close < s && (s - close) / s <= LEVEL_PROXIMITY)
        .fold(None::<f64>, |best, s| match best {
            Some(b) if b <= s => Some(b),
            _ => Some(s),
        });

    if let Some(level) = broken_resistance {
        if !volume_ok {
            return StrategySignal::hold(
                StrategyKind::Breakout,
                "breakout without volume confirmation",
            );
        }
        let break_pct = (close - level) / level * 100.0;
        // Stop below the broken level, never wider than the ATR envelope.
        let stop = level.max(close - 1.5 * atr);
        let take_profit = close + (close - stop) * settings.risk_reward_ratio;
        return StrategySignal {
            strategy: StrategyKind::Breakout,
            signal: SignalKind::Buy,
            strength: (55.0 + break_pct * 20.0).min(100.0),
            confidence: 70.0,
            reason: format!("close {close:.2} broke resistance {level:.2} on volume"),
            levels: Some(TradeLevels {
                entry: close,
                stop_loss: stop,
                take_profit,
            }),
        };
    }

    if let Some(level) = broken_support {
        if !volume_ok {
            return StrategySignal::hold(
                StrategyKind::Breakout,
                "breakdown without volume confirmation",
            );
        }
        let break_pct = (level - close) / level * 100.0;
        let stop = level.min(close + 1.5 * atr);
        let take_profit = close - (stop - close) * settings.risk_reward_ratio;
        return StrategySignal {
            strategy: StrategyKind::Breakout,
            signal: SignalKind::Sell,
            strength: (55.0 + break_pct * 20.0).min(100.0),
            confidence: 70.0,
            reason: format!("close {close:.2} broke support {level:.2} on volume"),
            levels: Some(TradeLevels {
                entry: close,
                stop_loss: stop,
                take_profit,
            }),
        };
    }

    StrategySignal::hold(StrategyKind::Breakout, "no level break")
}
