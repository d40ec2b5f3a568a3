// =============================================================================
// Swing Strategy — entries near confirmed swing points with DI agreement
// =============================================================================
//
// Finds the most recent swing low/high using a `swing_period` look-back on
// each side, then trades bounces: a price within 1.5 % above the swing low
// with +DI dominant takes a long; the mirror setup takes a short. The swing
// point anchors the stop.
// =============================================================================

use crate::indicators::adx::calculate_adx;
use crate::settings::Settings;
use crate::strategies::{StrategySignal, TradeLevels};
use crate::types::{Candle, SignalKind, StrategyKind};

/// Price must be within this fraction of the swing point.
const SWING_PROXIMITY: f64 = 0.015;
const ADX_PERIOD: usize = 14;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    let wing = settings.swing_period.max(1);
    if candles.len() < wing * 2 + ADX_PERIOD * 2 + 2 {
        return StrategySignal::hold(StrategyKind::Swing, "insufficient data");
    }

    let close = candles[candles.len() - 1].close;

    let swing_low = last_swing(candles, wing, false);
    let swing_high = last_swing(candles, wing, true);

    let Some(adx) = calculate_adx(candles, ADX_PERIOD) else {
        return StrategySignal::hold(StrategyKind::Swing, "ADX unavailable");
    };

    if let Some(low) = swing_low {
        let distance = (close - low) / low;
        if distance >= 0.0 && distance <= SWING_PROXIMITY && adx.is_bullish() {
            let take_profit = close + (close - low) * settings.risk_reward_ratio.max(1.0)
                + (close * 0.002);
            return StrategySignal {
                strategy: StrategyKind::Swing,
                signal: SignalKind::Buy,
                strength: (60.0 + adx.adx * 0.4).min(100.0),
                confidence: (50.0 + adx.adx * 0.5).min(85.0),
                reason: format!("bounce off swing low {low:.2} with +DI dominant"),
                levels: Some(TradeLevels {
                    entry: close,
                    // Just under the swing point: a close beyond it voids the setup.
                    stop_loss: low * 0.998,
                    take_profit,
                }),
            };
        }
    }

    if let Some(high) = swing_high {
        let distance = (high - close) / high;
        if distance >= 0.0 && distance <= SWING_PROXIMITY && !adx.is_bullish() {
            let take_profit = close - (high - close) * settings.risk_reward_ratio.max(1.0)
                - (close * 0.002);
            return StrategySignal {
                strategy: StrategyKind::Swing,
                signal: SignalKind::Sell,
                strength: (60.0 + adx.adx * 0.4).min(100.0),
                confidence: (50.0 + adx.adx * 0.5).min(85.0),
                reason: format!("rejection at swing high {high:.2} with -DI dominant"),
                levels: Some(TradeLevels {
                    entry: close,
                    stop_loss: high * 1.002,
                    take_profit,
                }),
            };
        }
    }

    StrategySignal::hold(StrategyKind::Swing, "no swing point in range")
}

/// Most recent confirmed swing high (`tops`) or swing low, scanning backwards.
fn last_swing(candles: &[Candle], wing: usize, tops: bool) -> Option<f64> {
    if candles.len() < wing * 2 + 1 {
        return None;
    }
    // Skip the unconfirmed tail (`wing` candles have no right side yet).
    for i in (wing..candles.len() - wing).rev() {
        let value = if tops { candles[i].high } else { candles[i].low };
        let confirmed = (1..=wing).all(|w| {
            let left = if tops {
                candles[i - w].high
            } else {
                candles[i - w].low
            };
            let right = if tops {
                candles[i + w].high
            } else {
                candles[i + w].low
            };
            if tops {
                value > left && value > right
            } else {
                value < left && value < right
            }
        });
        if confirmed {
            return Some(value);
        }
    }
    None
}
