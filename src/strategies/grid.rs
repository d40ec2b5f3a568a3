// =============================================================================
// Grid Trading Strategy — modest bias near structural levels
// =============================================================================
//
// Unlike the directional strategies, grid trading always leans into nearby
// structure: within 1 % above a support level it emits a modest buy, within
// 1 % below a resistance level a modest sell. Strength and confidence stay
// deliberately low so grid entries only win selection in quiet tapes.
// =============================================================================

use crate::indicators::atr::calculate_atr;
use crate::indicators::levels::find_levels;
use crate::settings::Settings;
use crate::strategies::{StrategySignal, TradeLevels};
use crate::types::{Candle, SignalKind, StrategyKind};

/// Price must be within this fraction of the level.
const GRID_PROXIMITY: f64 = 0.01;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    if candles.len() < 30 {
        return StrategySignal::hold(StrategyKind::GridTrading, "insufficient data");
    }

    let close = candles[candles.len() - 1].close;
    let levels = find_levels(candles);
    let Some(atr) = calculate_atr(candles, settings.atr_period) else {
        return StrategySignal::hold(StrategyKind::GridTrading, "ATR unavailable");
    };

    if let Some(support) = levels.nearest_support(close) {
        let distance = (close - support) / support;
        if distance <= GRID_PROXIMITY {
            let closeness = 1.0 - distance / GRID_PROXIMITY;
            return StrategySignal {
                strategy: StrategyKind::GridTrading,
                signal: SignalKind::Buy,
                strength: 35.0 + closeness * 15.0,
                confidence: 55.0,
                reason: format!("price {close:.2} sitting on support {support:.2}"),
                levels: Some(TradeLevels {
                    entry: close,
                    stop_loss: (support - atr).min(close - atr * 0.5),
                    take_profit: close + (close - support + atr) * settings.risk_reward_ratio,
                }),
            };
        }
    }

    if let Some(resistance) = levels.nearest_resistance(close) {
        let distance = (resistance - close) / resistance;
        if distance <= GRID_PROXIMITY {
            let closeness = 1.0 - distance / GRID_PROXIMITY;
            return StrategySignal {
                strategy: StrategyKind::GridTrading,
                signal: SignalKind::Sell,
                strength: 35.0 + closeness * 15.0,
                confidence: 55.0,
                reason: format!("price {close:.2} pressing resistance {resistance:.2}"),
                levels: Some(TradeLevels {
                    entry: close,
                    stop_loss: (resistance + atr).max(close + atr * 0.5),
                    take_profit: close - (resistance - close + atr) * settings.risk_reward_ratio,
                }),
            };
        }
    }

    StrategySignal::hold(StrategyKind::GridTrading, "no level within grid range")
}
