// =============================================================================
// Momentum Strategy — directional thrust with ADX confirmation
// =============================================================================
//
// Requires three things lined up: momentum over the look-back above the
// configured threshold, an ADX trend reading of at least moderate, and the
// dominant DI on the same side as the move.
// =============================================================================

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::roc::{calculate_momentum, calculate_momentum_pct};
use crate::settings::Settings;
use crate::strategies::{levels_from_atr, StrategySignal};
use crate::types::{Candle, SignalKind, StrategyKind, TradeDirection, TrendCategory};

const MOMENTUM_LOOKBACK: usize = 10;
const ADX_PERIOD: usize = 14;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    if candles.len() < 40 {
        return StrategySignal::hold(StrategyKind::Momentum, "insufficient data");
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let Some(momentum) = calculate_momentum_pct(&closes, MOMENTUM_LOOKBACK) else {
        return StrategySignal::hold(StrategyKind::Momentum, "momentum unavailable");
    };
    let raw_momentum = calculate_momentum(&closes, MOMENTUM_LOOKBACK).unwrap_or(0.0);
    let Some(adx) = calculate_adx(candles, ADX_PERIOD) else {
        return StrategySignal::hold(StrategyKind::Momentum, "ADX unavailable");
    };

    let trending = matches!(adx.trend, TrendCategory::Strong | TrendCategory::Moderate);
    if !trending {
        return StrategySignal::hold(
            StrategyKind::Momentum,
            format!("trend too weak (ADX {:.1})", adx.adx),
        );
    }

    let entry = *closes.last().unwrap_or(&0.0);
    let Some(atr) = calculate_atr(candles, settings.atr_period) else {
        return StrategySignal::hold(StrategyKind::Momentum, "ATR unavailable");
    };

    let strength = (momentum.abs() * 10.0 + adx.adx).min(100.0);
    let confidence = (45.0 + adx.adx * 0.5).min(90.0);

    if momentum > settings.momentum_threshold && adx.is_bullish() {
        StrategySignal {
            strategy: StrategyKind::Momentum,
            signal: SignalKind::Buy,
            strength,
            confidence,
            reason: format!(
                "momentum {momentum:.2}% ({raw_momentum:+.2} pts) with ADX {:.1} and +DI dominant",
                adx.adx
            ),
            levels: Some(levels_from_atr(
                TradeDirection::Long,
                entry,
                atr,
                settings.atr_multiplier,
                settings.risk_reward_ratio,
            )),
        }
    } else if momentum < -settings.momentum_threshold && !adx.is_bullish() {
        StrategySignal {
            strategy: StrategyKind::Momentum,
            signal: SignalKind::Sell,
            strength,
            confidence,
            reason: format!(
                "momentum {momentum:.2}% ({raw_momentum:+.2} pts) with ADX {:.1} and -DI dominant",
                adx.adx
            ),
            levels: Some(levels_from_atr(
                TradeDirection::Short,
                entry,
                atr,
                settings.atr_multiplier,
                settings.risk_reward_ratio,
            )),
        }
    } else {
        StrategySignal::hold(StrategyKind::Momentum, "momentum and DI disagree")
    }
}
