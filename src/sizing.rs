// =============================================================================
// Position Sizer — classical risk sizing and volatility-aware smart sizing
// =============================================================================
//
// Classical: risk a fixed percent of equity against the stop distance, capped
// at half the leveraged buying power (margin safety).
//
// Smart: start from the configured risk percent, scale by the volatility
// bucket (trade smaller in wild tape) and by signal strength (press the best
// setups), then clamp the resulting equity percent into the configured
// [min, max] window.
// =============================================================================

use crate::settings::Settings;
use crate::types::{TradeDirection, VolatilityLevel};

/// Fraction of leveraged buying power a single position may consume.
const MARGIN_SAFETY_CAP: f64 = 0.5;

/// Classical sizing: `riskAmount / |entry - stop|`, capped at
/// `0.5 * (balance * leverage) / entry`.
pub fn classical_quantity(
    balance: f64,
    risk_percent: f64,
    entry: f64,
    stop: f64,
    leverage: u32,
) -> f64 {
    if balance <= 0.0 || entry <= 0.0 {
        return 0.0;
    }
    let stop_distance = (entry - stop).abs();
    if stop_distance <= 0.0 {
        return 0.0;
    }

    let risk_amount = balance * risk_percent / 100.0;
    let risk_quantity = risk_amount / stop_distance;
    let margin_cap = MARGIN_SAFETY_CAP * (balance * leverage as f64) / entry;

    risk_quantity.min(margin_cap).max(0.0)
}

/// Smart sizing: equity percent after volatility and strength scaling,
/// clamped into `[min_position_percent, max_position_percent]`.
pub fn smart_size_percent(
    settings: &Settings,
    volatility: VolatilityLevel,
    signal_strength: f64,
) -> f64 {
    let mut size_percent = settings.max_risk_per_trade;

    if settings.volatility_adjustment {
        size_percent *= match volatility {
            VolatilityLevel::Low => 1.2,
            VolatilityLevel::Medium => 1.0,
            VolatilityLevel::High => 0.7,
            VolatilityLevel::Extreme => 0.4,
        };
    }

    if signal_strength >= 85.0 {
        size_percent *= 1.15;
    } else if signal_strength < 60.0 {
        size_percent *= 0.7;
    }

    size_percent.clamp(settings.min_position_percent, settings.max_position_percent)
}

/// Convert an equity percent into an order quantity at the given leverage.
pub fn quantity_from_percent(balance: f64, size_percent: f64, entry: f64, leverage: u32) -> f64 {
    if balance <= 0.0 || entry <= 0.0 {
        return 0.0;
    }
    let notional = balance * size_percent / 100.0 * leverage as f64;
    notional / entry
}

/// Derive stop/target from a flat risk percent and the reward ratio (the
/// non-smart path): stop at `risk%` against the entry, target at
/// `risk% * R:R` in favour.
pub fn levels_from_risk_percent(
    direction: TradeDirection,
    entry: f64,
    risk_percent: f64,
    risk_reward_ratio: f64,
) -> (f64, f64) {
    let risk = risk_percent / 100.0;
    match direction {
        TradeDirection::Long => (
            entry * (1.0 - risk),
            entry * (1.0 + risk * risk_reward_ratio),
        ),
        TradeDirection::Short => (
            entry * (1.0 + risk),
            entry * (1.0 - risk * risk_reward_ratio),
        ),
    }
}
