// =============================================================================
// Scalping Strategy — EMA 9/21 crossover with oscillator confirmation
// =============================================================================
//
// An EMA9 cross above EMA21 takes a long, confirmed by RSI(7) and
// Stochastic(5,3) not sitting at the opposing extreme. Stops are one ATR —
// scalps do not get room to breathe.
// =============================================================================

use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;
use crate::indicators::rsi::latest_rsi;
use crate::indicators::stochastic::calculate_stochastic;
use crate::settings::Settings;
use crate::strategies::{levels_from_atr, StrategySignal};
use crate::types::{Candle, SignalKind, StrategyKind, TradeDirection};

const FAST_EMA: usize = 9;
const SLOW_EMA: usize = 21;
const SCALP_RSI_PERIOD: usize = 7;
const STOCH_K: usize = 5;
const STOCH_D: usize = 3;
/// Tight stop distance for scalps, in ATRs.
const SCALP_ATR_MULT: f64 = 1.0;

pub fn analyze(candles: &[Candle], settings: &Settings) -> StrategySignal {
    if candles.len() < 30 {
        return StrategySignal::hold(StrategyKind::Scalping, "insufficient data");
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let fast = calculate_ema(&closes, FAST_EMA);
    let slow = calculate_ema(&closes, SLOW_EMA);
    if fast.len() < 2 || slow.len() < 2 {
        return StrategySignal::hold(StrategyKind::Scalping, "EMA unavailable");
    }

    let (f_now, f_prev) = (fast[fast.len() - 1], fast[fast.len() - 2]);
    let (s_now, s_prev) = (slow[slow.len() - 1], slow[slow.len() - 2]);

    let crossed_up = f_prev <= s_prev && f_now > s_now;
    let crossed_down = f_prev >= s_prev && f_now < s_now;
    if !crossed_up && !crossed_down {
        return StrategySignal::hold(StrategyKind::Scalping, "no EMA crossover");
    }

    let rsi = latest_rsi(&closes, SCALP_RSI_PERIOD);
    let Some(stoch) = calculate_stochastic(candles, STOCH_K, STOCH_D) else {
        return StrategySignal::hold(StrategyKind::Scalping, "stochastic unavailable");
    };

    let entry = *closes.last().unwrap_or(&0.0);
    let Some(atr) = calculate_atr(candles, settings.atr_period) else {
        return StrategySignal::hold(StrategyKind::Scalping, "ATR unavailable");
    };

    if crossed_up {
        // Oscillators must have lifted off the opposing (oversold) extreme,
        // otherwise the cross is a falling knife still pinned to the floor.
        if rsi <= settings.rsi_oversold || stoch.k <= 20.0 {
            return StrategySignal::hold(
                StrategyKind::Scalping,
                "crossover with oscillators still oversold — skipped",
            );
        }
        let spread_pct = if s_now != 0.0 {
            (f_now - s_now).abs() / s_now * 100.0
        } else {
            0.0
        };
        return StrategySignal {
            strategy: StrategyKind::Scalping,
            signal: SignalKind::Buy,
            strength: (50.0 + spread_pct * 200.0).min(100.0),
            confidence: 60.0,
            reason: format!("EMA9 crossed above EMA21 (RSI {rsi:.0}, %K {:.0})", stoch.k),
            levels: Some(levels_from_atr(
                TradeDirection::Long,
                entry,
                atr,
                SCALP_ATR_MULT,
                settings.risk_reward_ratio,
            )),
        };
    }

    // crossed_down
    if rsi >= settings.rsi_overbought || stoch.k >= 80.0 {
        return StrategySignal::hold(
            StrategyKind::Scalping,
            "crossover with oscillators still overbought — skipped",
        );
    }
    let spread_pct = if s_now != 0.0 {
        (f_now - s_now).abs() / s_now * 100.0
    } else {
        0.0
    };
    StrategySignal {
        strategy: StrategyKind::Scalping,
        signal: SignalKind::Sell,
        strength: (50.0 + spread_pct * 200.0).min(100.0),
        confidence: 60.0,
        reason: format!("EMA9 crossed below EMA21 (RSI {rsi:.0}, %K {:.0})", stoch.k),
        levels: Some(levels_from_atr(
            TradeDirection::Short,
            entry,
            atr,
            SCALP_ATR_MULT,
            settings.risk_reward_ratio,
        )),
    }
}
