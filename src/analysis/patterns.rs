// =============================================================================
// Candlestick Pattern Detection
// =============================================================================
//
// Pure scans over the candle tail. Each detected pattern carries a directional
// vote and a strength the ensemble weighs against the other sub-analyzers.
//
// Detected patterns:
//   - double top / double bottom (two matching pivots around a swing)
//   - bullish / bearish engulfing (two-candle reversal)
//   - hammer / shooting star (single-candle rejection wicks)
//   - doji (indecision)
// =============================================================================

use serde::Serialize;

use crate::types::{Candle, SignalKind};

/// Two pivots within this fraction of each other count as a double top/bottom.
const DOUBLE_LEVEL_TOLERANCE: f64 = 0.005;
/// Body below this fraction of the range reads as a doji.
const DOJI_BODY_FRACTION: f64 = 0.1;
/// Wick must exceed this multiple of the body for hammer / shooting star.
const WICK_BODY_RATIO: f64 = 2.0;
/// Look-back window for double top/bottom scanning.
const DOUBLE_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    DoubleTop,
    DoubleBottom,
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    ShootingStar,
    Doji,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DoubleTop => "double_top",
            Self::DoubleBottom => "double_bottom",
            Self::BullishEngulfing => "bullish_engulfing",
            Self::BearishEngulfing => "bearish_engulfing",
            Self::Hammer => "hammer",
            Self::ShootingStar => "shooting_star",
            Self::Doji => "doji",
        };
        write!(f, "{name}")
    }
}

/// A detected pattern with its directional vote.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedPattern {
    pub kind: PatternKind,
    pub signal: SignalKind,
    pub strength: f64,
}

/// Scan the candle tail for every recognised pattern.
pub fn detect_patterns(candles: &[Candle]) -> Vec<DetectedPattern> {
    let mut found = Vec::new();
    if candles.len() < 2 {
        return found;
    }

    let last = &candles[candles.len() - 1];
    let prev = &candles[candles.len() - 2];

    // --- Engulfing -----------------------------------------------------------
    if last.is_bullish() && !prev.is_bullish() && last.body() > prev.body()
        && last.close > prev.open
        && last.open < prev.close
    {
        found.push(DetectedPattern {
            kind: PatternKind::BullishEngulfing,
            signal: SignalKind::Buy,
            strength: 70.0,
        });
    }
    if !last.is_bullish() && prev.is_bullish() && last.body() > prev.body()
        && last.close < prev.open
        && last.open > prev.close
    {
        found.push(DetectedPattern {
            kind: PatternKind::BearishEngulfing,
            signal: SignalKind::Sell,
            strength: 70.0,
        });
    }

    // --- Single-candle shapes ------------------------------------------------
    let range = last.range();
    if range > 0.0 {
        let body = last.body();
        let upper_wick = last.high - last.open.max(last.close);
        let lower_wick = last.open.min(last.close) - last.low;

        // Rejection wicks take precedence: a shooting star's body is often
        // small enough to read as a doji, but the wick is what matters.
        if lower_wick > body * WICK_BODY_RATIO && upper_wick < body {
            // Long lower rejection — buyers absorbed the sell-off.
            found.push(DetectedPattern {
                kind: PatternKind::Hammer,
                signal: SignalKind::Buy,
                strength: 60.0,
            });
        } else if upper_wick > body * WICK_BODY_RATIO && lower_wick < body {
            found.push(DetectedPattern {
                kind: PatternKind::ShootingStar,
                signal: SignalKind::Sell,
                strength: 60.0,
            });
        } else if body < range * DOJI_BODY_FRACTION {
            found.push(DetectedPattern {
                kind: PatternKind::Doji,
                signal: SignalKind::Hold,
                strength: 30.0,
            });
        }
    }

    // --- Double top / bottom -------------------------------------------------
    if let Some(p) = detect_double_extreme(candles, true) {
        found.push(p);
    }
    if let Some(p) = detect_double_extreme(candles, false) {
        found.push(p);
    }

    found
}

/// Find two matching pivot highs (tops) or pivot lows (bottoms) inside the
/// look-back window, separated by at least two bars.
fn detect_double_extreme(candles: &[Candle], tops: bool) -> Option<DetectedPattern> {
    if candles.len() < 7 {
        return None;
    }
    let window = &candles[candles.len().saturating_sub(DOUBLE_LOOKBACK)..];

    let mut pivots: Vec<(usize, f64)> = Vec::new();
    for i in 1..window.len() - 1 {
        let value = if tops { window[i].high } else { window[i].low };
        let left = if tops { window[i - 1].high } else { window[i - 1].low };
        let right = if tops { window[i + 1].high } else { window[i + 1].low };

        let is_pivot = if tops {
            value > left && value > right
        } else {
            value < left && value < right
        };
        if is_pivot {
            pivots.push((i, value));
        }
    }

    for (i, &(idx_a, a)) in pivots.iter().enumerate() {
        for &(idx_b, b) in pivots.iter().skip(i + 1) {
            if idx_b - idx_a < 3 {
                continue;
            }
            if a != 0.0 && ((b - a) / a).abs() <= DOUBLE_LEVEL_TOLERANCE {
                return Some(if tops {
                    DetectedPattern {
                        kind: PatternKind::DoubleTop,
                        signal: SignalKind::Sell,
                        strength: 75.0,
                    }
                } else {
                    DetectedPattern {
                        kind: PatternKind::DoubleBottom,
                        signal: SignalKind::Buy,
                        strength: 75.0,
                    }
                });
            }
        }
    }

    None
}
