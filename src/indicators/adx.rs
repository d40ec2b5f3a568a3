// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// Measures how strongly the tape is trending, regardless of direction.
// Per bar pair:
//
//   +DM = high - prevHigh   when that up-move beats the down-move and is > 0
//   -DM = prevLow - low     in the mirror case
//
// +DM, -DM, and the true range are Wilder-accumulated into running sums; the
// directional indexes +DI / -DI are those sums as a share of the smoothed
// range, and
//
//   DX  = 100 * |+DI - -DI| / (+DI + -DI)
//   ADX = Wilder-smoothed DX (mean-seeded over the first `period` values)
//
// Everything fits a single pass over consecutive bar pairs: the first
// `period` pairs build the sums, the next `period` DX values seed the ADX,
// and the remainder update it in place.

use crate::indicators::atr::true_range;
use crate::types::{Candle, TrendCategory};

/// Most recent ADX reading with its directional components.
#[derive(Debug, Clone)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub trend: TrendCategory,
}

impl AdxResult {
    /// True when +DI dominates -DI (bullish directional pressure).
    pub fn is_bullish(&self) -> bool {
        self.plus_di > self.minus_di
    }
}

/// Trend-strength bucket for an ADX value.
fn categorise(adx: f64) -> TrendCategory {
    if adx >= 50.0 {
        TrendCategory::Strong
    } else if adx >= 25.0 {
        TrendCategory::Moderate
    } else if adx >= 15.0 {
        TrendCategory::Weak
    } else {
        TrendCategory::None
    }
}

/// Wilder-smoothed running sums of the three per-bar quantities.
#[derive(Default)]
struct DirectionalSums {
    plus: f64,
    minus: f64,
    range: f64,
}

impl DirectionalSums {
    fn absorb(&mut self, plus_dm: f64, minus_dm: f64, tr: f64, warmed_up: bool, span: f64) {
        if warmed_up {
            self.plus += plus_dm - self.plus / span;
            self.minus += minus_dm - self.minus / span;
            self.range += tr - self.range / span;
        } else {
            self.plus += plus_dm;
            self.minus += minus_dm;
            self.range += tr;
        }
    }

    /// (+DI, -DI), or `None` while the smoothed range is degenerate.
    fn indexes(&self) -> Option<(f64, f64)> {
        if self.range <= 0.0 {
            return None;
        }
        let plus_di = self.plus / self.range * 100.0;
        let minus_di = self.minus / self.range * 100.0;
        (plus_di.is_finite() && minus_di.is_finite()).then_some((plus_di, minus_di))
    }
}

/// Compute the most recent ADX (with +DI / -DI) from OHLCV candles.
///
/// `None` when the period is zero, when fewer than `2 * period + 1` candles
/// are supplied (one window to warm the sums, another to seed the DX
/// average), or when the input degenerates mid-stream.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<AdxResult> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }
    let span = period as f64;

    let mut sums = DirectionalSums::default();
    let mut adx: Option<f64> = None;
    let mut dx_accumulator = 0.0;
    let mut dx_seen = 0usize;

    for (index, pair) in candles.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);

        let up_move = current.high - previous.high;
        let down_move = previous.low - current.low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
        let tr = true_range(current, previous.close);

        sums.absorb(plus_dm, minus_dm, tr, index >= period, span);

        // No DX reading until the sums cover a full window.
        if index + 1 < period {
            continue;
        }

        let (plus_di, minus_di) = sums.indexes()?;
        let di_total = plus_di + minus_di;
        let dx = if di_total == 0.0 {
            0.0 // perfectly directionless bar pair
        } else {
            (plus_di - minus_di).abs() / di_total * 100.0
        };
        if !dx.is_finite() {
            return None;
        }

        adx = match adx {
            None => {
                dx_accumulator += dx;
                dx_seen += 1;
                (dx_seen == period).then_some(dx_accumulator / span)
            }
            Some(previous_adx) => Some(previous_adx + (dx - previous_adx) / span),
        };
    }

    let adx = adx.filter(|a| a.is_finite())?;
    let (plus_di, minus_di) = sums.indexes()?;

    Some(AdxResult {
        adx,
        plus_di,
        minus_di,
        trend: categorise(adx),
    })
}
