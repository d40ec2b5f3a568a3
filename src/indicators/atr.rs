// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// True range widens the bar's high-low span to cover any gap against the
// previous close:
//
//   TR = max(high - low, |high - prevClose|, |low - prevClose|)
//
// The ATR is the Wilder-smoothed average of TR: a plain mean over the first
// `period` bars, after which every new TR replaces 1/period of the running
// value. Both phases fit one pass over consecutive bar pairs.

use crate::types::Candle;

/// True range of `bar` measured against the close that preceded it.
pub(crate) fn true_range(bar: &Candle, previous_close: f64) -> f64 {
    let span = bar.high - bar.low;
    let gap_up = (bar.high - previous_close).abs();
    let gap_down = (bar.low - previous_close).abs();
    span.max(gap_up).max(gap_down)
}

/// Most recent ATR over `candles` (oldest first).
///
/// `None` when the period is zero, when fewer than `period + 1` candles are
/// available (each TR needs a predecessor), or when the input is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }
    let span = period as f64;
    let mut atr = 0.0;

    for (index, pair) in candles.windows(2).enumerate() {
        let tr = true_range(&pair[1], pair[0].close);
        atr = if index < period {
            // Warm-up: accumulate the seed mean.
            atr + tr / span
        } else {
            // Wilder carry-over.
            atr + (tr - atr) / span
        };
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

/// ATR expressed as a percentage of the latest close — comparable across
/// assets at very different price levels.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let last_close = candles.last()?.close;
    if last_close <= 0.0 {
        return None;
    }
    Some(calculate_atr(candles, period)? / last_close * 100.0)
}
