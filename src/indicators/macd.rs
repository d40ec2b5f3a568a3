// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)
// Signal line = EMA(MACD line, signal period)
// Histogram   = MACD line - Signal line
//
// A bullish crossover occurs when the MACD line crosses above the signal line
// between the previous bar and the current bar; bearish is the mirror image.
// The previous-bar values are carried in the result so callers can detect the
// crossover without recomputing the series.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// Most recent MACD state, including the previous bar for crossover detection.
#[derive(Debug, Clone)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_macd: f64,
    pub prev_signal: f64,
}

impl MacdResult {
    /// MACD line crossed above the signal line on the current bar.
    pub fn bullish_cross(&self) -> bool {
        self.prev_macd <= self.prev_signal && self.macd > self.signal
    }

    /// MACD line crossed below the signal line on the current bar.
    pub fn bearish_cross(&self) -> bool {
        self.prev_macd >= self.prev_signal && self.macd < self.signal
    }
}

/// Compute the most recent MACD state.
///
/// Returns `None` when:
/// - `fast >= slow` (degenerate configuration),
/// - any period is zero,
/// - there is not enough data to produce at least two signal-line values
///   (needed for crossover detection).
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return None;
    }

    // Both series end at the last close; align them from the tail.
    let len = fast_ema.len().min(slow_ema.len());
    let fast_tail = &fast_ema[fast_ema.len() - len..];
    let slow_tail = &slow_ema[slow_ema.len() - len..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.len() < 2 {
        return None;
    }

    // Align the MACD line with the signal line tail.
    let macd_tail = &macd_line[macd_line.len() - signal_line.len()..];

    let macd = *macd_tail.last()?;
    let prev_macd = macd_tail[macd_tail.len() - 2];
    let sig = *signal_line.last()?;
    let prev_signal = signal_line[signal_line.len() - 2];

    if !macd.is_finite() || !sig.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd,
        signal: sig,
        histogram: macd - sig,
        prev_macd,
        prev_signal,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_degenerate_periods() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none()); // fast >= slow
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
        assert!(calculate_macd(&closes, 12, 26, 0).is_none());
    }

    #[test]
    fn macd_uptrend_positive() {
        // A steady uptrend keeps the fast EMA above the slow EMA.
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd > 0.0, "MACD should be positive in an uptrend");
    }

    #[test]
    fn macd_downtrend_negative() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd < 0.0, "MACD should be negative in a downtrend");
    }

    #[test]
    fn macd_histogram_identity() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.2).sin() * 5.0)
            .collect();
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(
            (result.histogram - (result.macd - result.signal)).abs() < 1e-12,
            "histogram must equal macd - signal"
        );
    }

    #[test]
    fn macd_bullish_cross_detected() {
        // Downtrend followed by a sharp reversal produces a bullish crossover
        // at some bar; walk the series and assert at least one is detected.
        let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        closes.extend((0..60).map(|i| 140.0 + i as f64 * 2.0));

        let mut seen_cross = false;
        for end in 40..closes.len() {
            if let Some(m) = calculate_macd(&closes[..=end], 12, 26, 9) {
                if m.bullish_cross() {
                    seen_cross = true;
                    break;
                }
            }
        }
        assert!(seen_cross, "expected a bullish crossover after the reversal");
    }

    #[test]
    fn macd_flat_market_near_zero() {
        let closes = vec![100.0; 80];
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd.abs() < 1e-10);
        assert!(result.signal.abs() < 1e-10);
        assert!(!result.bullish_cross());
        assert!(!result.bearish_cross());
    }
}
