// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
//   %K = (close - lowestLow) / (highestHigh - lowestLow) * 100
//        over the last `k_period` candles
//   %D = SMA of the last `d_period` %K values
//
// Readings above 80 are conventionally overbought, below 20 oversold.
// =============================================================================

use crate::types::Candle;

/// Most recent %K / %D pair.
#[derive(Debug, Clone)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent stochastic oscillator values.
///
/// Returns `None` when:
/// - either period is zero,
/// - there are fewer than `k_period + d_period - 1` candles,
/// - any intermediate value is non-finite.
///
/// A flat window (highest == lowest) yields a neutral %K of 50.
pub fn calculate_stochastic(
    candles: &[Candle],
    k_period: usize,
    d_period: usize,
) -> Option<StochasticResult> {
    if k_period == 0 || d_period == 0 {
        return None;
    }
    if candles.len() < k_period + d_period - 1 {
        return None;
    }

    // One %K value for each of the last `d_period` windows.
    let mut k_values = Vec::with_capacity(d_period);
    for offset in (0..d_period).rev() {
        let end = candles.len() - offset;
        let window = &candles[end - k_period..end];

        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = window.last()?.close;

        let span = highest - lowest;
        let k = if span == 0.0 {
            50.0
        } else {
            (close - lowest) / span * 100.0
        };

        if !k.is_finite() {
            return None;
        }
        k_values.push(k);
    }

    let k = *k_values.last()?;
    let d = k_values.iter().sum::<f64>() / d_period as f64;

    Some(StochasticResult { k, d })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, (high + low) / 2.0, high, low, close, 100.0, 0)
    }

    #[test]
    fn stochastic_period_zero() {
        let candles = vec![candle(105.0, 95.0, 100.0); 20];
        assert!(calculate_stochastic(&candles, 0, 3).is_none());
        assert!(calculate_stochastic(&candles, 5, 0).is_none());
    }

    #[test]
    fn stochastic_insufficient_data() {
        let candles = vec![candle(105.0, 95.0, 100.0); 5];
        assert!(calculate_stochastic(&candles, 5, 3).is_none());
    }

    #[test]
    fn stochastic_close_at_high() {
        // Close at the very top of the range => %K = 100.
        let mut candles = vec![candle(105.0, 95.0, 100.0); 10];
        candles.push(candle(110.0, 100.0, 110.0));
        let result = calculate_stochastic(&candles, 5, 3).unwrap();
        assert!((result.k - 100.0).abs() < 1e-10);
    }

    #[test]
    fn stochastic_close_at_low() {
        let mut candles = vec![candle(105.0, 95.0, 100.0); 10];
        candles.push(candle(100.0, 90.0, 90.0));
        let result = calculate_stochastic(&candles, 5, 3).unwrap();
        assert!(result.k.abs() < 1e-10);
    }

    #[test]
    fn stochastic_flat_window_neutral() {
        let candles = vec![candle(100.0, 100.0, 100.0); 10];
        let result = calculate_stochastic(&candles, 5, 3).unwrap();
        assert!((result.k - 50.0).abs() < 1e-10);
        assert!((result.d - 50.0).abs() < 1e-10);
    }

    #[test]
    fn stochastic_d_is_average_of_k() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.9).sin() * 5.0;
                candle(base + 2.0, base - 2.0, base + 1.0)
            })
            .collect();
        let result = calculate_stochastic(&candles, 5, 3).unwrap();
        assert!((0.0..=100.0).contains(&result.k));
        assert!((0.0..=100.0).contains(&result.d));
    }
}
