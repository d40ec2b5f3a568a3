// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA of the window; the envelope sits `k` standard deviations
// either side. Two derived readings drive the analyzers:
//
//   %B        = (price - lower) / (upper - lower)   0 at the lower band, 1 at
//                                                   the upper
//   bandwidth = (upper - lower) / middle * 100      the squeeze metric
//
// Mean and deviation come from a single fold over the window (sum and sum of
// squares); a collapsed band defines %B as 0.5 — the price sits exactly in
// the middle of a zero-width envelope.

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub percent_b: f64,
    pub bandwidth: f64,
}

/// Calculate the bands over the most recent `period` closes.
///
/// Returns `None` when the period is zero, the input is too short, the middle
/// band is zero, or any derived value is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let span = period as f64;
    let tail = &closes[closes.len() - period..];

    let (sum, sum_sq) = tail
        .iter()
        .fold((0.0_f64, 0.0_f64), |(s, sq), &v| (s + v, sq + v * v));
    let middle = sum / span;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    // E[x^2] - E[x]^2, clamped: rounding can push a flat window fractionally
    // negative.
    let variance = (sum_sq / span - middle * middle).max(0.0);
    let envelope = num_std * variance.sqrt();

    let upper = middle + envelope;
    let lower = middle - envelope;
    let bandwidth = (upper - lower) / middle * 100.0;

    let price = *tail.last()?;
    let width = upper - lower;
    let percent_b = if width == 0.0 {
        0.5
    } else {
        (price - lower) / width
    };

    (percent_b.is_finite() && bandwidth.is_finite()).then_some(BollingerResult {
        upper,
        middle,
        lower,
        percent_b,
        bandwidth,
    })
}
