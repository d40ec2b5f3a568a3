// =============================================================================
// Support / Resistance Levels — pivot detection with clustering
// =============================================================================
//
// A pivot high is a candle whose high exceeds the highs of the two candles on
// each side (5-bar confirmation); pivot lows mirror this on the low side.
// Nearby pivots (within 0.5 % of each other) are clustered into a single level
// at their mean. At most five levels are kept per side, preferring the most
// recently confirmed ones.
// =============================================================================

use crate::types::Candle;

/// Confirmation width: candles required on each side of a pivot.
const PIVOT_WING: usize = 2;
/// Pivots within this fraction of each other merge into one level.
const CLUSTER_TOLERANCE: f64 = 0.005;
/// Maximum number of levels retained per side.
const MAX_LEVELS: usize = 5;

/// Detected support and resistance levels.
#[derive(Debug, Clone, Default)]
pub struct PriceLevels {
    /// Support levels, sorted descending (nearest below first for a price
    /// inside the range).
    pub support: Vec<f64>,
    /// Resistance levels, sorted ascending.
    pub resistance: Vec<f64>,
}

impl PriceLevels {
    /// Nearest support strictly below `price`.
    pub fn nearest_support(&self, price: f64) -> Option<f64> {
        self.support
            .iter()
            .copied()
            .filter(|&s| s < price)
            .fold(None, |best, s| match best {
                Some(b) if b >= s => Some(b),
                _ => Some(s),
            })
    }

    /// Nearest resistance strictly above `price`.
    pub fn nearest_resistance(&self, price: f64) -> Option<f64> {
        self.resistance
            .iter()
            .copied()
            .filter(|&r| r > price)
            .fold(None, |best, r| match best {
                Some(b) if b <= r => Some(b),
                _ => Some(r),
            })
    }
}

/// Detect support/resistance levels from pivot highs and lows.
///
/// Returns empty level sets when there are too few candles for even one
/// confirmed pivot (`2 * PIVOT_WING + 1`).
pub fn find_levels(candles: &[Candle]) -> PriceLevels {
    let window = 2 * PIVOT_WING + 1;
    if candles.len() < window {
        return PriceLevels::default();
    }

    let mut pivot_highs: Vec<f64> = Vec::new();
    let mut pivot_lows: Vec<f64> = Vec::new();

    for i in PIVOT_WING..candles.len() - PIVOT_WING {
        let high = candles[i].high;
        let low = candles[i].low;

        let is_pivot_high = (1..=PIVOT_WING)
            .all(|w| high > candles[i - w].high && high > candles[i + w].high);
        let is_pivot_low =
            (1..=PIVOT_WING).all(|w| low < candles[i - w].low && low < candles[i + w].low);

        if is_pivot_high {
            pivot_highs.push(high);
        }
        if is_pivot_low {
            pivot_lows.push(low);
        }
    }

    let mut resistance = cluster(&pivot_highs);
    let mut support = cluster(&pivot_lows);

    // Keep only the most recently confirmed levels.
    if resistance.len() > MAX_LEVELS {
        resistance.drain(..resistance.len() - MAX_LEVELS);
    }
    if support.len() > MAX_LEVELS {
        support.drain(..support.len() - MAX_LEVELS);
    }

    resistance.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    support.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    PriceLevels {
        support,
        resistance,
    }
}

/// Merge pivots within `CLUSTER_TOLERANCE` of a cluster's running mean.
/// Input order (chronological) is preserved for recency-based trimming.
fn cluster(pivots: &[f64]) -> Vec<f64> {
    let mut clusters: Vec<(f64, usize)> = Vec::new(); // (mean, count)

    for &p in pivots {
        if !p.is_finite() {
            continue;
        }
        match clusters
            .iter_mut()
            .find(|(mean, _)| mean != &0.0 && ((p - *mean) / *mean).abs() <= CLUSTER_TOLERANCE)
        {
            Some((mean, count)) => {
                // Fold the new pivot into the running mean.
                *mean = (*mean * *count as f64 + p) / (*count as f64 + 1.0);
                *count += 1;
            }
            None => clusters.push((p, 1)),
        }
    }

    clusters.into_iter().map(|(mean, _)| mean).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64) -> Candle {
        let mid = (high + low) / 2.0;
        Candle::new(0, mid, high, low, mid, 100.0, 0)
    }

    /// A flat series with one spike in the middle.
    fn series_with_spike(spike_high: f64) -> Vec<Candle> {
        let mut out = vec![candle(101.0, 99.0); 5];
        out.push(candle(spike_high, 99.0));
        out.extend(vec![candle(101.0, 99.0); 5]);
        out
    }

    #[test]
    fn too_few_candles() {
        let levels = find_levels(&vec![candle(101.0, 99.0); 3]);
        assert!(levels.support.is_empty());
        assert!(levels.resistance.is_empty());
    }

    #[test]
    fn detects_single_pivot_high() {
        let levels = find_levels(&series_with_spike(110.0));
        assert_eq!(levels.resistance.len(), 1);
        assert!((levels.resistance[0] - 110.0).abs() < 1e-10);
    }

    #[test]
    fn detects_pivot_low() {
        let mut candles = vec![candle(101.0, 99.0); 5];
        candles.push(candle(101.0, 90.0));
        candles.extend(vec![candle(101.0, 99.0); 5]);

        let levels = find_levels(&candles);
        assert_eq!(levels.support.len(), 1);
        assert!((levels.support[0] - 90.0).abs() < 1e-10);
    }

    #[test]
    fn clusters_nearby_pivots() {
        // Two spikes at 110.0 and 110.2 (within 0.5 %) should merge.
        let mut candles = vec![candle(101.0, 99.0); 3];
        candles.push(candle(110.0, 99.0));
        candles.extend(vec![candle(101.0, 99.0); 4]);
        candles.push(candle(110.2, 99.0));
        candles.extend(vec![candle(101.0, 99.0); 3]);

        let levels = find_levels(&candles);
        assert_eq!(levels.resistance.len(), 1);
        let merged = levels.resistance[0];
        assert!((merged - 110.1).abs() < 0.2, "merged level {merged}");
    }

    #[test]
    fn keeps_at_most_five_per_side() {
        // Eight well-separated spikes.
        let mut candles: Vec<Candle> = Vec::new();
        for i in 0..8 {
            candles.extend(vec![candle(101.0, 99.0); 3]);
            candles.push(candle(110.0 + i as f64 * 5.0, 99.0));
        }
        candles.extend(vec![candle(101.0, 99.0); 3]);

        let levels = find_levels(&candles);
        assert!(levels.resistance.len() <= MAX_LEVELS);
    }

    #[test]
    fn nearest_lookups() {
        let levels = PriceLevels {
            support: vec![95.0, 90.0],
            resistance: vec![105.0, 110.0],
        };
        assert_eq!(levels.nearest_support(100.0), Some(95.0));
        assert_eq!(levels.nearest_resistance(100.0), Some(105.0));
        assert_eq!(levels.nearest_support(80.0), None);
        assert_eq!(levels.nearest_resistance(120.0), None);
    }
}
