// =============================================================================
// Momentum & Rate of Change (ROC)
// =============================================================================
//
// Both compare each close with the close `period` bars earlier. Momentum is
// the raw difference in price points; ROC normalises it into a percentage of
// the reference close:
//
//   ROC = (close / close_n - 1) * 100

/// ROC series: one value per close from index `period` onward. A zero
/// reference close contributes 0.0 rather than dividing by it.
pub fn calculate_roc(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return Vec::new();
    }
    closes
        .iter()
        .zip(closes.iter().skip(period))
        .map(|(reference, value)| {
            if *reference == 0.0 {
                0.0
            } else {
                (value / reference - 1.0) * 100.0
            }
        })
        .collect()
}

/// Most recent ROC value, when the series is computable.
pub fn latest_roc(closes: &[f64], period: usize) -> Option<f64> {
    calculate_roc(closes, period).last().copied()
}

/// Raw momentum: the most recent close minus the close `period` bars ago.
pub fn calculate_momentum(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let latest = *closes.last()?;
    let reference = closes[closes.len() - 1 - period];
    let points = latest - reference;
    points.is_finite().then_some(points)
}

/// Momentum as a percentage of the reference close.
pub fn calculate_momentum_pct(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let latest = *closes.last()?;
    let reference = closes[closes.len() - 1 - period];
    if reference == 0.0 {
        return None;
    }
    let pct = (latest / reference - 1.0) * 100.0;
    pct.is_finite().then_some(pct)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_reads_plus_one_hundred_percent() {
        let closes = [25.0, 30.0, 50.0, 60.0];
        let roc = calculate_roc(&closes, 2);
        assert_eq!(roc.len(), 2);
        assert!((roc[0] - 100.0).abs() < 1e-12); // 25 -> 50
        assert!((roc[1] - 100.0).abs() < 1e-12); // 30 -> 60
    }

    #[test]
    fn series_pairs_each_close_with_its_reference() {
        // Length must be input length minus the look-back, and a too-short
        // input must simply produce nothing.
        let closes: Vec<f64> = (1..=9).map(|i| i as f64 * 3.0).collect();
        assert_eq!(calculate_roc(&closes, 4).len(), 5);
        assert!(calculate_roc(&closes, 9).is_empty());
        assert!(calculate_roc(&closes, 0).is_empty());
    }

    #[test]
    fn flat_tape_is_zero_everywhere() {
        let closes = vec![77.7; 15];
        for value in calculate_roc(&closes, 5) {
            assert!(value.abs() < 1e-12);
        }
    }

    #[test]
    fn zero_reference_contributes_zero() {
        let closes = [0.0, 1.0, 2.0, 3.0];
        let roc = calculate_roc(&closes, 2);
        assert!((roc[0] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn latest_matches_series_tail() {
        let closes: Vec<f64> = (0..20).map(|i| 40.0 + (i as f64 * 1.1).sin() * 5.0).collect();
        let series = calculate_roc(&closes, 6);
        assert_eq!(latest_roc(&closes, 6), series.last().copied());
        assert!(latest_roc(&closes, 25).is_none());
    }

    #[test]
    fn momentum_measures_raw_points() {
        let closes = [200.0, 204.0, 198.0, 210.0];
        // 210 against 204, two bars back.
        assert!((calculate_momentum(&closes, 2).unwrap() - 6.0).abs() < 1e-12);
        assert!(calculate_momentum(&closes, 4).is_none());
        assert!(calculate_momentum(&closes, 0).is_none());
    }

    #[test]
    fn declining_tape_has_negative_momentum() {
        let closes: Vec<f64> = (0..15).map(|i| 90.0 - 2.5 * i as f64).collect();
        assert!(calculate_momentum(&closes, 8).unwrap() < 0.0);
        assert!(calculate_momentum_pct(&closes, 8).unwrap() < 0.0);
    }

    #[test]
    fn percent_and_roc_agree() {
        let closes: Vec<f64> = (0..30).map(|i| 55.0 + (i as f64 * 0.6).cos() * 4.0).collect();
        let pct = calculate_momentum_pct(&closes, 7).unwrap();
        let roc = latest_roc(&closes, 7).unwrap();
        assert!((pct - roc).abs() < 1e-12);
    }
}
