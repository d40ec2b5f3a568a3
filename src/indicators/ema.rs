// =============================================================================
// Moving Averages — SMA and SMA-seeded EMA
// =============================================================================
//
// `sma_series` slides a running window sum instead of re-summing each window.
// `calculate_ema` uses the incremental form of the exponential update,
//
//   alpha = 2 / (period + 1)
//   ema  += alpha * (close - ema)
//
// seeded from the arithmetic mean of the first window so the series opens on
// a stable value rather than the first close.

/// Mean of the most recent `period` values.
///
/// Returns `None` for a zero period, a too-short input, or a non-finite mean.
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    let mean = tail.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// One SMA per full window, oldest first. Element `i` belongs to the value at
/// index `period - 1 + i`. A running sum keeps this O(n).
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let span = period as f64;
    let mut running: f64 = values[..period].iter().sum();
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(running / span);

    for i in period..values.len() {
        running += values[i] - values[i - period];
        series.push(running / span);
    }
    series
}

/// EMA series over `values`, one element per value from index `period - 1`.
///
/// The first element is the plain mean of the opening window; every later
/// element folds one value in at weight `alpha`. A non-finite intermediate
/// ends the series early — consumers must not trust a poisoned tail.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    if !current.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(current);

    for &value in &values[period..] {
        current += alpha * (value - current);
        if !current.is_finite() {
            break;
        }
        series.push(current);
    }
    series
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_of_known_window() {
        let values = [7.0, 9.0, 14.0, 10.0];
        // Last three: (9 + 14 + 10) / 3 = 11.
        assert!((calculate_sma(&values, 3).unwrap() - 11.0).abs() < 1e-12);
        // Full window.
        assert!((calculate_sma(&values, 4).unwrap() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn sma_guards() {
        assert!(calculate_sma(&[1.0, 2.0], 3).is_none());
        assert!(calculate_sma(&[1.0, 2.0], 0).is_none());
        assert!(calculate_sma(&[], 1).is_none());
        assert!(calculate_sma(&[f64::NAN, 2.0], 2).is_none());
    }

    #[test]
    fn sma_series_slides_the_window() {
        let values = [2.0, 4.0, 6.0, 12.0];
        let series = sma_series(&values, 2);
        assert_eq!(series.len(), 3);
        assert!((series[0] - 3.0).abs() < 1e-12);
        assert!((series[1] - 5.0).abs() < 1e-12);
        assert!((series[2] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn sma_series_running_sum_matches_direct_mean() {
        // The sliding-sum optimisation must agree with a naive recompute.
        let values: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.83).sin() * 7.0).collect();
        let series = sma_series(&values, 9);
        for (i, &got) in series.iter().enumerate() {
            let naive: f64 = values[i..i + 9].iter().sum::<f64>() / 9.0;
            assert!((got - naive).abs() < 1e-9, "window {i}: {got} vs {naive}");
        }
    }

    #[test]
    fn ema_guards() {
        assert!(calculate_ema(&[], 4).is_empty());
        assert!(calculate_ema(&[5.0, 6.0, 7.0], 0).is_empty());
        assert!(calculate_ema(&[5.0, 6.0], 4).is_empty());
    }

    #[test]
    fn ema_seed_is_the_window_mean() {
        let series = calculate_ema(&[10.0, 20.0, 30.0], 3);
        assert_eq!(series.len(), 1);
        assert!((series[0] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn ema_incremental_form_matches_definition() {
        // Replay the textbook recurrence by hand and compare element-wise.
        let values = [3.0, 6.0, 9.0, 12.0, 18.0, 15.0, 21.0];
        let period = 3;
        let alpha = 2.0 / (period as f64 + 1.0);

        let mut expected = vec![6.0]; // mean of [3, 6, 9]
        let mut ema = 6.0;
        for &v in &values[period..] {
            ema = v * alpha + ema * (1.0 - alpha);
            expected.push(ema);
        }

        let series = calculate_ema(&values, period);
        assert_eq!(series.len(), expected.len());
        for (got, want) in series.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
    }

    #[test]
    fn ema_truncates_on_poisoned_input() {
        // A NaN mid-series stops output at the last sound value.
        let values = [4.0, 4.0, 4.0, f64::NAN, 4.0, 4.0];
        let series = calculate_ema(&values, 3);
        assert_eq!(series.len(), 1);
        assert!((series[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn shorter_period_tracks_price_more_closely() {
        // After a step change, the fast EMA should sit nearer the new level.
        let mut values = vec![50.0; 30];
        values.extend(std::iter::repeat(80.0).take(10));

        let fast = *calculate_ema(&values, 5).last().unwrap();
        let slow = *calculate_ema(&values, 20).last().unwrap();
        assert!(
            (80.0 - fast).abs() < (80.0 - slow).abs(),
            "fast {fast} should be closer to 80 than slow {slow}"
        );
    }
}
