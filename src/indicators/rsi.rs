// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// RSI expresses the balance of recent gains against recent losses on a 0–100
// scale. With `U` the smoothed average up-move and `D` the smoothed average
// down-move, the index reduces to
//
//   RSI = 100 * U / (U + D)
//
// (algebraically the same as the textbook 100 - 100/(1 + U/D), without the
// division-by-zero special case in the middle). Both averages warm up as plain
// means over the first `period` moves, then carry over with Wilder's
// smoothing: each new move replaces 1/period of the running average.

/// Full RSI series, one value per close from index `period` onward.
///
/// Empty when `period` is zero, when fewer than `period + 1` closes are
/// supplied, or as soon as the tape produces a non-finite value.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let span = period as f64;

    // Warm-up: arithmetic means of the first `period` moves.
    let mut up = 0.0;
    let mut down = 0.0;
    for pair in closes[..=period].windows(2) {
        let change = pair[1] - pair[0];
        if change >= 0.0 {
            up += change / span;
        } else {
            down -= change / span;
        }
    }

    let mut series = Vec::with_capacity(closes.len() - period);
    match strength_index(up, down) {
        Some(value) => series.push(value),
        None => return series,
    }

    // Wilder carry-over for the rest of the tape.
    for pair in closes[period..].windows(2) {
        let change = pair[1] - pair[0];
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        up += (gain - up) / span;
        down += (loss - down) / span;

        match strength_index(up, down) {
            Some(value) => series.push(value),
            None => break,
        }
    }

    series
}

/// Most recent RSI value. With fewer than `period + 1` closes there is not
/// enough data to say anything, so the neutral midpoint 50.0 is returned.
pub fn latest_rsi(closes: &[f64], period: usize) -> f64 {
    rsi_series(closes, period).last().copied().unwrap_or(50.0)
}

/// Fold smoothed up/down averages into the 0–100 index. A motionless tape is
/// neutral; a loss-free tape saturates at 100.
fn strength_index(up: f64, down: f64) -> Option<f64> {
    let total = up + down;
    let value = if total == 0.0 { 50.0 } else { 100.0 * up / total };
    value.is_finite().then_some(value)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_is_empty_without_enough_closes() {
        assert!(rsi_series(&[], 10).is_empty());
        assert!(rsi_series(&[5.0, 6.0, 7.0], 0).is_empty());
        // period deltas need period + 1 closes; exactly period closes is short.
        let ten: Vec<f64> = (0..10).map(|i| 40.0 + i as f64).collect();
        assert!(rsi_series(&ten, 10).is_empty());
        assert_eq!(rsi_series(&ten, 9).len(), 1);
    }

    #[test]
    fn series_length_tracks_input() {
        let closes: Vec<f64> = (0..25).map(|i| 60.0 + (i as f64 * 1.3).cos()).collect();
        assert_eq!(rsi_series(&closes, 7).len(), closes.len() - 7);
    }

    #[test]
    fn relentless_rally_saturates_high() {
        let closes: Vec<f64> = (0..24).map(|i| 50.0 + 3.0 * i as f64).collect();
        for value in rsi_series(&closes, 9) {
            assert!((value - 100.0).abs() < 1e-9, "expected saturation, got {value}");
        }
    }

    #[test]
    fn relentless_slide_pins_low() {
        let closes: Vec<f64> = (0..24).map(|i| 120.0 - 3.0 * i as f64).collect();
        for value in rsi_series(&closes, 9) {
            assert!(value < 1e-9, "expected floor, got {value}");
        }
    }

    #[test]
    fn motionless_tape_is_neutral() {
        let closes = vec![42.5; 20];
        for value in rsi_series(&closes, 9) {
            assert!((value - 50.0).abs() < 1e-9);
        }
    }

    #[test]
    fn noisy_tape_stays_in_bounds() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 85.0 + (i as f64 * 0.41).sin() * 6.0 + (i as f64 * 1.7).cos() * 2.0)
            .collect();
        for value in rsi_series(&closes, 14) {
            assert!((0.0..=100.0).contains(&value), "RSI {value} escaped [0, 100]");
        }
    }

    #[test]
    fn spike_then_pullbacks_decay_from_ceiling() {
        // One up-move on a flat tape pins the index at 100 (no losses yet);
        // the small pullbacks that follow bleed it down without reaching the
        // floor, exercising the carry-over arithmetic in both directions.
        let mut closes = vec![30.0; 12];
        closes.push(33.0); // spike at index 12
        for i in 1..=8 {
            closes.push(33.0 - 0.05 * i as f64);
        }

        let series = rsi_series(&closes, 6);
        let spike_idx = 12 - 6; // series element for the spike close
        assert!((series[spike_idx] - 100.0).abs() < 1e-9);

        let tail = &series[spike_idx + 1..];
        for pair in tail.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "pullbacks must not lift RSI");
        }
        assert!(*tail.last().unwrap() > 50.0, "gain still dominates the window");
    }

    #[test]
    fn latest_defaults_to_neutral() {
        assert!((latest_rsi(&[], 14) - 50.0).abs() < 1e-12);
        assert!((latest_rsi(&[10.0, 11.0], 14) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn latest_matches_series_tail() {
        let closes: Vec<f64> = (0..30).map(|i| 70.0 + (i as f64 * 0.9).sin() * 4.0).collect();
        let series = rsi_series(&closes, 10);
        assert!((latest_rsi(&closes, 10) - series.last().unwrap()).abs() < 1e-12);
    }
}
