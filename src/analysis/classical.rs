// =============================================================================
// Classical Analyzer — RSI + MACD + MA-cross confirmation
// =============================================================================
//
// Combines three classical indicators into a single `{signal, strength}`
// verdict. A single confirming indicator suffices — a deliberate relaxation of
// the traditional 2-of-3 confirmation rule; the confirming indicator names are
// recorded so the stricter rule is one threshold away.
//
// Overall strength blends breadth and conviction:
//   strength = (confirmed / 3) * 100 + avg(confirming strengths) * 0.5
// capped at 100.
// =============================================================================

use serde::Serialize;

use crate::indicators::ema::sma_series;
use crate::indicators::macd::calculate_macd;
use crate::indicators::rsi::latest_rsi;
use crate::settings::Settings;
use crate::types::SignalKind;

/// One indicator's contribution to the classical verdict.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSignal {
    pub indicator: String,
    pub signal: SignalKind,
    pub strength: f64,
    pub value: f64,
}

/// Combined classical analysis result.
#[derive(Debug, Clone, Serialize)]
pub struct ClassicalAnalysis {
    pub overall_signal: SignalKind,
    pub signal_strength: f64,
    /// Indicators that confirmed the overall direction.
    pub confirmed_signals: Vec<IndicatorSignal>,
    /// All indicator readings, confirming or not.
    pub components: Vec<IndicatorSignal>,
}

/// Run the classical analyzer over a close series.
pub fn analyze(closes: &[f64], settings: &Settings) -> ClassicalAnalysis {
    let mut components = Vec::with_capacity(3);

    if let Some(sig) = rsi_component(closes, settings) {
        components.push(sig);
    }
    if let Some(sig) = macd_component(closes, settings) {
        components.push(sig);
    }
    if let Some(sig) = ma_cross_component(closes, settings) {
        components.push(sig);
    }

    let buys: Vec<&IndicatorSignal> = components
        .iter()
        .filter(|c| c.signal == SignalKind::Buy)
        .collect();
    let sells: Vec<&IndicatorSignal> = components
        .iter()
        .filter(|c| c.signal == SignalKind::Sell)
        .collect();

    // One confirming indicator suffices; ties read as indecision.
    let overall = if buys.len() > sells.len() {
        SignalKind::Buy
    } else if sells.len() > buys.len() {
        SignalKind::Sell
    } else {
        SignalKind::Hold
    };

    let confirming: Vec<IndicatorSignal> = components
        .iter()
        .filter(|c| c.signal == overall && overall.is_actionable())
        .cloned()
        .collect();

    let signal_strength = if confirming.is_empty() {
        0.0
    } else {
        let avg: f64 =
            confirming.iter().map(|c| c.strength).sum::<f64>() / confirming.len() as f64;
        ((confirming.len() as f64 / 3.0) * 100.0 + avg * 0.5).min(100.0)
    };

    ClassicalAnalysis {
        overall_signal: overall,
        signal_strength,
        confirmed_signals: confirming,
        components,
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

fn rsi_component(closes: &[f64], settings: &Settings) -> Option<IndicatorSignal> {
    let rsi = latest_rsi(closes, settings.rsi_period);

    let (signal, strength) = if rsi <= settings.rsi_oversold {
        // Deeper below the threshold — stronger reversal case.
        let distance = settings.rsi_oversold - rsi;
        (SignalKind::Buy, (50.0 + distance * 2.0).min(100.0))
    } else if rsi >= settings.rsi_overbought {
        let distance = rsi - settings.rsi_overbought;
        (SignalKind::Sell, (50.0 + distance * 2.0).min(100.0))
    } else {
        (SignalKind::Hold, 0.0)
    };

    Some(IndicatorSignal {
        indicator: "RSI".to_string(),
        signal,
        strength,
        value: rsi,
    })
}

fn macd_component(closes: &[f64], settings: &Settings) -> Option<IndicatorSignal> {
    let macd = calculate_macd(
        closes,
        settings.macd_fast,
        settings.macd_slow,
        settings.macd_signal,
    )?;

    let last_close = *closes.last()?;
    let histogram_bps = if last_close > 0.0 {
        (macd.histogram.abs() / last_close) * 10_000.0
    } else {
        0.0
    };

    let (signal, strength) = if macd.bullish_cross() {
        (SignalKind::Buy, (60.0 + histogram_bps).min(100.0))
    } else if macd.bearish_cross() {
        (SignalKind::Sell, (60.0 + histogram_bps).min(100.0))
    } else {
        (SignalKind::Hold, 0.0)
    };

    Some(IndicatorSignal {
        indicator: "MACD".to_string(),
        signal,
        strength,
        value: macd.histogram,
    })
}

fn ma_cross_component(closes: &[f64], settings: &Settings) -> Option<IndicatorSignal> {
    let short = sma_series(closes, settings.ma_short_period);
    let long = sma_series(closes, settings.ma_long_period);
    if short.len() < 2 || long.len() < 2 {
        return None;
    }

    // Align tails: both series end at the last close.
    let (s_now, s_prev) = (short[short.len() - 1], short[short.len() - 2]);
    let (l_now, l_prev) = (long[long.len() - 1], long[long.len() - 2]);

    if l_now == 0.0 {
        return None;
    }
    let spread_pct = (s_now - l_now).abs() / l_now * 100.0;
    let strength = (spread_pct * 100.0).min(100.0);

    let (signal, strength) = if s_prev <= l_prev && s_now > l_now {
        (SignalKind::Buy, strength.max(30.0))
    } else if s_prev >= l_prev && s_now < l_now {
        (SignalKind::Sell, strength.max(30.0))
    } else {
        (SignalKind::Hold, 0.0)
    };

    Some(IndicatorSignal {
        indicator: "MA_CROSS".to_string(),
        signal,
        strength,
        value: s_now - l_now,
    })
}

// ---------------------------------------------------------------------------
// Multi-timeframe combination
// ---------------------------------------------------------------------------

/// Multi-timeframe verdict: the direction with the most agreeing timeframes
/// wins when at least one timeframe confirms it; strength averages only the
/// agreeing timeframes.
#[derive(Debug, Clone, Serialize)]
pub struct MtfAnalysis {
    pub overall_signal: SignalKind,
    pub signal_strength: f64,
    pub confirmed_timeframes: Vec<String>,
    pub per_timeframe: Vec<TimeframeResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeframeResult {
    pub timeframe: String,
    pub signal: SignalKind,
    pub strength: f64,
}

pub fn combine_timeframes(results: &[(String, ClassicalAnalysis)]) -> MtfAnalysis {
    let per_timeframe: Vec<TimeframeResult> = results
        .iter()
        .map(|(tf, a)| TimeframeResult {
            timeframe: tf.clone(),
            signal: a.overall_signal,
            strength: a.signal_strength,
        })
        .collect();

    let buys: Vec<&TimeframeResult> = per_timeframe
        .iter()
        .filter(|r| r.signal == SignalKind::Buy)
        .collect();
    let sells: Vec<&TimeframeResult> = per_timeframe
        .iter()
        .filter(|r| r.signal == SignalKind::Sell)
        .collect();

    let (overall, agreeing) = if buys.len() > sells.len() && !buys.is_empty() {
        (SignalKind::Buy, buys)
    } else if sells.len() > buys.len() && !sells.is_empty() {
        (SignalKind::Sell, sells)
    } else {
        (SignalKind::Hold, Vec::new())
    };

    let signal_strength = if agreeing.is_empty() {
        0.0
    } else {
        agreeing.iter().map(|r| r.strength).sum::<f64>() / agreeing.len() as f64
    };

    MtfAnalysis {
        overall_signal: overall,
        signal_strength,
        confirmed_timeframes: agreeing.iter().map(|r| r.timeframe.clone()).collect(),
        per_timeframe,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    /// A long decline pushes RSI deep into oversold territory.
    fn oversold_series() -> Vec<f64> {
        (0..120).map(|i| 500.0 - i as f64 * 2.0).collect()
    }

    #[test]
    fn oversold_series_triggers_rsi_buy() {
        let analysis = analyze(&oversold_series(), &settings());
        let rsi = analysis
            .components
            .iter()
            .find(|c| c.indicator == "RSI")
            .unwrap();
        assert_eq!(rsi.signal, SignalKind::Buy);
        assert!(rsi.strength >= 50.0);
    }

    #[test]
    fn overbought_series_triggers_rsi_sell() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 2.0).collect();
        let analysis = analyze(&closes, &settings());
        let rsi = analysis
            .components
            .iter()
            .find(|c| c.indicator == "RSI")
            .unwrap();
        assert_eq!(rsi.signal, SignalKind::Sell);
    }

    #[test]
    fn single_confirmation_suffices() {
        // The deep decline confirms only via RSI (MACD and MA stay bearish or
        // flat, so sells dominate); overall must be actionable with one vote.
        let analysis = analyze(&oversold_series(), &settings());
        assert!(analysis.overall_signal.is_actionable());
        assert!(!analysis.confirmed_signals.is_empty());
    }

    #[test]
    fn strength_formula_bounds() {
        let analysis = analyze(&oversold_series(), &settings());
        assert!(analysis.signal_strength >= 0.0);
        assert!(analysis.signal_strength <= 100.0);
    }

    #[test]
    fn flat_market_holds() {
        let closes = vec![100.0; 150];
        let analysis = analyze(&closes, &settings());
        assert_eq!(analysis.overall_signal, SignalKind::Hold);
        assert!((analysis.signal_strength - 0.0).abs() < f64::EPSILON);
        assert!(analysis.confirmed_signals.is_empty());
    }

    #[test]
    fn insufficient_data_is_neutral() {
        let closes = vec![100.0, 101.0, 102.0];
        let analysis = analyze(&closes, &settings());
        assert_eq!(analysis.overall_signal, SignalKind::Hold);
    }

    // ---- multi-timeframe -------------------------------------------------

    fn classical(signal: SignalKind, strength: f64) -> ClassicalAnalysis {
        ClassicalAnalysis {
            overall_signal: signal,
            signal_strength: strength,
            confirmed_signals: Vec::new(),
            components: Vec::new(),
        }
    }

    #[test]
    fn mtf_single_confirmation_passes() {
        let results = vec![
            ("15m".to_string(), classical(SignalKind::Buy, 60.0)),
            ("1h".to_string(), classical(SignalKind::Hold, 0.0)),
            ("4h".to_string(), classical(SignalKind::Hold, 0.0)),
        ];
        let mtf = combine_timeframes(&results);
        assert_eq!(mtf.overall_signal, SignalKind::Buy);
        assert_eq!(mtf.confirmed_timeframes, vec!["15m"]);
        assert!((mtf.signal_strength - 60.0).abs() < 1e-10);
    }

    #[test]
    fn mtf_strength_averages_agreeing_only() {
        let results = vec![
            ("15m".to_string(), classical(SignalKind::Buy, 40.0)),
            ("1h".to_string(), classical(SignalKind::Buy, 80.0)),
            ("4h".to_string(), classical(SignalKind::Sell, 90.0)),
        ];
        let mtf = combine_timeframes(&results);
        assert_eq!(mtf.overall_signal, SignalKind::Buy);
        assert!((mtf.signal_strength - 60.0).abs() < 1e-10);
        assert_eq!(mtf.confirmed_timeframes.len(), 2);
    }

    #[test]
    fn mtf_tie_holds() {
        let results = vec![
            ("15m".to_string(), classical(SignalKind::Buy, 60.0)),
            ("1h".to_string(), classical(SignalKind::Sell, 60.0)),
        ];
        let mtf = combine_timeframes(&results);
        assert_eq!(mtf.overall_signal, SignalKind::Hold);
        assert!(mtf.confirmed_timeframes.is_empty());
    }
}
