// =============================================================================
// Pattern Ensemble Analyzer — weighted vote over five sub-analyzers
// =============================================================================
//
// Emits an `AiPrediction` aggregating five orthogonal reads of the tape:
//   1. candlestick patterns        (weight 0.25)
//   2. momentum / ROC              (weight 0.20)
//   3. volatility / Bollinger      (weight 0.15)
//   4. trend strength              (weight 0.25)
//   5. price action + volume       (weight 0.15)
//
// Aggregation:
//   buy_score  = Σ (strength/100) · weight · (confidence/100)   over buy subs
//   sell_score = analogously over sell subs
//   signal     = buy/sell when |buy_score − sell_score| > 0.15, else hold
//   strength   = min(max(buy_score, sell_score) · 200, 100)
//   confidence = weight-averaged sub confidences
//
// Derived classifications: market regime from the 20-bar price change plus the
// volatility ratio; risk level from the volatility ratio alone.
// =============================================================================

use serde::Serialize;

use crate::analysis::patterns::detect_patterns;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::calculate_sma;
use crate::indicators::roc::{calculate_momentum_pct, latest_roc};
use crate::types::{Candle, MarketRegime, RiskLevel, SignalKind};

/// Minimum candles before the ensemble will produce a prediction.
pub const MIN_CANDLES: usize = 30;

/// Score gap required before the aggregate signal turns actionable.
const DECISION_MARGIN: f64 = 0.15;

/// Sub-analyzer weights (pattern, momentum, volatility, trend, price action).
const WEIGHTS: [f64; 5] = [0.25, 0.20, 0.15, 0.25, 0.15];

/// Volume above this multiple of the 20-bar average counts as a spike.
const VOLUME_SPIKE_MULT: f64 = 1.5;

/// One sub-analyzer's verdict.
#[derive(Debug, Clone, Serialize)]
pub struct SubAnalysis {
    pub name: String,
    pub signal: SignalKind,
    pub strength: f64,
    pub confidence: f64,
    pub description: String,
}

/// Aggregate prediction from the ensemble.
#[derive(Debug, Clone, Serialize)]
pub struct AiPrediction {
    pub signal: SignalKind,
    pub signal_strength: f64,
    pub confidence: f64,
    pub buy_score: f64,
    pub sell_score: f64,
    pub sub_signals: Vec<SubAnalysis>,
    pub market_regime: MarketRegime,
    pub risk_level: RiskLevel,
    pub short_term_prediction: SignalKind,
    pub medium_term_prediction: SignalKind,
}

impl AiPrediction {
    /// Number of sub-analyzers agreeing with the aggregate signal.
    pub fn agreeing_signals(&self) -> usize {
        self.sub_signals
            .iter()
            .filter(|s| s.signal == self.signal)
            .count()
    }
}

/// Run the ensemble. Returns `None` below [`MIN_CANDLES`].
pub fn analyze(candles: &[Candle]) -> Option<AiPrediction> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let subs = vec![
        pattern_sub(candles),
        momentum_sub(&closes),
        volatility_sub(&closes),
        trend_sub(&closes),
        price_action_sub(candles),
    ];

    // --- Weighted aggregation ----------------------------------------------
    let mut buy_score = 0.0;
    let mut sell_score = 0.0;
    let mut confidence_acc = 0.0;

    for (sub, weight) in subs.iter().zip(WEIGHTS.iter()) {
        let contribution = (sub.strength / 100.0) * weight * (sub.confidence / 100.0);
        match sub.signal {
            SignalKind::Buy => buy_score += contribution,
            SignalKind::Sell => sell_score += contribution,
            SignalKind::Hold => {}
        }
        confidence_acc += sub.confidence * weight;
    }

    let signal = if (buy_score - sell_score).abs() > DECISION_MARGIN {
        if buy_score > sell_score {
            SignalKind::Buy
        } else {
            SignalKind::Sell
        }
    } else {
        SignalKind::Hold
    };

    let signal_strength = (buy_score.max(sell_score) * 200.0).min(100.0);
    let confidence = confidence_acc / WEIGHTS.iter().sum::<f64>();

    // --- Regime & risk -------------------------------------------------------
    let vol_ratio = volatility_ratio(&closes);
    let market_regime = classify_regime(&closes, vol_ratio);
    let risk_level = classify_risk(vol_ratio);

    let medium_term_prediction = subs[3].signal;

    Some(AiPrediction {
        signal,
        signal_strength,
        confidence,
        buy_score,
        sell_score,
        sub_signals: subs,
        market_regime,
        risk_level,
        short_term_prediction: signal,
        medium_term_prediction,
    })
}

// ---------------------------------------------------------------------------
// Sub-analyzers
// ---------------------------------------------------------------------------

/// 1. Candlestick patterns — vote by count and strength.
fn pattern_sub(candles: &[Candle]) -> SubAnalysis {
    let patterns = detect_patterns(candles);

    let buys: Vec<_> = patterns
        .iter()
        .filter(|p| p.signal == SignalKind::Buy)
        .collect();
    let sells: Vec<_> = patterns
        .iter()
        .filter(|p| p.signal == SignalKind::Sell)
        .collect();

    let (signal, dominant) = if buys.len() > sells.len() {
        (SignalKind::Buy, buys)
    } else if sells.len() > buys.len() {
        (SignalKind::Sell, sells)
    } else {
        (SignalKind::Hold, Vec::new())
    };

    let (strength, confidence, description) = if dominant.is_empty() {
        (0.0, 40.0, "no decisive patterns".to_string())
    } else {
        let avg: f64 =
            dominant.iter().map(|p| p.strength).sum::<f64>() / dominant.len() as f64;
        let names: Vec<String> = dominant.iter().map(|p| p.kind.to_string()).collect();
        (
            avg,
            (50.0 + dominant.len() as f64 * 15.0).min(90.0),
            names.join(", "),
        )
    };

    SubAnalysis {
        name: "patterns".to_string(),
        signal,
        strength,
        confidence,
        description,
    }
}

/// 2. Momentum — short and medium momentum plus ROC; bullish when both are
/// positive and the short leg is accelerating, symmetric for bearish.
fn momentum_sub(closes: &[f64]) -> SubAnalysis {
    let short_now = calculate_momentum_pct(closes, 5).unwrap_or(0.0);
    let medium = calculate_momentum_pct(closes, 10).unwrap_or(0.0);
    let short_prev =
        calculate_momentum_pct(&closes[..closes.len().saturating_sub(1)], 5).unwrap_or(0.0);
    let roc = latest_roc(closes, 10).unwrap_or(0.0);

    let accelerating_up = short_now > short_prev;
    let accelerating_down = short_now < short_prev;

    let (signal, strength, confidence) = if short_now > 0.0 && medium > 0.0 && accelerating_up {
        (
            SignalKind::Buy,
            (short_now.abs() * 15.0 + medium.abs() * 10.0).min(100.0),
            70.0,
        )
    } else if short_now < 0.0 && medium < 0.0 && accelerating_down {
        (
            SignalKind::Sell,
            (short_now.abs() * 15.0 + medium.abs() * 10.0).min(100.0),
            70.0,
        )
    } else {
        (SignalKind::Hold, 0.0, 45.0)
    };

    SubAnalysis {
        name: "momentum".to_string(),
        signal,
        strength,
        confidence,
        description: format!(
            "short {short_now:.2}% / medium {medium:.2}% / roc {roc:.2}%"
        ),
    }
}

/// 3. Volatility — Bollinger %B plus bandwidth. Band touches with expanding
/// volatility read as reversals; a squeeze produces hold with real confidence.
fn volatility_sub(closes: &[f64]) -> SubAnalysis {
    let Some(bb) = calculate_bollinger(closes, 20, 2.0) else {
        return SubAnalysis {
            name: "volatility".to_string(),
            signal: SignalKind::Hold,
            strength: 0.0,
            confidence: 30.0,
            description: "insufficient data".to_string(),
        };
    };

    // Bandwidth ten bars ago; expansion means the band is opening up.
    let prior_bw = calculate_bollinger(&closes[..closes.len().saturating_sub(10)], 20, 2.0)
        .map(|b| b.bandwidth);
    let expanding = prior_bw.map(|p| bb.bandwidth > p).unwrap_or(false);
    let squeeze = prior_bw.map(|p| bb.bandwidth < p * 0.5).unwrap_or(false);

    let (signal, strength, confidence, description) = if squeeze {
        (
            SignalKind::Hold,
            0.0,
            65.0,
            format!("bandwidth squeeze ({:.2})", bb.bandwidth),
        )
    } else if bb.percent_b <= 0.05 && expanding {
        (
            SignalKind::Buy,
            ((0.05 - bb.percent_b) * 400.0 + 50.0).min(100.0),
            65.0,
            format!("oversold at lower band (%B {:.2})", bb.percent_b),
        )
    } else if bb.percent_b >= 0.95 && expanding {
        (
            SignalKind::Sell,
            ((bb.percent_b - 0.95) * 400.0 + 50.0).min(100.0),
            65.0,
            format!("overbought at upper band (%B {:.2})", bb.percent_b),
        )
    } else {
        (
            SignalKind::Hold,
            0.0,
            45.0,
            format!("%B {:.2}, bandwidth {:.2}", bb.percent_b, bb.bandwidth),
        )
    };

    SubAnalysis {
        name: "volatility".to_string(),
        signal,
        strength,
        confidence,
        description,
    }
}

/// 4. Trend strength — four-way vote over price vs SMA10/20 and the SMA
/// 10/20/50 stack.
fn trend_sub(closes: &[f64]) -> SubAnalysis {
    let price = *closes.last().unwrap_or(&0.0);
    let sma10 = calculate_sma(closes, 10);
    let sma20 = calculate_sma(closes, 20);
    let sma50 = calculate_sma(closes, 50);

    // Strict comparisons: a perfectly flat stack votes for neither side.
    let mut bull = 0u32;
    let mut bear = 0u32;
    let mut total = 0u32;

    let mut vote = |pair: Option<(f64, f64)>| {
        if let Some((a, b)) = pair {
            total += 1;
            if a > b {
                bull += 1;
            } else if a < b {
                bear += 1;
            }
        }
    };

    vote(sma10.map(|s| (price, s)));
    vote(sma20.map(|s| (price, s)));
    vote(sma10.and_then(|a| sma20.map(|b| (a, b))));
    vote(sma20.and_then(|a| sma50.map(|b| (a, b))));

    let (signal, strength, confidence) = if total == 0 {
        (SignalKind::Hold, 0.0, 30.0)
    } else if bull as f64 >= total as f64 * 0.75 {
        (
            SignalKind::Buy,
            bull as f64 / total as f64 * 100.0,
            50.0 + bull as f64 * 10.0,
        )
    } else if bear as f64 >= total as f64 * 0.75 {
        (
            SignalKind::Sell,
            bear as f64 / total as f64 * 100.0,
            50.0 + bear as f64 * 10.0,
        )
    } else {
        (SignalKind::Hold, 0.0, 45.0)
    };

    SubAnalysis {
        name: "trend".to_string(),
        signal,
        strength,
        confidence: confidence.min(90.0),
        description: format!("{bull} bullish / {bear} bearish of {total} alignment votes"),
    }
}

/// 5. Price action — current candle direction plus relative volume.
fn price_action_sub(candles: &[Candle]) -> SubAnalysis {
    let last = &candles[candles.len() - 1];

    let lookback = candles.len().min(21);
    let window = &candles[candles.len() - lookback..candles.len() - 1];
    let avg_volume = if window.is_empty() {
        0.0
    } else {
        window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64
    };
    let volume_spike = avg_volume > 0.0 && last.volume > avg_volume * VOLUME_SPIKE_MULT;

    let body_pct = if last.range() > 0.0 {
        last.body() / last.range()
    } else {
        0.0
    };

    let (signal, strength, confidence) = if volume_spike && body_pct > 0.5 {
        let strength = (body_pct * 60.0 + 30.0).min(100.0);
        if last.is_bullish() {
            (SignalKind::Buy, strength, 65.0)
        } else {
            (SignalKind::Sell, strength, 65.0)
        }
    } else if body_pct > 0.7 {
        // Decisive candle without volume confirmation.
        let strength = body_pct * 50.0;
        if last.is_bullish() {
            (SignalKind::Buy, strength, 45.0)
        } else {
            (SignalKind::Sell, strength, 45.0)
        }
    } else {
        (SignalKind::Hold, 0.0, 40.0)
    };

    SubAnalysis {
        name: "price_action".to_string(),
        signal,
        strength,
        confidence,
        description: format!(
            "body {:.0}% of range, volume {}",
            body_pct * 100.0,
            if volume_spike { "spike" } else { "normal" }
        ),
    }
}

// ---------------------------------------------------------------------------
// Regime & risk classification
// ---------------------------------------------------------------------------

/// Recent-to-baseline volatility ratio: stdev of the last 10 returns over the
/// stdev of the last 30.
fn volatility_ratio(closes: &[f64]) -> f64 {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 30 {
        return 1.0;
    }

    let recent = stdev(&returns[returns.len() - 10..]);
    let baseline = stdev(&returns[returns.len() - 30..]);
    if baseline == 0.0 {
        1.0
    } else {
        recent / baseline
    }
}

fn stdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn classify_regime(closes: &[f64], vol_ratio: f64) -> MarketRegime {
    if vol_ratio > 1.5 {
        return MarketRegime::Volatile;
    }
    if closes.len() < 21 {
        return MarketRegime::Ranging;
    }
    let past = closes[closes.len() - 21];
    let last = closes[closes.len() - 1];
    if past == 0.0 {
        return MarketRegime::Ranging;
    }
    let change_pct = (last - past) / past * 100.0;

    if change_pct > 5.0 {
        MarketRegime::TrendingUp
    } else if change_pct < -5.0 {
        MarketRegime::TrendingDown
    } else {
        MarketRegime::Ranging
    }
}

fn classify_risk(vol_ratio: f64) -> RiskLevel {
    if vol_ratio < 0.8 {
        RiskLevel::Low
    } else if vol_ratio < 1.3 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}
