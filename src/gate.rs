// =============================================================================
// Market & Account Gate — per-symbol condition score and capital protection
// =============================================================================
//
// Two layers stand between a signal and an order:
//
//   1. Market condition — a 0–100 score per symbol, penalised for volatility,
//      ranging tape, and weak trend. `trade` >= 70, `caution` 40–69,
//      `avoid` < 40.
//   2. Account protection — circuit breakers on daily loss percent,
//      consecutive losses, and the concurrent-trade cap. Daily counters reset
//      when the local date rolls over.
//
// `record_trade_result` is called exactly once per trade close; a win resets
// the consecutive-loss streak, a loss extends it.
// =============================================================================

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::indicators::atr::calculate_atr_pct;
use crate::indicators::ema::calculate_sma;
use crate::settings::Settings;
use crate::types::Candle;

/// ATR% beyond this multiple of the configured cap reads as extreme.
const EXTREME_VOLATILITY_MULT: f64 = 1.5;

// ---------------------------------------------------------------------------
// Market condition
// ---------------------------------------------------------------------------

/// Classified per-symbol market condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Unknown,
}

impl std::fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "trending_up"),
            Self::TrendingDown => write!(f, "trending_down"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Gate verdict derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Trade,
    Caution,
    Avoid,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trade => write!(f, "trade"),
            Self::Caution => write!(f, "caution"),
            Self::Avoid => write!(f, "avoid"),
        }
    }
}

/// Full market-condition analysis for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct MarketAnalysis {
    pub condition: MarketCondition,
    pub score: f64,
    pub atr_pct: f64,
    pub trend_strength: f64,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
}

/// Score a symbol's market condition from its candle window.
pub fn analyze_market_condition(candles: &[Candle], settings: &Settings) -> MarketAnalysis {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let atr_pct = calculate_atr_pct(candles, 14).unwrap_or(0.0);
    let price = closes.last().copied().unwrap_or(0.0);
    let sma20 = calculate_sma(&closes, 20);
    let sma50 = calculate_sma(&closes, 50);

    if price <= 0.0 || sma20.is_none() || sma50.is_none() {
        return MarketAnalysis {
            condition: MarketCondition::Unknown,
            score: 0.0,
            atr_pct,
            trend_strength: 0.0,
            recommendation: Recommendation::Avoid,
            reasons: vec!["insufficient market data".to_string()],
        };
    }
    let sma20 = sma20.unwrap();
    let sma50 = sma50.unwrap();

    // --- Trend strength ------------------------------------------------------
    // Price-vs-SMA20 percent, SMA20-vs-SMA50 percent, and the count of 2-bar
    // higher-highs / lower-lows over the last 10 bars.
    let price_vs_sma20 = (price - sma20) / sma20 * 100.0;
    let sma20_vs_sma50 = (sma20 - sma50) / sma50 * 100.0;

    let tail = &candles[candles.len().saturating_sub(10)..];
    let mut higher_highs = 0u32;
    let mut lower_lows = 0u32;
    for i in 2..tail.len() {
        if tail[i].high > tail[i - 2].high {
            higher_highs += 1;
        }
        if tail[i].low < tail[i - 2].low {
            lower_lows += 1;
        }
    }
    let structure_count = higher_highs.max(lower_lows);

    let trend_strength = (price_vs_sma20.abs() * 10.0).min(40.0)
        + (sma20_vs_sma50.abs() * 10.0).min(30.0)
        + (structure_count as f64 * 3.0).min(30.0);
    let trend_up = price_vs_sma20 + sma20_vs_sma50 > 0.0;

    // --- Classification ------------------------------------------------------
    let extreme_volatility = atr_pct > settings.max_volatility_percent * EXTREME_VOLATILITY_MULT;
    let high_volatility = atr_pct > settings.max_volatility_percent;
    let weak_trend = trend_strength < settings.min_trend_strength;

    let condition = if extreme_volatility || high_volatility {
        MarketCondition::Volatile
    } else if weak_trend {
        MarketCondition::Ranging
    } else if trend_up {
        MarketCondition::TrendingUp
    } else {
        MarketCondition::TrendingDown
    };

    // --- Scoring -------------------------------------------------------------
    let mut score: f64 = 100.0;
    let mut reasons = Vec::new();

    if extreme_volatility {
        score -= 40.0;
        reasons.push(format!("extreme volatility (ATR {atr_pct:.2}%)"));
    }
    if high_volatility {
        score -= 30.0;
        reasons.push(format!(
            "ATR {atr_pct:.2}% over the {:.1}% cap",
            settings.max_volatility_percent
        ));
    }
    if condition == MarketCondition::Ranging && settings.avoid_ranging_market {
        score -= 25.0;
        reasons.push("ranging market".to_string());
    }
    if weak_trend && settings.trend_filter_enabled {
        score -= 20.0;
        reasons.push(format!(
            "trend strength {trend_strength:.1} below {:.1}",
            settings.min_trend_strength
        ));
    }
    score = score.max(0.0);

    let recommendation = if score >= 70.0 {
        Recommendation::Trade
    } else if score >= 40.0 {
        Recommendation::Caution
    } else {
        Recommendation::Avoid
    };

    debug!(
        condition = %condition,
        score,
        atr_pct,
        trend_strength,
        recommendation = %recommendation,
        "market condition analyzed"
    );

    MarketAnalysis {
        condition,
        score,
        atr_pct,
        trend_strength,
        recommendation,
        reasons,
    }
}

// ---------------------------------------------------------------------------
// Account protection
// ---------------------------------------------------------------------------

/// Snapshot of the protection state for a gate decision or the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub can_trade: bool,
    pub reasons: Vec<String>,
    pub daily_pnl: f64,
    pub daily_pnl_percent: f64,
    pub consecutive_losses: u32,
    pub daily_trade_count: u32,
    pub active_trades: usize,
}

struct GuardInner {
    daily_pnl: f64,
    consecutive_losses: u32,
    daily_trade_count: u32,
    current_date: NaiveDate,
}

/// Day-scoped capital protection counters. Owned by the engine; the operator
/// API reads snapshots.
pub struct AccountGuard {
    state: RwLock<GuardInner>,
    clock: Arc<dyn Clock>,
}

impl AccountGuard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let today = clock.local_date();
        Self {
            state: RwLock::new(GuardInner {
                daily_pnl: 0.0,
                consecutive_losses: 0,
                daily_trade_count: 0,
                current_date: today,
            }),
            clock,
        }
    }

    /// Reset daily counters when the local date has rolled over.
    pub fn maybe_roll_daily(&self) {
        let today = self.clock.local_date();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        // Re-check under the write lock; another task may have already reset.
        if s.current_date != today {
            info!(
                old_date = %s.current_date,
                new_date = %today,
                "date rolled — resetting daily protection counters"
            );
            s.daily_pnl = 0.0;
            s.daily_trade_count = 0;
            s.current_date = today;
        }
    }

    /// Record a completed trade's P/L. Wins reset the loss streak.
    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_roll_daily();
        let mut s = self.state.write();
        s.daily_pnl += pnl;
        if pnl > 0.0 {
            s.consecutive_losses = 0;
        } else if pnl < 0.0 {
            s.consecutive_losses += 1;
        }

        debug!(
            pnl,
            daily_pnl = s.daily_pnl,
            consecutive_losses = s.consecutive_losses,
            "trade result recorded"
        );
    }

    /// Count an opened trade against the daily cap.
    pub fn record_trade_opened(&self) {
        self.maybe_roll_daily();
        self.state.write().daily_trade_count += 1;
    }

    pub fn daily_trade_count(&self) -> u32 {
        self.maybe_roll_daily();
        self.state.read().daily_trade_count
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.state.read().consecutive_losses
    }

    pub fn daily_pnl(&self) -> f64 {
        self.maybe_roll_daily();
        self.state.read().daily_pnl
    }

    /// Evaluate the circuit breakers against a live balance and the current
    /// active-trade count.
    pub fn status(&self, balance: f64, active_trades: usize, settings: &Settings) -> AccountStatus {
        self.maybe_roll_daily();
        let s = self.state.read();

        let daily_pnl_percent = if balance > 0.0 {
            s.daily_pnl / balance * 100.0
        } else {
            0.0
        };

        let mut reasons = Vec::new();

        if daily_pnl_percent < -settings.max_daily_loss_percent {
            reasons.push(format!(
                "daily loss {:.2}% exceeds the {:.1}% limit",
                -daily_pnl_percent, settings.max_daily_loss_percent
            ));
        }
        if s.consecutive_losses >= settings.pause_after_consecutive_losses {
            reasons.push(format!(
                "{} consecutive losses (pause at {})",
                s.consecutive_losses, settings.pause_after_consecutive_losses
            ));
        }
        if active_trades >= settings.max_concurrent_trades {
            reasons.push(format!(
                "{active_trades} concurrent trades (cap {})",
                settings.max_concurrent_trades
            ));
        }

        let can_trade = reasons.is_empty();
        if !can_trade {
            warn!(reasons = ?reasons, "account protection blocking trading");
        }

        AccountStatus {
            can_trade,
            reasons,
            daily_pnl: s.daily_pnl,
            daily_pnl_percent,
            consecutive_losses: s.consecutive_losses,
            daily_trade_count: s.daily_trade_count,
            active_trades,
        }
    }
}

impl std::fmt::Debug for AccountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("AccountGuard")
            .field("daily_pnl", &s.daily_pnl)
            .field("consecutive_losses", &s.consecutive_losses)
            .field("daily_trade_count", &s.daily_trade_count)
            .field("current_date", &s.current_date)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Combined gate decision
// ---------------------------------------------------------------------------

/// The combined verdict: market filter (when enabled) must not say `avoid`,
/// and account protection must allow trading.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub market: Option<MarketAnalysis>,
    pub account: AccountStatus,
}

pub fn decide(market: Option<MarketAnalysis>, account: AccountStatus) -> GateDecision {
    let mut reasons = Vec::new();

    let market_ok = match &market {
        Some(m) if m.recommendation == Recommendation::Avoid => {
            reasons.extend(m.reasons.iter().cloned());
            false
        }
        _ => true,
    };

    if !account.can_trade {
        reasons.extend(account.reasons.iter().cloned());
    }

    GateDecision {
        allowed: market_ok && account.can_trade,
        reasons,
        market,
        account,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 100.0, 0)
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        ))
    }

    // ---- market condition ------------------------------------------------

    #[test]
    fn trending_market_scores_high() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.8;
                candle(base, base + 0.6, base - 0.3, base + 0.5)
            })
            .collect();
        let analysis = analyze_market_condition(&candles, &Settings::default());
        assert!(
            matches!(
                analysis.condition,
                MarketCondition::TrendingUp | MarketCondition::Volatile
            ),
            "condition {:?}",
            analysis.condition
        );
        if analysis.condition == MarketCondition::TrendingUp {
            assert_eq!(analysis.recommendation, Recommendation::Trade);
            assert!(analysis.score >= 70.0);
        }
    }

    #[test]
    fn flat_market_reads_ranging_and_penalised() {
        let candles: Vec<Candle> = (0..60)
            .map(|_| candle(100.0, 100.2, 99.8, 100.0))
            .collect();
        let analysis = analyze_market_condition(&candles, &Settings::default());
        assert_eq!(analysis.condition, MarketCondition::Ranging);
        // Ranging (-25) plus weak trend (-20) lands in caution territory.
        assert!(analysis.score < 70.0);
        assert!(!analysis.reasons.is_empty());
    }

    #[test]
    fn wild_volatility_reads_avoid() {
        // Huge ranges relative to price blow through the ATR cap.
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 1.1).sin() * 20.0;
                candle(base, base + 18.0, base - 18.0, base + (i % 3) as f64 * 5.0 - 5.0)
            })
            .collect();
        let analysis = analyze_market_condition(&candles, &Settings::default());
        assert_eq!(analysis.condition, MarketCondition::Volatile);
        assert_eq!(analysis.recommendation, Recommendation::Avoid);
    }

    #[test]
    fn insufficient_data_is_unknown() {
        let candles = vec![candle(100.0, 101.0, 99.0, 100.0); 10];
        let analysis = analyze_market_condition(&candles, &Settings::default());
        assert_eq!(analysis.condition, MarketCondition::Unknown);
        assert_eq!(analysis.recommendation, Recommendation::Avoid);
    }

    // ---- account guard ---------------------------------------------------

    #[test]
    fn daily_loss_breaker_trips() {
        // Balance 10_000, cap 5%. Two -300 losses = -6% => blocked.
        let guard = AccountGuard::new(manual_clock());
        let settings = Settings::default();

        guard.record_trade_result(-300.0);
        guard.record_trade_result(-300.0);

        let status = guard.status(10_000.0, 0, &settings);
        assert!(!status.can_trade);
        assert!(
            status.reasons.iter().any(|r| r.contains("daily loss")),
            "reasons: {:?}",
            status.reasons
        );
        assert!((status.daily_pnl_percent + 6.0).abs() < 1e-10);
    }

    #[test]
    fn consecutive_loss_pause_and_reset() {
        let guard = AccountGuard::new(manual_clock());
        let settings = Settings::default(); // pause at 3

        for _ in 0..3 {
            guard.record_trade_result(-10.0);
        }
        assert!(!guard.status(10_000.0, 0, &settings).can_trade);
        assert_eq!(guard.consecutive_losses(), 3);

        // One winning close resets the streak and re-enables trading.
        guard.record_trade_result(25.0);
        assert_eq!(guard.consecutive_losses(), 0);
        assert!(guard.status(10_000.0, 0, &settings).can_trade);
    }

    #[test]
    fn concurrent_trade_cap() {
        let guard = AccountGuard::new(manual_clock());
        let settings = Settings::default(); // cap 3
        assert!(guard.status(10_000.0, 2, &settings).can_trade);
        assert!(!guard.status(10_000.0, 3, &settings).can_trade);
    }

    #[test]
    fn date_rollover_resets_daily_counters() {
        let clock = manual_clock();
        let guard = AccountGuard::new(clock.clone());
        let settings = Settings::default();

        guard.record_trade_result(-600.0);
        guard.record_trade_opened();
        assert!(!guard.status(10_000.0, 0, &settings).can_trade);
        assert_eq!(guard.daily_trade_count(), 1);

        clock.advance(chrono::Duration::days(1));
        assert!(guard.status(10_000.0, 0, &settings).can_trade);
        assert_eq!(guard.daily_trade_count(), 0);
        assert!((guard.daily_pnl() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rollover_preserves_loss_streak() {
        // Consecutive losses are a behavioural streak, not a daily counter.
        let clock = manual_clock();
        let guard = AccountGuard::new(clock.clone());

        guard.record_trade_result(-10.0);
        guard.record_trade_result(-10.0);
        clock.advance(chrono::Duration::days(1));
        guard.maybe_roll_daily();
        assert_eq!(guard.consecutive_losses(), 2);
    }

    // ---- combined decision -----------------------------------------------

    fn ok_status() -> AccountStatus {
        AccountStatus {
            can_trade: true,
            reasons: Vec::new(),
            daily_pnl: 0.0,
            daily_pnl_percent: 0.0,
            consecutive_losses: 0,
            daily_trade_count: 0,
            active_trades: 0,
        }
    }

    #[test]
    fn avoid_market_blocks() {
        let market = MarketAnalysis {
            condition: MarketCondition::Volatile,
            score: 30.0,
            atr_pct: 12.0,
            trend_strength: 5.0,
            recommendation: Recommendation::Avoid,
            reasons: vec!["extreme volatility".to_string()],
        };
        let decision = decide(Some(market), ok_status());
        assert!(!decision.allowed);
        assert!(!decision.reasons.is_empty());
    }

    #[test]
    fn caution_market_allows() {
        let market = MarketAnalysis {
            condition: MarketCondition::Ranging,
            score: 55.0,
            atr_pct: 2.0,
            trend_strength: 15.0,
            recommendation: Recommendation::Caution,
            reasons: vec!["ranging market".to_string()],
        };
        assert!(decide(Some(market), ok_status()).allowed);
    }

    #[test]
    fn blocked_account_blocks_regardless_of_market() {
        let mut status = ok_status();
        status.can_trade = false;
        status.reasons = vec!["daily loss".to_string()];
        let decision = decide(None, status);
        assert!(!decision.allowed);
    }
}
