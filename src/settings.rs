// =============================================================================
// Engine Settings — hot-reloadable operator configuration with atomic save
// =============================================================================
//
// Every tunable parameter of the engine lives here so the operator can
// reconfigure at runtime without a restart. All fields carry `#[serde(default)]`
// so that adding new fields never breaks loading an older settings file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. Numeric fields validate against documented bounds before a mutation
// is accepted.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::types::StrategyKind;

/// Timeframes the analyzers accept.
pub const ALLOWED_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "30m", "1h", "4h", "1d"];

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_trading_pairs() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_timeframes() -> Vec<String> {
    vec!["15m".to_string(), "1h".to_string(), "4h".to_string()]
}

fn default_enabled_strategies() -> Vec<StrategyKind> {
    StrategyKind::ALL.to_vec()
}

fn default_max_risk_per_trade() -> f64 {
    2.0
}

fn default_risk_reward_ratio() -> f64 {
    2.0
}

fn default_ma_short_period() -> usize {
    20
}

fn default_ma_long_period() -> usize {
    50
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_trailing_stop_percent() -> f64 {
    2.0
}

fn default_trailing_stop_activation_percent() -> f64 {
    1.0
}

fn default_ai_min_confidence() -> f64 {
    60.0
}

fn default_ai_min_signal_strength() -> f64 {
    50.0
}

fn default_ai_required_signals() -> usize {
    2
}

fn default_strategy_min_confidence() -> f64 {
    55.0
}

fn default_strategy_min_strength() -> f64 {
    50.0
}

fn default_atr_period() -> usize {
    14
}

fn default_atr_multiplier() -> f64 {
    1.5
}

fn default_max_position_percent() -> f64 {
    20.0
}

fn default_min_position_percent() -> f64 {
    2.0
}

fn default_max_volatility_percent() -> f64 {
    8.0
}

fn default_min_trend_strength() -> f64 {
    25.0
}

fn default_max_daily_loss_percent() -> f64 {
    5.0
}

fn default_max_concurrent_trades() -> usize {
    3
}

fn default_pause_after_consecutive_losses() -> u32 {
    3
}

fn default_max_daily_trades() -> u32 {
    10
}

fn default_trade_cooldown_minutes() -> i64 {
    30
}

fn default_min_signal_strength() -> f64 {
    40.0
}

fn default_volume_multiplier() -> f64 {
    1.5
}

fn default_swing_period() -> usize {
    5
}

fn default_momentum_threshold() -> f64 {
    0.5
}

// =============================================================================
// Settings
// =============================================================================

/// Complete operator settings for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// still deserialise correctly.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    // --- Exchange credentials ------------------------------------------------

    #[serde(default)]
    pub api_key: String,

    /// Secret key — redacted from Debug output, masked in API responses.
    #[serde(default)]
    pub api_secret: String,

    /// Route requests to the futures testnet instead of production.
    #[serde(default = "default_true")]
    pub use_testnet: bool,

    // --- Symbols -------------------------------------------------------------

    /// Pairs the engine scans each tick.
    #[serde(default = "default_trading_pairs")]
    pub trading_pairs: Vec<String>,

    // --- Feature flags -------------------------------------------------------

    /// Master switch: when off, ticks only reconcile and sweep trailing stops.
    #[serde(default)]
    pub auto_trading_enabled: bool,

    /// Pattern-ensemble ("AI") analysis path.
    #[serde(default = "default_true")]
    pub ai_trading_enabled: bool,

    /// Named-strategy analysis path.
    #[serde(default = "default_true")]
    pub advanced_strategies_enabled: bool,

    /// Run the classical analyzer across multiple timeframes.
    #[serde(default)]
    pub multi_timeframe_enabled: bool,

    /// Profit-locking trailing stop on open positions.
    #[serde(default = "default_true")]
    pub trailing_stop_enabled: bool,

    /// Volatility/strength adjusted position sizing.
    #[serde(default = "default_true")]
    pub smart_position_sizing: bool,

    /// Per-symbol market-condition gate.
    #[serde(default = "default_true")]
    pub market_filter_enabled: bool,

    /// Global account-protection gate.
    #[serde(default = "default_true")]
    pub account_protection_enabled: bool,

    /// Forbid two concurrent trades on the same base asset.
    #[serde(default = "default_true")]
    pub diversification_enabled: bool,

    /// Strategy path requires >= 2 agreeing strategies instead of one best.
    #[serde(default)]
    pub require_strategy_consensus: bool,

    /// Scale smart-sizing risk with the volatility bucket.
    #[serde(default = "default_true")]
    pub volatility_adjustment: bool,

    /// Market gate penalises ranging conditions.
    #[serde(default = "default_true")]
    pub avoid_ranging_market: bool,

    /// Market gate penalises weak trends.
    #[serde(default = "default_true")]
    pub trend_filter_enabled: bool,

    // --- Risk ----------------------------------------------------------------

    /// Percent of equity risked per trade (0.5–10).
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,

    /// Reward-to-risk ratio for take-profit placement (1–5).
    #[serde(default = "default_risk_reward_ratio")]
    pub risk_reward_ratio: f64,

    // --- Indicator periods & thresholds --------------------------------------

    #[serde(default = "default_ma_short_period")]
    pub ma_short_period: usize,

    #[serde(default = "default_ma_long_period")]
    pub ma_long_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,

    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,

    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,

    // --- Trailing stop -------------------------------------------------------

    /// Percent of peak profit given back before the stop fires (0.1–10).
    #[serde(default = "default_trailing_stop_percent")]
    pub trailing_stop_percent: f64,

    /// Profit percent at which the trailing stop engages.
    #[serde(default = "default_trailing_stop_activation_percent")]
    pub trailing_stop_activation_percent: f64,

    // --- AI path thresholds --------------------------------------------------

    #[serde(default = "default_ai_min_confidence")]
    pub ai_min_confidence: f64,

    #[serde(default = "default_ai_min_signal_strength")]
    pub ai_min_signal_strength: f64,

    /// Agreeing sub-analyzer count required (1–5).
    #[serde(default = "default_ai_required_signals")]
    pub ai_required_signals: usize,

    // --- Strategy path thresholds --------------------------------------------

    #[serde(default = "default_strategy_min_confidence")]
    pub strategy_min_confidence: f64,

    #[serde(default = "default_strategy_min_strength")]
    pub strategy_min_strength: f64,

    #[serde(default = "default_enabled_strategies")]
    pub enabled_strategies: Vec<StrategyKind>,

    // --- ATR sizing ----------------------------------------------------------

    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,

    // --- Position size bounds ------------------------------------------------

    #[serde(default = "default_max_position_percent")]
    pub max_position_percent: f64,

    #[serde(default = "default_min_position_percent")]
    pub min_position_percent: f64,

    // --- Market filter -------------------------------------------------------

    /// ATR% above which the market gate penalises volatility (2–15).
    #[serde(default = "default_max_volatility_percent")]
    pub max_volatility_percent: f64,

    /// Trend strength below which the gate penalises weak trends (10–80).
    #[serde(default = "default_min_trend_strength")]
    pub min_trend_strength: f64,

    // --- Account protection --------------------------------------------------

    #[serde(default = "default_max_daily_loss_percent")]
    pub max_daily_loss_percent: f64,

    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: usize,

    #[serde(default = "default_pause_after_consecutive_losses")]
    pub pause_after_consecutive_losses: u32,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    // --- Engine knobs --------------------------------------------------------

    /// Minimum minutes between two trades on the same symbol.
    #[serde(default = "default_trade_cooldown_minutes")]
    pub trade_cooldown_minutes: i64,

    /// Classical-path strength floor (capped at 30 when checked).
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,

    /// Breakout strategy volume confirmation multiple.
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    /// Swing strategy pivot look-back.
    #[serde(default = "default_swing_period")]
    pub swing_period: usize,

    /// Momentum strategy threshold (percent over the look-back).
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold: f64,

    /// Timeframes the multi-timeframe analyzer runs over.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Round-trip through an empty JSON object so defaults live in exactly
        // one place (the serde attributes).
        serde_json::from_str("{}").expect("empty settings object deserialises")
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("use_testnet", &self.use_testnet)
            .field("trading_pairs", &self.trading_pairs)
            .field("auto_trading_enabled", &self.auto_trading_enabled)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// True when API credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Validate every bounded field. Returns the first violation found.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn check_f64(name: &str, value: f64, min: f64, max: f64) -> Result<(), EngineError> {
            if !value.is_finite() || value < min || value > max {
                return Err(EngineError::ValidationFailed(format!(
                    "{name} must be between {min} and {max}, got {value}"
                )));
            }
            Ok(())
        }
        fn check_usize(name: &str, value: usize, min: usize, max: usize) -> Result<(), EngineError> {
            if value < min || value > max {
                return Err(EngineError::ValidationFailed(format!(
                    "{name} must be between {min} and {max}, got {value}"
                )));
            }
            Ok(())
        }

        check_f64("max_risk_per_trade", self.max_risk_per_trade, 0.5, 10.0)?;
        check_f64("risk_reward_ratio", self.risk_reward_ratio, 1.0, 5.0)?;
        check_usize("ma_short_period", self.ma_short_period, 5, 100)?;
        check_usize("ma_long_period", self.ma_long_period, 50, 500)?;
        check_usize("rsi_period", self.rsi_period, 7, 28)?;
        check_f64("rsi_overbought", self.rsi_overbought, 60.0, 90.0)?;
        check_f64("rsi_oversold", self.rsi_oversold, 10.0, 40.0)?;
        check_usize("macd_fast", self.macd_fast, 5, 20)?;
        check_usize("macd_slow", self.macd_slow, 20, 50)?;
        check_usize("macd_signal", self.macd_signal, 5, 15)?;
        check_f64("trailing_stop_percent", self.trailing_stop_percent, 0.1, 10.0)?;
        check_f64(
            "trailing_stop_activation_percent",
            self.trailing_stop_activation_percent,
            0.1,
            20.0,
        )?;
        check_f64("ai_min_confidence", self.ai_min_confidence, 30.0, 95.0)?;
        check_f64(
            "ai_min_signal_strength",
            self.ai_min_signal_strength,
            20.0,
            90.0,
        )?;
        check_usize("ai_required_signals", self.ai_required_signals, 1, 5)?;
        check_f64(
            "strategy_min_confidence",
            self.strategy_min_confidence,
            30.0,
            95.0,
        )?;
        check_f64(
            "strategy_min_strength",
            self.strategy_min_strength,
            20.0,
            90.0,
        )?;
        check_usize("atr_period", self.atr_period, 7, 50)?;
        check_f64("atr_multiplier", self.atr_multiplier, 0.5, 5.0)?;
        check_f64("max_position_percent", self.max_position_percent, 5.0, 50.0)?;
        check_f64("min_position_percent", self.min_position_percent, 0.5, 10.0)?;
        check_f64(
            "max_volatility_percent",
            self.max_volatility_percent,
            2.0,
            15.0,
        )?;
        check_f64("min_trend_strength", self.min_trend_strength, 10.0, 80.0)?;
        check_f64(
            "max_daily_loss_percent",
            self.max_daily_loss_percent,
            1.0,
            20.0,
        )?;
        check_usize("max_concurrent_trades", self.max_concurrent_trades, 1, 10)?;
        check_usize(
            "pause_after_consecutive_losses",
            self.pause_after_consecutive_losses as usize,
            2,
            10,
        )?;

        if self.max_daily_trades == 0 {
            return Err(EngineError::ValidationFailed(
                "max_daily_trades must be at least 1".to_string(),
            ));
        }
        if self.ma_long_period <= self.ma_short_period {
            return Err(EngineError::ValidationFailed(format!(
                "ma_long_period ({}) must exceed ma_short_period ({})",
                self.ma_long_period, self.ma_short_period
            )));
        }
        if self.macd_slow <= self.macd_fast {
            return Err(EngineError::ValidationFailed(format!(
                "macd_slow ({}) must exceed macd_fast ({})",
                self.macd_slow, self.macd_fast
            )));
        }
        if self.trading_pairs.is_empty() {
            return Err(EngineError::ValidationFailed(
                "trading_pairs must not be empty".to_string(),
            ));
        }
        for tf in &self.timeframes {
            if !ALLOWED_TIMEFRAMES.contains(&tf.as_str()) {
                return Err(EngineError::ValidationFailed(format!(
                    "unknown timeframe '{tf}'"
                )));
            }
        }

        Ok(())
    }

    /// Apply a partial update (a JSON object with any subset of fields) on top
    /// of `self`, validate the result, and return the merged settings.
    pub fn merged_with(&self, patch: &serde_json::Value) -> Result<Settings, EngineError> {
        let obj = patch.as_object().ok_or_else(|| {
            EngineError::ValidationFailed("settings patch must be a JSON object".to_string())
        })?;

        let mut current = serde_json::to_value(self)
            .map_err(|e| EngineError::InternalInvariant(format!("settings serialise: {e}")))?;
        let current_obj = current
            .as_object_mut()
            .ok_or_else(|| EngineError::InternalInvariant("settings not an object".to_string()))?;

        for (key, value) in obj {
            if !current_obj.contains_key(key) {
                return Err(EngineError::ValidationFailed(format!(
                    "unknown settings field '{key}'"
                )));
            }
            current_obj.insert(key.clone(), value.clone());
        }

        let merged: Settings = serde_json::from_value(current)
            .map_err(|e| EngineError::ValidationFailed(format!("invalid settings patch: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Load settings from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            pairs = ?settings.trading_pairs,
            auto_trading = settings.auto_trading_enabled,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the current settings to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert!(!s.auto_trading_enabled);
        assert!(s.use_testnet);
        assert_eq!(s.trading_pairs.len(), 5);
        assert_eq!(s.trading_pairs[0], "BTCUSDT");
        assert_eq!(s.enabled_strategies.len(), 6);
        assert!(!s.is_configured());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.rsi_period, 14);
        assert_eq!(s.macd_fast, 12);
        assert_eq!(s.macd_slow, 26);
        assert!((s.trailing_stop_percent - 2.0).abs() < f64::EPSILON);
        assert_eq!(s.timeframes, vec!["15m", "1h", "4h"]);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "rsi_period": 21, "trading_pairs": ["ETHUSDT"] }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.rsi_period, 21);
        assert_eq!(s.trading_pairs, vec!["ETHUSDT"]);
        assert_eq!(s.ma_short_period, 20);
    }

    #[test]
    fn roundtrip_serialisation() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let s2: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s.trading_pairs, s2.trading_pairs);
        assert_eq!(s.max_concurrent_trades, s2.max_concurrent_trades);
        assert_eq!(s.enabled_strategies, s2.enabled_strategies);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut s = Settings::default();
        s.max_risk_per_trade = 25.0;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.rsi_overbought = 50.0;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.max_concurrent_trades = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_periods() {
        let mut s = Settings::default();
        s.ma_short_period = 60;
        s.ma_long_period = 50;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.macd_fast = 20;
        s.macd_slow = 20;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_timeframe() {
        let mut s = Settings::default();
        s.timeframes = vec!["2h".to_string()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn merge_applies_known_fields() {
        let s = Settings::default();
        let patch = serde_json::json!({ "rsi_period": 21, "auto_trading_enabled": true });
        let merged = s.merged_with(&patch).unwrap();
        assert_eq!(merged.rsi_period, 21);
        assert!(merged.auto_trading_enabled);
        // Untouched fields survive.
        assert_eq!(merged.ma_long_period, s.ma_long_period);
    }

    #[test]
    fn merge_rejects_unknown_field() {
        let s = Settings::default();
        let patch = serde_json::json!({ "no_such_field": 1 });
        assert!(matches!(
            s.merged_with(&patch),
            Err(EngineError::ValidationFailed(_))
        ));
    }

    #[test]
    fn merge_rejects_invalid_value() {
        let s = Settings::default();
        let patch = serde_json::json!({ "max_risk_per_trade": 99.0 });
        assert!(s.merged_with(&patch).is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut s = Settings::default();
        s.api_key = "key-material".to_string();
        s.api_secret = "secret-material".to_string();
        let out = format!("{s:?}");
        assert!(!out.contains("key-material"));
        assert!(!out.contains("secret-material"));
    }
}
