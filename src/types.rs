// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle fetched from the futures klines endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
        }
    }

    /// True when the candle closed above its open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full high-to-low range.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Extract the close prices from a candle slice (oldest first).
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Direction of a trade: long (buy to open) or short (sell to open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// Order side used to open a position in this direction.
    pub fn entry_side(&self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    /// Order side used to close a position in this direction.
    pub fn exit_side(&self) -> &'static str {
        match self {
            Self::Long => "SELL",
            Self::Short => "BUY",
        }
    }

    /// Position side label attached to orders in hedging (dual-side) mode.
    pub fn position_side(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    /// +1.0 for long, -1.0 for short. Multiplies price deltas into P/L.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn from_signal(signal: SignalKind) -> Option<Self> {
        match signal {
            SignalKind::Buy => Some(Self::Long),
            SignalKind::Sell => Some(Self::Short),
            SignalKind::Hold => None,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle status of a trade row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Active,
    Closed,
    Pending,
    Cancelled,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
            Self::Pending => write!(f, "pending"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Analyzer verdict for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    /// Buy and sell are actionable; hold is not.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Market regime classification from the pattern ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "trending_up"),
            Self::TrendingDown => write!(f, "trending_down"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
        }
    }
}

/// Risk level attached to an ensemble prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Volatility bucket used by the smart position sizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityLevel {
    /// Classify from ATR as a percentage of price.
    pub fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct < 1.0 {
            Self::Low
        } else if atr_pct < 2.5 {
            Self::Medium
        } else if atr_pct < 5.0 {
            Self::High
        } else {
            Self::Extreme
        }
    }
}

impl std::fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

/// ADX trend categorisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendCategory {
    Strong,
    Moderate,
    Weak,
    None,
}

impl std::fmt::Display for TrendCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "strong"),
            Self::Moderate => write!(f, "moderate"),
            Self::Weak => write!(f, "weak"),
            Self::None => write!(f, "none"),
        }
    }
}

/// The named strategies in the bank. Serialised with the wire names the
/// dashboard uses ("meanReversion", "gridTrading").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "breakout")]
    Breakout,
    #[serde(rename = "scalping")]
    Scalping,
    #[serde(rename = "momentum")]
    Momentum,
    #[serde(rename = "meanReversion")]
    MeanReversion,
    #[serde(rename = "swing")]
    Swing,
    #[serde(rename = "gridTrading")]
    GridTrading,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        Self::Breakout,
        Self::Scalping,
        Self::Momentum,
        Self::MeanReversion,
        Self::Swing,
        Self::GridTrading,
    ];
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakout => write!(f, "breakout"),
            Self::Scalping => write!(f, "scalping"),
            Self::Momentum => write!(f, "momentum"),
            Self::MeanReversion => write!(f, "meanReversion"),
            Self::Swing => write!(f, "swing"),
            Self::GridTrading => write!(f, "gridTrading"),
        }
    }
}

/// Severity level of an activity-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Quote suffixes recognised when splitting a pair into base/quote assets.
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "BTC", "ETH", "BNB"];

/// Base asset of a trading pair ("BTCUSDT" -> "BTC"). Falls back to the full
/// symbol when no known quote suffix matches.
pub fn base_asset(symbol: &str) -> &str {
    for quote in QUOTE_ASSETS {
        if symbol.len() > quote.len() {
            if let Some(base) = symbol.strip_suffix(quote) {
                return base;
            }
        }
    }
    symbol
}
