// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the trading
// engine.  Every public function returns `Option<T>` (or an empty series) so
// callers are forced to handle insufficient-data and numerical-edge-case
// scenarios.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod levels;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod stochastic;
