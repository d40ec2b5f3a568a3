// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Every failure the engine can surface to an operator or has to route around
// maps onto one of these variants. Exchange rejections carry the venue's
// numeric error code so the dashboard can display it verbatim.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Caller-supplied data failed validation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// API credentials are missing; the operation needs a configured exchange.
    #[error("exchange API credentials are not configured")]
    NotConfigured,

    /// The exchange rejected a request.
    #[error("exchange rejected request (code {code}): {message}")]
    ExchangeRejected { code: i64, message: String },

    /// Transport-level failure (timeout, connection refused, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// Quantity rounded to zero (or below the minimum lot) for the symbol.
    #[error("invalid quantity for {symbol}: {quantity} rounds to zero")]
    InvalidQuantity { symbol: String, quantity: f64 },

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation requires an active trade but the trade is not active.
    #[error("trade {0} is not active")]
    NotActive(String),

    /// Internal invariant violated — a bug, not an operational condition.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl EngineError {
    /// Short machine-readable kind tag used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotConfigured => "not_configured",
            Self::ExchangeRejected { .. } => "exchange_rejected",
            Self::Network(_) => "network",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::NotFound(_) => "not_found",
            Self::NotActive(_) => "not_active",
            Self::InternalInvariant(_) => "internal",
        }
    }

    /// Exchange error code, when the failure originated at the venue.
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            Self::ExchangeRejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and transport failures all collapse into Network; the
        // caller treats them the same as a rejection with a synthetic code.
        Self::Network(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
