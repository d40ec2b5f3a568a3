// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AdminAuth` extractor.
//
// Errors are structured `{error: {kind, message, code?}}` payloads; every
// operator action with side effects is mirrored into the activity log.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::analysis::{classical, ensemble};
use crate::api::auth::AdminAuth;
use crate::app_state::{AppState, StatsRange};
use crate::error::EngineError;
use crate::notify::EventKind;
use crate::settings::{Settings, ALLOWED_TIMEFRAMES};
use crate::types::{LogLevel, TradeDirection};

// =============================================================================
// Error mapping
// =============================================================================

/// Wrapper turning `EngineError` into a structured JSON response.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::ValidationFailed(_) | EngineError::InvalidQuantity { .. } => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotConfigured => StatusCode::PRECONDITION_FAILED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::NotActive(_) => StatusCode::CONFLICT,
            EngineError::ExchangeRejected { .. } | EngineError::Network(_) => {
                StatusCode::BAD_GATEWAY
            }
            EngineError::InternalInvariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut error = serde_json::json!({
            "kind": self.0.kind(),
            "message": self.0.to_string(),
        });
        if let Some(code) = self.0.exchange_code() {
            error["code"] = serde_json::json!(code);
        }

        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Settings & bot control ──────────────────────────────────
        .route("/api/v1/settings", get(get_settings))
        .route("/api/v1/settings", put(update_settings))
        .route("/api/v1/bot/toggle", post(toggle_bot))
        .route("/api/v1/bot/start", post(start_bot))
        .route("/api/v1/bot/stop", post(stop_bot))
        .route("/api/v1/bot/status", get(bot_status))
        .route("/api/v1/exchange/test", post(test_exchange))
        // ── Trades ──────────────────────────────────────────────────
        .route("/api/v1/trades/active", get(active_trades))
        .route("/api/v1/trades/history", get(trade_history))
        .route("/api/v1/trades/close-all", post(close_all_trades))
        .route("/api/v1/trades/:id", get(get_trade))
        .route("/api/v1/trades/:id/close", post(close_trade))
        .route("/api/v1/trades", post(open_trade))
        // ── Account & stats ─────────────────────────────────────────
        .route("/api/v1/account", get(account))
        .route("/api/v1/stats/summary", get(stats_summary))
        .route("/api/v1/stats/advanced", get(advanced_stats))
        .route("/api/v1/logs", get(logs))
        // ── Market & analysis ───────────────────────────────────────
        .route("/api/v1/market/:symbol", get(market))
        .route("/api/v1/analyze/:symbol", get(analyze_symbol))
        .route("/api/v1/analyze/:symbol/mtf", get(analyze_symbol_mtf))
        .route("/api/v1/ai/:symbol", get(ai_prediction))
        // ── Realtime push ───────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "engine_running": state.engine.is_active(),
        "state_version": state.current_state_version(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Settings
// =============================================================================

/// Settings with the secret masked for transport.
fn masked(settings: &Settings) -> serde_json::Value {
    let mut value = serde_json::to_value(settings).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        if obj
            .get("api_secret")
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false)
        {
            obj.insert("api_secret".to_string(), serde_json::json!("********"));
        }
    }
    value
}

async fn get_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(masked(&state.store.get_settings()))
}

async fn update_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.store.update_settings(&patch)?;

    // Push to the engine and persist (best-effort) before acknowledging.
    state.engine.update_settings(&updated);
    if let Err(e) = updated.save(&state.settings_path) {
        warn!(error = %e, "failed to persist settings to disk");
    }

    state.store.create_log(LogLevel::Info, "Settings updated", None);
    state.bus.publish(EventKind::SettingsUpdate, masked(&updated));
    state.increment_version();

    info!("settings updated via API");
    Ok(Json(masked(&updated)))
}

async fn toggle_bot(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.store.get_settings();
    if !settings.is_configured() {
        return Err(EngineError::NotConfigured.into());
    }

    let enabled = !settings.auto_trading_enabled;
    let updated = state
        .store
        .update_settings(&serde_json::json!({ "auto_trading_enabled": enabled }))?;
    state.engine.update_settings(&updated);
    if let Err(e) = updated.save(&state.settings_path) {
        warn!(error = %e, "failed to persist settings to disk");
    }

    state.store.create_log(
        LogLevel::Info,
        format!(
            "Auto-trading {}",
            if enabled { "enabled" } else { "disabled" }
        ),
        None,
    );
    state.increment_version();
    Ok(Json(masked(&updated)))
}

// =============================================================================
// Engine control
// =============================================================================

async fn start_bot(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.store.get_settings();
    state.engine.start(settings.clone())?;
    state.increment_version();
    Ok(Json(serde_json::json!({
        "is_running": state.engine.is_active(),
        "enabled": settings.auto_trading_enabled,
    })))
}

async fn stop_bot(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    state.engine.stop();
    state.increment_version();
    let settings = state.store.get_settings();
    Json(serde_json::json!({
        "is_running": state.engine.is_active(),
        "enabled": settings.auto_trading_enabled,
    }))
}

async fn bot_status(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let settings = state.store.get_settings();
    Json(serde_json::json!({
        "is_running": state.engine.is_active(),
        "enabled": settings.auto_trading_enabled,
        "configured": settings.is_configured(),
    }))
}

async fn test_exchange(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.engine.client()?;
    client.test_connection().await?;
    state
        .store
        .create_log(LogLevel::Success, "Exchange connection verified", None);
    Ok(Json(serde_json::json!({ "ok": true })))
}

// =============================================================================
// Trades
// =============================================================================

async fn active_trades(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.store.get_trades(Some(crate::types::TradeStatus::Active)))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

async fn trade_history(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.store.get_trade_history(query.limit))
}

async fn get_trade(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let trade = state
        .store
        .get_trade_by_id(&id)
        .ok_or_else(|| EngineError::NotFound(format!("trade {id}")))?;
    Ok(Json(trade))
}

#[derive(Deserialize)]
struct OpenTradeRequest {
    symbol: String,
    /// "long" or "short".
    #[serde(rename = "type")]
    direction: TradeDirection,
}

async fn open_trade(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = req.symbol.to_uppercase();
    let trade = state.engine.open_manual_trade(&symbol, req.direction).await?;
    state.increment_version();
    Ok(Json(trade))
}

async fn close_trade(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let closed = state.engine.close_trade_by_id(&id).await?;
    state.increment_version();
    Ok(Json(closed))
}

async fn close_all_trades(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let closed_count = state.engine.close_all_trades().await;
    state.increment_version();
    Json(serde_json::json!({ "closedCount": closed_count }))
}

// =============================================================================
// Account & stats
// =============================================================================

async fn account(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let client = match state.engine.client() {
        Ok(c) => c,
        Err(e) => {
            return Json(serde_json::json!({
                "connected": false,
                "error": e.to_string(),
            }));
        }
    };

    match client.get_account().await {
        Ok(info) => {
            let positions = client
                .get_positions(None)
                .await
                .map(|ps| {
                    ps.into_iter()
                        .filter(|p| p.position_amt.abs() > 0.0)
                        .map(|p| {
                            serde_json::json!({
                                "symbol": p.symbol,
                                "positionSide": p.position_side,
                                "positionAmt": p.position_amt,
                                "entryPrice": p.entry_price,
                                "unrealizedProfit": p.unrealized_profit,
                                "leverage": p.leverage,
                                "markPrice": p.mark_price,
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            Json(serde_json::json!({
                "connected": true,
                "balance": info.total_balance,
                "available": info.available_balance,
                "positions": positions,
            }))
        }
        Err(e) => Json(serde_json::json!({
            "connected": false,
            "error": e.to_string(),
        })),
    }
}

async fn stats_summary(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let balance = match state.engine.client() {
        Ok(client) => client.get_account().await.ok().map(|a| a.total_balance),
        Err(_) => None,
    };
    Json(state.stats_summary(balance))
}

#[derive(Deserialize)]
struct AdvancedStatsQuery {
    #[serde(default = "default_stats_range")]
    range: StatsRange,
}

fn default_stats_range() -> StatsRange {
    StatsRange::Month
}

async fn advanced_stats(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdvancedStatsQuery>,
) -> impl IntoResponse {
    Json(state.advanced_stats(query.range))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    limit: usize,
}

fn default_logs_limit() -> usize {
    100
}

async fn logs(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    Json(state.store.get_logs(query.limit))
}

// =============================================================================
// Market & analysis
// =============================================================================

async fn market(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.engine.client()?;
    let symbol = symbol.to_uppercase();
    let ticker = client.get_24h_ticker(&symbol).await?;
    Ok(Json(serde_json::json!({
        "symbol": ticker.symbol,
        "price": ticker.last_price,
        "high24h": ticker.high_price,
        "low24h": ticker.low_price,
        "volume24h": ticker.volume,
        "change24hPercent": ticker.price_change_percent,
    })))
}

async fn analyze_symbol(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.engine.client()?;
    let settings = state.store.get_settings();
    let symbol = symbol.to_uppercase();

    let closes = client.get_closes(&symbol, "1h", 100).await?;
    if closes.is_empty() {
        return Err(EngineError::NotFound(format!("no market data for {symbol}")).into());
    }
    Ok(Json(classical::analyze(&closes, &settings)))
}

async fn analyze_symbol_mtf(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.engine.client()?;
    let settings = state.store.get_settings();
    let symbol = symbol.to_uppercase();

    let mut per_tf = Vec::with_capacity(settings.timeframes.len());
    for tf in &settings.timeframes {
        let closes = client.get_closes(&symbol, tf, 100).await?;
        per_tf.push((tf.clone(), classical::analyze(&closes, &settings)));
    }
    Ok(Json(classical::combine_timeframes(&per_tf)))
}

#[derive(Deserialize)]
struct AiQuery {
    #[serde(default = "default_ai_timeframe")]
    timeframe: String,
}

fn default_ai_timeframe() -> String {
    "1h".to_string()
}

async fn ai_prediction(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<AiQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !ALLOWED_TIMEFRAMES.contains(&query.timeframe.as_str()) {
        return Err(
            EngineError::ValidationFailed(format!("unknown timeframe '{}'", query.timeframe))
                .into(),
        );
    }

    let client = state.engine.client()?;
    let symbol = symbol.to_uppercase();

    let candles = client.get_klines(&symbol, &query.timeframe, 100).await?;
    let prediction = ensemble::analyze(&candles).ok_or_else(|| {
        EngineError::NotFound(format!("insufficient market data for {symbol}"))
    })?;
    let price = candles.last().map(|c| c.close).unwrap_or(0.0);

    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "timeframe": query.timeframe,
        "currentPrice": price,
        "prediction": prediction,
    })))
}
