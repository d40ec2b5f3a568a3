// =============================================================================
// WebSocket Handler — realtime event push
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive the engine's
// event stream as JSON `{type, payload}` messages, where `type` is one of
// `new_trade`, `trade_update`, `trade_closed`, `new_log`, `stats_update`,
// `settings_update`. A `stats_update` snapshot is sent immediately on
// connect so dashboards render without waiting for the first tick.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Treats incoming text messages as heartbeats.
//   - Drops the connection cleanly when the client goes away or the event
//     bus lags beyond its buffer.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::auth::verify_query_token;
use crate::app_state::AppState;
use crate::notify::{EngineEvent, EventKind};

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
///
/// Validates the token from the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !verify_query_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent flows via `tokio::select!`:
///   1. **Event loop** — forward every bus event as a JSON text frame.
///   2. **Recv loop** — process incoming client messages (Ping/Pong, Close,
///      heartbeat text messages).
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();

    // Immediate snapshot so the dashboard has data before the first tick.
    let snapshot = EngineEvent {
        kind: EventKind::StatsUpdate,
        payload: serde_json::to_value(state.stats_summary(None)).unwrap_or_default(),
    };
    if send_event(&mut sender, &snapshot).await.is_err() {
        info!("WebSocket closed before initial snapshot");
        return;
    }

    loop {
        tokio::select! {
            // ── Event push ──────────────────────────────────────────────
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Err(e) = send_event(&mut sender, &event).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Slow consumer: resynchronise with a fresh snapshot.
                        warn!(skipped, "WebSocket consumer lagged — resyncing");
                        let resync = EngineEvent {
                            kind: EventKind::StatsUpdate,
                            payload: serde_json::to_value(state.stats_summary(None))
                                .unwrap_or_default(),
                        };
                        if send_event(&mut sender, &resync).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("event bus closed — disconnecting WebSocket");
                        break;
                    }
                }
            }

            // ── Recv loop: process incoming messages ────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("WebSocket Pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

/// Serialise and send one event over the WebSocket.
async fn send_event<S>(sender: &mut S, event: &EngineEvent) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialise event");
            Ok(())
        }
    }
}
