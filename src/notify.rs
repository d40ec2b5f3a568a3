// =============================================================================
// Notification Hooks — trait seam plus the broadcast event bus
// =============================================================================
//
// The engine fires hooks at four points: trade open, trade close, signal
// fired, trailing-stop updated. Concrete sinks (chat bot, email) implement
// `Notifier` and are wired in at startup; the default sink logs the event,
// mirrors it into the activity log, and republishes it on the broadcast bus
// that feeds the WebSocket push stream.
//
// Hook failures are swallowed — a dead notification channel never stops the
// engine.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::store::{Trade, TradeStore};
use crate::types::{LogLevel, SignalKind};

/// Capacity of the broadcast channel; slow consumers drop old events.
const BUS_CAPACITY: usize = 256;

/// Event types pushed to realtime consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewTrade,
    TradeUpdate,
    TradeClosed,
    NewLog,
    StatsUpdate,
    SettingsUpdate,
}

/// One realtime event: `{type, payload}` on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

/// Fan-out bus for realtime events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Send failures (no subscribers) are ignored.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let _ = self.tx.send(EngineEvent { kind, payload });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Hook points the engine invokes. Implementations must not block for long
/// and must not panic; the engine treats every hook as fire-and-forget.
pub trait Notifier: Send + Sync {
    fn on_trade_open(&self, trade: &Trade);
    fn on_trade_close(&self, trade: &Trade);
    fn on_signal(&self, symbol: &str, signal: SignalKind, strength: f64, source: &str);
    fn on_trailing_update(&self, trade: &Trade, new_stop: f64);
}

/// Default sink: structured log + activity-log row + bus event.
pub struct BusNotifier {
    store: Arc<TradeStore>,
    bus: EventBus,
}

impl BusNotifier {
    pub fn new(store: Arc<TradeStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    fn log_and_publish(&self, level: LogLevel, message: String, kind: EventKind, payload: serde_json::Value) {
        let entry = self.store.create_log(level, message, None);
        self.bus.publish(
            EventKind::NewLog,
            serde_json::to_value(&entry).unwrap_or_default(),
        );
        self.bus.publish(kind, payload);
    }
}

impl Notifier for BusNotifier {
    fn on_trade_open(&self, trade: &Trade) {
        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            direction = %trade.direction,
            entry = trade.entry_price,
            "trade opened"
        );
        self.log_and_publish(
            LogLevel::Success,
            format!(
                "Opened {} {} @ {:.4} (qty {:.4})",
                trade.direction, trade.symbol, trade.entry_price, trade.quantity
            ),
            EventKind::NewTrade,
            serde_json::to_value(trade).unwrap_or_default(),
        );
    }

    fn on_trade_close(&self, trade: &Trade) {
        let profit = trade.profit.unwrap_or(0.0);
        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            profit,
            "trade closed"
        );
        self.log_and_publish(
            if profit >= 0.0 {
                LogLevel::Success
            } else {
                LogLevel::Warning
            },
            format!(
                "Closed {} {} with P/L {:.2} ({:.2}%)",
                trade.direction,
                trade.symbol,
                profit,
                trade.profit_percent.unwrap_or(0.0)
            ),
            EventKind::TradeClosed,
            serde_json::to_value(trade).unwrap_or_default(),
        );
    }

    fn on_signal(&self, symbol: &str, signal: SignalKind, strength: f64, source: &str) {
        info!(symbol, signal = %signal, strength, source, "signal fired");
        self.log_and_publish(
            LogLevel::Info,
            format!("{source} signal: {signal} {symbol} (strength {strength:.0})"),
            EventKind::StatsUpdate,
            serde_json::json!({
                "symbol": symbol,
                "signal": signal,
                "strength": strength,
                "source": source,
            }),
        );
    }

    fn on_trailing_update(&self, trade: &Trade, new_stop: f64) {
        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            new_stop,
            "trailing stop moved"
        );
        self.log_and_publish(
            LogLevel::Info,
            format!("Trailing stop on {} moved to {:.4}", trade.symbol, new_stop),
            EventKind::TradeUpdate,
            serde_json::to_value(trade).unwrap_or_default(),
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::store::NewTrade;
    use crate::types::TradeDirection;
    use chrono::Utc;

    fn sample_trade(store: &TradeStore) -> Trade {
        store.create_trade(
            NewTrade {
                symbol: "BTCUSDT".to_string(),
                direction: TradeDirection::Long,
                entry_price: 100.0,
                quantity: 1.0,
                leverage: 10,
                stop_loss: 98.0,
                take_profit: 104.0,
                entry_signals: vec![],
                exchange_order_id: None,
                trailing_stop_active: true,
                is_auto_trade: true,
                protection_pending: false,
            },
            Utc::now(),
        )
    }

    #[test]
    fn bus_delivers_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EventKind::StatsUpdate, serde_json::json!({"x": 1}));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::StatsUpdate);
        assert_eq!(event.payload["x"], 1);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(EventKind::NewLog, serde_json::json!({}));
    }

    #[test]
    fn event_kind_wire_names() {
        let event = EngineEvent {
            kind: EventKind::NewTrade,
            payload: serde_json::json!(null),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_trade");
    }

    #[test]
    fn notifier_writes_activity_log_and_bus() {
        let store = Arc::new(TradeStore::new(Settings::default()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let notifier = BusNotifier::new(store.clone(), bus);

        let trade = sample_trade(&store);
        notifier.on_trade_open(&trade);

        let logs = store.get_logs(10);
        assert!(logs.iter().any(|l| l.message.contains("Opened")));

        // First event is the log mirror, second the trade itself.
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, EventKind::NewLog);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, EventKind::NewTrade);
    }

    #[test]
    fn close_notification_levels_follow_pnl() {
        let store = Arc::new(TradeStore::new(Settings::default()));
        let notifier = BusNotifier::new(store.clone(), EventBus::new());

        let trade = sample_trade(&store);
        let closed = store.close_trade(&trade.id, 95.0, Utc::now()).unwrap();
        notifier.on_trade_close(&closed);

        let logs = store.get_logs(10);
        assert!(logs
            .iter()
            .any(|l| l.level == LogLevel::Warning && l.message.contains("P/L")));
    }
}
