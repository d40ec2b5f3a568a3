// =============================================================================
// Trade Store — trades, activity log, signal audit, and settings ownership
// =============================================================================
//
// The authoritative surface between the engine and every other consumer
// (operator API, WebSocket feed). The engine mutates trades only through the
// operations below; concurrent readers receive cloned snapshots.
//
// Life-cycle:
//   Active  ->  Closed (trailing stop / manual close / reconciliation)
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::settings::Settings;
use crate::types::{LogLevel, SignalKind, TradeDirection, TradeStatus};

/// Maximum number of activity-log entries retained.
const MAX_LOG_ENTRIES: usize = 500;
/// Maximum number of signal audit rows retained.
const MAX_SIGNAL_ROWS: usize = 500;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A single tracked trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub symbol: String,
    pub direction: TradeDirection,
    pub status: TradeStatus,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub profit: Option<f64>,
    #[serde(default)]
    pub profit_percent: Option<f64>,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    /// Names of the analyzers/indicators that fired the entry.
    #[serde(default)]
    pub entry_signals: Vec<String>,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub trailing_stop_active: bool,
    #[serde(default)]
    pub trailing_stop_price: Option<f64>,
    /// Highest profit percent seen since the trailing stop engaged. The field
    /// keeps its historical wire name; values that look like raw prices
    /// (> 50) are treated as legacy data and reset on read.
    #[serde(default)]
    pub highest_price: f64,
    pub is_auto_trade: bool,
    /// Set when the entry filled but a protective order failed; the next
    /// trailing sweep re-issues the bracket.
    #[serde(default)]
    pub protection_pending: bool,
}

/// Fields the caller supplies when opening a trade; the store assigns the id,
/// status, and entry time.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_signals: Vec<String>,
    pub exchange_order_id: Option<String>,
    pub trailing_stop_active: bool,
    pub is_auto_trade: bool,
    pub protection_pending: bool,
}

/// A persisted activity-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An append-only signal audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: String,
    pub symbol: String,
    pub signal: SignalKind,
    pub indicator: String,
    pub value: f64,
    pub strength: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Thread-safe store owning all persisted rows.
pub struct TradeStore {
    settings: RwLock<Settings>,
    trades: RwLock<Vec<Trade>>,
    logs: RwLock<Vec<ActivityLogEntry>>,
    signals: RwLock<Vec<SignalRow>>,
}

impl TradeStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
            trades: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
            signals: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Snapshot of the current settings.
    pub fn get_settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Replace the settings wholesale (validated by the caller).
    pub fn put_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    /// Apply a partial JSON patch, validate, store, and return the result.
    pub fn update_settings(&self, patch: &serde_json::Value) -> Result<Settings, EngineError> {
        let merged = self.settings.read().merged_with(patch)?;
        *self.settings.write() = merged.clone();
        Ok(merged)
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// All trades, optionally filtered by status. Active trades first-in-first.
    pub fn get_trades(&self, status: Option<TradeStatus>) -> Vec<Trade> {
        let trades = self.trades.read();
        match status {
            Some(s) => trades.iter().filter(|t| t.status == s).cloned().collect(),
            None => trades.clone(),
        }
    }

    pub fn get_trade_by_id(&self, id: &str) -> Option<Trade> {
        self.trades.read().iter().find(|t| t.id == id).cloned()
    }

    /// Open a new trade row and return it.
    pub fn create_trade(&self, new: NewTrade, now: DateTime<Utc>) -> Trade {
        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            symbol: new.symbol,
            direction: new.direction,
            status: TradeStatus::Active,
            entry_price: new.entry_price,
            quantity: new.quantity,
            leverage: new.leverage,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
            exit_price: None,
            profit: None,
            profit_percent: None,
            entry_time: now,
            exit_time: None,
            entry_signals: new.entry_signals,
            exchange_order_id: new.exchange_order_id,
            trailing_stop_active: new.trailing_stop_active,
            trailing_stop_price: None,
            highest_price: 0.0,
            is_auto_trade: new.is_auto_trade,
            protection_pending: new.protection_pending,
        };

        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            direction = %trade.direction,
            entry_price = trade.entry_price,
            quantity = trade.quantity,
            stop_loss = trade.stop_loss,
            take_profit = trade.take_profit,
            auto = trade.is_auto_trade,
            "trade created"
        );

        self.trades.write().push(trade.clone());
        trade
    }

    /// Apply an arbitrary mutation to a trade row. Returns the updated row.
    pub fn update_trade<F>(&self, id: &str, mutate: F) -> Option<Trade>
    where
        F: FnOnce(&mut Trade),
    {
        let mut trades = self.trades.write();
        let trade = trades.iter_mut().find(|t| t.id == id)?;
        mutate(trade);
        Some(trade.clone())
    }

    /// Persist a trailing-stop move: new stop, new highest profit percent, and
    /// the new trailing stop price in one write.
    pub fn update_trade_trailing_stop(
        &self,
        id: &str,
        stop_loss: f64,
        highest_profit: f64,
        trailing_stop_price: f64,
    ) -> Option<Trade> {
        self.update_trade(id, |t| {
            t.stop_loss = stop_loss;
            t.highest_price = highest_profit;
            t.trailing_stop_price = Some(trailing_stop_price);
        })
    }

    /// Close a trade at `exit_price`, computing realized profit from the
    /// stored entry. Fails with `NotFound` / `NotActive`.
    pub fn close_trade(
        &self,
        id: &str,
        exit_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Trade, EngineError> {
        let mut trades = self.trades.write();
        let trade = trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("trade {id}")))?;

        if trade.status != TradeStatus::Active {
            return Err(EngineError::NotActive(id.to_string()));
        }

        let sign = trade.direction.sign();
        let profit = sign * (exit_price - trade.entry_price) * trade.quantity;
        let profit_percent = if trade.entry_price > 0.0 {
            sign * (exit_price - trade.entry_price) / trade.entry_price * 100.0
        } else {
            0.0
        };

        trade.status = TradeStatus::Closed;
        trade.exit_price = Some(exit_price);
        trade.exit_time = Some(now);
        trade.profit = Some(profit);
        trade.profit_percent = Some(profit_percent);

        info!(
            id,
            exit_price,
            profit,
            profit_percent,
            "trade closed"
        );

        Ok(trade.clone())
    }

    /// Close every active trade, pricing each one through `price_for`.
    /// Returns the closed rows.
    pub fn close_all_trades<F>(&self, price_for: F, now: DateTime<Utc>) -> Vec<Trade>
    where
        F: Fn(&Trade) -> f64,
    {
        let ids: Vec<(String, f64)> = self
            .trades
            .read()
            .iter()
            .filter(|t| t.status == TradeStatus::Active)
            .map(|t| (t.id.clone(), price_for(t)))
            .collect();

        let mut closed = Vec::with_capacity(ids.len());
        for (id, price) in ids {
            if let Ok(trade) = self.close_trade(&id, price, now) {
                closed.push(trade);
            }
        }
        closed
    }

    /// Most recent `limit` closed trades, newest first.
    pub fn get_trade_history(&self, limit: usize) -> Vec<Trade> {
        let trades = self.trades.read();
        let mut closed: Vec<Trade> = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        closed.truncate(limit);
        closed
    }

    /// Closed trades whose exit time falls inside `[from, to)`.
    pub fn get_trades_in_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Trade> {
        self.trades
            .read()
            .iter()
            .filter(|t| {
                t.status == TradeStatus::Closed
                    && t.exit_time.map(|e| e >= from && e < to).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Count of currently active trades.
    pub fn active_trade_count(&self) -> usize {
        self.trades
            .read()
            .iter()
            .filter(|t| t.status == TradeStatus::Active)
            .count()
    }

    // -------------------------------------------------------------------------
    // Activity log
    // -------------------------------------------------------------------------

    /// Append an activity-log entry. The ring is capped at [`MAX_LOG_ENTRIES`].
    pub fn create_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<String>,
    ) -> ActivityLogEntry {
        let entry = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            level,
            message: message.into(),
            details,
            timestamp: Utc::now(),
        };

        let mut logs = self.logs.write();
        logs.push(entry.clone());
        while logs.len() > MAX_LOG_ENTRIES {
            logs.remove(0);
        }
        entry
    }

    /// Most recent `limit` log entries, newest first.
    pub fn get_logs(&self, limit: usize) -> Vec<ActivityLogEntry> {
        let logs = self.logs.read();
        logs.iter().rev().take(limit).cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Signal audit
    // -------------------------------------------------------------------------

    /// Append a signal audit row (immutable once written).
    pub fn create_signal(
        &self,
        symbol: &str,
        signal: SignalKind,
        indicator: &str,
        value: f64,
        strength: f64,
        now: DateTime<Utc>,
    ) -> SignalRow {
        let row = SignalRow {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            signal,
            indicator: indicator.to_string(),
            value,
            strength,
            timestamp: now,
        };

        let mut signals = self.signals.write();
        signals.push(row.clone());
        while signals.len() > MAX_SIGNAL_ROWS {
            signals.remove(0);
        }
        row
    }

}

impl std::fmt::Debug for TradeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeStore")
            .field("trades", &self.trades.read().len())
            .field("logs", &self.logs.read().len())
            .field("signals", &self.signals.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn new_trade(symbol: &str, direction: TradeDirection, entry: f64) -> NewTrade {
        NewTrade {
            symbol: symbol.to_string(),
            direction,
            entry_price: entry,
            quantity: 1.0,
            leverage: 10,
            stop_loss: if direction == TradeDirection::Long {
                entry * 0.98
            } else {
                entry * 1.02
            },
            take_profit: if direction == TradeDirection::Long {
                entry * 1.04
            } else {
                entry * 0.96
            },
            entry_signals: vec!["test".to_string()],
            exchange_order_id: None,
            trailing_stop_active: true,
            is_auto_trade: true,
            protection_pending: false,
        }
    }

    fn store() -> TradeStore {
        TradeStore::new(Settings::default())
    }

    #[test]
    fn create_and_fetch_trade() {
        let store = store();
        let t = store.create_trade(new_trade("BTCUSDT", TradeDirection::Long, 100.0), Utc::now());
        assert_eq!(t.status, TradeStatus::Active);
        assert!(t.exit_price.is_none());
        assert!(t.exit_time.is_none());
        assert!((t.highest_price - 0.0).abs() < f64::EPSILON);

        let fetched = store.get_trade_by_id(&t.id).unwrap();
        assert_eq!(fetched.symbol, "BTCUSDT");
        assert_eq!(store.active_trade_count(), 1);
    }

    #[test]
    fn close_trade_computes_profit() {
        let store = store();
        let t = store.create_trade(new_trade("BTCUSDT", TradeDirection::Long, 100.0), Utc::now());
        let closed = store.close_trade(&t.id, 105.0, Utc::now()).unwrap();

        assert_eq!(closed.status, TradeStatus::Closed);
        assert!((closed.profit.unwrap() - 5.0).abs() < 1e-10);
        assert!((closed.profit_percent.unwrap() - 5.0).abs() < 1e-10);
        assert!(closed.exit_time.is_some());
        assert!(closed.exit_time.unwrap() >= closed.entry_time);
    }

    #[test]
    fn close_short_profit_sign() {
        let store = store();
        let t = store.create_trade(new_trade("ETHUSDT", TradeDirection::Short, 200.0), Utc::now());
        let closed = store.close_trade(&t.id, 190.0, Utc::now()).unwrap();
        assert!((closed.profit.unwrap() - 10.0).abs() < 1e-10);
        assert!((closed.profit_percent.unwrap() - 5.0).abs() < 1e-10);
    }

    #[test]
    fn close_missing_trade_is_not_found() {
        let store = store();
        assert!(matches!(
            store.close_trade("nope", 1.0, Utc::now()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn double_close_is_not_active() {
        let store = store();
        let t = store.create_trade(new_trade("BTCUSDT", TradeDirection::Long, 100.0), Utc::now());
        store.close_trade(&t.id, 101.0, Utc::now()).unwrap();
        assert!(matches!(
            store.close_trade(&t.id, 102.0, Utc::now()),
            Err(EngineError::NotActive(_))
        ));
    }

    #[test]
    fn close_all_prices_each_trade() {
        let store = store();
        store.create_trade(new_trade("BTCUSDT", TradeDirection::Long, 100.0), Utc::now());
        store.create_trade(new_trade("ETHUSDT", TradeDirection::Short, 200.0), Utc::now());

        let closed = store.close_all_trades(
            |t| if t.symbol == "BTCUSDT" { 110.0 } else { 195.0 },
            Utc::now(),
        );
        assert_eq!(closed.len(), 2);
        assert_eq!(store.active_trade_count(), 0);
        for trade in closed {
            assert!(trade.profit.unwrap() > 0.0);
        }
    }

    #[test]
    fn trailing_stop_update_persists_all_three_fields() {
        let store = store();
        let t = store.create_trade(new_trade("BTCUSDT", TradeDirection::Long, 100.0), Utc::now());
        let updated = store
            .update_trade_trailing_stop(&t.id, 101.0, 3.0, 101.0)
            .unwrap();
        assert!((updated.stop_loss - 101.0).abs() < 1e-10);
        assert!((updated.highest_price - 3.0).abs() < 1e-10);
        assert_eq!(updated.trailing_stop_price, Some(101.0));
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let store = store();
        for i in 0..5 {
            let t = store.create_trade(
                new_trade("BTCUSDT", TradeDirection::Long, 100.0 + i as f64),
                Utc::now(),
            );
            store.close_trade(&t.id, 110.0, Utc::now()).unwrap();
        }
        let history = store.get_trade_history(3);
        assert_eq!(history.len(), 3);
        assert!(history[0].exit_time >= history[1].exit_time);
    }

    #[test]
    fn log_ring_is_capped() {
        let store = store();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            store.create_log(LogLevel::Info, format!("entry {i}"), None);
        }
        assert_eq!(store.get_logs(usize::MAX).len(), MAX_LOG_ENTRIES);
    }

    #[test]
    fn settings_patch_flows_through_store() {
        let store = store();
        let patch = serde_json::json!({ "rsi_period": 21 });
        let updated = store.update_settings(&patch).unwrap();
        assert_eq!(updated.rsi_period, 21);
        assert_eq!(store.get_settings().rsi_period, 21);

        let bad = serde_json::json!({ "rsi_period": 99 });
        assert!(store.update_settings(&bad).is_err());
        // Failed update leaves settings untouched.
        assert_eq!(store.get_settings().rsi_period, 21);
    }
}
