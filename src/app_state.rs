// =============================================================================
// Central Application State — Meridian Trading Engine
// =============================================================================
//
// Ties the store, engine, and event bus together and provides the aggregate
// statistics the operator API serves. All subsystems hold Arc references;
// AppState is cheap to share across axum handlers and background tasks.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - All mutable collections live behind the store's own locks.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::engine::Engine;
use crate::notify::EventBus;
use crate::store::{Trade, TradeStore};

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub store: Arc<TradeStore>,
    pub engine: Arc<Engine>,
    pub bus: EventBus,
    pub clock: Arc<dyn Clock>,
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation. The WebSocket feed uses this to detect
    /// changes worth pushing.
    pub state_version: AtomicU64,
    /// Where settings are persisted between runs.
    pub settings_path: PathBuf,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        store: Arc<TradeStore>,
        engine: Arc<Engine>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            store,
            engine,
            bus,
            clock,
            state_version: AtomicU64::new(1),
            settings_path,
            start_time: std::time::Instant::now(),
        }
    }

    /// Atomically increment the state version.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Headline numbers for the dashboard, given a live balance (None when the
    /// exchange is unreachable).
    pub fn stats_summary(&self, balance: Option<f64>) -> StatsSummary {
        let now = self.clock.now();
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| DateTime::<Utc>::from_naive_utc_and_offset(d, Utc))
            .unwrap_or(now);

        let today = self.store.get_trades_in_date_range(today_start, now);
        let today_pnl: f64 = today.iter().filter_map(|t| t.profit).sum();
        let today_pnl_percent = balance
            .filter(|b| *b > 0.0)
            .map(|b| today_pnl / b * 100.0)
            .unwrap_or(0.0);

        let history = self.store.get_trade_history(usize::MAX);
        let total_trades = history.len();
        let wins = history
            .iter()
            .filter(|t| t.profit.unwrap_or(0.0) > 0.0)
            .count();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        StatsSummary {
            balance,
            today_pnl,
            today_pnl_percent,
            active_trades: self.store.active_trade_count(),
            total_trades,
            win_rate,
        }
    }

    /// Full performance breakdown over a date range.
    pub fn advanced_stats(&self, range: StatsRange) -> AdvancedStats {
        let now = self.clock.now();
        let trades = match range.start(now) {
            Some(start) => self.store.get_trades_in_date_range(start, now),
            None => self.store.get_trade_history(usize::MAX),
        };
        AdvancedStats::from_trades(range, &trades)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.current_state_version())
            .field("store", &self.store)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stats types
// ---------------------------------------------------------------------------

/// Date range selector for advanced statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsRange {
    Week,
    Month,
    Quarter,
    Year,
    All,
}

impl StatsRange {
    /// Inclusive range start, or `None` for the full history.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::Quarter => Some(now - Duration::days(90)),
            Self::Year => Some(now - Duration::days(365)),
            Self::All => None,
        }
    }
}

/// Headline dashboard numbers.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub balance: Option<f64>,
    pub today_pnl: f64,
    pub today_pnl_percent: f64,
    pub active_trades: usize,
    pub total_trades: usize,
    pub win_rate: f64,
}

/// Performance breakdown over a range of closed trades.
#[derive(Debug, Clone, Serialize)]
pub struct AdvancedStats {
    pub range: StatsRange,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub expectancy: f64,
    pub max_drawdown: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl AdvancedStats {
    pub fn from_trades(range: StatsRange, trades: &[Trade]) -> Self {
        let pnls: Vec<f64> = trades.iter().filter_map(|t| t.profit).collect();
        let total_trades = pnls.len();

        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        let losses = pnls.iter().filter(|p| **p < 0.0).count();
        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
        let total_pnl: f64 = pnls.iter().sum();

        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let average_win = if wins > 0 {
            gross_profit / wins as f64
        } else {
            0.0
        };
        let average_loss = if losses > 0 {
            gross_loss / losses as f64
        } else {
            0.0
        };
        // Expected value per trade.
        let expectancy = if total_trades > 0 {
            total_pnl / total_trades as f64
        } else {
            0.0
        };

        // Max drawdown over the chronological equity curve.
        let mut chronological: Vec<&Trade> = trades.iter().collect();
        chronological.sort_by_key(|t| t.exit_time);
        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for trade in &chronological {
            equity += trade.profit.unwrap_or(0.0);
            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        let best_trade = pnls.iter().copied().fold(0.0_f64, f64::max);
        let worst_trade = pnls.iter().copied().fold(0.0_f64, f64::min);

        Self {
            range,
            total_trades,
            wins,
            losses,
            win_rate,
            total_pnl,
            gross_profit,
            gross_loss,
            profit_factor,
            average_win,
            average_loss,
            expectancy,
            max_drawdown,
            best_trade,
            worst_trade,
        }
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

    fn trade_with_profit(store: &TradeStore, profit_move: f64) -> Trade {
        let t = store.create_trade(
            NewTrade {
                symbol: "BTCUSDT".to_string(),
                direction: TradeDirection::Long,
                entry_price: 100.0,
                quantity: 1.0,
                leverage: 10,
                stop_loss: 95.0,
                take_profit: 110.0,
                entry_signals: vec![],
                exchange_order_id: None,
                trailing_stop_active: false,
                is_auto_trade: true,
                protection_pending: false,
            },
            Utc::now(),
        );
        store
            .close_trade(&t.id, 100.0 + profit_move, Utc::now())
            .unwrap()
    }

    #[test]
    fn advanced_stats_aggregates() {
        let store = TradeStore::new(Settings::default());
        trade_with_profit(&store, 10.0); // +10
        trade_with_profit(&store, -5.0); // -5
        trade_with_profit(&store, 20.0); // +20

        let trades = store.get_trade_history(usize::MAX);
        let stats = AdvancedStats::from_trades(StatsRange::All, &trades);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.total_pnl - 25.0).abs() < 1e-10);
        assert!((stats.gross_profit - 30.0).abs() < 1e-10);
        assert!((stats.gross_loss - 5.0).abs() < 1e-10);
        assert!((stats.profit_factor - 6.0).abs() < 1e-10);
        assert!((stats.average_win - 15.0).abs() < 1e-10);
        assert!((stats.average_loss - 5.0).abs() < 1e-10);
        assert!((stats.best_trade - 20.0).abs() < 1e-10);
        assert!((stats.worst_trade + 5.0).abs() < 1e-10);
    }

    #[test]
    fn drawdown_tracks_equity_dip() {
        let store = TradeStore::new(Settings::default());
        trade_with_profit(&store, 10.0);
        trade_with_profit(&store, -4.0);
        trade_with_profit(&store, -3.0);
        trade_with_profit(&store, 15.0);

        let trades = store.get_trade_history(usize::MAX);
        let stats = AdvancedStats::from_trades(StatsRange::All, &trades);
        // Peak +10, trough +3 => drawdown 7.
        assert!((stats.max_drawdown - 7.0).abs() < 1e-10);
    }

    #[test]
    fn empty_history_is_all_zeroes() {
        let stats = AdvancedStats::from_trades(StatsRange::Week, &[]);
        assert_eq!(stats.total_trades, 0);
        assert!((stats.win_rate - 0.0).abs() < f64::EPSILON);
        assert!((stats.profit_factor - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn range_starts() {
        let now = Utc::now();
        assert!(StatsRange::Week.start(now).unwrap() < now);
        assert!(StatsRange::All.start(now).is_none());
        let week = now - StatsRange::Week.start(now).unwrap();
        assert_eq!(week.num_days(), 7);
    }

    #[test]
    fn range_serde_names() {
        assert_eq!(
            serde_json::to_string(&StatsRange::Quarter).unwrap(),
            "\"quarter\""
        );
        let r: StatsRange = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(r, StatsRange::All);
    }
}
