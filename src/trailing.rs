// =============================================================================
// Trailing-Stop Manager — percent-profit ratchet with exchange synchronization
// =============================================================================
//
// The trailing stop locks profit by **percentage**, not by raw price. Per
// trade it tracks the highest profit percent ever seen; the stop is placed so
// that `highest - trailing_percent` percent of profit stays locked:
//
//   lock  = highest_profit_pct - trailing_percent
//   long:  candidate = entry * (1 + lock/100),  stop = max(existing, candidate)
//   short: candidate = entry * (1 - lock/100),  stop = min(existing, candidate)
//
// The stop is a strict ratchet — it never moves against the position. A stop
// is only created once the lock is positive, so a long trailing stop always
// sits above the entry (and a short below).
//
// Stop-hit: the position closes when price has crossed the stop. Equality is
// not a cross — a stop freshly ratcheted to the current price must not close
// the trade on the same evaluation.
//
// Exchange sync: every ratchet move rewrites the venue's STOP_MARKET order
// (take-profits untouched). A failed rewrite is logged and flagged; the DB row
// is still updated so the next sweep retries from consistent local state.
//
// Legacy data: older rows stored a raw price in the highest-profit field. A
// profit percent above 50 is implausible, so such values reset to 0 on read.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::binance::BinanceClient;
use crate::clock::Clock;
use crate::error::EngineResult;
use crate::gate::AccountGuard;
use crate::notify::Notifier;
use crate::settings::Settings;
use crate::store::{Trade, TradeStore};
use crate::types::{LogLevel, TradeDirection, TradeStatus};

/// Stored highest-profit values above this are legacy raw prices.
const LEGACY_PRICE_THRESHOLD: f64 = 50.0;

// ---------------------------------------------------------------------------
// Pure ratchet core
// ---------------------------------------------------------------------------

/// Normalise a stored highest-profit value, discarding legacy raw prices.
pub fn normalize_highest_profit(stored: f64) -> f64 {
    if stored > LEGACY_PRICE_THRESHOLD || stored < 0.0 || !stored.is_finite() {
        0.0
    } else {
        stored
    }
}

/// Inputs to one ratchet evaluation.
#[derive(Debug, Clone)]
pub struct TrailInputs {
    pub direction: TradeDirection,
    /// The position's actual entry price on the exchange (may differ from the
    /// stored entry after manual averaging).
    pub actual_entry_price: f64,
    pub current_profit_pct: f64,
    /// Raw stored highest-profit value (legacy normalisation applied inside).
    pub stored_highest_profit: f64,
    pub existing_stop: Option<f64>,
    pub trailing_percent: f64,
    pub activation_percent: f64,
}

/// Outcome of one ratchet evaluation.
#[derive(Debug, Clone)]
pub struct TrailOutcome {
    /// Updated highest profit percent (never decreases).
    pub highest_profit: f64,
    /// Set when the stop moved this evaluation.
    pub moved_stop: Option<f64>,
    /// Effective stop after the evaluation (moved or pre-existing).
    pub effective_stop: Option<f64>,
}

/// Evaluate the ratchet for one trade.
pub fn evaluate_ratchet(inputs: &TrailInputs) -> TrailOutcome {
    let normalized = normalize_highest_profit(inputs.stored_highest_profit);
    let highest_profit = normalized.max(inputs.current_profit_pct);

    // Engage when a stop already exists or profit reached the activation bar.
    let engaged = inputs.existing_stop.is_some()
        || inputs.current_profit_pct >= inputs.activation_percent;
    if !engaged {
        return TrailOutcome {
            highest_profit,
            moved_stop: None,
            effective_stop: inputs.existing_stop,
        };
    }

    let lock_pct = highest_profit - inputs.trailing_percent;
    let candidate = match inputs.direction {
        TradeDirection::Long => inputs.actual_entry_price * (1.0 + lock_pct / 100.0),
        TradeDirection::Short => inputs.actual_entry_price * (1.0 - lock_pct / 100.0),
    };

    let moved_stop = match inputs.existing_stop {
        // A first stop only exists once it locks real profit; anything else
        // would sit on the losing side of the entry.
        None if lock_pct > 0.0 => Some(candidate),
        None => None,
        Some(existing) => match inputs.direction {
            TradeDirection::Long if candidate > existing => Some(candidate),
            TradeDirection::Short if candidate < existing => Some(candidate),
            _ => None,
        },
    };

    TrailOutcome {
        highest_profit,
        effective_stop: moved_stop.or(inputs.existing_stop),
        moved_stop,
    }
}

/// Whether the current price has crossed the stop. Equality does not count.
pub fn stop_hit(direction: TradeDirection, price: f64, stop: f64) -> bool {
    match direction {
        TradeDirection::Long => price < stop,
        TradeDirection::Short => price > stop,
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Sweeps every active trade once per tick: repairs missing protective
/// brackets, advances the ratchet, rewrites the exchange stop, and closes
/// trades whose stop has been crossed.
pub struct TrailingStopManager {
    store: Arc<TradeStore>,
    guard: Arc<AccountGuard>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl TrailingStopManager {
    pub fn new(
        store: Arc<TradeStore>,
        guard: Arc<AccountGuard>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            guard,
            clock,
            notifier,
        }
    }

    /// Sweep all active trades. Per-trade failures are logged and do not stop
    /// the sweep.
    pub async fn sweep(&self, client: &BinanceClient, settings: &Settings) {
        let trades = self.store.get_trades(Some(TradeStatus::Active));
        if trades.is_empty() {
            return;
        }
        debug!(count = trades.len(), "trailing sweep starting");

        for trade in trades {
            if let Err(e) = self.sweep_trade(client, settings, &trade).await {
                error!(
                    id = %trade.id,
                    symbol = %trade.symbol,
                    error = %e,
                    "trailing sweep failed for trade"
                );
                self.store.create_log(
                    LogLevel::Error,
                    format!("Trailing sweep failed for {}: {e}", trade.symbol),
                    None,
                );
            }
        }
    }

    async fn sweep_trade(
        &self,
        client: &BinanceClient,
        settings: &Settings,
        trade: &Trade,
    ) -> EngineResult<()> {
        let hedging = client.get_position_mode().await.unwrap_or(false);

        // Repair a bracket whose protective legs failed at entry time.
        if trade.protection_pending {
            self.repair_protection(client, trade, hedging).await;
        }

        if !(settings.trailing_stop_enabled && trade.trailing_stop_active) {
            return Ok(());
        }

        let price = client.get_market_price(&trade.symbol).await?;

        // Prefer the exchange's view of the position: entry price and
        // unrealized P&L survive manual averaging. Fall back to stored data.
        let (actual_entry, current_profit_pct) =
            match client.get_position(&trade.symbol, trade.direction).await {
                Ok(Some(pos)) if pos.entry_price > 0.0 && pos.position_amt.abs() > 0.0 => {
                    let notional = pos.entry_price * pos.position_amt.abs();
                    let profit_pct = if notional > 0.0 {
                        pos.unrealized_profit / notional * 100.0
                    } else {
                        0.0
                    };
                    (pos.entry_price, profit_pct)
                }
                _ => {
                    let entry = trade.entry_price;
                    let profit_pct = if entry > 0.0 {
                        trade.direction.sign() * (price - entry) / entry * 100.0
                    } else {
                        0.0
                    };
                    (entry, profit_pct)
                }
            };

        let outcome = evaluate_ratchet(&TrailInputs {
            direction: trade.direction,
            actual_entry_price: actual_entry,
            current_profit_pct,
            stored_highest_profit: trade.highest_price,
            existing_stop: trade.trailing_stop_price,
            trailing_percent: settings.trailing_stop_percent,
            activation_percent: settings.trailing_stop_activation_percent,
        });

        if let Some(new_stop) = outcome.moved_stop {
            // Rewrite the venue stop first; a failure is flagged but the DB
            // row still advances so the next tick retries from here.
            if let Err(e) = client
                .update_stop_loss_order(
                    &trade.symbol,
                    trade.direction,
                    trade.quantity,
                    new_stop,
                    hedging,
                )
                .await
            {
                error!(
                    id = %trade.id,
                    symbol = %trade.symbol,
                    new_stop,
                    error = %e,
                    "exchange stop-loss update failed"
                );
                self.store.create_log(
                    LogLevel::Error,
                    format!(
                        "Failed to move exchange stop for {} to {:.4}: {e}",
                        trade.symbol, new_stop
                    ),
                    None,
                );
            }

            if let Some(updated) = self.store.update_trade_trailing_stop(
                &trade.id,
                new_stop,
                outcome.highest_profit,
                new_stop,
            ) {
                info!(
                    id = %trade.id,
                    symbol = %trade.symbol,
                    new_stop,
                    highest_profit = outcome.highest_profit,
                    "trailing stop ratcheted"
                );
                self.notifier.on_trailing_update(&updated, new_stop);
            }
        } else if outcome.highest_profit > normalize_highest_profit(trade.highest_price)
            || trade.highest_price != normalize_highest_profit(trade.highest_price)
        {
            // Highest advanced (or a legacy value was normalised) without a
            // stop move; persist so the ratchet base survives restarts.
            self.store.update_trade(&trade.id, |t| {
                t.highest_price = outcome.highest_profit;
            });
        }

        // Stop-hit close, using whatever stop is now effective.
        if let Some(stop) = outcome.effective_stop {
            if stop_hit(trade.direction, price, stop) {
                self.close_on_stop(client, trade, price, stop, hedging).await?;
            }
        }

        Ok(())
    }

    /// Re-issue protective orders for a trade whose bracket failed at entry.
    async fn repair_protection(&self, client: &BinanceClient, trade: &Trade, hedging: bool) {
        match client
            .place_protective_orders(
                &trade.symbol,
                trade.direction,
                trade.quantity,
                Some(trade.stop_loss),
                Some(trade.take_profit),
                hedging,
                trade.direction.position_side(),
            )
            .await
        {
            Ok(()) => {
                info!(id = %trade.id, symbol = %trade.symbol, "protective bracket repaired");
                self.store.update_trade(&trade.id, |t| {
                    t.protection_pending = false;
                });
                self.store.create_log(
                    LogLevel::Success,
                    format!("Protective orders restored for {}", trade.symbol),
                    None,
                );
            }
            Err(e) => {
                warn!(id = %trade.id, symbol = %trade.symbol, error = %e, "bracket repair failed — will retry next tick");
            }
        }
    }

    async fn close_on_stop(
        &self,
        client: &BinanceClient,
        trade: &Trade,
        price: f64,
        stop: f64,
        hedging: bool,
    ) -> EngineResult<()> {
        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            price,
            stop,
            "trailing stop hit — closing position"
        );

        client
            .close_position(&trade.symbol, trade.direction, trade.quantity, hedging)
            .await?;

        let closed = self.store.close_trade(&trade.id, price, self.clock.now())?;
        self.guard.record_trade_result(closed.profit.unwrap_or(0.0));
        self.store.create_log(
            LogLevel::Info,
            format!(
                "Trailing stop closed {} {} at {:.4} (locked {:.2}%)",
                closed.direction,
                closed.symbol,
                price,
                closed.profit_percent.unwrap_or(0.0)
            ),
            None,
        );
        self.notifier.on_trade_close(&closed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(
        direction: TradeDirection,
        profit: f64,
        stored_highest: f64,
        existing: Option<f64>,
    ) -> TrailInputs {
        TrailInputs {
            direction,
            actual_entry_price: 100.0,
            current_profit_pct: profit,
            stored_highest_profit: stored_highest,
            existing_stop: existing,
            trailing_percent: 2.0,
            activation_percent: 1.0,
        }
    }

    // ---- activation ------------------------------------------------------

    #[test]
    fn below_activation_no_stop() {
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 0.5, 0.0, None));
        assert!(out.moved_stop.is_none());
        assert!(out.effective_stop.is_none());
        assert!((out.highest_profit - 0.5).abs() < 1e-10);
    }

    #[test]
    fn existing_stop_stays_engaged_below_activation() {
        // Once a stop exists the manager keeps ratcheting even if profit dips
        // under the activation bar.
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 0.5, 8.0, Some(106.0)));
        assert_eq!(out.effective_stop, Some(106.0));
    }

    #[test]
    fn no_stop_until_lock_is_positive() {
        // Profit at activation but below the trailing percent: a stop here
        // would sit under the entry. None is created.
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 1.5, 0.0, None));
        assert!(out.moved_stop.is_none());
        assert!((out.highest_profit - 1.5).abs() < 1e-10);
    }

    // ---- the S2 ratchet sequence ----------------------------------------

    #[test]
    fn ratchet_sequence_locks_profit() {
        // Long at 100, trailing 2%, activation 1%.
        // Prices: 100 -> none, 103 -> 101, 108 -> 106, 106 -> stays, 105.5 -> hit.
        let mut highest = 0.0;
        let mut stop: Option<f64> = None;

        // price 100: profit 0
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 0.0, highest, stop));
        assert!(out.effective_stop.is_none());
        highest = out.highest_profit;
        stop = out.effective_stop;

        // price 103: profit 3 -> stop 101
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 3.0, highest, stop));
        assert!((out.moved_stop.unwrap() - 101.0).abs() < 1e-10);
        highest = out.highest_profit;
        stop = out.effective_stop;
        assert!((highest - 3.0).abs() < 1e-10);

        // price 108: profit 8 -> stop 106
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 8.0, highest, stop));
        assert!((out.moved_stop.unwrap() - 106.0).abs() < 1e-10);
        highest = out.highest_profit;
        stop = out.effective_stop;

        // price 106: profit 6 -> ratchet stays at 106, no close at equality
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 6.0, highest, stop));
        assert!(out.moved_stop.is_none());
        assert_eq!(out.effective_stop, Some(106.0));
        assert!((out.highest_profit - 8.0).abs() < 1e-10, "highest must not decay");
        assert!(!stop_hit(TradeDirection::Long, 106.0, 106.0));

        // price 105.5: crossed
        assert!(stop_hit(TradeDirection::Long, 105.5, 106.0));
    }

    #[test]
    fn short_ratchet_mirrors() {
        // Short at 100: profit grows as price falls.
        let out = evaluate_ratchet(&inputs(TradeDirection::Short, 3.0, 0.0, None));
        // lock = 1 -> stop at 99.
        assert!((out.moved_stop.unwrap() - 99.0).abs() < 1e-10);

        // Deeper profit tightens downward.
        let out2 = evaluate_ratchet(&inputs(TradeDirection::Short, 8.0, 3.0, Some(99.0)));
        assert!((out2.moved_stop.unwrap() - 94.0).abs() < 1e-10);

        // Profit retrace never widens the stop back up.
        let out3 = evaluate_ratchet(&inputs(TradeDirection::Short, 5.0, 8.0, Some(94.0)));
        assert!(out3.moved_stop.is_none());
        assert_eq!(out3.effective_stop, Some(94.0));
    }

    #[test]
    fn stop_never_decreases_for_long() {
        let mut stop = Some(101.0);
        let mut highest = 3.0;
        // A long run of decaying profits must never move the stop down.
        for profit in [2.5, 2.0, 1.2, 0.4, -1.0] {
            let out = evaluate_ratchet(&inputs(TradeDirection::Long, profit, highest, stop));
            assert!(out.moved_stop.is_none(), "profit {profit} moved the stop");
            assert_eq!(out.effective_stop, stop);
            highest = out.highest_profit;
            stop = out.effective_stop;
        }
        assert!((highest - 3.0).abs() < 1e-10);
    }

    #[test]
    fn highest_profit_is_monotone() {
        let mut highest = 0.0;
        for profit in [1.0, 4.0, 2.0, 6.0, 3.0] {
            let out = evaluate_ratchet(&inputs(TradeDirection::Long, profit, highest, None));
            assert!(out.highest_profit >= highest);
            highest = out.highest_profit;
        }
        assert!((highest - 6.0).abs() < 1e-10);
    }

    #[test]
    fn long_stop_is_above_entry() {
        // Any stop the ratchet creates must lie on the profit side of entry.
        for profit in [2.1, 3.0, 10.0, 49.0] {
            let out = evaluate_ratchet(&inputs(TradeDirection::Long, profit, 0.0, None));
            if let Some(stop) = out.moved_stop {
                assert!(stop > 100.0, "stop {stop} for profit {profit}");
            }
        }
        for profit in [2.1, 3.0, 10.0, 49.0] {
            let out = evaluate_ratchet(&inputs(TradeDirection::Short, profit, 0.0, None));
            if let Some(stop) = out.moved_stop {
                assert!(stop < 100.0, "short stop {stop} for profit {profit}");
            }
        }
    }

    // ---- legacy data -----------------------------------------------------

    #[test]
    fn legacy_price_values_reset() {
        assert_eq!(normalize_highest_profit(43250.0), 0.0);
        assert_eq!(normalize_highest_profit(51.0), 0.0);
        assert!((normalize_highest_profit(49.0) - 49.0).abs() < 1e-10);
        assert_eq!(normalize_highest_profit(-3.0), 0.0);
        assert_eq!(normalize_highest_profit(f64::NAN), 0.0);
    }

    #[test]
    fn legacy_value_reinitialises_ratchet() {
        // Stored "highest" is a BTC price; the ratchet must treat it as 0 and
        // rebuild from the current profit.
        let out = evaluate_ratchet(&inputs(TradeDirection::Long, 3.0, 43250.0, None));
        assert!((out.highest_profit - 3.0).abs() < 1e-10);
        assert!((out.moved_stop.unwrap() - 101.0).abs() < 1e-10);
    }

    // ---- stop-hit --------------------------------------------------------

    #[test]
    fn stop_hit_directions() {
        assert!(stop_hit(TradeDirection::Long, 99.9, 100.0));
        assert!(!stop_hit(TradeDirection::Long, 100.0, 100.0));
        assert!(!stop_hit(TradeDirection::Long, 100.1, 100.0));

        assert!(stop_hit(TradeDirection::Short, 100.1, 100.0));
        assert!(!stop_hit(TradeDirection::Short, 100.0, 100.0));
        assert!(!stop_hit(TradeDirection::Short, 99.9, 100.0));
    }
}
