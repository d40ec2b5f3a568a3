// =============================================================================
// Trading Engine — 60-second scheduler, per-symbol decisions, execution
// =============================================================================
//
// One long-lived task drives the tick:
//
//   reload settings -> roll daily counters -> reconcile -> per-symbol analysis
//   -> trailing-stop sweep
//
// Per-symbol ordering is strict: cooldown, gate, diversification, then the
// analysis paths in priority order — pattern ensemble, strategy bank,
// classical — where the first path that produces a passing signal executes
// and short-circuits the rest.
//
// Failures inside a single symbol are caught and logged; they never abort the
// tick. `stop()` prevents any new per-symbol work; an in-flight remote call
// may finish.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::{classical, ensemble};
use crate::binance::BinanceClient;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::gate::{self, AccountGuard, AccountStatus};
use crate::notify::{EventBus, EventKind, Notifier};
use crate::reconcile::Reconciler;
use crate::settings::Settings;
use crate::sizing;
use crate::store::{NewTrade, Trade, TradeStore};
use crate::strategies::{self, TradeLevels};
use crate::trailing::TrailingStopManager;
use crate::types::{
    base_asset, closes, LogLevel, RiskLevel, TradeDirection, TradeStatus, VolatilityLevel,
};

/// Tick period.
const TICK_SECS: u64 = 60;
/// Delay before the first tick after start-up.
const STARTUP_DELAY_SECS: u64 = 10;
/// Leverage applied to engine-placed brackets.
const DEFAULT_LEVERAGE: u32 = 10;
/// Candle window requested per analysis.
const KLINE_LIMIT: u32 = 100;
/// Minimum bars for the ensemble path.
const AI_MIN_BARS: usize = 30;
/// Minimum bars for the strategy path.
const STRATEGY_MIN_BARS: usize = 50;
/// Classical strength floor cap: `min(min_signal_strength, 30)`.
const CLASSICAL_FLOOR_CAP: f64 = 30.0;

pub struct Engine {
    store: Arc<TradeStore>,
    guard: Arc<AccountGuard>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
    reconciler: Reconciler,
    trailing: TrailingStopManager,

    client: RwLock<Option<Arc<BinanceClient>>>,
    running: AtomicBool,
    stop_signal: Notify,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    /// Per-symbol last trade time, for cooldown enforcement.
    cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Engine {
    pub fn new(
        store: Arc<TradeStore>,
        guard: Arc<AccountGuard>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        bus: EventBus,
    ) -> Self {
        let reconciler = Reconciler::new(
            store.clone(),
            guard.clone(),
            clock.clone(),
            notifier.clone(),
        );
        let trailing = TrailingStopManager::new(
            store.clone(),
            guard.clone(),
            clock.clone(),
            notifier.clone(),
        );

        Self {
            store,
            guard,
            clock,
            notifier,
            bus,
            reconciler,
            trailing,
            client: RwLock::new(None),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            loop_task: Mutex::new(None),
            cooldowns: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Launch the engine loop with the given settings. A no-op when already
    /// running; at most one loop exists at a time.
    pub fn start(self: &Arc<Self>, settings: Settings) -> EngineResult<()> {
        if !settings.is_configured() {
            return Err(EngineError::NotConfigured);
        }
        self.apply_settings(&settings);

        if self.running.swap(true, Ordering::SeqCst) {
            debug!("engine already active — start ignored");
            return Ok(());
        }

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_loop().await;
        });
        *self.loop_task.lock() = Some(handle);

        self.store
            .create_log(LogLevel::Success, "Trading engine started", None);
        info!("engine loop launched");
        Ok(())
    }

    /// Halt the loop. No new per-symbol work starts after this returns; an
    /// in-flight remote call may still finish before the task winds down.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_signal.notify_waiters();
            // Detach the task; it exits on the notification.
            if let Some(handle) = self.loop_task.lock().take() {
                drop(handle);
            }
            self.store
                .create_log(LogLevel::Info, "Trading engine stopped", None);
            info!("engine stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Hot-swap settings: rebuild the exchange client from the new
    /// credentials and drop the cached hedging mode. The next tick reloads
    /// everything else from the store.
    pub fn update_settings(&self, settings: &Settings) {
        // The position-mode cache must not outlive a settings change; the
        // rebuilt client starts cold, and an unchanged client is flushed.
        if let Ok(client) = self.client() {
            client.invalidate_position_mode_cache();
        }
        self.apply_settings(settings);
        self.bus.publish(
            EventKind::SettingsUpdate,
            serde_json::json!({ "auto_trading_enabled": settings.auto_trading_enabled }),
        );
    }

    fn apply_settings(&self, settings: &Settings) {
        let mut client = self.client.write();
        if settings.is_configured() {
            let fresh = BinanceClient::new(
                settings.api_key.clone(),
                settings.api_secret.clone(),
                settings.use_testnet,
            );
            *client = Some(Arc::new(fresh));
        } else {
            *client = None;
        }
    }

    /// The configured exchange client, or `NotConfigured`.
    pub fn client(&self) -> EngineResult<Arc<BinanceClient>> {
        self.client
            .read()
            .clone()
            .ok_or(EngineError::NotConfigured)
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    async fn run_loop(self: Arc<Self>) {
        // Give market data and the API server a moment before the first tick.
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(STARTUP_DELAY_SECS)) => {}
            _ = self.stop_signal.notified() => {
                info!("engine stopped during startup delay");
                return;
            }
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
        info!(period_secs = TICK_SECS, "engine tick loop running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.is_active() {
                        break;
                    }
                    self.tick().await;
                }
                _ = self.stop_signal.notified() => break,
            }
        }

        info!("engine loop exited");
    }

    /// One full tick. Never panics the loop: every failure is contained.
    pub async fn tick(&self) {
        // 1. Fresh settings snapshot — all downstream checks use this copy.
        let settings = self.store.get_settings();

        // 2. Daily counter rollover.
        self.guard.maybe_roll_daily();

        let client = match self.client() {
            Ok(c) => c,
            Err(_) => {
                warn!("tick skipped — exchange credentials not configured");
                return;
            }
        };

        // 3/4. Reconcile before any analysis.
        if let Err(e) = self.reconciler.run(&client, &settings).await {
            error!(error = %e, "reconciliation failed");
            self.store.create_log(
                LogLevel::Error,
                format!("Reconciliation failed: {e}"),
                None,
            );
        }

        // 5. Per-symbol analysis, unless disabled or capped out for the day.
        if !settings.auto_trading_enabled {
            debug!("auto-trading disabled — tick limited to reconcile + trailing");
        } else if self.guard.daily_trade_count() >= settings.max_daily_trades {
            debug!(
                count = self.guard.daily_trade_count(),
                cap = settings.max_daily_trades,
                "daily trade cap reached — analysis skipped"
            );
        } else {
            for symbol in &settings.trading_pairs {
                if !self.is_active() {
                    debug!("stop requested — abandoning remaining symbols");
                    break;
                }
                if let Err(e) = self.process_symbol(&client, &settings, symbol).await {
                    error!(symbol = %symbol, error = %e, "symbol processing failed");
                    self.store.create_log(
                        LogLevel::Error,
                        format!("Analysis failed for {symbol}: {e}"),
                        None,
                    );
                }
            }
        }

        // 6. Trailing-stop sweep across every active trade.
        self.trailing.sweep(&client, &settings).await;

        self.bus.publish(
            EventKind::StatsUpdate,
            serde_json::json!({
                "active_trades": self.store.active_trade_count(),
                "daily_trades": self.guard.daily_trade_count(),
            }),
        );
    }

    // -------------------------------------------------------------------------
    // Per-symbol decision
    // -------------------------------------------------------------------------

    async fn process_symbol(
        &self,
        client: &Arc<BinanceClient>,
        settings: &Settings,
        symbol: &str,
    ) -> EngineResult<()> {
        // 1. Cooldown.
        if let Some(last) = self.cooldowns.read().get(symbol) {
            let elapsed = self.clock.now() - *last;
            if elapsed < ChronoDuration::minutes(settings.trade_cooldown_minutes) {
                debug!(symbol, "cooldown active — skipped");
                return Ok(());
            }
        }

        // 2. Market & account gate.
        if settings.market_filter_enabled || settings.account_protection_enabled {
            let decision = self.evaluate_gate(client, settings, symbol).await?;
            if !decision.allowed {
                info!(symbol, reasons = ?decision.reasons, "gate blocked symbol");
                self.store.create_log(
                    LogLevel::Info,
                    format!("{symbol} blocked: {}", decision.reasons.join("; ")),
                    None,
                );
                return Ok(());
            }
        }

        // 3. Diversification: one trade per base asset. Same-symbol stacking
        // is judged later by the hedging-aware duplicate check.
        if settings.diversification_enabled {
            let base = base_asset(symbol).to_string();
            let clash = self
                .store
                .get_trades(Some(TradeStatus::Active))
                .iter()
                .any(|t| t.symbol != symbol && base_asset(&t.symbol) == base);
            if clash {
                debug!(symbol, base = %base, "diversification blocked second trade on base asset");
                return Ok(());
            }
        }

        let candles = client.get_klines(symbol, "1h", KLINE_LIMIT).await?;

        // 4. Pattern ensemble path.
        if settings.ai_trading_enabled && candles.len() >= AI_MIN_BARS {
            if let Some(prediction) = ensemble::analyze(&candles) {
                let passes = prediction.signal.is_actionable()
                    && prediction.confidence >= settings.ai_min_confidence
                    && prediction.signal_strength >= settings.ai_min_signal_strength
                    && prediction.agreeing_signals() >= settings.ai_required_signals
                    && prediction.risk_level != RiskLevel::High;

                if passes {
                    let Some(direction) = TradeDirection::from_signal(prediction.signal) else {
                        return Ok(());
                    };
                    let entry_signals: Vec<String> = prediction
                        .sub_signals
                        .iter()
                        .filter(|s| s.signal == prediction.signal)
                        .map(|s| format!("ai:{}", s.name))
                        .collect();

                    self.store.create_signal(
                        symbol,
                        prediction.signal,
                        "ensemble",
                        prediction.buy_score.max(prediction.sell_score),
                        prediction.signal_strength,
                        self.clock.now(),
                    );
                    self.notifier.on_signal(
                        symbol,
                        prediction.signal,
                        prediction.signal_strength,
                        "ensemble",
                    );
                    self.execute_trade(
                        client,
                        settings,
                        symbol,
                        direction,
                        prediction.signal_strength,
                        entry_signals,
                        None,
                    )
                    .await?;
                    return Ok(());
                }
                debug!(
                    symbol,
                    signal = %prediction.signal,
                    strength = prediction.signal_strength,
                    confidence = prediction.confidence,
                    risk = %prediction.risk_level,
                    "ensemble prediction below thresholds"
                );
            }
        }

        // 5. Strategy bank path.
        if settings.advanced_strategies_enabled && candles.len() >= STRATEGY_MIN_BARS {
            let analysis = strategies::analyze_all(&candles, settings);

            let chosen = if settings.require_strategy_consensus {
                match analysis.consensus {
                    Some(direction_signal)
                        if analysis.consensus_strength >= settings.strategy_min_strength =>
                    {
                        // Prefer the best signal when it agrees with the
                        // consensus; otherwise any agreeing signal with levels.
                        analysis
                            .best
                            .clone()
                            .filter(|b| b.signal == direction_signal)
                            .or_else(|| {
                                analysis
                                    .signals
                                    .iter()
                                    .find(|s| {
                                        s.signal == direction_signal && s.levels.is_some()
                                    })
                                    .cloned()
                            })
                    }
                    _ => None,
                }
            } else {
                analysis.best.clone().filter(|b| {
                    b.confidence >= settings.strategy_min_confidence
                        && b.strength >= settings.strategy_min_strength
                })
            };

            if let Some(signal) = chosen {
                if let Some(direction) = TradeDirection::from_signal(signal.signal) {
                    self.store.create_signal(
                        symbol,
                        signal.signal,
                        &signal.strategy.to_string(),
                        signal.confidence,
                        signal.strength,
                        self.clock.now(),
                    );
                    self.notifier.on_signal(
                        symbol,
                        signal.signal,
                        signal.strength,
                        &signal.strategy.to_string(),
                    );
                    self.execute_trade(
                        client,
                        settings,
                        symbol,
                        direction,
                        signal.strength,
                        vec![format!("strategy:{}", signal.strategy)],
                        signal.levels,
                    )
                    .await?;
                    return Ok(());
                }
            }
        }

        // 6. Classical fallback.
        let (overall, strength, confirmed) = if settings.multi_timeframe_enabled {
            let mut per_tf = Vec::with_capacity(settings.timeframes.len());
            for tf in &settings.timeframes {
                let closes = client.get_closes(symbol, tf, KLINE_LIMIT).await?;
                per_tf.push((tf.clone(), classical::analyze(&closes, settings)));
            }
            let mtf = classical::combine_timeframes(&per_tf);
            (
                mtf.overall_signal,
                mtf.signal_strength,
                mtf.confirmed_timeframes,
            )
        } else {
            let closes = closes(&candles);
            let analysis = classical::analyze(&closes, settings);
            let confirmed = analysis
                .confirmed_signals
                .iter()
                .map(|c| c.indicator.clone())
                .collect();
            (analysis.overall_signal, analysis.signal_strength, confirmed)
        };

        // 7. Floor and duplicate checks.
        let floor = settings.min_signal_strength.min(CLASSICAL_FLOOR_CAP);
        let Some(direction) = TradeDirection::from_signal(overall) else {
            return Ok(());
        };
        if strength < floor {
            debug!(symbol, strength, floor, "classical signal below floor");
            return Ok(());
        }

        // 8. Signal hook, then execution.
        self.store
            .create_signal(symbol, overall, "classical", strength, strength, self.clock.now());
        self.notifier.on_signal(symbol, overall, strength, "classical");
        self.execute_trade(
            client,
            settings,
            symbol,
            direction,
            strength,
            confirmed.iter().map(|c| format!("classical:{c}")).collect(),
            None,
        )
        .await?;

        Ok(())
    }

    async fn evaluate_gate(
        &self,
        client: &Arc<BinanceClient>,
        settings: &Settings,
        symbol: &str,
    ) -> EngineResult<gate::GateDecision> {
        let market = if settings.market_filter_enabled {
            let candles = client.get_klines(symbol, "1h", 60).await?;
            Some(gate::analyze_market_condition(&candles, settings))
        } else {
            None
        };

        let account = if settings.account_protection_enabled {
            let balance = client.get_account().await?.total_balance;
            self.guard
                .status(balance, self.store.active_trade_count(), settings)
        } else {
            AccountStatus {
                can_trade: true,
                reasons: Vec::new(),
                daily_pnl: self.guard.daily_pnl(),
                daily_pnl_percent: 0.0,
                consecutive_losses: self.guard.consecutive_losses(),
                daily_trade_count: self.guard.daily_trade_count(),
                active_trades: self.store.active_trade_count(),
            }
        };

        Ok(gate::decide(market, account))
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Place a bracket order and record the trade. `levels` carries
    /// strategy-supplied stop/target; `None` derives them from settings.
    async fn execute_trade(
        &self,
        client: &Arc<BinanceClient>,
        settings: &Settings,
        symbol: &str,
        direction: TradeDirection,
        strength: f64,
        entry_signals: Vec<String>,
        levels: Option<TradeLevels>,
    ) -> EngineResult<()> {
        // 1. Current price; abort on failure.
        let price = client.get_market_price(symbol).await?;
        let hedging = client.get_position_mode().await.unwrap_or(false);

        let active = self.store.get_trades(Some(TradeStatus::Active));
        if duplicate_position(&active, symbol, direction, hedging) {
            debug!(symbol, direction = %direction, hedging, "position already active — skipped");
            return Ok(());
        }

        // 2. Stop/target and sizing.
        let balance = client.get_account().await?.available_balance;

        let (stop_loss, take_profit, quantity) = if let Some(l) = levels {
            // Strategy-supplied levels are used verbatim; sizing still follows
            // the configured mode.
            let quantity = self
                .size_position(client, settings, symbol, price, l.stop_loss, strength, balance)
                .await?;
            (l.stop_loss, l.take_profit, quantity)
        } else if settings.smart_position_sizing {
            let candles = client.get_klines(symbol, "1h", KLINE_LIMIT).await?;
            let atr = crate::indicators::atr::calculate_atr(&candles, settings.atr_period)
                .unwrap_or(price * 0.01);
            let stop_distance = atr * settings.atr_multiplier;
            let (stop, target) = match direction {
                TradeDirection::Long => (
                    price - stop_distance,
                    price + stop_distance * settings.risk_reward_ratio,
                ),
                TradeDirection::Short => (
                    price + stop_distance,
                    price - stop_distance * settings.risk_reward_ratio,
                ),
            };
            let quantity = self
                .size_position(client, settings, symbol, price, stop, strength, balance)
                .await?;
            (stop, target, quantity)
        } else {
            let (stop, target) = sizing::levels_from_risk_percent(
                direction,
                price,
                settings.max_risk_per_trade,
                settings.risk_reward_ratio,
            );
            let quantity = sizing::classical_quantity(
                balance,
                settings.max_risk_per_trade,
                price,
                stop,
                DEFAULT_LEVERAGE,
            );
            (stop, target, quantity)
        };

        // 3. Bracket placement.
        let order = match client
            .place_order(
                symbol,
                direction,
                quantity,
                Some(stop_loss),
                Some(take_profit),
                Some(DEFAULT_LEVERAGE),
                hedging,
                None,
            )
            .await
        {
            Ok(order) => order,
            Err(EngineError::InvalidQuantity { symbol, quantity }) => {
                warn!(symbol = %symbol, quantity, "order skipped — quantity below lot size");
                self.store.create_log(
                    LogLevel::Warning,
                    format!("Order skipped for {symbol}: quantity {quantity:.6} rounds to zero"),
                    None,
                );
                return Ok(());
            }
            Err(e) => {
                error!(symbol, error = %e, "order placement failed");
                self.store.create_log(
                    LogLevel::Error,
                    format!("Order placement failed for {symbol}: {e}"),
                    None,
                );
                // No trade row: no partial state survives a failed entry.
                return Ok(());
            }
        };

        // 4. Persist the trade; a failed protective leg is an incident but
        //    the position is live and must be tracked.
        if let Some(protective_error) = &order.protective_error {
            error!(
                symbol,
                error = %protective_error,
                "entry filled but protective orders failed — will repair next tick"
            );
            self.store.create_log(
                LogLevel::Error,
                format!("Protective orders failed for {symbol}: {protective_error}"),
                None,
            );
        }

        let entry_price = if order.avg_price > 0.0 {
            order.avg_price
        } else {
            price
        };
        let trade = self.store.create_trade(
            NewTrade {
                symbol: symbol.to_string(),
                direction,
                entry_price,
                quantity: order.quantity,
                leverage: DEFAULT_LEVERAGE,
                stop_loss,
                take_profit,
                entry_signals,
                exchange_order_id: Some(order.order_id.to_string()),
                trailing_stop_active: settings.trailing_stop_enabled,
                is_auto_trade: true,
                protection_pending: order.protective_error.is_some(),
            },
            self.clock.now(),
        );

        self.cooldowns
            .write()
            .insert(symbol.to_string(), self.clock.now());
        self.guard.record_trade_opened();
        self.notifier.on_trade_open(&trade);

        info!(
            id = %trade.id,
            symbol,
            direction = %direction,
            entry = entry_price,
            quantity = order.quantity,
            stop_loss,
            take_profit,
            "bracket order placed and trade recorded"
        );
        Ok(())
    }

    /// Quantity under the configured sizing mode.
    #[allow(clippy::too_many_arguments)]
    async fn size_position(
        &self,
        client: &Arc<BinanceClient>,
        settings: &Settings,
        symbol: &str,
        price: f64,
        stop: f64,
        strength: f64,
        balance: f64,
    ) -> EngineResult<f64> {
        if settings.smart_position_sizing {
            let candles = client.get_klines(symbol, "1h", KLINE_LIMIT).await?;
            let atr_pct = crate::indicators::atr::calculate_atr_pct(&candles, settings.atr_period)
                .unwrap_or(1.5);
            let volatility = VolatilityLevel::from_atr_pct(atr_pct);
            let pct = sizing::smart_size_percent(settings, volatility, strength);
            Ok(sizing::quantity_from_percent(
                balance,
                pct,
                price,
                DEFAULT_LEVERAGE,
            ))
        } else {
            Ok(sizing::classical_quantity(
                balance,
                settings.max_risk_per_trade,
                price,
                stop,
                DEFAULT_LEVERAGE,
            ))
        }
    }

    // -------------------------------------------------------------------------
    // Operator actions
    // -------------------------------------------------------------------------

    /// Open a trade on the operator's explicit request. Gates and cooldowns do
    /// not apply; the duplicate-position check does.
    pub async fn open_manual_trade(
        &self,
        symbol: &str,
        direction: TradeDirection,
    ) -> EngineResult<Trade> {
        let settings = self.store.get_settings();
        let client = self.client()?;

        let price = client.get_market_price(symbol).await?;
        let hedging = client.get_position_mode().await.unwrap_or(false);

        let active = self.store.get_trades(Some(TradeStatus::Active));
        if duplicate_position(&active, symbol, direction, hedging) {
            return Err(EngineError::ValidationFailed(format!(
                "{symbol} already has an active position in this direction"
            )));
        }

        let (stop_loss, take_profit) = sizing::levels_from_risk_percent(
            direction,
            price,
            settings.max_risk_per_trade,
            settings.risk_reward_ratio,
        );
        let balance = client.get_account().await?.available_balance;
        let quantity = sizing::classical_quantity(
            balance,
            settings.max_risk_per_trade,
            price,
            stop_loss,
            DEFAULT_LEVERAGE,
        );

        let order = client
            .place_order(
                symbol,
                direction,
                quantity,
                Some(stop_loss),
                Some(take_profit),
                Some(DEFAULT_LEVERAGE),
                hedging,
                None,
            )
            .await?;

        let entry_price = if order.avg_price > 0.0 {
            order.avg_price
        } else {
            price
        };
        let trade = self.store.create_trade(
            NewTrade {
                symbol: symbol.to_string(),
                direction,
                entry_price,
                quantity: order.quantity,
                leverage: DEFAULT_LEVERAGE,
                stop_loss,
                take_profit,
                entry_signals: vec!["manual".to_string()],
                exchange_order_id: Some(order.order_id.to_string()),
                trailing_stop_active: settings.trailing_stop_enabled,
                is_auto_trade: false,
                protection_pending: order.protective_error.is_some(),
            },
            self.clock.now(),
        );

        self.guard.record_trade_opened();
        self.notifier.on_trade_open(&trade);
        self.store.create_log(
            LogLevel::Success,
            format!("Manual {direction} opened on {symbol}"),
            None,
        );
        Ok(trade)
    }

    /// Close a tracked trade at market on the operator's request.
    pub async fn close_trade_by_id(&self, id: &str) -> EngineResult<Trade> {
        let trade = self
            .store
            .get_trade_by_id(id)
            .ok_or_else(|| EngineError::NotFound(format!("trade {id}")))?;
        if trade.status != TradeStatus::Active {
            return Err(EngineError::NotActive(id.to_string()));
        }

        let client = self.client()?;
        let hedging = client.get_position_mode().await.unwrap_or(false);
        let price = client.get_market_price(&trade.symbol).await?;

        client
            .close_position(&trade.symbol, trade.direction, trade.quantity, hedging)
            .await?;

        let closed = self.store.close_trade(id, price, self.clock.now())?;
        self.guard.record_trade_result(closed.profit.unwrap_or(0.0));
        self.store.create_log(
            LogLevel::Info,
            format!("Manually closed {} {}", closed.direction, closed.symbol),
            None,
        );
        self.notifier.on_trade_close(&closed);
        Ok(closed)
    }

    /// Close every active trade; returns how many closed successfully.
    pub async fn close_all_trades(&self) -> usize {
        let active = self.store.get_trades(Some(TradeStatus::Active));
        let mut closed = 0;
        for trade in active {
            match self.close_trade_by_id(&trade.id).await {
                Ok(_) => closed += 1,
                Err(e) => {
                    error!(id = %trade.id, symbol = %trade.symbol, error = %e, "close-all failed for trade");
                    self.store.create_log(
                        LogLevel::Error,
                        format!("Failed to close {}: {e}", trade.symbol),
                        None,
                    );
                }
            }
        }
        closed
    }
}

/// Whether a fresh `(symbol, direction)` entry would stack onto an existing
/// position: same direction blocks in hedging mode, any direction blocks in
/// one-way mode.
fn duplicate_position(
    active: &[Trade],
    symbol: &str,
    direction: TradeDirection,
    hedging: bool,
) -> bool {
    active
        .iter()
        .any(|t| t.symbol == symbol && (!hedging || t.direction == direction))
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_active())
            .field("cooldowns", &self.cooldowns.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::BusNotifier;
    use chrono::TimeZone;

    fn test_engine() -> Arc<Engine> {
        let store = Arc::new(TradeStore::new(Settings::default()));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        ));
        let guard = Arc::new(AccountGuard::new(clock.clone()));
        let bus = EventBus::new();
        let notifier: Arc<dyn Notifier> = Arc::new(BusNotifier::new(store.clone(), bus.clone()));
        Arc::new(Engine::new(store, guard, clock, notifier, bus))
    }

    #[test]
    fn start_requires_credentials() {
        let engine = test_engine();
        let result = engine.start(Settings::default());
        assert!(matches!(result, Err(EngineError::NotConfigured)));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let engine = test_engine();
        let mut settings = Settings::default();
        settings.api_key = "key".to_string();
        settings.api_secret = "secret".to_string();

        engine.start(settings.clone()).unwrap();
        assert!(engine.is_active());

        // A second start is a no-op, not a second loop.
        engine.start(settings).unwrap();
        assert!(engine.is_active());

        engine.stop();
        assert!(!engine.is_active());
    }

    #[test]
    fn client_reflects_configuration() {
        let engine = test_engine();
        assert!(engine.client().is_err());

        let mut settings = Settings::default();
        settings.api_key = "key".to_string();
        settings.api_secret = "secret".to_string();
        engine.update_settings(&settings);
        assert!(engine.client().is_ok());

        settings.api_key.clear();
        engine.update_settings(&settings);
        assert!(engine.client().is_err());
    }

    fn active_trade(symbol: &str, direction: TradeDirection) -> Trade {
        let store = TradeStore::new(Settings::default());
        store.create_trade(
            crate::store::NewTrade {
                symbol: symbol.to_string(),
                direction,
                entry_price: 100.0,
                quantity: 1.0,
                leverage: 10,
                stop_loss: 98.0,
                take_profit: 104.0,
                entry_signals: vec![],
                exchange_order_id: None,
                trailing_stop_active: false,
                is_auto_trade: true,
                protection_pending: false,
            },
            chrono::Utc::now(),
        )
    }

    #[test]
    fn hedging_allows_opposite_direction_only() {
        // Active LONG BTCUSDT: a fresh SHORT is allowed in hedging mode but
        // rejected in one-way mode; a second LONG is rejected in both.
        let active = vec![active_trade("BTCUSDT", TradeDirection::Long)];

        assert!(!duplicate_position(
            &active,
            "BTCUSDT",
            TradeDirection::Short,
            true
        ));
        assert!(duplicate_position(
            &active,
            "BTCUSDT",
            TradeDirection::Short,
            false
        ));
        assert!(duplicate_position(
            &active,
            "BTCUSDT",
            TradeDirection::Long,
            true
        ));
        assert!(duplicate_position(
            &active,
            "BTCUSDT",
            TradeDirection::Long,
            false
        ));
        // Other symbols are unaffected.
        assert!(!duplicate_position(
            &active,
            "ETHUSDT",
            TradeDirection::Long,
            false
        ));
    }

    #[test]
    fn classical_floor_is_capped_at_thirty() {
        let mut settings = Settings::default();
        settings.min_signal_strength = 70.0;
        let floor = settings.min_signal_strength.min(CLASSICAL_FLOOR_CAP);
        assert!((floor - 30.0).abs() < f64::EPSILON);

        settings.min_signal_strength = 20.0;
        let floor = settings.min_signal_strength.min(CLASSICAL_FLOOR_CAP);
        assert!((floor - 20.0).abs() < f64::EPSILON);
    }
}
