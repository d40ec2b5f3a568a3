// =============================================================================
// Binance Futures REST API Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the bot and Binance servers.
//
// Every method maps venue rejections to `EngineError::ExchangeRejected` with
// the venue's numeric code, and transport failures to `EngineError::Network`.
// =============================================================================

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, error, instrument, warn};

use crate::binance::precision;
use crate::error::{EngineError, EngineResult};
use crate::types::{Candle, TradeDirection};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// How long a position-mode lookup stays valid.
const POSITION_MODE_TTL: Duration = Duration::from_secs(60);

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Account balance snapshot from the futures account endpoint.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub total_balance: f64,
    pub available_balance: f64,
}

/// One position from the position-risk endpoint. Zero `position_amt` means no
/// exposure on that (symbol, side).
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub symbol: String,
    /// "LONG" / "SHORT" in hedging mode, "BOTH" in one-way mode.
    pub position_side: String,
    /// Signed quantity: positive long, negative short.
    pub position_amt: f64,
    pub entry_price: f64,
    pub unrealized_profit: f64,
    pub leverage: u32,
    pub mark_price: f64,
}

impl PositionInfo {
    /// Direction implied by the position. `None` when flat.
    pub fn direction(&self) -> Option<TradeDirection> {
        match self.position_side.as_str() {
            "LONG" => Some(TradeDirection::Long),
            "SHORT" => Some(TradeDirection::Short),
            _ if self.position_amt > 0.0 => Some(TradeDirection::Long),
            _ if self.position_amt < 0.0 => Some(TradeDirection::Short),
            _ => None,
        }
    }
}

/// 24-hour rolling ticker statistics.
#[derive(Debug, Clone)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub price_change_percent: f64,
}

/// Outcome of a bracket order placement. The entry is market-filled before the
/// protective orders are registered; a failed protective leg does not undo the
/// entry and is reported in `protective_error`.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: u64,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub protective_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance futures REST client with HMAC-SHA256 request signing.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    /// (dual_side, fetched_at) — refreshed after [`POSITION_MODE_TTL`].
    position_mode_cache: Mutex<Option<(bool, Instant)>>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient`.
    ///
    /// # Arguments
    /// * `api_key`  — API key (sent as a header, never in query params).
    /// * `secret`   — secret key used exclusively for HMAC signing.
    /// * `testnet`  — route to the futures testnet instead of production.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        // The API key header is required for all signed endpoints.
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL }.to_string();
        debug!(base_url = %base_url, "BinanceClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            client,
            position_mode_cache: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Read a response body, mapping HTTP failures to `ExchangeRejected` with
    /// the venue's `{code, msg}` payload when present.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> EngineResult<T> {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;

        if !status.is_success() {
            let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = body
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown exchange error")
                .to_string();
            return Err(EngineError::ExchangeRejected { code, message });
        }

        serde_json::from_value(body)
            .map_err(|e| EngineError::Network(format!("unexpected response shape: {e}")))
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/ticker/price — current mark price for a symbol.
    #[instrument(skip(self), name = "binance::get_market_price")]
    pub async fn get_market_price(&self, symbol: &str) -> EngineResult<f64> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let price = parse_str_f64(&body["price"])?;
        debug!(symbol, price, "market price fetched");
        Ok(price)
    }

    /// GET /fapi/v1/ticker/24hr — rolling 24-hour statistics.
    #[instrument(skip(self), name = "binance::get_24h_ticker")]
    pub async fn get_24h_ticker(&self, symbol: &str) -> EngineResult<Ticker24h> {
        let url = format!("{}/fapi/v1/ticker/24hr?symbol={}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        Ok(Ticker24h {
            symbol: symbol.to_string(),
            last_price: parse_str_f64(&body["lastPrice"])?,
            high_price: parse_str_f64(&body["highPrice"])?,
            low_price: parse_str_f64(&body["lowPrice"])?,
            volume: parse_str_f64(&body["volume"])?,
            price_change_percent: parse_str_f64(&body["priceChangePercent"])?,
        })
    }

    /// GET /fapi/v1/klines (public — no signature required).
    ///
    /// Returns a vector of [`Candle`] structs parsed from the array-of-arrays
    /// response format.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, ...
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> EngineResult<Vec<Candle>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::Network("klines response is not an array".to_string()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let Some(arr) = entry.as_array() else {
                continue;
            };
            if arr.len() < 7 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = parse_str_f64(&arr[1])?;
            let high = parse_str_f64(&arr[2])?;
            let low = parse_str_f64(&arr[3])?;
            let close = parse_str_f64(&arr[4])?;
            let volume = parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);

            candles.push(Candle::new(open_time, open, high, low, close, volume, close_time));
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Convenience: close prices only.
    pub async fn get_closes(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> EngineResult<Vec<f64>> {
        Ok(self
            .get_klines(symbol, interval, limit)
            .await?
            .iter()
            .map(|c| c.close)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Account / positions
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/account (signed) — wallet and available balances.
    #[instrument(skip(self), name = "binance::get_account")]
    pub async fn get_account(&self) -> EngineResult<AccountInfo> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/account?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let info = AccountInfo {
            total_balance: parse_str_f64(&body["totalWalletBalance"])?,
            available_balance: parse_str_f64(&body["availableBalance"])?,
        };
        debug!(
            total = info.total_balance,
            available = info.available_balance,
            "account info retrieved"
        );
        Ok(info)
    }

    /// GET /fapi/v2/positionRisk (signed) — open positions, optionally for a
    /// single symbol. Flat rows (zero quantity) are included; callers filter.
    #[instrument(skip(self), name = "binance::get_positions")]
    pub async fn get_positions(&self, symbol: Option<&str>) -> EngineResult<Vec<PositionInfo>> {
        let params = match symbol {
            Some(s) => format!("symbol={s}"),
            None => String::new(),
        };
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let rows = body.as_array().ok_or_else(|| {
            EngineError::Network("positionRisk response is not an array".to_string())
        })?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            positions.push(PositionInfo {
                symbol: row["symbol"].as_str().unwrap_or_default().to_string(),
                position_side: row["positionSide"].as_str().unwrap_or("BOTH").to_string(),
                position_amt: parse_str_f64(&row["positionAmt"]).unwrap_or(0.0),
                entry_price: parse_str_f64(&row["entryPrice"]).unwrap_or(0.0),
                unrealized_profit: parse_str_f64(&row["unRealizedProfit"]).unwrap_or(0.0),
                leverage: parse_str_f64(&row["leverage"]).unwrap_or(1.0) as u32,
                mark_price: parse_str_f64(&row["markPrice"]).unwrap_or(0.0),
            });
        }

        debug!(count = positions.len(), "positions retrieved");
        Ok(positions)
    }

    /// The exchange position matching `(symbol, direction)` with non-zero
    /// quantity, if any.
    pub async fn get_position(
        &self,
        symbol: &str,
        direction: TradeDirection,
    ) -> EngineResult<Option<PositionInfo>> {
        let positions = self.get_positions(Some(symbol)).await?;
        Ok(positions.into_iter().find(|p| {
            p.position_amt.abs() > 0.0 && p.direction() == Some(direction)
        }))
    }

    /// POST /fapi/v1/leverage (signed) — set leverage for a symbol.
    /// Idempotent: re-applying the current leverage succeeds.
    #[instrument(skip(self), name = "binance::set_leverage")]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> EngineResult<()> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        let resp = self.client.post(&url).send().await?;
        let _body: serde_json::Value = Self::decode(resp).await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Position mode
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/positionSide/dual (signed) — whether the account is in
    /// hedging (dual-side) mode. Cached for 60 s.
    pub async fn get_position_mode(&self) -> EngineResult<bool> {
        if let Some((mode, at)) = *self.position_mode_cache.lock() {
            if at.elapsed() < POSITION_MODE_TTL {
                return Ok(mode);
            }
        }

        let qs = self.signed_query("");
        let url = format!("{}/fapi/v1/positionSide/dual?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;
        let dual = body["dualSidePosition"].as_bool().unwrap_or(false);

        *self.position_mode_cache.lock() = Some((dual, Instant::now()));
        debug!(dual_side = dual, "position mode refreshed");
        Ok(dual)
    }

    /// Drop the cached position mode (called when settings change).
    pub fn invalidate_position_mode_cache(&self) {
        *self.position_mode_cache.lock() = None;
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Place a market entry with optional protective bracket.
    ///
    /// Behaviour (in order):
    /// 1. If `leverage` is given, set it first (failure logged, not fatal —
    ///    the venue keeps its previous setting).
    /// 2. Round quantity to symbol precision; zero after rounding fails with
    ///    `InvalidQuantity`.
    /// 3. Submit the MARKET entry. In hedging mode an explicit `positionSide`
    ///    is attached (`LONG` for buys, `SHORT` for sells, unless overridden).
    /// 4. On success, place a `STOP_MARKET` and `TAKE_PROFIT_MARKET` on the
    ///    closing side with the same position side. A protective failure does
    ///    not undo the entry; it is reported in `protective_error` so the
    ///    caller can track the position and repair the bracket.
    #[allow(clippy::too_many_arguments)]
    #[instrument(
        skip(self, stop_loss, take_profit, leverage, position_side_override),
        name = "binance::place_order"
    )]
    pub async fn place_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        quantity: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        leverage: Option<u32>,
        hedging_mode: bool,
        position_side_override: Option<&str>,
    ) -> EngineResult<OrderResult> {
        if let Some(lev) = leverage {
            if let Err(e) = self.set_leverage(symbol, lev).await {
                warn!(symbol, leverage = lev, error = %e, "failed to set leverage — continuing with venue setting");
            }
        }

        let rounded_qty = precision::round_quantity(symbol, quantity);
        if rounded_qty <= 0.0 {
            warn!(symbol, quantity, "quantity rounds to zero — order skipped");
            return Err(EngineError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            });
        }

        let side = direction.entry_side();
        let position_side = position_side_override.unwrap_or(direction.position_side());

        let mut params = format!(
            "symbol={symbol}&side={side}&type=MARKET&quantity={}",
            precision::format_quantity(symbol, rounded_qty)
        );
        if hedging_mode {
            params.push_str(&format!("&positionSide={position_side}"));
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, side, quantity = rounded_qty, hedging_mode, "placing market entry");

        let resp = self.client.post(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let order_id = body["orderId"].as_u64().unwrap_or(0);
        let avg_price = parse_str_f64(&body["avgPrice"]).unwrap_or(0.0);

        // Protective bracket. The entry is already filled; failures here are
        // reported, not propagated.
        let mut protective_error = None;
        if stop_loss.is_some() || take_profit.is_some() {
            if let Err(e) = self
                .place_protective_orders(
                    symbol,
                    direction,
                    rounded_qty,
                    stop_loss,
                    take_profit,
                    hedging_mode,
                    position_side,
                )
                .await
            {
                error!(symbol, error = %e, "protective order placement failed after entry fill");
                protective_error = Some(e.to_string());
            }
        }

        debug!(symbol, order_id, "market entry placed");
        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: side.to_string(),
            quantity: rounded_qty,
            avg_price,
            protective_error,
        })
    }

    /// Place the protective stop-loss / take-profit pair for an open position.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_protective_orders(
        &self,
        symbol: &str,
        direction: TradeDirection,
        quantity: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        hedging_mode: bool,
        position_side: &str,
    ) -> EngineResult<()> {
        if let Some(stop) = stop_loss {
            self.place_trigger_order(
                symbol,
                direction,
                quantity,
                "STOP_MARKET",
                stop,
                hedging_mode,
                position_side,
            )
            .await?;
        }
        if let Some(target) = take_profit {
            self.place_trigger_order(
                symbol,
                direction,
                quantity,
                "TAKE_PROFIT_MARKET",
                target,
                hedging_mode,
                position_side,
            )
            .await?;
        }
        Ok(())
    }

    /// Place a single closing-side trigger order (stop-loss or take-profit).
    #[allow(clippy::too_many_arguments)]
    async fn place_trigger_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        quantity: f64,
        order_type: &str,
        trigger_price: f64,
        hedging_mode: bool,
        position_side: &str,
    ) -> EngineResult<()> {
        let side = direction.exit_side();
        let price = precision::format_price(symbol, trigger_price);
        let qty = precision::format_quantity(symbol, quantity);

        let mut params = format!(
            "symbol={symbol}&side={side}&type={order_type}&quantity={qty}&stopPrice={price}"
        );
        if hedging_mode {
            // In dual-side mode the position side itself marks the order as
            // reducing; reduceOnly is rejected.
            params.push_str(&format!("&positionSide={position_side}"));
        } else {
            params.push_str("&reduceOnly=true");
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self.client.post(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        debug!(
            symbol,
            order_type,
            trigger = %price,
            order_id = body["orderId"].as_u64().unwrap_or(0),
            "trigger order placed"
        );
        Ok(())
    }

    /// Close a position with a reducing market order on the opposite side.
    #[instrument(skip(self), name = "binance::close_position")]
    pub async fn close_position(
        &self,
        symbol: &str,
        direction: TradeDirection,
        quantity: f64,
        hedging_mode: bool,
    ) -> EngineResult<()> {
        let rounded_qty = precision::round_quantity(symbol, quantity);
        if rounded_qty <= 0.0 {
            return Err(EngineError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            });
        }

        let side = direction.exit_side();
        let mut params = format!(
            "symbol={symbol}&side={side}&type=MARKET&quantity={}",
            precision::format_quantity(symbol, rounded_qty)
        );
        if hedging_mode {
            params.push_str(&format!("&positionSide={}", direction.position_side()));
        } else {
            params.push_str("&reduceOnly=true");
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, side, quantity = rounded_qty, "closing position");

        let resp = self.client.post(&url).send().await?;
        let _body: serde_json::Value = Self::decode(resp).await?;
        Ok(())
    }

    /// DELETE /fapi/v1/order (signed) — cancel an existing order.
    #[instrument(skip(self), name = "binance::cancel_order")]
    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> EngineResult<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, order_id, "cancelling order");

        let resp = self.client.delete(&url).send().await?;
        let _body: serde_json::Value = Self::decode(resp).await?;
        Ok(())
    }

    /// GET /fapi/v1/openOrders (signed).
    #[instrument(skip(self), name = "binance::get_open_orders")]
    pub async fn get_open_orders(&self, symbol: &str) -> EngineResult<Vec<serde_json::Value>> {
        let params = format!("symbol={symbol}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::decode(resp).await?;

        let orders = body.as_array().cloned().unwrap_or_default();
        debug!(symbol, count = orders.len(), "open orders retrieved");
        Ok(orders)
    }

    /// Replace the stop-loss leg of a bracket: cancel existing `STOP_MARKET`
    /// orders for `(symbol, position side)` — take-profit orders are left
    /// untouched — then place a fresh `STOP_MARKET` at `new_stop_price`.
    ///
    /// Succeeds only if the new order was accepted.
    #[instrument(skip(self), name = "binance::update_stop_loss")]
    pub async fn update_stop_loss_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        quantity: f64,
        new_stop_price: f64,
        hedging_mode: bool,
    ) -> EngineResult<()> {
        let position_side = if hedging_mode {
            direction.position_side()
        } else {
            "BOTH"
        };

        let open_orders = self.get_open_orders(symbol).await?;
        for order in &open_orders {
            let order_type = order["type"].as_str().unwrap_or_default();
            let order_position_side = order["positionSide"].as_str().unwrap_or("BOTH");
            if order_type == "STOP_MARKET" && order_position_side == position_side {
                let order_id = order["orderId"].as_u64().unwrap_or(0);
                if let Err(e) = self.cancel_order(symbol, order_id).await {
                    // A stop that just triggered cannot be cancelled; keep
                    // going so the replacement is still attempted.
                    warn!(symbol, order_id, error = %e, "failed to cancel old stop order");
                }
            }
        }

        self.place_trigger_order(
            symbol,
            direction,
            quantity,
            "STOP_MARKET",
            new_stop_price,
            hedging_mode,
            direction.position_side(),
        )
        .await?;

        debug!(symbol, new_stop = new_stop_price, "stop-loss order replaced");
        Ok(())
    }

    /// Signed connectivity check for the operator's "test exchange" action.
    pub async fn test_connection(&self) -> EngineResult<()> {
        self.get_account().await.map(|_| ())
    }

    /// True when the client carries credentials (signed endpoints will at
    /// least be attempted).
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> EngineResult<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|_| EngineError::Network(format!("failed to parse '{s}' as f64")))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(EngineError::Network(format!(
            "expected string or number, got: {val}"
        )))
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_variants() {
        assert!((parse_str_f64(&serde_json::json!("1.5")).unwrap() - 1.5).abs() < 1e-12);
        assert!((parse_str_f64(&serde_json::json!(2.5)).unwrap() - 2.5).abs() < 1e-12);
        assert!(parse_str_f64(&serde_json::json!("abc")).is_err());
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn testnet_base_url() {
        let client = BinanceClient::new("k", "s", true);
        assert!(client.base_url.contains("testnet"));
        let client = BinanceClient::new("k", "s", false);
        assert!(!client.base_url.contains("testnet"));
    }

    #[test]
    fn credentials_detection() {
        assert!(BinanceClient::new("k", "s", true).has_credentials());
        assert!(!BinanceClient::new("", "", true).has_credentials());
    }

    #[test]
    fn debug_redacts_secrets() {
        let client = BinanceClient::new("key-material", "secret-material", true);
        let out = format!("{client:?}");
        assert!(!out.contains("key-material"));
        assert!(!out.contains("secret-material"));
    }

    #[test]
    fn position_direction_from_side() {
        let mut pos = PositionInfo {
            symbol: "BTCUSDT".into(),
            position_side: "LONG".into(),
            position_amt: 0.5,
            entry_price: 100.0,
            unrealized_profit: 1.0,
            leverage: 10,
            mark_price: 102.0,
        };
        assert_eq!(pos.direction(), Some(TradeDirection::Long));

        pos.position_side = "BOTH".into();
        pos.position_amt = -0.5;
        assert_eq!(pos.direction(), Some(TradeDirection::Short));

        pos.position_amt = 0.0;
        assert_eq!(pos.direction(), None);
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let client = BinanceClient::new("key", "secret", true);
        let sig1 = client.sign("symbol=BTCUSDT&side=BUY");
        let sig2 = client.sign("symbol=BTCUSDT&side=BUY");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64); // SHA-256 hex
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
