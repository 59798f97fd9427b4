//! Bybit v5 REST client for linear (USDT-margined) perpetuals.
//!
//! Handles:
//! - HMAC-SHA256 request signing for private endpoints
//! - Market data (klines, tickers, instrument rules)
//! - Order placement and cancellation
//! - Position and wallet queries
//!
//! Every failure is mapped into a [`GatewayError`] so callers can decide
//! per category whether to retry, skip, or just log.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use crate::models::{Candle, InstrumentInfo, OrderSide, Position, PositionSide};

use super::gateway::{GatewayError, GatewayResult};
use super::types::*;

type HmacSha256 = Hmac<Sha256>;

/// Bybit REST base URLs
pub const MAINNET_URL: &str = "https://api.bybit.com";
pub const TESTNET_URL: &str = "https://api-testnet.bybit.com";
pub const DEMO_URL: &str = "https://api-demo.bybit.com";

const CATEGORY: &str = "linear";
const ORDER_FILTER_PLAIN: &str = "Order";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bybit return codes we treat specially.
mod ret_code {
    pub const OK: i64 = 0;
    pub const PARAMS_ERROR: i64 = 10001;
    pub const INSUFFICIENT_AB: i64 = 110004;
    pub const INSUFFICIENT_ORDER_COST: i64 = 110007;
    pub const INSUFFICIENT_AVAILABLE: i64 = 110012;
    pub const LEVERAGE_NOT_MODIFIED: i64 = 110043;
}

/// Authenticated client for Bybit's v5 API.
pub struct BybitClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
}

impl BybitClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` - Bybit API key
    /// * `api_secret` - Bybit API secret
    /// * `base_url` - One of [`MAINNET_URL`], [`TESTNET_URL`], [`DEMO_URL`]
    /// * `recv_window_ms` - Server-side validity window for signed requests
    pub fn new(
        api_key: &str,
        api_secret: &str,
        base_url: &str,
        recv_window_ms: u64,
    ) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            recv_window_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the most recent `limit` klines, oldest first.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> GatewayResult<Vec<Candle>> {
        let query = format!(
            "category={}&symbol={}&interval={}&limit={}",
            CATEGORY,
            symbol,
            interval,
            limit.min(1000)
        );
        let result: KlineResult = self.public_get("/v5/market/kline", &query).await?;

        let mut candles = result
            .list
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<GatewayResult<Vec<_>>>()?;

        // Bybit returns newest first
        candles.reverse();
        Ok(candles)
    }

    /// Current mark price for `symbol`.
    pub async fn get_mark_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let query = format!("category={}&symbol={}", CATEGORY, symbol);
        let result: ListResult<TickerEntry> = self.public_get("/v5/market/tickers", &query).await?;

        result
            .list
            .into_iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.mark_price)
            .ok_or_else(|| GatewayError::BadRequest(format!("no ticker for {symbol}")))
    }

    /// Tick size and lot rules for `symbol`.
    pub async fn get_instrument(&self, symbol: &str) -> GatewayResult<InstrumentInfo> {
        let query = format!("category={}&symbol={}", CATEGORY, symbol);
        let result: ListResult<InstrumentEntry> =
            self.public_get("/v5/market/instruments-info", &query).await?;

        let entry = result
            .list
            .into_iter()
            .find(|i| i.symbol == symbol)
            .ok_or_else(|| GatewayError::BadRequest(format!("unknown instrument {symbol}")))?;

        Ok(InstrumentInfo {
            symbol: entry.symbol,
            tick_size: entry.price_filter.tick_size,
            min_order_qty: entry.lot_size_filter.min_order_qty,
        })
    }

    /// Cancel every resting limit order for `symbol`. Conditional and TP/SL orders stay.
    pub async fn cancel_all_orders(&self, symbol: &str) -> GatewayResult<()> {
        let body = cancel_all_body(symbol);
        let _: serde_json::Value = self.signed_post("/v5/order/cancel-all", &body).await?;
        Ok(())
    }

    /// Place a GTC limit order.
    ///
    /// # Arguments
    /// * `symbol` - Contract to trade
    /// * `side` - Buy or Sell
    /// * `qty` - Contract quantity
    /// * `price` - Limit price, already snapped to tick size
    pub async fn limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
    ) -> GatewayResult<String> {
        let request = CreateOrderRequest {
            category: CATEGORY,
            symbol: symbol.to_string(),
            side: side.as_str(),
            order_type: "Limit",
            qty: qty.normalize().to_string(),
            price: Some(price.to_string()),
            time_in_force: Some("GTC"),
            reduce_only: false,
            order_link_id: new_order_link_id(),
        };
        self.create_order(&request).await
    }

    /// Place a market order.
    pub async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        reduce_only: bool,
    ) -> GatewayResult<String> {
        let request = CreateOrderRequest {
            category: CATEGORY,
            symbol: symbol.to_string(),
            side: side.as_str(),
            order_type: "Market",
            qty: qty.normalize().to_string(),
            price: None,
            time_in_force: None,
            reduce_only,
            order_link_id: new_order_link_id(),
        };
        self.create_order(&request).await
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> GatewayResult<String> {
        debug!(
            symbol = %request.symbol,
            side = request.side,
            order_type = request.order_type,
            qty = %request.qty,
            price = ?request.price,
            "Submitting order"
        );
        let created: OrderCreated = self.signed_post("/v5/order/create", request).await?;
        Ok(created.order_id)
    }

    /// All open USDT-settled positions.
    pub async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        let query = format!("category={}&settleCoin=USDT&limit=200", CATEGORY);
        let result: ListResult<PositionEntry> = self.signed_get("/v5/position/list", &query).await?;

        Ok(result
            .list
            .into_iter()
            .map(|p| Position {
                side: PositionSide::from_exchange(&p.side),
                symbol: p.symbol,
                entry_price: p.avg_price,
                mark_price: p.mark_price,
                size: p.size,
            })
            .collect())
    }

    /// USDT equity of the unified trading account.
    pub async fn get_usdt_equity(&self) -> GatewayResult<Decimal> {
        let result: ListResult<WalletAccount> = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED&coin=USDT")
            .await?;

        result
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|c| c.coin == "USDT")
            .map(|c| c.equity)
            .ok_or_else(|| GatewayError::Exchange("no USDT balance in wallet".to_string()))
    }

    /// Set symmetric leverage; "not modified" counts as success.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let body = SetLeverageRequest {
            category: CATEGORY,
            symbol: symbol.to_string(),
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        };

        match self
            .signed_post::<_, serde_json::Value>("/v5/position/set-leverage", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::BadRequest(msg))
                if msg.starts_with(&ret_code::LEVERAGE_NOT_MODIFIED.to_string()) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> GatewayResult<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "GET");

        let resp = self.http.get(&url).send().await?;
        Self::parse_response(resp).await
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> GatewayResult<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "Signed GET");

        let headers = self.auth_headers(query)?;
        let resp = self.http.get(&url).headers(headers).send().await?;
        Self::parse_response(resp).await
    }

    async fn signed_post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let payload = serde_json::to_string(body)
            .map_err(|e| GatewayError::BadRequest(format!("failed to encode body: {e}")))?;
        debug!(url = %url, body = %payload, "Signed POST");

        let mut headers = self.auth_headers(&payload)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .body(payload)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    /// Build the X-BAPI-* headers for a payload (query string or JSON body).
    fn auth_headers(&self, payload: &str) -> GatewayResult<HeaderMap> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GatewayError::Exchange(format!("clock error: {e}")))?
            .as_millis()
            .to_string();
        let recv_window = self.recv_window_ms.to_string();
        let signature = sign(&self.api_secret, &timestamp, &self.api_key, &recv_window, payload)?;

        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("x-bapi-api-key", self.api_key.as_str()),
            ("x-bapi-timestamp", timestamp.as_str()),
            ("x-bapi-recv-window", recv_window.as_str()),
            ("x-bapi-sign", signature.as_str()),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::BadRequest(format!("invalid header {name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> GatewayResult<T> {
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Network(format!("HTTP {status}: {text}")));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Exchange(format!("malformed response: {e}: {text}")))?;

        if envelope.ret_code != ret_code::OK {
            return Err(classify_ret_code(envelope.ret_code, &envelope.ret_msg));
        }

        envelope
            .result
            .ok_or_else(|| GatewayError::Exchange("response missing result".to_string()))
    }
}

/// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, hex encoded.
fn sign(
    secret: &str,
    timestamp: &str,
    api_key: &str,
    recv_window: &str,
    payload: &str,
) -> GatewayResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::BadRequest(format!("invalid API secret: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Map a non-zero Bybit retCode to our error taxonomy.
fn classify_ret_code(code: i64, msg: &str) -> GatewayError {
    let detail = format!("{code} {msg}");
    match code {
        ret_code::INSUFFICIENT_AB
        | ret_code::INSUFFICIENT_ORDER_COST
        | ret_code::INSUFFICIENT_AVAILABLE => GatewayError::InsufficientFunds(detail),
        ret_code::PARAMS_ERROR | ret_code::LEVERAGE_NOT_MODIFIED => {
            GatewayError::BadRequest(detail)
        }
        110000..=119999 => GatewayError::BadRequest(detail),
        _ => GatewayError::Exchange(detail),
    }
}

fn parse_kline_row(row: &[String]) -> GatewayResult<Candle> {
    if row.len() < 6 {
        return Err(GatewayError::Exchange(format!("short kline row: {row:?}")));
    }

    let num = |i: usize| -> GatewayResult<f64> {
        row[i]
            .parse::<f64>()
            .map_err(|e| GatewayError::Exchange(format!("bad kline field {:?}: {e}", row[i])))
    };

    let open_time = row[0]
        .parse::<i64>()
        .map_err(|e| GatewayError::Exchange(format!("bad kline time {:?}: {e}", row[0])))?;

    Ok(Candle::new(open_time, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?))
}

fn cancel_all_body(symbol: &str) -> CancelAllRequest {
    CancelAllRequest {
        category: CATEGORY,
        symbol: symbol.to_string(),
        order_filter: ORDER_FILTER_PLAIN,
    }
}

fn new_order_link_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
