//! API response types for the Bybit v5 REST API.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Bybit sends numbers as strings and uses "" for "no value".
fn decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw.trim()).map_err(serde::de::Error::custom)
}

/// Common v5 response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// Generic `{"list": [...]}` result body.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

/// Kline result from /v5/market/kline.
///
/// Each row is `[startTime, open, high, low, close, volume, turnover]`,
/// all strings, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

/// Ticker entry from /v5/market/tickers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerEntry {
    pub symbol: String,
    pub mark_price: Decimal,
}

/// Instrument entry from /v5/market/instruments-info.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentEntry {
    pub symbol: String,
    pub price_filter: PriceFilter,
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub tick_size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub min_order_qty: Decimal,
}

/// Position entry from /v5/position/list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub symbol: String,
    /// "Buy", "Sell", or "" for an empty one-way position
    #[serde(default)]
    pub side: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub avg_price: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub mark_price: Decimal,
}

/// Account entry from /v5/account/wallet-balance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCoin {
    pub coin: String,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub equity: Decimal,
}

/// Result of /v5/order/create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
}

/// Request body for /v5/order/create.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub category: &'static str,
    pub symbol: String,
    pub side: &'static str,
    pub order_type: &'static str,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<&'static str>,
    pub reduce_only: bool,
    pub order_link_id: String,
}

/// Request body for /v5/order/cancel-all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAllRequest {
    pub category: &'static str,
    pub symbol: String,
    /// "Order" limits the sweep to plain orders, leaving conditional and TP/SL orders in place
    pub order_filter: &'static str,
}

/// Request body for /v5/position/set-leverage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub category: &'static str,
    pub symbol: String,
    pub buy_leverage: String,
    pub sell_leverage: String,
}
