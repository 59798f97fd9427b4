//! Gateway seam between the trading core and the outside world.
//!
//! The signal engine and trailing monitor only ever talk to a [`Gateway`];
//! the live implementation combines the Bybit REST client with the
//! Telegram notifier.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Candle, InstrumentInfo, OrderSide, Position};

use super::{BybitClient, TelegramNotifier};

/// Failures reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("notification failed: {0}")]
    Notify(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if e.is_decode() {
            GatewayError::Exchange(format!("malformed response: {e}"))
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Everything the trading core needs from the exchange and the operator.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Most recent `limit` candles, oldest first.
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, limit: usize)
        -> GatewayResult<Vec<Candle>>;

    async fn fetch_mark_price(&self, symbol: &str) -> GatewayResult<Decimal>;

    async fn fetch_instrument(&self, symbol: &str) -> GatewayResult<InstrumentInfo>;

    /// Cancel every resting order for `symbol`.
    async fn cancel_all_orders(&self, symbol: &str) -> GatewayResult<()>;

    /// Place a GTC limit order, returning the exchange order id.
    async fn place_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
    ) -> GatewayResult<String>;

    /// All open positions across the account.
    async fn fetch_positions(&self) -> GatewayResult<Vec<Position>>;

    /// Flatten `quantity` of `symbol` with a reduce-only market order.
    async fn close_position(&self, symbol: &str, quantity: Decimal, side: OrderSide)
        -> GatewayResult<()>;

    /// USDT account equity.
    async fn fetch_balance(&self) -> GatewayResult<Decimal>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;

    /// Fire-and-forget operator notification.
    async fn notify(&self, message: &str);
}

/// Live gateway backed by Bybit and (optionally) Telegram.
pub struct LiveGateway {
    exchange: BybitClient,
    notifier: Option<TelegramNotifier>,
}

impl LiveGateway {
    pub fn new(exchange: BybitClient, notifier: Option<TelegramNotifier>) -> Self {
        Self { exchange, notifier }
    }
}

#[async_trait]
impl Gateway for LiveGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> GatewayResult<Vec<Candle>> {
        self.exchange.get_klines(symbol, timeframe, limit).await
    }

    async fn fetch_mark_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        self.exchange.get_mark_price(symbol).await
    }

    async fn fetch_instrument(&self, symbol: &str) -> GatewayResult<InstrumentInfo> {
        self.exchange.get_instrument(symbol).await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> GatewayResult<()> {
        self.exchange.cancel_all_orders(symbol).await
    }

    async fn place_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
    ) -> GatewayResult<String> {
        self.exchange.limit_order(symbol, side, quantity, price).await
    }

    async fn fetch_positions(&self) -> GatewayResult<Vec<Position>> {
        self.exchange.get_positions().await
    }

    async fn close_position(
        &self,
        symbol: &str,
        quantity: Decimal,
        side: OrderSide,
    ) -> GatewayResult<()> {
        self.exchange
            .market_order(symbol, side, quantity, true)
            .await
            .map(|_| ())
    }

    async fn fetch_balance(&self) -> GatewayResult<Decimal> {
        self.exchange.get_usdt_equity().await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.exchange.set_leverage(symbol, leverage).await
    }

    async fn notify(&self, message: &str) {
        match &self.notifier {
            Some(notifier) => {
                if let Err(e) = notifier.send(message).await {
                    warn!(error = %e, "Failed to send notification");
                }
            }
            None => info!(message = %message, "Notification (telegram not configured)"),
        }
    }
}
