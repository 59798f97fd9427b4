//! Scriptable in-memory gateway for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Candle, InstrumentInfo, OrderSide, Position};

use super::gateway::{Gateway, GatewayError, GatewayResult};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CancelAll(String),
    Place {
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
    },
    Close {
        symbol: String,
        quantity: Decimal,
        side: OrderSide,
    },
    SetLeverage(String, u32),
    Notify(String),
}

#[derive(Default)]
struct MockState {
    candles: HashMap<String, Vec<Candle>>,
    prices: HashMap<String, Decimal>,
    instruments: HashMap<String, InstrumentInfo>,
    positions: Vec<Position>,
    balance: Decimal,
    price_timeouts: HashMap<String, u32>,
    price_fetches: HashMap<String, u32>,
    failing_places: HashSet<String>,
    failing_closes: HashSet<String>,
    positions_fail: bool,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_market(self, symbol: &str, price: Decimal, candles: Vec<Candle>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.prices.insert(symbol.to_string(), price);
            state.candles.insert(symbol.to_string(), candles);
            state.instruments.insert(
                symbol.to_string(),
                InstrumentInfo {
                    symbol: symbol.to_string(),
                    tick_size: dec!(0.01),
                    min_order_qty: dec!(0.001),
                },
            );
        }
        self
    }

    pub fn set_instrument(&self, info: InstrumentInfo) {
        self.state.lock().unwrap().instruments.insert(info.symbol.clone(), info);
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().unwrap().positions = positions;
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().unwrap().balance = balance;
    }

    /// Make the next `n` price fetches for `symbol` time out.
    pub fn time_out_prices(&self, symbol: &str, n: u32) {
        self.state.lock().unwrap().price_timeouts.insert(symbol.to_string(), n);
    }

    pub fn fail_places(&self, symbol: &str) {
        self.state.lock().unwrap().failing_places.insert(symbol.to_string());
    }

    pub fn fail_closes(&self, symbol: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.failing_closes.insert(symbol.to_string());
        } else {
            state.failing_closes.remove(symbol);
        }
    }

    pub fn fail_positions(&self, fail: bool) {
        self.state.lock().unwrap().positions_fail = fail;
    }

    pub fn price_fetches(&self, symbol: &str) -> u32 {
        self.state.lock().unwrap().price_fetches.get(symbol).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn places(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Place { .. }))
            .collect()
    }

    pub fn closes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Close { .. }))
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Notify(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> GatewayResult<Vec<Candle>> {
        let state = self.state.lock().unwrap();
        let candles = state
            .candles
            .get(symbol)
            .ok_or_else(|| GatewayError::Network(format!("no candles for {symbol}")))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn fetch_mark_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let mut state = self.state.lock().unwrap();
        *state.price_fetches.entry(symbol.to_string()).or_insert(0) += 1;

        if let Some(remaining) = state.price_timeouts.get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GatewayError::Timeout(format!("ticker {symbol}")));
            }
        }

        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::Network(format!("no price for {symbol}")))
    }

    async fn fetch_instrument(&self, symbol: &str) -> GatewayResult<InstrumentInfo> {
        self.state
            .lock()
            .unwrap()
            .instruments
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::BadRequest(format!("unknown instrument {symbol}")))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> GatewayResult<()> {
        self.state.lock().unwrap().calls.push(Call::CancelAll(symbol.to_string()));
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
    ) -> GatewayResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.failing_places.contains(symbol) {
            return Err(GatewayError::InsufficientFunds(format!("{symbol} rejected")));
        }
        state.calls.push(Call::Place {
            symbol: symbol.to_string(),
            price,
            quantity,
            side,
        });
        Ok(format!("order-{}", state.calls.len()))
    }

    async fn fetch_positions(&self) -> GatewayResult<Vec<Position>> {
        let state = self.state.lock().unwrap();
        if state.positions_fail {
            return Err(GatewayError::Network("positions unavailable".to_string()));
        }
        Ok(state.positions.clone())
    }

    async fn close_position(
        &self,
        symbol: &str,
        quantity: Decimal,
        side: OrderSide,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_closes.contains(symbol) {
            return Err(GatewayError::Exchange(format!("{symbol} close rejected")));
        }
        state.calls.push(Call::Close {
            symbol: symbol.to_string(),
            quantity,
            side,
        });
        // A filled reduce-only market order flattens the position
        state.positions.retain(|p| p.symbol != symbol);
        Ok(())
    }

    async fn fetch_balance(&self) -> GatewayResult<Decimal> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::SetLeverage(symbol.to_string(), leverage));
        Ok(())
    }

    async fn notify(&self, message: &str) {
        self.state.lock().unwrap().calls.push(Call::Notify(message.to_string()));
    }
}
