//! Signal engine: trend filter plus volatility-scaled entry bands.
//!
//! Each cycle, per configured pair:
//! - fetch mark price (bounded retry on timeout) and a candle window
//! - gate long/short entries with an EMA trend filter
//! - offset entry prices from mark by the blended ATR ratio / amplitude
//! - cancel every resting order and place fresh limit entries
//!
//! Full cancel-and-replace keeps resting orders inside the current
//! volatility band. A failure on one pair never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{Gateway, GatewayError};
use crate::models::{closes, Candle, OrderSide};

use super::config::{PairConfig, StrategyConfig};
use super::indicators::{self, IndicatorError};
use super::position_sizer::PositionSizer;

/// Lookback for ATR and average amplitude.
pub const VOLATILITY_PERIOD: usize = 60;

/// Errors that make a pair skip the current cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid mark price {0}")]
    InvalidPrice(Decimal),

    #[error("non-finite offset {0}")]
    NonFiniteOffset(f64),
}

/// Which entries the trend filter allows this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    Both,
    None,
}

impl Direction {
    fn from_flags(long: bool, short: bool) -> Self {
        match (long, short) {
            (true, true) => Direction::Both,
            (true, false) => Direction::Long,
            (false, true) => Direction::Short,
            (false, false) => Direction::None,
        }
    }

    pub fn long_active(&self) -> bool {
        matches!(self, Direction::Long | Direction::Both)
    }

    pub fn short_active(&self) -> bool {
        matches!(self, Direction::Short | Direction::Both)
    }
}

/// A single resting entry to request.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryTarget {
    pub side: OrderSide,
    pub target_price: Decimal,
    pub order_amount_usdt: Decimal,
}

/// Output of one signal computation. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalResult {
    pub symbol: String,
    pub direction: Direction,
    pub offset_pct: f64,
    pub target_long: Decimal,
    pub target_short: Decimal,
    pub long_amount_usdt: Decimal,
    pub short_amount_usdt: Decimal,
}

impl SignalResult {
    /// Entries for the active directions, long first.
    pub fn entries(&self) -> Vec<EntryTarget> {
        let mut entries = Vec::with_capacity(2);
        if self.direction.long_active() {
            entries.push(EntryTarget {
                side: OrderSide::Buy,
                target_price: self.target_long,
                order_amount_usdt: self.long_amount_usdt,
            });
        }
        if self.direction.short_active() {
            entries.push(EntryTarget {
                side: OrderSide::Sell,
                target_price: self.target_short,
                order_amount_usdt: self.short_amount_usdt,
            });
        }
        entries
    }
}

/// Candles needed for a pair: enough for the EMA and the volatility window, plus the current bar.
pub fn candle_limit(pair: &PairConfig) -> usize {
    pair.ema_period.max(VOLATILITY_PERIOD) + 1
}

/// Trend direction from the EMA filter. `ema_period == 0` disables the filter.
pub fn trend_direction(close_prices: &[f64], ema_period: usize) -> Result<Direction, IndicatorError> {
    if ema_period == 0 {
        return Ok(Direction::Both);
    }

    let ema_value = indicators::ema(close_prices, ema_period)?;
    let last = *close_prices
        .last()
        .ok_or(IndicatorError::InsufficientData { needed: 1, got: 0 })?;

    Ok(Direction::from_flags(last > ema_value, last < ema_value))
}

/// `(avg_amplitude + atr_ratio) / 2 * value_multiplier`, in percent.
pub fn offset_pct(avg_amplitude: f64, atr_ratio: f64, value_multiplier: f64) -> f64 {
    (avg_amplitude + atr_ratio) / 2.0 * value_multiplier
}

/// Compute the entry signal for one pair from its mark price and candle window.
pub fn compute_signal(
    symbol: &str,
    pair: &PairConfig,
    mark_price: Decimal,
    candles: &[Candle],
) -> Result<SignalResult, SignalError> {
    if mark_price <= Decimal::ZERO {
        return Err(SignalError::InvalidPrice(mark_price));
    }

    let needed = candle_limit(pair);
    if candles.len() < needed {
        return Err(IndicatorError::InsufficientData {
            needed,
            got: candles.len(),
        }
        .into());
    }

    let close_prices = closes(candles);
    let direction = trend_direction(&close_prices, pair.ema_period)?;

    let mark = mark_price
        .to_f64()
        .ok_or(SignalError::InvalidPrice(mark_price))?;
    let atr_ratio = indicators::atr(candles, VOLATILITY_PERIOD)? / mark * 100.0;
    let avg_amplitude = indicators::average_amplitude(candles, VOLATILITY_PERIOD)?;

    let offset = offset_pct(avg_amplitude, atr_ratio, pair.value_multiplier);
    let offset_fraction = Decimal::from_f64(offset)
        .ok_or(SignalError::NonFiniteOffset(offset))?
        / Decimal::ONE_HUNDRED;

    debug!(
        symbol = %symbol,
        atr_ratio = atr_ratio,
        avg_amplitude = avg_amplitude,
        offset_pct = offset,
        direction = ?direction,
        "Signal computed"
    );

    Ok(SignalResult {
        symbol: symbol.to_string(),
        direction,
        offset_pct: offset,
        target_long: mark_price * (Decimal::ONE - offset_fraction),
        target_short: mark_price * (Decimal::ONE + offset_fraction),
        long_amount_usdt: pair.long_amount_usdt,
        short_amount_usdt: pair.short_amount_usdt,
    })
}

/// Summary of one refresh cycle across all pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pairs_processed: usize,
    pub pairs_skipped: usize,
    pub orders_placed: usize,
}

/// Drives order refresh for all configured pairs through a [`Gateway`].
pub struct SignalEngine<G: Gateway> {
    gateway: Arc<G>,
    config: StrategyConfig,
    sizer: PositionSizer,
    retry_initial: Duration,
}

impl<G: Gateway> SignalEngine<G> {
    pub fn new(gateway: Arc<G>, config: StrategyConfig, leverage: u32) -> Self {
        let sizer = PositionSizer::new(config.commission_rate, leverage);
        Self {
            gateway,
            config,
            sizer,
            retry_initial: Duration::from_millis(500),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Refresh resting orders for every configured pair, sequentially.
    pub async fn refresh_all(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (symbol, pair) in &self.config.trading_pairs {
            match self.process_pair(symbol, pair).await {
                Ok(placed) => {
                    report.pairs_processed += 1;
                    report.orders_placed += placed;
                }
                Err(e) => {
                    report.pairs_skipped += 1;
                    warn!(symbol = %symbol, error = %e, "Skipping pair this cycle");
                }
            }
        }

        report
    }

    /// One cycle for one pair. Returns the number of orders placed.
    pub async fn process_pair(&self, symbol: &str, pair: &PairConfig) -> Result<usize, SignalError> {
        let mark_price = self.fetch_mark_price(symbol).await?;
        let candles = self
            .gateway
            .fetch_candles(symbol, &self.config.kline_interval, candle_limit(pair))
            .await?;

        let signal = compute_signal(symbol, pair, mark_price, &candles)?;

        self.cancel_pair(symbol).await;

        let mut placed = 0;
        for entry in signal.entries() {
            match entry.side {
                OrderSide::Buy => info!(symbol = %symbol, "Uptrend confirmed, placing long entry"),
                OrderSide::Sell => info!(symbol = %symbol, "Downtrend confirmed, placing short entry"),
            }
            match self.place_entry(symbol, &entry).await {
                Ok(Some(order_id)) => {
                    placed += 1;
                    info!(symbol = %symbol, order_id = %order_id, side = %entry.side, "Order placed");
                }
                Ok(None) => {}
                Err(GatewayError::InsufficientFunds(msg)) => {
                    error!(symbol = %symbol, side = %entry.side, reason = %msg, "Insufficient margin, order not placed");
                }
                Err(e) => {
                    error!(symbol = %symbol, side = %entry.side, error = %e, "Order placement failed");
                }
            }
        }

        Ok(placed)
    }

    /// Size and submit one entry. `Ok(None)` means it was too small to place.
    async fn place_entry(
        &self,
        symbol: &str,
        entry: &EntryTarget,
    ) -> Result<Option<String>, GatewayError> {
        let instrument = self.gateway.fetch_instrument(symbol).await?;

        let price = indicators::round_price_to_tick(entry.target_price, instrument.tick_size)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        let quantity = self
            .sizer
            .size(price, entry.order_amount_usdt, instrument.min_order_qty);

        if quantity.is_zero() {
            info!(
                symbol = %symbol,
                side = %entry.side,
                amount_usdt = %entry.order_amount_usdt,
                "Order notional below one tradable unit, increase the order amount"
            );
            return Ok(None);
        }

        info!(
            symbol = %symbol,
            side = %entry.side,
            price = %price,
            quantity = %quantity,
            "Submitting limit entry"
        );

        self.gateway
            .place_order(symbol, price, quantity, entry.side)
            .await
            .map(Some)
    }

    /// Mark price, retrying timeouts with exponential backoff up to the configured cap.
    async fn fetch_mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_initial)
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(None)
            .build();
        let mut attempt = 0;

        loop {
            match self.gateway.fetch_mark_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(e) if e.is_timeout() && attempt < self.config.price_retry_attempts => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.retry_initial);
                    warn!(
                        symbol = %symbol,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Price fetch timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cancel_pair(&self, symbol: &str) {
        if let Err(e) = self.gateway.cancel_all_orders(symbol).await {
            warn!(symbol = %symbol, error = %e, "Failed to cancel resting orders");
        }
    }

    /// Best-effort cancel of every configured pair's resting orders.
    pub async fn cancel_all(&self) {
        for symbol in self.config.trading_pairs.keys() {
            self.cancel_pair(symbol).await;
        }
    }
}
