//! Indicator library: EMA, ATR, average amplitude and tick rounding.
//!
//! All functions are pure and operate on oldest-first candle windows.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::models::Candle;

/// Errors from indicator computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("invalid period: {0}")]
    InvalidPeriod(usize),

    #[error("invalid tick size: {0}")]
    InvalidTick(Decimal),
}

/// Exponential moving average of `series`, returning the last value.
///
/// Seeded with the first observation (pandas `ewm(span, adjust=False)`):
///   ema[0] = x[0]
///   ema[i] = α·x[i] + (1−α)·ema[i−1]   where α = 2/(period+1)
pub fn ema(series: &[f64], period: usize) -> Result<f64, IndicatorError> {
    let (&first, rest) = series
        .split_first()
        .ok_or(IndicatorError::InsufficientData { needed: 1, got: 0 })?;

    let alpha = 2.0 / (period as f64 + 1.0);
    Ok(rest
        .iter()
        .fold(first, |prev, &x| alpha * x + (1.0 - alpha) * prev))
}

/// Average true range: arithmetic mean of the last `period` true ranges.
///
/// This is a plain mean, not Wilder smoothing. Needs `period + 1` candles
/// because the first candle only provides the previous close.
pub fn atr(klines: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod(period));
    }
    if klines.len() < period + 1 {
        return Err(IndicatorError::InsufficientData {
            needed: period + 1,
            got: klines.len(),
        });
    }

    let window = &klines[klines.len() - period - 1..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .sum();

    Ok(sum / period as f64)
}

/// Mean of `(high - low) / close * 100` over the last `period` candles.
pub fn average_amplitude(klines: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod(period));
    }
    if klines.len() < period {
        return Err(IndicatorError::InsufficientData {
            needed: period,
            got: klines.len(),
        });
    }

    let sum: f64 = klines[klines.len() - period..]
        .iter()
        .map(Candle::amplitude_pct)
        .sum();

    Ok(sum / period as f64)
}

/// Snap `price` to the nearest multiple of `tick_size`.
///
/// Ties go to the even multiple (banker's rounding), matching the exchange
/// reference implementation. The result carries exactly as many decimal
/// places as the normalized tick size, so `Display` prints it ready for the
/// wire (e.g. tick 0.50 → one decimal place).
pub fn round_price_to_tick(price: Decimal, tick_size: Decimal) -> Result<Decimal, IndicatorError> {
    if tick_size <= Decimal::ZERO {
        return Err(IndicatorError::InvalidTick(tick_size));
    }

    let tick = tick_size.normalize();
    let steps = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);

    let mut snapped = steps * tick;
    snapped.rescale(tick.scale());
    Ok(snapped)
}
