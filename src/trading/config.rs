//! Strategy and trailing-stop configuration.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value that would make the engine misbehave.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid config `{field}`: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Longest EMA period whose candle window fits in one kline request.
pub const MAX_EMA_PERIOD: usize = 999;

fn default_ema_period() -> usize {
    240
}

fn default_value_multiplier() -> f64 {
    2.0
}

fn default_amount_usdt() -> Decimal {
    dec!(20)
}

/// Per-symbol entry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairConfig {
    /// EMA trend filter period; 0 disables the filter (both directions active)
    #[serde(default = "default_ema_period", alias = "ema")]
    pub ema_period: usize,

    /// Scales the volatility offset between mark price and entry price
    #[serde(default = "default_value_multiplier")]
    pub value_multiplier: f64,

    /// Notional for the long entry (USDT)
    #[serde(default = "default_amount_usdt")]
    pub long_amount_usdt: Decimal,

    /// Notional for the short entry (USDT)
    #[serde(default = "default_amount_usdt")]
    pub short_amount_usdt: Decimal,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            ema_period: default_ema_period(),
            value_multiplier: default_value_multiplier(),
            long_amount_usdt: default_amount_usdt(),
            short_amount_usdt: default_amount_usdt(),
        }
    }
}

impl PairConfig {
    pub fn validate(&self, symbol: &str) -> Result<(), ConfigError> {
        if self.ema_period > MAX_EMA_PERIOD {
            return Err(ConfigError::new(
                format!("trading_pairs.{symbol}.ema_period"),
                format!("must not exceed {MAX_EMA_PERIOD}"),
            ));
        }
        if !(self.value_multiplier.is_finite() && self.value_multiplier > 0.0) {
            return Err(ConfigError::new(
                format!("trading_pairs.{symbol}.value_multiplier"),
                "must be a positive number",
            ));
        }
        if self.long_amount_usdt < Decimal::ZERO {
            return Err(ConfigError::new(
                format!("trading_pairs.{symbol}.long_amount_usdt"),
                "must not be negative",
            ));
        }
        if self.short_amount_usdt < Decimal::ZERO {
            return Err(ConfigError::new(
                format!("trading_pairs.{symbol}.short_amount_usdt"),
                "must not be negative",
            ));
        }
        Ok(())
    }
}

fn default_strategy_interval() -> f64 {
    60.0
}

fn default_commission_rate() -> Decimal {
    dec!(0.0002)
}

fn default_kline_interval() -> String {
    "1".to_string()
}

fn default_price_retry_attempts() -> u32 {
    3
}

/// Entry-order strategy configuration (`strategy_config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Symbol → pair settings
    #[serde(default)]
    pub trading_pairs: BTreeMap<String, PairConfig>,

    /// Seconds between order refresh cycles
    #[serde(default = "default_strategy_interval")]
    pub monitor_interval: f64,

    /// Taker/maker commission used when sizing orders
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,

    /// Kline interval passed to the exchange ("1" = one minute)
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,

    /// Retries for a timed-out price fetch before skipping the pair
    #[serde(default = "default_price_retry_attempts")]
    pub price_retry_attempts: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            trading_pairs: BTreeMap::new(),
            monitor_interval: default_strategy_interval(),
            commission_rate: default_commission_rate(),
            kline_interval: default_kline_interval(),
            price_retry_attempts: default_price_retry_attempts(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.monitor_interval.is_finite() && self.monitor_interval > 0.0) {
            return Err(ConfigError::new("monitor_interval", "must be positive"));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(ConfigError::new("commission_rate", "must be in [0, 1)"));
        }
        if self.kline_interval.trim().is_empty() {
            return Err(ConfigError::new("kline_interval", "must not be empty"));
        }
        for (symbol, pair) in &self.trading_pairs {
            pair.validate(symbol)?;
        }
        Ok(())
    }
}

/// Trailing-stop thresholds. All values are percentages except the
/// retracement fractions (`trail_stop_loss_pct`, `higher_trail_stop_loss_pct`),
/// which are fractions of the peak profit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Hard stop: close when profit ≤ -stop_loss_pct
    pub stop_loss_pct: f64,

    /// Peak profit that arms tier 0
    pub low_trail_enable_threshold: f64,

    /// Tier 0 closes when profit falls back to this absolute level
    pub low_trail_stop_loss_pct: f64,

    /// Peak profit that arms tier 1
    pub first_trail_enable_threshold: f64,

    /// Tier 1 allowed retracement from peak
    pub trail_stop_loss_pct: f64,

    /// Peak profit that arms tier 2
    pub second_trail_enable_threshold: f64,

    /// Tier 2 allowed retracement from peak
    pub higher_trail_stop_loss_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            stop_loss_pct: 5.0,
            low_trail_enable_threshold: 0.3,
            low_trail_stop_loss_pct: 0.2,
            first_trail_enable_threshold: 1.0,
            trail_stop_loss_pct: 0.2,
            second_trail_enable_threshold: 3.0,
            higher_trail_stop_loss_pct: 0.25,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("stop_loss_pct", self.stop_loss_pct),
            ("low_trail_enable_threshold", self.low_trail_enable_threshold),
            ("low_trail_stop_loss_pct", self.low_trail_stop_loss_pct),
            ("first_trail_enable_threshold", self.first_trail_enable_threshold),
            ("trail_stop_loss_pct", self.trail_stop_loss_pct),
            ("second_trail_enable_threshold", self.second_trail_enable_threshold),
            ("higher_trail_stop_loss_pct", self.higher_trail_stop_loss_pct),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::new(field, "must be a finite number"));
            }
        }

        if self.stop_loss_pct < 0.0 {
            return Err(ConfigError::new("stop_loss_pct", "must not be negative"));
        }
        for (field, value) in [
            ("trail_stop_loss_pct", self.trail_stop_loss_pct),
            ("higher_trail_stop_loss_pct", self.higher_trail_stop_loss_pct),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::new(field, "retracement must be a fraction in [0, 1]"));
            }
        }
        if self.low_trail_enable_threshold > self.first_trail_enable_threshold {
            return Err(ConfigError::new(
                "low_trail_enable_threshold",
                "must not exceed first_trail_enable_threshold",
            ));
        }
        if self.first_trail_enable_threshold > self.second_trail_enable_threshold {
            return Err(ConfigError::new(
                "first_trail_enable_threshold",
                "must not exceed second_trail_enable_threshold",
            ));
        }
        Ok(())
    }
}

fn default_trailing_interval() -> f64 {
    5.0
}

/// Trailing monitor configuration (`trailing_config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    #[serde(flatten)]
    pub thresholds: Thresholds,

    /// Seconds between monitoring cycles
    #[serde(default = "default_trailing_interval")]
    pub monitor_interval: f64,

    /// Symbols never managed by the trailing monitor
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            monitor_interval: default_trailing_interval(),
            blacklist: BTreeSet::new(),
        }
    }
}

impl TrailingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.monitor_interval.is_finite() && self.monitor_interval > 0.0) {
            return Err(ConfigError::new("monitor_interval", "must be positive"));
        }
        self.thresholds.validate()
    }
}
