//! Application configuration.
//!
//! Three JSON files under the config directory, one section each:
//! - `exchange_config.json`: credentials, environment, leverage
//! - `strategy_config.json`: trading pairs and entry cadence
//! - `trailing_config.json`: trailing-stop thresholds and blacklist
//!
//! Credentials may be overridden from the environment (or a `.env` file):
//! `BYBIT_API_KEY`, `BYBIT_API_SECRET`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::{DEMO_URL, MAINNET_URL, TESTNET_URL};
use crate::trading::{ConfigError, StrategyConfig, TrailingConfig};

pub const EXCHANGE_FILE: &str = "exchange_config.json";
pub const STRATEGY_FILE: &str = "strategy_config.json";
pub const TRAILING_FILE: &str = "trailing_config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BybitCredentials {
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramCredentials {
    /// Bot token
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default)]
    pub bybit: BybitCredentials,
    #[serde(default)]
    pub telegram: TelegramCredentials,
}

fn default_leverage() -> u32 {
    10
}

fn default_recv_window() -> u64 {
    5000
}

/// Exchange section (`exchange_config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api: ApiSection,

    /// Trade against Bybit's demo environment
    #[serde(default)]
    pub demo_trade: bool,

    #[serde(default)]
    pub testnet: bool,

    /// Leverage applied to every configured pair at startup
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api: ApiSection::default(),
            demo_trade: false,
            testnet: false,
            leverage: default_leverage(),
            recv_window_ms: default_recv_window(),
        }
    }
}

impl ExchangeConfig {
    /// REST endpoint for the selected environment. Demo wins over testnet.
    pub fn base_url(&self) -> &'static str {
        if self.demo_trade {
            DEMO_URL
        } else if self.testnet {
            TESTNET_URL
        } else {
            MAINNET_URL
        }
    }

    pub fn environment(&self) -> &'static str {
        if self.demo_trade {
            "demo"
        } else if self.testnet {
            "testnet"
        } else {
            "mainnet"
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leverage < 1 {
            return Err(ConfigError::new("leverage", "must be at least 1"));
        }
        if self.recv_window_ms == 0 {
            return Err(ConfigError::new("recv_window_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.api.bybit.api_key.trim().is_empty() && !self.api.bybit.secret.trim().is_empty()
    }
}

/// Full, immutable application configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub strategy: StrategyConfig,
    pub trailing: TrailingConfig,
}

impl AppConfig {
    /// Load all three files from `dir`, apply environment overrides, validate.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let mut config = Self {
            exchange: read_json(&dir.join(EXCHANGE_FILE))?,
            strategy: read_json(&dir.join(STRATEGY_FILE))?,
            trailing: read_json(&dir.join(TRAILING_FILE))?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Replace credentials with non-empty values from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let api = &mut self.exchange.api;
        let targets: [(&str, &mut String); 4] = [
            ("BYBIT_API_KEY", &mut api.bybit.api_key),
            ("BYBIT_API_SECRET", &mut api.bybit.secret),
            ("TELEGRAM_BOT_TOKEN", &mut api.telegram.key),
            ("TELEGRAM_CHAT_ID", &mut api.telegram.chat_id),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.exchange.validate()?;
        self.strategy.validate()?;
        self.trailing.validate()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Show the first and last two characters of a secret.
fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => "(not set)".to_string(),
        n if n <= 6 => "****".to_string(),
        n => format!(
            "{}****{}",
            chars[..2].iter().collect::<String>(),
            chars[n - 2..].iter().collect::<String>()
        ),
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ex = &self.exchange;
        writeln!(f, "=== Exchange ===")?;
        writeln!(f, "  Environment:     {} ({})", ex.environment(), ex.base_url())?;
        writeln!(f, "  API key:         {}", redact(&ex.api.bybit.api_key))?;
        writeln!(f, "  API secret:      {}", redact(&ex.api.bybit.secret))?;
        writeln!(f, "  Telegram token:  {}", redact(&ex.api.telegram.key))?;
        writeln!(f, "  Telegram chat:   {}", redact(&ex.api.telegram.chat_id))?;
        writeln!(f, "  Leverage:        {}x", ex.leverage)?;

        let st = &self.strategy;
        writeln!(f, "\n=== Strategy ===")?;
        writeln!(f, "  Interval:        {}s", st.monitor_interval)?;
        writeln!(f, "  Kline interval:  {}", st.kline_interval)?;
        writeln!(f, "  Commission:      {}", st.commission_rate)?;
        writeln!(f, "  Price retries:   {}", st.price_retry_attempts)?;
        writeln!(
            f,
            "\n  {:<14} {:>6} {:>10} {:>10} {:>10}",
            "PAIR", "EMA", "MULT", "LONG", "SHORT"
        )?;
        for (symbol, pair) in &st.trading_pairs {
            writeln!(
                f,
                "  {:<14} {:>6} {:>10} {:>10} {:>10}",
                symbol,
                pair.ema_period,
                pair.value_multiplier,
                pair.long_amount_usdt,
                pair.short_amount_usdt
            )?;
        }

        let tr = &self.trailing;
        let t = &tr.thresholds;
        writeln!(f, "\n=== Trailing ===")?;
        writeln!(f, "  Interval:        {}s", tr.monitor_interval)?;
        writeln!(f, "  Stop loss:       -{}%", t.stop_loss_pct)?;
        writeln!(
            f,
            "  Tier 0:          arm at {}%, floor {}%",
            t.low_trail_enable_threshold, t.low_trail_stop_loss_pct
        )?;
        writeln!(
            f,
            "  Tier 1:          arm at {}%, retrace {}",
            t.first_trail_enable_threshold, t.trail_stop_loss_pct
        )?;
        writeln!(
            f,
            "  Tier 2:          arm at {}%, retrace {}",
            t.second_trail_enable_threshold, t.higher_trail_stop_loss_pct
        )?;
        let blacklist: Vec<&str> = tr.blacklist.iter().map(String::as_str).collect();
        write!(
            f,
            "  Blacklist:       {}",
            if blacklist.is_empty() { "(none)".to_string() } else { blacklist.join(", ") }
        )
    }
}
