//! Trading core: indicators, sizing, entry signals, trailing-stop exits.

pub mod config;
pub mod indicators;
mod position_sizer;
mod signal;
mod trailing_stop;

pub use config::{ConfigError, StrategyConfig, TrailingConfig};
pub use signal::SignalEngine;
pub use trailing_stop::{TrailMonitor, TrailingStop};
