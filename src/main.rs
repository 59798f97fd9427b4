//! Bybit Perpetual Trailing Bot
//!
//! Places volatility-banded limit entries around the mark price and
//! manages open positions with a tiered trailing stop.

mod api;
mod bot;
mod config;
mod models;
mod setup;
mod trading;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::api::{BybitClient, LiveGateway, TelegramNotifier};
use crate::bot::{StrategyBot, TrailBot};
use crate::config::AppConfig;
use crate::setup::SetupCredentials;

/// Bybit perpetual-futures entry and trailing-stop bot CLI.
#[derive(Parser)]
#[command(name = "trailbot")]
#[command(about = "Volatility-banded entries and tiered trailing stops on Bybit", long_about = None)]
struct Cli {
    /// Directory holding exchange/strategy/trailing config files
    #[arg(short, long, default_value = "configs")]
    config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the entry-order strategy loop
    Strategy,

    /// Run the trailing-stop position monitor
    Trail,

    /// Show the effective configuration (secrets redacted)
    Config,

    /// Create the config directory from `configs.template`
    Setup {
        /// Bybit API key to write into exchange_config.json
        #[arg(long)]
        api_key: Option<String>,

        /// Bybit API secret to write into exchange_config.json
        #[arg(long)]
        api_secret: Option<String>,

        /// Enable demo trading
        #[arg(long)]
        demo: bool,

        /// Directory containing `configs.template`
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

/// Directory holding the per-loop debug logs.
const LOG_DIR: &str = "logs";

impl Commands {
    /// Debug log file written by the long-running loops.
    fn log_file(&self) -> Option<&'static str> {
        match self {
            Commands::Strategy => Some("strategy_log.txt"),
            Commands::Trail => Some("trail_log.txt"),
            Commands::Config | Commands::Setup { .. } => None,
        }
    }
}

/// Create `dir` if needed and open `name` inside it, truncating any
/// previous run's log.
fn open_log_file(dir: &Path, name: &str) -> Result<File> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(name);
    File::create(&path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Install the stdout layer at `level` and, when `log_file` is set, a DEBUG
/// file layer under [`LOG_DIR`].
///
/// The returned guard flushes the file writer on drop and must be held
/// until the process exits.
fn init_logging(level: Level, log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_filter(LevelFilter::from_level(level));

    let (file_layer, guard) = match log_file {
        Some(name) => {
            let file = open_log_file(Path::new(LOG_DIR), name)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Build the live gateway from the loaded configuration.
fn live_gateway(config: &AppConfig) -> Result<Arc<LiveGateway>> {
    let exchange = &config.exchange;
    if !exchange.has_credentials() {
        bail!("Bybit API key and secret are required (exchange_config.json or BYBIT_API_KEY / BYBIT_API_SECRET)");
    }

    let client = BybitClient::new(
        &exchange.api.bybit.api_key,
        &exchange.api.bybit.secret,
        exchange.base_url(),
        exchange.recv_window_ms,
    )?;

    let notifier = TelegramNotifier::from_parts(&exchange.api.telegram.key, &exchange.api.telegram.chat_id)
        .transpose()
        .context("Failed to create Telegram notifier")?;
    if notifier.is_none() {
        info!("Telegram not configured, notifications will only be logged");
    }

    info!(environment = exchange.environment(), url = client.base_url(), "Exchange client ready");
    Ok(Arc::new(LiveGateway::new(client, notifier)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let _log_guard = init_logging(log_level, cli.command.log_file())?;

    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Setup {
            api_key,
            api_secret,
            demo,
            root,
        } => {
            let credentials = SetupCredentials {
                api_key,
                api_secret,
                demo_trade: demo,
            };
            let config_dir = setup::run_setup(&root, &credentials)?;
            println!("Configuration ready in {}", config_dir.display());
        }

        Commands::Config => {
            let config = AppConfig::load(&cli.config_dir)?;
            println!("\n{}\n", config);
        }

        Commands::Strategy => {
            let config = AppConfig::load(&cli.config_dir)?;
            if config.strategy.trading_pairs.is_empty() {
                bail!("No trading pairs configured in strategy_config.json");
            }

            let gateway = live_gateway(&config)?;
            let mut bot = StrategyBot::new(gateway, &config)?;
            bot.shutdown_handle().listen_for_ctrl_c();

            println!("\n=== Strategy Bot ===");
            println!("Environment: {}", config.exchange.environment());
            println!("Pairs:       {}", config.strategy.trading_pairs.len());
            println!("Interval:    {}s", config.strategy.monitor_interval);
            println!("\nPress Ctrl+C to stop.\n");

            let summary = bot.run().await?;
            println!("\n{}", summary);
        }

        Commands::Trail => {
            let config = AppConfig::load(&cli.config_dir)?;
            let gateway = live_gateway(&config)?;
            let mut bot = TrailBot::new(gateway, &config)?;
            bot.shutdown_handle().listen_for_ctrl_c();

            println!("\n=== Trailing Monitor ===");
            println!("Environment: {}", config.exchange.environment());
            println!("Interval:    {}s", config.trailing.monitor_interval);
            println!("\nPress Ctrl+C to stop.\n");

            let summary = bot.run().await?;
            println!("\n{}", summary);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_loops_write_log_files() {
        assert_eq!(Commands::Strategy.log_file(), Some("strategy_log.txt"));
        assert_eq!(Commands::Trail.log_file(), Some("trail_log.txt"));
        assert_eq!(Commands::Config.log_file(), None);

        let setup = Commands::Setup {
            api_key: None,
            api_secret: None,
            demo: false,
            root: PathBuf::from("."),
        };
        assert_eq!(setup.log_file(), None);
    }

    #[test]
    fn test_log_file_is_truncated_each_run() {
        let dir = std::env::temp_dir().join(format!("trailbot-logs-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        open_log_file(&dir, "trail_log.txt").unwrap();
        assert!(dir.join("trail_log.txt").is_file());
        fs::write(dir.join("trail_log.txt"), "previous run").unwrap();

        open_log_file(&dir, "trail_log.txt").unwrap();
        assert_eq!(fs::read_to_string(dir.join("trail_log.txt")).unwrap(), "");

        fs::remove_dir_all(&dir).ok();
    }
}
