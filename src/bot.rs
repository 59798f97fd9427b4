//! Bot runners: the scheduling loops around the signal engine and the
//! trailing monitor.
//!
//! Both loops run one cycle, then wait `monitor_interval` seconds, until
//! Ctrl+C. Cycles never overlap. On shutdown the strategy bot cancels its
//! resting orders and reports run duration and profit.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::api::Gateway;
use crate::config::AppConfig;
use crate::trading::{SignalEngine, TrailMonitor, TrailingStop};

/// Shared stop flag; triggering it also wakes a sleeping loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `period` unless shutdown is triggered first.
    async fn wait(&self, period: Duration) {
        if self.is_triggered() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Trigger on Ctrl+C.
    pub fn listen_for_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.trigger();
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }
}

fn interval_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid monitor interval {secs}"))
}

/// Format a run duration as days, hours, minutes and seconds.
pub fn format_duration(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days} days, {hours} hours, {minutes} minutes, {seconds} seconds")
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub cycles: u64,
    pub initial_balance: Option<Decimal>,
    pub final_balance: Option<Decimal>,
}

impl RunSummary {
    /// Profit in USDT and percent of the starting equity.
    pub fn profit(&self) -> Option<(Decimal, Decimal)> {
        let (initial, last) = (self.initial_balance?, self.final_balance?);
        let profit = last - initial;
        if initial.is_zero() {
            return Some((profit, Decimal::ZERO));
        }
        Some((profit, (profit / initial * Decimal::ONE_HUNDRED).round_dp(2)))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(
            f,
            "Run time:        {}",
            format_duration(self.stopped_at - self.started_at)
        )?;
        write!(f, "Cycles:          {}", self.cycles)?;
        if let Some((profit, pct)) = self.profit() {
            write!(f, "\nTotal profit:    {:.4} USDT ({}%)", profit, pct)?;
        }
        Ok(())
    }
}

/// Periodically refreshes entry orders for all configured pairs.
pub struct StrategyBot<G: Gateway> {
    gateway: Arc<G>,
    engine: SignalEngine<G>,
    leverage: u32,
    interval: Duration,
    shutdown: Shutdown,
}

impl<G: Gateway> StrategyBot<G> {
    pub fn new(gateway: Arc<G>, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            engine: SignalEngine::new(gateway.clone(), config.strategy.clone(), config.exchange.leverage),
            gateway,
            leverage: config.exchange.leverage,
            interval: interval_from_secs(config.strategy.monitor_interval)?,
            shutdown: Shutdown::new(),
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Apply the configured leverage to every pair. Failures are logged only.
    async fn sync_leverage(&self) {
        for symbol in self.engine.config().trading_pairs.keys() {
            match self.gateway.set_leverage(symbol, self.leverage).await {
                Ok(()) => info!(symbol = %symbol, leverage = self.leverage, "Leverage set"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to set leverage"),
            }
        }
    }

    async fn balance(&self) -> Option<Decimal> {
        match self.gateway.fetch_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(error = %e, "Failed to fetch balance");
                None
            }
        }
    }

    /// Run until the shutdown handle is triggered.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(
            pairs = self.engine.config().trading_pairs.len(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting strategy bot"
        );

        self.sync_leverage().await;
        let initial_balance = self.balance().await;
        if let Some(balance) = initial_balance {
            info!(balance = %balance, "Initial USDT equity");
        }

        let mut cycles = 0u64;
        while !self.shutdown.is_triggered() {
            let report = self.engine.refresh_all().await;
            cycles += 1;
            info!(
                cycle = cycles,
                processed = report.pairs_processed,
                skipped = report.pairs_skipped,
                orders = report.orders_placed,
                "Order refresh complete"
            );
            self.shutdown.wait(self.interval).await;
        }

        info!("Cancelling resting orders before exit");
        self.engine.cancel_all().await;

        let summary = RunSummary {
            started_at,
            stopped_at: Utc::now(),
            cycles,
            initial_balance,
            final_balance: self.balance().await,
        };
        info!("Strategy bot stopped\n{}", summary);
        self.gateway.notify(&summary.to_string()).await;

        Ok(summary)
    }
}

/// Periodically applies the trailing stop to every open position.
pub struct TrailBot<G: Gateway> {
    monitor: TrailMonitor<G>,
    interval: Duration,
    shutdown: Shutdown,
}

impl<G: Gateway> TrailBot<G> {
    pub fn new(gateway: Arc<G>, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            monitor: TrailMonitor::new(gateway, TrailingStop::from_config(&config.trailing)),
            interval: interval_from_secs(config.trailing.monitor_interval)?,
            shutdown: Shutdown::new(),
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(
            interval_secs = self.interval.as_secs_f64(),
            blacklisted = self.monitor.trailing().blacklist_len(),
            "Starting trailing monitor"
        );

        let mut cycles = 0u64;
        while !self.shutdown.is_triggered() {
            let report = self.monitor.monitor_positions().await;
            cycles += 1;
            if report.closed > 0 || report.close_failures > 0 {
                info!(
                    cycle = cycles,
                    positions = report.positions_seen,
                    closed = report.closed,
                    failed = report.close_failures,
                    "Trailing cycle complete"
                );
            }
            self.shutdown.wait(self.interval).await;
        }

        let summary = RunSummary {
            started_at,
            stopped_at: Utc::now(),
            cycles,
            initial_balance: None,
            final_balance: None,
        };
        info!("Trailing monitor stopped\n{}", summary);

        Ok(summary)
    }
}
