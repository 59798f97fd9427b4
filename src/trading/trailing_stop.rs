//! Tiered trailing-stop exit state machine.
//!
//! Per symbol: ABSENT → TRACKING(tier) on first sight of a live position,
//! TRACKING → ABSENT once the position is closed or disappears. While
//! tracking, the peak profit only ever rises, and the protection tier is
//! derived from that peak (highest armed threshold wins).
//!
//! Exit rules, first match wins:
//! - tier 0: profit fell back to the absolute floor `low_trail_stop_loss_pct`
//! - tier 1: profit ≤ peak · (1 − trail_stop_loss_pct)
//! - tier 2: profit ≤ peak · (1 − higher_trail_stop_loss_pct)
//! - any tier: profit ≤ −stop_loss_pct (hard stop)

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::Gateway;
use crate::models::{Position, PositionSide};

use super::config::{Thresholds, TrailingConfig};

/// Discrete protection level derived from peak profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Tracking, no protection armed yet
    Unarmed,
    Low,
    First,
    Second,
}

impl Tier {
    /// Numeric level as used in operator logs (-1, 0, 1, 2).
    pub fn level(&self) -> i8 {
        match self {
            Tier::Unarmed => -1,
            Tier::Low => 0,
            Tier::First => 1,
            Tier::Second => 2,
        }
    }

    /// Tier for a peak profit; the highest armed threshold wins.
    pub fn for_peak(highest_profit_pct: f64, thresholds: &Thresholds) -> Self {
        if highest_profit_pct >= thresholds.second_trail_enable_threshold {
            Tier::Second
        } else if highest_profit_pct >= thresholds.first_trail_enable_threshold {
            Tier::First
        } else if highest_profit_pct >= thresholds.low_trail_enable_threshold {
            Tier::Low
        } else {
            Tier::Unarmed
        }
    }
}

/// Why a position should be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Tier 0 profit fell back to its absolute floor
    LowTierFloor,
    /// Tier 1 retracement from peak
    FirstTierTrail,
    /// Tier 2 retracement from peak
    SecondTierTrail,
    /// Loss reached the hard stop
    StopLoss,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::LowTierFloor => "low-tier profit floor",
            ExitReason::FirstTierTrail => "first-tier trailing stop",
            ExitReason::SecondTierTrail => "second-tier trailing stop",
            ExitReason::StopLoss => "stop loss",
        };
        f.write_str(s)
    }
}

/// Exit check for one observation. Tier rule first, then the hard stop.
pub fn exit_reason(
    tier: Tier,
    profit_pct: f64,
    highest_profit_pct: f64,
    thresholds: &Thresholds,
) -> Option<ExitReason> {
    let tier_exit = match tier {
        Tier::Unarmed => None,
        Tier::Low => (profit_pct <= thresholds.low_trail_stop_loss_pct)
            .then_some(ExitReason::LowTierFloor),
        Tier::First => (profit_pct <= highest_profit_pct * (1.0 - thresholds.trail_stop_loss_pct))
            .then_some(ExitReason::FirstTierTrail),
        Tier::Second => (profit_pct
            <= highest_profit_pct * (1.0 - thresholds.higher_trail_stop_loss_pct))
            .then_some(ExitReason::SecondTierTrail),
    };

    tier_exit.or_else(|| (profit_pct <= -thresholds.stop_loss_pct).then_some(ExitReason::StopLoss))
}

/// Per-symbol tracking record. Presence in the map is the TRACKING state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailState {
    /// Peak profit seen while tracking; never decreases
    pub highest_profit_pct: f64,
    pub tier: Tier,
    pub tracking_since: DateTime<Utc>,
}

impl TrailState {
    fn new() -> Self {
        Self {
            highest_profit_pct: 0.0,
            tier: Tier::Unarmed,
            tracking_since: Utc::now(),
        }
    }
}

/// Errors that make one position skip the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrailError {
    #[error("unknown position side for {0}")]
    UnknownSide(String),

    #[error("position {0} has zero size")]
    NotLive(String),

    #[error("position {symbol} has invalid entry price {entry_price}")]
    InvalidEntryPrice { symbol: String, entry_price: Decimal },
}

/// Result of evaluating one tracked position.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// This observation created the TRACKING state
    pub first_detection: bool,
    pub profit_pct: f64,
    pub highest_profit_pct: f64,
    pub tier: Tier,
    /// `Some` when the position should be closed now
    pub exit: Option<ExitReason>,
}

/// What the state machine decided for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailDecision {
    /// Symbol is blacklisted; never tracked, never closed
    Blacklisted { first_detection: bool },
    Tracked(Evaluation),
}

/// Trailing-stop state for all symbols.
#[derive(Debug, Clone)]
pub struct TrailingStop {
    thresholds: Thresholds,
    blacklist: BTreeSet<String>,
    states: HashMap<String, TrailState>,
    blacklist_notified: HashSet<String>,
}

impl TrailingStop {
    pub fn new(thresholds: Thresholds, blacklist: BTreeSet<String>) -> Self {
        Self {
            thresholds,
            blacklist,
            states: HashMap::new(),
            blacklist_notified: HashSet::new(),
        }
    }

    pub fn from_config(config: &TrailingConfig) -> Self {
        Self::new(config.thresholds, config.blacklist.clone())
    }

    pub fn state(&self, symbol: &str) -> Option<&TrailState> {
        self.states.get(symbol)
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    /// Feed one observation of a live position.
    pub fn evaluate(&mut self, position: &Position) -> Result<TrailDecision, TrailError> {
        let symbol = position.symbol.as_str();

        if !position.is_live() {
            return Err(TrailError::NotLive(symbol.to_string()));
        }

        if self.blacklist.contains(symbol) {
            let first_detection = self.blacklist_notified.insert(symbol.to_string());
            return Ok(TrailDecision::Blacklisted { first_detection });
        }

        // Checked before any state is created so a malformed record changes nothing
        if position.side == PositionSide::Unknown {
            return Err(TrailError::UnknownSide(symbol.to_string()));
        }
        let profit_pct = position
            .profit_pct()
            .ok_or_else(|| TrailError::InvalidEntryPrice {
                symbol: symbol.to_string(),
                entry_price: position.entry_price,
            })?;

        let first_detection = !self.states.contains_key(symbol);
        let state = self
            .states
            .entry(symbol.to_string())
            .or_insert_with(TrailState::new);

        if profit_pct > state.highest_profit_pct {
            state.highest_profit_pct = profit_pct;
        }
        state.tier = Tier::for_peak(state.highest_profit_pct, &self.thresholds);

        let exit = exit_reason(state.tier, profit_pct, state.highest_profit_pct, &self.thresholds);

        Ok(TrailDecision::Tracked(Evaluation {
            first_detection,
            profit_pct,
            highest_profit_pct: state.highest_profit_pct,
            tier: state.tier,
            exit,
        }))
    }

    /// TRACKING → ABSENT after a successful close.
    pub fn mark_closed(&mut self, symbol: &str) {
        self.states.remove(symbol);
        self.blacklist_notified.remove(symbol);
    }

    /// Forget every symbol that no longer has a live position.
    pub fn retain_live(&mut self, live_symbols: &HashSet<String>) {
        self.states.retain(|symbol, _| live_symbols.contains(symbol));
        self.blacklist_notified
            .retain(|symbol| live_symbols.contains(symbol));
    }
}

/// Summary of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub positions_seen: usize,
    pub closed: usize,
    pub close_failures: usize,
    pub skipped: usize,
}

/// Polls positions through a [`Gateway`] and applies the trailing stop.
pub struct TrailMonitor<G: Gateway> {
    gateway: Arc<G>,
    trailing: TrailingStop,
}

impl<G: Gateway> TrailMonitor<G> {
    pub fn new(gateway: Arc<G>, trailing: TrailingStop) -> Self {
        Self { gateway, trailing }
    }

    pub fn trailing(&self) -> &TrailingStop {
        &self.trailing
    }

    /// Run one monitoring pass over all open positions.
    pub async fn monitor_positions(&mut self) -> MonitorReport {
        let mut report = MonitorReport::default();

        let positions = match self.gateway.fetch_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "Failed to fetch positions");
                return report;
            }
        };

        let live: Vec<Position> = positions.into_iter().filter(Position::is_live).collect();
        let live_symbols: HashSet<String> = live.iter().map(|p| p.symbol.clone()).collect();
        self.trailing.retain_live(&live_symbols);

        for position in &live {
            report.positions_seen += 1;
            self.process_position(position, &mut report).await;
        }

        report
    }

    async fn process_position(&mut self, position: &Position, report: &mut MonitorReport) {
        let symbol = position.symbol.as_str();

        let evaluation = match self.trailing.evaluate(position) {
            Ok(TrailDecision::Blacklisted { first_detection }) => {
                report.skipped += 1;
                if first_detection {
                    info!(symbol = %symbol, "Blacklisted position detected, not monitoring");
                    self.gateway
                        .notify(&format!("Blacklisted symbol detected: {symbol}, skipping monitoring"))
                        .await;
                }
                return;
            }
            Ok(TrailDecision::Tracked(evaluation)) => evaluation,
            Err(e) => {
                report.skipped += 1;
                warn!(symbol = %symbol, error = %e, "Skipping position");
                return;
            }
        };

        if evaluation.first_detection {
            info!(
                symbol = %symbol,
                size = %position.size,
                entry_price = %position.entry_price,
                side = %position.side,
                "New position detected"
            );
            self.gateway
                .notify(&format!(
                    "New position detected\n\nSymbol: {}\nSize: {}\nEntry price: {}\nSide: {}\n\nPeak profit and tier reset, monitoring started",
                    symbol,
                    position.size,
                    position.entry_price,
                    position.side.as_str().to_uppercase()
                ))
                .await;
        }

        info!(
            symbol = %symbol,
            size = %position.size,
            side = %position.side,
            entry_price = %position.entry_price,
            mark_price = %position.mark_price,
            profit_pct = format!("{:.2}", evaluation.profit_pct),
            highest_profit_pct = format!("{:.2}", evaluation.highest_profit_pct),
            tier = evaluation.tier.level(),
            "Monitoring position"
        );

        let Some(reason) = evaluation.exit else {
            debug!(symbol = %symbol, "Holding position");
            return;
        };

        info!(
            symbol = %symbol,
            reason = %reason,
            profit_pct = format!("{:.2}", evaluation.profit_pct),
            highest_profit_pct = format!("{:.2}", evaluation.highest_profit_pct),
            "Exit triggered, closing position"
        );

        if self.close(position).await {
            report.closed += 1;
        } else {
            report.close_failures += 1;
        }
    }

    /// Flatten the position; state is only dropped once the exchange accepts.
    async fn close(&mut self, position: &Position) -> bool {
        let symbol = position.symbol.as_str();
        let Some(side) = position.side.closing_side() else {
            warn!(symbol = %symbol, "Cannot close position with unknown side");
            return false;
        };
        let quantity: Decimal = position.size.abs();

        match self.gateway.close_position(symbol, quantity, side).await {
            Ok(()) => {
                self.trailing.mark_closed(symbol);
                info!(symbol = %symbol, quantity = %quantity, "Position closed");
                self.gateway
                    .notify(&format!("Position closed: {symbol}"))
                    .await;
                true
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Failed to close position, will retry next cycle");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{Call, MockGateway};
    use crate::models::OrderSide;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;

    fn thresholds() -> Thresholds {
        Thresholds {
            stop_loss_pct: 5.0,
            low_trail_enable_threshold: 1.0,
            low_trail_stop_loss_pct: 0.5,
            first_trail_enable_threshold: 3.0,
            trail_stop_loss_pct: 0.5,
            second_trail_enable_threshold: 20.0,
            higher_trail_stop_loss_pct: 0.2,
        }
    }

    fn long_at(symbol: &str, profit_pct: f64) -> Position {
        let mark = dec!(100) * (Decimal::ONE + Decimal::from_f64(profit_pct).unwrap() / dec!(100));
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: dec!(100),
            mark_price: mark,
            size: dec!(2),
        }
    }

    fn short_at(symbol: &str, profit_pct: f64) -> Position {
        let mark = dec!(100) * (Decimal::ONE - Decimal::from_f64(profit_pct).unwrap() / dec!(100));
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Short,
            entry_price: dec!(100),
            mark_price: mark,
            size: dec!(-3),
        }
    }

    fn tracked(decision: TrailDecision) -> Evaluation {
        match decision {
            TrailDecision::Tracked(e) => e,
            other => panic!("expected tracked, got {:?}", other),
        }
    }

    #[test]
    fn test_tier_for_peak_highest_threshold_wins() {
        let t = thresholds();
        assert_eq!(Tier::for_peak(0.0, &t), Tier::Unarmed);
        assert_eq!(Tier::for_peak(1.0, &t), Tier::Low);
        assert_eq!(Tier::for_peak(3.0, &t), Tier::First);
        assert_eq!(Tier::for_peak(25.0, &t), Tier::Second);
        assert_eq!(Tier::Second.level(), 2);
        assert_eq!(Tier::Unarmed.level(), -1);
    }

    #[test]
    fn test_tier_monotonic_for_increasing_peaks() {
        let t = thresholds();
        let mut prev = Tier::Unarmed;
        for i in 0..300 {
            let tier = Tier::for_peak(i as f64 * 0.1, &t);
            assert!(tier >= prev);
            prev = tier;
        }
        assert_eq!(prev, Tier::Second);
    }

    #[test]
    fn test_first_tier_retracement_example() {
        let t = thresholds();
        // Peak 10, 50% retracement allowed: close at or below 5
        assert_eq!(exit_reason(Tier::First, 4.0, 10.0, &t), Some(ExitReason::FirstTierTrail));
        assert_eq!(exit_reason(Tier::First, 6.0, 10.0, &t), None);
    }

    #[test]
    fn test_low_tier_uses_absolute_floor() {
        let t = thresholds();
        assert_eq!(exit_reason(Tier::Low, 0.5, 2.9, &t), Some(ExitReason::LowTierFloor));
        assert_eq!(exit_reason(Tier::Low, 0.6, 2.9, &t), None);
    }

    #[test]
    fn test_second_tier_retracement() {
        let t = thresholds();
        // Peak 30, 20% retracement: close at or below 24
        assert_eq!(exit_reason(Tier::Second, 24.0, 30.0, &t), Some(ExitReason::SecondTierTrail));
        assert_eq!(exit_reason(Tier::Second, 25.0, 30.0, &t), None);
    }

    #[test]
    fn test_hard_stop_fires_regardless_of_tier() {
        let t = thresholds();
        assert_eq!(exit_reason(Tier::Unarmed, -6.0, 0.0, &t), Some(ExitReason::StopLoss));
        assert_eq!(exit_reason(Tier::Unarmed, -4.9, 0.0, &t), None);
        // Tier rule matches first when both apply
        assert_eq!(exit_reason(Tier::Low, -6.0, 1.5, &t), Some(ExitReason::LowTierFloor));
    }

    #[test]
    fn test_highest_profit_is_running_max() {
        let mut trailing = TrailingStop::new(
            Thresholds {
                stop_loss_pct: 100.0,
                low_trail_enable_threshold: 50.0,
                first_trail_enable_threshold: 60.0,
                second_trail_enable_threshold: 70.0,
                ..thresholds()
            },
            BTreeSet::new(),
        );

        let observations = [0.5, 2.0, 1.0, -3.0, 4.5, 4.0, 0.0];
        let mut running_max = 0.0f64;
        for profit in observations {
            let eval = tracked(trailing.evaluate(&long_at("BTCUSDT", profit)).unwrap());
            running_max = running_max.max(profit);
            assert!((eval.highest_profit_pct - running_max).abs() < 1e-9);
            assert!(eval.exit.is_none());
        }
        let state = trailing.state("BTCUSDT").unwrap();
        assert!((state.highest_profit_pct - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_first_observation_starts_tracking_unarmed() {
        let mut trailing = TrailingStop::new(thresholds(), BTreeSet::new());
        assert!(trailing.state("BTCUSDT").is_none());

        let eval = tracked(trailing.evaluate(&long_at("BTCUSDT", -1.0)).unwrap());
        assert!(eval.first_detection);
        assert_eq!(eval.tier, Tier::Unarmed);
        assert_eq!(eval.highest_profit_pct, 0.0);

        let eval = tracked(trailing.evaluate(&long_at("BTCUSDT", -1.0)).unwrap());
        assert!(!eval.first_detection);
    }

    #[test]
    fn test_short_profit_sign() {
        let mut trailing = TrailingStop::new(thresholds(), BTreeSet::new());
        let eval = tracked(trailing.evaluate(&short_at("ETHUSDT", 2.0)).unwrap());
        assert!((eval.profit_pct - 2.0).abs() < 1e-9);
        assert_eq!(eval.tier, Tier::Low);
    }

    #[test]
    fn test_unknown_side_changes_nothing() {
        let mut trailing = TrailingStop::new(thresholds(), BTreeSet::new());
        let mut position = long_at("BTCUSDT", 1.0);
        position.side = PositionSide::Unknown;

        assert_eq!(
            trailing.evaluate(&position),
            Err(TrailError::UnknownSide("BTCUSDT".to_string()))
        );
        assert_eq!(trailing.tracked_count(), 0);
    }

    #[test]
    fn test_zero_entry_price_reports_entry_price() {
        let mut trailing = TrailingStop::new(thresholds(), BTreeSet::new());
        let mut position = short_at("ETHUSDT", 1.0);
        position.entry_price = Decimal::ZERO;

        assert_eq!(
            trailing.evaluate(&position),
            Err(TrailError::InvalidEntryPrice {
                symbol: "ETHUSDT".to_string(),
                entry_price: Decimal::ZERO,
            })
        );
        assert_eq!(trailing.tracked_count(), 0);
    }

    #[test]
    fn test_blacklisted_symbol_never_tracked() {
        let blacklist = BTreeSet::from(["BTCUSDT".to_string()]);
        let mut trailing = TrailingStop::new(thresholds(), blacklist);

        assert_eq!(
            trailing.evaluate(&long_at("BTCUSDT", -90.0)).unwrap(),
            TrailDecision::Blacklisted { first_detection: true }
        );
        assert_eq!(
            trailing.evaluate(&long_at("BTCUSDT", 500.0)).unwrap(),
            TrailDecision::Blacklisted { first_detection: false }
        );
        assert_eq!(trailing.tracked_count(), 0);
    }

    #[test]
    fn test_retain_live_drops_flattened_symbols() {
        let mut trailing = TrailingStop::new(thresholds(), BTreeSet::new());
        trailing.evaluate(&long_at("BTCUSDT", 2.0)).unwrap();
        trailing.evaluate(&long_at("ETHUSDT", 2.0)).unwrap();

        trailing.retain_live(&HashSet::from(["ETHUSDT".to_string()]));
        assert!(trailing.state("BTCUSDT").is_none());
        assert!(trailing.state("ETHUSDT").is_some());

        // Re-opening starts from scratch
        let eval = tracked(trailing.evaluate(&long_at("BTCUSDT", 0.5)).unwrap());
        assert!(eval.first_detection);
        assert!((eval.highest_profit_pct - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_monitor_trails_and_closes_once() {
        let gateway = Arc::new(MockGateway::new());
        let mut monitor = TrailMonitor::new(
            gateway.clone(),
            TrailingStop::new(thresholds(), BTreeSet::new()),
        );

        // Run up to a 10% peak, then retrace to 4%
        for profit in [1.0, 5.0, 10.0] {
            gateway.set_positions(vec![long_at("BTCUSDT", profit)]);
            let report = monitor.monitor_positions().await;
            assert_eq!(report.closed, 0);
        }
        assert_eq!(monitor.trailing().state("BTCUSDT").unwrap().tier, Tier::First);

        gateway.set_positions(vec![long_at("BTCUSDT", 4.0)]);
        let report = monitor.monitor_positions().await;
        assert_eq!(report.closed, 1);

        assert_eq!(
            gateway.closes(),
            vec![Call::Close {
                symbol: "BTCUSDT".to_string(),
                quantity: dec!(2),
                side: OrderSide::Sell,
            }]
        );
        assert!(monitor.trailing().state("BTCUSDT").is_none());

        let notes = gateway.notifications();
        assert!(notes[0].starts_with("New position detected"));
        assert_eq!(notes.last().unwrap(), "Position closed: BTCUSDT");
    }

    #[tokio::test]
    async fn test_monitor_hard_stop_on_short_uses_abs_size() {
        let gateway = Arc::new(MockGateway::new());
        let mut monitor = TrailMonitor::new(
            gateway.clone(),
            TrailingStop::new(thresholds(), BTreeSet::new()),
        );

        gateway.set_positions(vec![short_at("ETHUSDT", -6.0)]);
        monitor.monitor_positions().await;

        assert_eq!(
            gateway.closes(),
            vec![Call::Close {
                symbol: "ETHUSDT".to_string(),
                quantity: dec!(3),
                side: OrderSide::Buy,
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_close_keeps_state_and_retries() {
        let gateway = Arc::new(MockGateway::new());
        let mut monitor = TrailMonitor::new(
            gateway.clone(),
            TrailingStop::new(thresholds(), BTreeSet::new()),
        );

        gateway.fail_closes("BTCUSDT", true);
        gateway.set_positions(vec![long_at("BTCUSDT", -6.0)]);
        let report = monitor.monitor_positions().await;
        assert_eq!(report.close_failures, 1);
        assert!(monitor.trailing().state("BTCUSDT").is_some());

        gateway.fail_closes("BTCUSDT", false);
        let report = monitor.monitor_positions().await;
        assert_eq!(report.closed, 1);
        assert!(monitor.trailing().state("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn test_monitor_blacklist_notifies_once_and_never_closes() {
        let gateway = Arc::new(MockGateway::new());
        let blacklist = BTreeSet::from(["BTCUSDT".to_string()]);
        let mut monitor = TrailMonitor::new(gateway.clone(), TrailingStop::new(thresholds(), blacklist));

        gateway.set_positions(vec![long_at("BTCUSDT", -50.0)]);
        monitor.monitor_positions().await;
        monitor.monitor_positions().await;

        assert!(gateway.closes().is_empty());
        let notes = gateway.notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("BTCUSDT"));
        assert_eq!(monitor.trailing().tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_state() {
        let gateway = Arc::new(MockGateway::new());
        let mut monitor = TrailMonitor::new(
            gateway.clone(),
            TrailingStop::new(thresholds(), BTreeSet::new()),
        );

        gateway.set_positions(vec![long_at("BTCUSDT", 2.0)]);
        monitor.monitor_positions().await;

        gateway.fail_positions(true);
        let report = monitor.monitor_positions().await;
        assert_eq!(report, MonitorReport::default());
        assert!(monitor.trailing().state("BTCUSDT").is_some());

        // Position gone once the exchange answers again
        gateway.fail_positions(false);
        gateway.set_positions(vec![]);
        monitor.monitor_positions().await;
        assert!(monitor.trailing().state("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn test_zero_size_positions_are_ignored() {
        let gateway = Arc::new(MockGateway::new());
        let mut monitor = TrailMonitor::new(
            gateway.clone(),
            TrailingStop::new(thresholds(), BTreeSet::new()),
        );

        let mut flat = long_at("BTCUSDT", -50.0);
        flat.size = Decimal::ZERO;
        gateway.set_positions(vec![flat]);

        let report = monitor.monitor_positions().await;
        assert_eq!(report.positions_seen, 0);
        assert!(gateway.calls().is_empty());
    }
}
