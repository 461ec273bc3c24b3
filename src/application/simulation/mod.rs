// Latency, slippage, cost and fill models
pub mod execution;

// Trade and equity performance metrics
pub mod performance;

// Paper portfolio accounting
pub mod portfolio;

// Prioritized risk validator pipeline
pub mod risk;

// Injected stress scenarios on a separate branch
pub mod stress;

use crate::application::signals::SignalCommand;
use crate::application::simulation::execution::ExecutionModel;
use crate::application::simulation::performance::PerformanceTracker;
use crate::application::simulation::portfolio::SimPortfolio;
use crate::application::simulation::risk::{RiskContext, RiskPipeline};
use crate::config::CoreConfig;
use crate::domain::compliance::ExecutionConstraints;
use crate::domain::errors::RiskRejection;
use crate::domain::events::{Envelope, EnvelopeKind};
use crate::domain::market::AggregatedView;
use crate::domain::ports::PersistenceSink;
use crate::domain::signal::{LiveTradingSignal, SignalDirection};
use crate::domain::trading::{
    CloseReason, FillResult, Outcome, OutcomeKind, PositionSide, SimulatedPosition,
};
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_cash: Decimal,
    /// Fraction of equity committed per accepted signal.
    pub base_order_fraction: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Window of per-view returns kept for inter-pair correlation.
    pub return_window: usize,
    /// Views whose volume approximates rolling daily volume.
    pub volume_window: usize,
}

impl SimulationConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            initial_cash: config.initial_cash,
            base_order_fraction: 0.05,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            return_window: 200,
            volume_window: 1_000,
        }
    }
}

/// Decision on a freshly received signal.
#[derive(Debug)]
pub enum SignalDecision {
    Accepted { quantity: Decimal, reference: Decimal },
    Rejected(RiskRejection),
    /// No reference price yet for the pair; reported as filtered.
    Unpriced,
}

/// A position close produced by a view or a shutdown.
#[derive(Debug)]
pub struct ClosedEvent {
    pub position: SimulatedPosition,
    pub realized_return: f64,
    pub reason: CloseReason,
}

/// The paper-trading core: risk checks, execution simulation, position and
/// performance accounting. Channel-free so the whole lifecycle is
/// unit-testable; the agent wrapper owns the wiring.
pub struct TradingSimulator {
    config: SimulationConfig,
    risk: RiskPipeline,
    execution: ExecutionModel,
    portfolio: SimPortfolio,
    performance: PerformanceTracker,
    pair_returns: HashMap<String, VecDeque<f64>>,
    last_view_price: HashMap<String, f64>,
    rolling_volume: HashMap<String, VecDeque<f64>>,
    expiries: HashMap<String, DateTime<Utc>>,
    unwinding: bool,
}

impl TradingSimulator {
    pub fn new(
        config: SimulationConfig,
        risk: RiskPipeline,
        execution: ExecutionModel,
        now: DateTime<Utc>,
    ) -> Self {
        let portfolio = SimPortfolio::new(config.initial_cash, now);
        Self {
            config,
            risk,
            execution,
            portfolio,
            performance: PerformanceTracker::default(),
            pair_returns: HashMap::new(),
            last_view_price: HashMap::new(),
            rolling_volume: HashMap::new(),
            expiries: HashMap::new(),
            unwinding: false,
        }
    }

    pub fn portfolio(&self) -> &SimPortfolio {
        &self.portfolio
    }

    pub fn portfolio_mut(&mut self) -> &mut SimPortfolio {
        &mut self.portfolio
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn is_unwinding(&self) -> bool {
        self.unwinding
    }

    /// Received -> RiskChecked -> (Rejected | Accepted).
    pub fn decide(
        &self,
        signal: &LiveTradingSignal,
        constraints: &ExecutionConstraints,
    ) -> SignalDecision {
        let Some(reference) = self.portfolio.last_price(&signal.pair) else {
            return SignalDecision::Unpriced;
        };
        if reference <= Decimal::ZERO {
            return SignalDecision::Unpriced;
        }

        let equity = self.portfolio.equity();
        let notional = equity * decimal_from(self.config.base_order_fraction);
        let quantity = notional / reference;

        let open_notional = self.portfolio.open_notional();
        let candidate_correlations = self.correlations_against(&signal.pair);
        let ctx = RiskContext {
            signal,
            notional,
            equity,
            gross_exposure: self.portfolio.gross_exposure(),
            drawdown_from_peak: self.portfolio.drawdown_from_peak(),
            open_notional: &open_notional,
            candidate_correlations: &candidate_correlations,
            constraints,
        };

        match self.risk.check(&ctx) {
            Ok(()) => SignalDecision::Accepted {
                quantity,
                reference,
            },
            Err(rejection) => SignalDecision::Rejected(rejection),
        }
    }

    /// Executing -> (Filled | PartialFill | Failed) -> Open.
    pub fn execute(
        &mut self,
        signal: &LiveTradingSignal,
        quantity: Decimal,
        reference: Decimal,
        constraints: &ExecutionConstraints,
        now: DateTime<Utc>,
    ) -> Option<(SimulatedPosition, FillResult)> {
        if self.portfolio.has_position(&signal.pair) {
            debug!("TradingSimulator: {} already open, dropping fill", signal.pair);
            return None;
        }

        let side = match signal.direction {
            SignalDirection::Long => PositionSide::Long,
            SignalDirection::Short => PositionSide::Short,
            SignalDirection::Flat => return None,
        };

        let daily_volume = self.rolling_daily_volume(&signal.pair);
        let executed_price =
            self.execution
                .slippage
                .execution_price(reference, quantity, daily_volume, side);
        let fill = self.execution.fill_policy.fill(reference, executed_price);

        let filled_quantity = match fill {
            FillResult::Filled => quantity,
            FillResult::PartialFill { fraction } => {
                quantity * decimal_from(fraction)
            }
            FillResult::Failed => return None,
        };
        if filled_quantity <= Decimal::ZERO {
            return None;
        }

        let (stop_loss, take_profit) = match side {
            PositionSide::Long => (
                executed_price * decimal_from(1.0 - self.config.stop_loss_pct),
                executed_price * decimal_from(1.0 + self.config.take_profit_pct),
            ),
            PositionSide::Short => (
                executed_price * decimal_from(1.0 + self.config.stop_loss_pct),
                executed_price * decimal_from(1.0 - self.config.take_profit_pct),
            ),
        };

        let position = SimulatedPosition {
            position_id: Uuid::new_v4(),
            signal_id: signal.signal_id,
            pair: signal.pair.clone(),
            side,
            entry_price: executed_price,
            quantity: filled_quantity,
            stop_loss,
            take_profit,
            opened_at: now,
            closed_at: None,
            realized_pnl: None,
            under_override: constraints.under_override,
        };

        let entry_cost =
            execution::transaction_cost(position.notional(), self.execution.cost_bps);
        self.portfolio.open(position.clone(), entry_cost);
        self.expiries.insert(signal.pair.clone(), signal.expires_at);

        info!(
            "TradingSimulator: opened {} {} {}@{} ({:?})",
            position.side, position.pair, position.quantity, position.entry_price, fill
        );
        Some((position, fill))
    }

    /// Marks the pair, updates return/volume windows, and closes positions
    /// whose stop, take-profit or expiry has been hit. During a managed
    /// unwind every marked position is closed.
    pub fn on_view(&mut self, view: &AggregatedView, now: DateTime<Utc>) -> Vec<ClosedEvent> {
        let pair = view.pair.clone();
        let price = view.aggregated_price;
        self.portfolio.mark(&pair, price);

        if let Some(price_f) = price.to_f64()
            && price_f > 0.0
        {
            if let Some(prev) = self.last_view_price.insert(pair.clone(), price_f)
                && prev > 0.0
            {
                let returns = self.pair_returns.entry(pair.clone()).or_default();
                if returns.len() == self.config.return_window {
                    returns.pop_front();
                }
                returns.push_back((price_f - prev) / prev);
            }
            let volumes = self.rolling_volume.entry(pair.clone()).or_default();
            if volumes.len() == self.config.volume_window {
                volumes.pop_front();
            }
            volumes.push_back(view.volume.to_f64().unwrap_or(0.0));
        }

        let mut closed = Vec::new();
        let trigger = self.portfolio.position(&pair).and_then(|position| {
            if self.unwinding {
                Some(CloseReason::Manual)
            } else if self.expiries.get(&pair).is_some_and(|at| now >= *at) {
                Some(CloseReason::Expiry)
            } else {
                position.exit_trigger(price)
            }
        });

        if let Some(reason) = trigger
            && let Some(event) = self.close_position(&pair, price, reason, now)
        {
            closed.push(event);
        }

        // Kill-switch: beyond the drawdown limit, unwind everything.
        if !self.unwinding && self.portfolio.drawdown_from_peak() > self.risk_max_drawdown() {
            warn!(
                "TradingSimulator: drawdown {:.2}% beyond limit, starting managed unwind",
                self.portfolio.drawdown_from_peak() * 100.0
            );
            self.unwinding = true;
        }
        if self.unwinding && self.portfolio.positions().is_empty() {
            self.unwinding = false;
        }

        closed
    }

    fn close_position(
        &mut self,
        pair: &str,
        mark: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<ClosedEvent> {
        let position = self.portfolio.position(pair)?;
        let exit_side = match position.side {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        };
        let quantity = position.quantity;
        let daily_volume = self.rolling_daily_volume(pair);
        let exit_price =
            self.execution
                .slippage
                .execution_price(mark, quantity, daily_volume, exit_side);
        let exit_cost = execution::transaction_cost(exit_price * quantity, self.execution.cost_bps);

        let (position, realized_return) =
            self.portfolio.close(pair, exit_price, exit_cost, reason, now)?;
        self.expiries.remove(pair);
        self.performance
            .record_close(realized_return, position.realized_pnl.unwrap_or(Decimal::ZERO));
        self.performance
            .record_equity(self.portfolio.equity().to_f64().unwrap_or(0.0));

        info!(
            "TradingSimulator: closed {} ({}, return {:.4})",
            position.pair, reason, realized_return
        );
        Some(ClosedEvent {
            position,
            realized_return,
            reason,
        })
    }

    /// Force-closes everything at the last mark (shutdown path).
    pub fn close_all(&mut self, now: DateTime<Utc>) -> Vec<ClosedEvent> {
        let pairs: Vec<String> = self.portfolio.positions().keys().cloned().collect();
        pairs
            .into_iter()
            .filter_map(|pair| {
                let mark = self.portfolio.last_price(&pair)?;
                self.close_position(&pair, mark, CloseReason::Manual, now)
            })
            .collect()
    }

    fn rolling_daily_volume(&self, pair: &str) -> Decimal {
        let sum: f64 = self
            .rolling_volume
            .get(pair)
            .map(|v| v.iter().sum())
            .unwrap_or(0.0);
        decimal_from(sum)
    }

    /// Price-return correlation of `pair` against every held pair.
    fn correlations_against(&self, pair: &str) -> HashMap<String, f64> {
        let Some(candidate) = self.pair_returns.get(pair) else {
            return HashMap::new();
        };
        self.portfolio
            .positions()
            .keys()
            .filter_map(|held| {
                let other = self.pair_returns.get(held)?;
                pearson_tail(candidate, other).map(|corr| (held.clone(), corr))
            })
            .collect()
    }

    fn risk_max_drawdown(&self) -> f64 {
        // The pipeline owns the configured limit; mirror it for the unwind
        // trigger through the same config source.
        self.risk.max_drawdown()
    }

    /// Concentration risk (highest pairwise |correlation| among held pairs)
    /// and diversification score (1 - average |correlation|). None until at
    /// least two held pairs have comparable return history.
    pub fn diversification_metrics(&self) -> Option<DiversificationMetrics> {
        let held: Vec<&String> = self.portfolio.positions().keys().collect();
        if held.len() < 2 {
            return None;
        }

        let mut correlations = Vec::new();
        for i in 0..held.len() {
            for j in (i + 1)..held.len() {
                let (Some(a), Some(b)) =
                    (self.pair_returns.get(held[i]), self.pair_returns.get(held[j]))
                else {
                    continue;
                };
                if let Some(corr) = pearson_tail(a, b) {
                    correlations.push(corr.abs());
                }
            }
        }
        if correlations.is_empty() {
            return None;
        }

        let max = correlations.iter().copied().fold(0.0f64, f64::max);
        let avg = correlations.iter().sum::<f64>() / correlations.len() as f64;
        Some(DiversificationMetrics {
            concentration_risk: max,
            diversification_score: (1.0 - avg).clamp(0.0, 1.0),
        })
    }
}

/// Cross-pair exposure shape of the held book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversificationMetrics {
    pub concentration_risk: f64,
    pub diversification_score: f64,
}

fn decimal_from(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

/// Pearson correlation over the aligned tails of two return series.
fn pearson_tail(a: &VecDeque<f64>, b: &VecDeque<f64>) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 10 {
        return None;
    }
    let a_tail: Vec<f64> = a.iter().rev().take(n).rev().copied().collect();
    let b_tail: Vec<f64> = b.iter().rev().take(n).rev().copied().collect();

    let n_f = n as f64;
    let mean_a = a_tail.iter().sum::<f64>() / n_f;
    let mean_b = b_tail.iter().sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a_tail[i] - mean_a;
        let db = b_tail[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Task wrapper: consumes signals and views, emits outcomes and snapshots.
pub struct SimulatorAgent {
    simulator: TradingSimulator,
    signals_rx: mpsc::Receiver<SignalCommand>,
    views_rx: broadcast::Receiver<AggregatedView>,
    constraints_rx: watch::Receiver<ExecutionConstraints>,
    outcomes_tx: mpsc::Sender<Outcome>,
    sink: Arc<dyn PersistenceSink>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
    pending: VecDeque<(DateTime<Utc>, LiveTradingSignal, Decimal, Decimal)>,
}

impl SimulatorAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        simulator: TradingSimulator,
        signals_rx: mpsc::Receiver<SignalCommand>,
        views_rx: broadcast::Receiver<AggregatedView>,
        constraints_rx: watch::Receiver<ExecutionConstraints>,
        outcomes_tx: mpsc::Sender<Outcome>,
        sink: Arc<dyn PersistenceSink>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            simulator,
            signals_rx,
            views_rx,
            constraints_rx,
            outcomes_tx,
            sink,
            shutdown_rx,
            metrics,
            pending: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        info!("SimulatorAgent started.");
        let mut exec_timer = tokio::time::interval(std::time::Duration::from_millis(25));
        exec_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.signals_rx.recv() => {
                    match command {
                        Some(SignalCommand::Emit(signal)) => self.on_signal(signal).await,
                        Some(SignalCommand::Cancel(signal_id)) => {
                            self.pending.retain(|(_, s, _, _)| s.signal_id != signal_id);
                        }
                        None => {
                            warn!("SimulatorAgent: signal stream closed.");
                            break;
                        }
                    }
                }
                result = self.views_rx.recv() => {
                    match result {
                        Ok(view) => self.on_view(view).await,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => {
                            warn!("SimulatorAgent: view stream closed.");
                            break;
                        }
                    }
                }
                _ = exec_timer.tick() => {
                    self.process_due_executions().await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("SimulatorAgent: shutdown signal received.");
                        break;
                    }
                }
            }
        }

        // Final stress battery over the book as it stood, then flush:
        // force-close open positions as Manual with as-of timestamps.
        let now = Utc::now();
        if !self.simulator.portfolio().positions().is_empty() {
            for result in stress::run_battery(self.simulator.portfolio(), now) {
                info!(
                    "SimulatorAgent: stress '{}': loss {} ({:.1}%)",
                    result.scenario,
                    result.total_loss,
                    result.loss_pct * 100.0
                );
            }
        }
        let closed = self.simulator.close_all(now);
        for event in closed {
            self.report_close(&event, now).await;
        }
        let summary = self.simulator.performance().summary();
        info!(
            "SimulatorAgent stopped ({} trades, win rate {:.1}%, pnl {}).",
            summary.total_trades,
            summary.win_rate * 100.0,
            summary.realized_pnl
        );
    }

    async fn on_signal(&mut self, signal: LiveTradingSignal) {
        let now = Utc::now();
        let constraints = self.constraints_rx.borrow().clone();

        match self.simulator.decide(&signal, &constraints) {
            SignalDecision::Accepted {
                quantity,
                reference,
            } => {
                let latency = self.simulator.execution.latency.next_latency();
                let due = now
                    + chrono::Duration::from_std(latency)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                self.pending.push_back((due, signal, quantity, reference));
            }
            SignalDecision::Rejected(rejection) => {
                self.metrics.signals_filtered_total.inc();
                self.report_filtered(&signal, rejection.code(), now).await;
            }
            SignalDecision::Unpriced => {
                self.metrics.signals_filtered_total.inc();
                self.report_filtered(&signal, "no_reference_price", now).await;
            }
        }
    }

    async fn process_due_executions(&mut self) {
        let now = Utc::now();
        // Latencies differ per order, so due entries are not necessarily at
        // the front.
        let mut due_items = Vec::new();
        self.pending.retain(|entry| {
            if entry.0 <= now {
                due_items.push(entry.clone());
                false
            } else {
                true
            }
        });

        for (_, signal, quantity, reference) in due_items {
            let constraints = self.constraints_rx.borrow().clone();

            // Constraints may have hardened while the order was in flight.
            if constraints.halt_new_positions {
                self.metrics.signals_filtered_total.inc();
                self.report_filtered(&signal, RiskRejection::OpeningsHalted.code(), now)
                    .await;
                continue;
            }

            match self
                .simulator
                .execute(&signal, quantity, reference, &constraints, now)
            {
                Some((_position, _fill)) => {
                    self.publish_snapshot(now).await;
                }
                None => {
                    self.metrics.signals_filtered_total.inc();
                    self.report_filtered(&signal, "execution_failed", now).await;
                }
            }
        }
    }

    async fn on_view(&mut self, view: AggregatedView) {
        let now = Utc::now();
        let closed = self.simulator.on_view(&view, now);
        for event in closed {
            self.report_close(&event, now).await;
        }
    }

    async fn report_close(&mut self, event: &ClosedEvent, now: DateTime<Utc>) {
        let outcome = Outcome {
            signal_id: event.position.signal_id,
            pair: event.position.pair.clone(),
            realized_return: event.realized_return,
            kind: OutcomeKind::Closed(event.reason),
            under_override: event.position.under_override,
            measured_at: now,
        };
        self.persist(EnvelopeKind::Outcome, &outcome).await;
        if self.outcomes_tx.send(outcome).await.is_err() {
            warn!("SimulatorAgent: correlation tracker gone");
        }
        self.publish_snapshot(now).await;
    }

    /// Risk rejections are first-class outcomes, not errors: the tracker
    /// measures their would-be return at horizon.
    async fn report_filtered(&mut self, signal: &LiveTradingSignal, reason: &str, now: DateTime<Utc>) {
        let outcome = Outcome {
            signal_id: signal.signal_id,
            pair: signal.pair.clone(),
            realized_return: 0.0,
            kind: OutcomeKind::Filtered {
                reason: reason.to_string(),
            },
            under_override: self.constraints_rx.borrow().under_override,
            measured_at: now,
        };
        self.persist(EnvelopeKind::Outcome, &outcome).await;
        if self.outcomes_tx.send(outcome).await.is_err() {
            warn!("SimulatorAgent: correlation tracker gone");
        }
    }

    async fn publish_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = self.simulator.portfolio_mut().snapshot(now);
        self.metrics
            .portfolio_equity
            .set(snapshot.equity.to_f64().unwrap_or(0.0));
        self.persist(EnvelopeKind::PortfolioSnapshot, &snapshot).await;
    }

    async fn persist<T: serde::Serialize>(&self, kind: EnvelopeKind, payload: &T) {
        match Envelope::new(kind, payload) {
            Ok(envelope) => {
                if let Err(e) = self.sink.append(envelope).await {
                    warn!("SimulatorAgent: failed to persist {:?}: {}", kind, e);
                }
            }
            Err(e) => warn!("SimulatorAgent: failed to serialize {:?}: {}", kind, e),
        }
    }
}
