// O(1) rolling Pearson correlation with significance
pub mod rolling;

use crate::application::correlation::rolling::{CorrelationStats, RollingCorrelation};
use crate::application::signals::PredictionCommand;
use crate::domain::market::AggregatedView;
use crate::domain::signal::PendingPrediction;
use crate::domain::trading::{Outcome, OutcomeKind};
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read model shared with the compliance engine. The tracker task is the
/// single writer; readers take cheap snapshots.
#[derive(Debug, Clone, Default)]
pub struct CorrelationReadings {
    /// None means insufficient data (n < 2), never "zero correlation".
    pub portfolio: Option<CorrelationStats>,
    pub pairs: HashMap<String, CorrelationStats>,
    pub pending_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CorrelationReadings {
    pub fn trs_gap(&self, target: f64) -> Option<f64> {
        self.portfolio.map(|stats| target - stats.correlation)
    }
}

/// Shared handle for reading the tracker's current measurements.
pub type CorrelationHandle = Arc<RwLock<CorrelationReadings>>;

#[derive(Debug)]
struct Pending {
    prediction: PendingPrediction,
    filtered_reason: Option<String>,
}

/// Maintains rolling correlation of predicted vs realized outcomes, per pair
/// and portfolio-wide.
///
/// Realized returns come from simulator closes; for risk-filtered signals
/// and signals whose horizon elapses unfilled, the would-be return at the
/// horizon is computed from the aggregated price so filtered signals do not
/// bias the measurement.
pub struct CorrelationTracker {
    buffer_size: usize,
    portfolio: RollingCorrelation,
    pairs: HashMap<String, RollingCorrelation>,
    pending: HashMap<Uuid, Pending>,
    last_price: HashMap<String, Decimal>,
}

impl CorrelationTracker {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            portfolio: RollingCorrelation::new(buffer_size),
            pairs: HashMap::new(),
            pending: HashMap::new(),
            last_price: HashMap::new(),
        }
    }

    /// Registers a prediction awaiting its outcome. Exactly one entry per
    /// signal: duplicates are ignored.
    pub fn register(&mut self, prediction: PendingPrediction) {
        self.pending
            .entry(prediction.signal_id)
            .or_insert(Pending {
                prediction,
                filtered_reason: None,
            });
    }

    pub fn cancel(&mut self, signal_id: Uuid) {
        self.pending.remove(&signal_id);
    }

    pub fn on_view(&mut self, view: &AggregatedView) {
        self.last_price
            .insert(view.pair.clone(), view.aggregated_price);
    }

    /// Applies a realized outcome. At most one outcome is recorded per
    /// signal id; unknown or duplicate ids are dropped.
    pub fn on_outcome(&mut self, outcome: &Outcome) {
        let Some(pending) = self.pending.get_mut(&outcome.signal_id) else {
            debug!(
                "CorrelationTracker: outcome for unknown signal {}",
                outcome.signal_id
            );
            return;
        };

        match &outcome.kind {
            OutcomeKind::Filtered { reason } => {
                // Hold until horizon; the would-be return is measured there.
                pending.filtered_reason = Some(reason.clone());
            }
            OutcomeKind::Closed(_) | OutcomeKind::Expired => {
                let prediction = self
                    .pending
                    .remove(&outcome.signal_id)
                    .expect("pending checked above")
                    .prediction;
                self.record(&prediction.pair, prediction.predicted_return, outcome.realized_return);
            }
        }
    }

    /// Resolves pendings whose horizon has elapsed, using the latest
    /// aggregated price as the price at horizon. Pairs with no price yet
    /// stay pending until one arrives.
    pub fn resolve_expired(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, p)| p.prediction.expires_at <= now)
            .filter(|(_, p)| self.last_price.contains_key(&p.prediction.pair))
            .map(|(id, _)| *id)
            .collect();

        let count = due.len();
        for signal_id in due {
            let pending = self.pending.remove(&signal_id).expect("collected above");
            let prediction = pending.prediction;
            let price = self.last_price[&prediction.pair];
            let realized = would_be_return(&prediction, price);
            self.record(&prediction.pair, prediction.predicted_return, realized);
        }
        count
    }

    fn record(&mut self, pair: &str, predicted: f64, realized: f64) {
        self.portfolio.push(predicted, realized);
        self.pairs
            .entry(pair.to_string())
            .or_insert_with(|| RollingCorrelation::new(self.buffer_size))
            .push(predicted, realized);
    }

    pub fn readings(&self, now: DateTime<Utc>) -> CorrelationReadings {
        CorrelationReadings {
            portfolio: self.portfolio.stats(),
            pairs: self
                .pairs
                .iter()
                .filter_map(|(pair, rolling)| rolling.stats().map(|s| (pair.clone(), s)))
                .collect(),
            pending_count: self.pending.len(),
            updated_at: Some(now),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Direction-signed return from the reference price to the price at horizon.
fn would_be_return(prediction: &PendingPrediction, price_at_horizon: Decimal) -> f64 {
    let reference = prediction.reference_price.to_f64().unwrap_or(0.0);
    let horizon_price = price_at_horizon.to_f64().unwrap_or(0.0);
    if reference <= 0.0 {
        return 0.0;
    }
    prediction.direction.sign() * (horizon_price - reference) / reference
}

/// Task wrapper: consumes predictions, outcomes and views, publishes the
/// shared read model.
pub struct CorrelationAgent {
    tracker: CorrelationTracker,
    readings: CorrelationHandle,
    predictions_rx: mpsc::Receiver<PredictionCommand>,
    outcomes_rx: mpsc::Receiver<Outcome>,
    views_rx: broadcast::Receiver<AggregatedView>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
}

impl CorrelationAgent {
    pub fn new(
        tracker: CorrelationTracker,
        predictions_rx: mpsc::Receiver<PredictionCommand>,
        outcomes_rx: mpsc::Receiver<Outcome>,
        views_rx: broadcast::Receiver<AggregatedView>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> (Self, CorrelationHandle) {
        let readings: CorrelationHandle = Arc::new(RwLock::new(CorrelationReadings::default()));
        (
            Self {
                tracker,
                readings: readings.clone(),
                predictions_rx,
                outcomes_rx,
                views_rx,
                shutdown_rx,
                metrics,
            },
            readings,
        )
    }

    pub async fn run(mut self) {
        info!("CorrelationAgent started.");
        let mut resolve_timer = tokio::time::interval(std::time::Duration::from_secs(1));
        resolve_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let mut dirty = false;
            tokio::select! {
                command = self.predictions_rx.recv() => {
                    match command {
                        Some(PredictionCommand::Register(prediction)) => {
                            self.tracker.register(prediction);
                            dirty = true;
                        }
                        Some(PredictionCommand::Cancel(signal_id)) => {
                            self.tracker.cancel(signal_id);
                            dirty = true;
                        }
                        None => {
                            warn!("CorrelationAgent: prediction stream closed.");
                            break;
                        }
                    }
                }
                outcome = self.outcomes_rx.recv() => {
                    match outcome {
                        Some(outcome) => {
                            self.metrics.outcomes_total.inc();
                            self.tracker.on_outcome(&outcome);
                            dirty = true;
                        }
                        None => {
                            warn!("CorrelationAgent: outcome stream closed.");
                            break;
                        }
                    }
                }
                result = self.views_rx.recv() => {
                    match result {
                        Ok(view) => self.tracker.on_view(&view),
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => {
                            warn!("CorrelationAgent: view stream closed.");
                            break;
                        }
                    }
                }
                _ = resolve_timer.tick() => {
                    if self.tracker.resolve_expired(Utc::now()) > 0 {
                        dirty = true;
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("CorrelationAgent: shutdown signal received.");
                        break;
                    }
                }
            }

            if dirty {
                let readings = self.tracker.readings(Utc::now());
                if let Some(stats) = readings.portfolio {
                    self.metrics.portfolio_correlation.set(stats.correlation);
                }
                *self.readings.write().await = readings;
            }
        }
        info!(
            "CorrelationAgent stopped ({} predictions pending).",
            self.tracker.pending_count()
        );
    }
}
