// Reliability-weighted view aggregation and arbitrage detection
pub mod aggregator;

// Per-exchange stream health scoring and failover
pub mod health;

// Regime classification over aggregated observations
pub mod regime;

use crate::application::market_data::aggregator::MarketDataAggregator;
use crate::application::market_data::health::StreamHealthMonitor;
use crate::domain::events::HealthUpdate;
use crate::domain::market::{AggregatedView, ArbitrageHint};
use crate::domain::ports::HistoricalStore;
use crate::domain::types::StreamEvent;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Consumes the merged per-exchange event stream, maintains stream health,
/// and publishes aggregated views, health updates and arbitrage hints.
///
/// Views are published on a broadcast channel: if a downstream consumer lags
/// the oldest views are superseded (latest-wins), never reordered.
pub struct MarketDataAgent {
    monitor: StreamHealthMonitor,
    aggregator: MarketDataAggregator,
    events_rx: mpsc::Receiver<StreamEvent>,
    views_tx: broadcast::Sender<AggregatedView>,
    health_tx: broadcast::Sender<HealthUpdate>,
    hints_tx: broadcast::Sender<ArbitrageHint>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
}

impl MarketDataAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        monitor: StreamHealthMonitor,
        aggregator: MarketDataAggregator,
        events_rx: mpsc::Receiver<StreamEvent>,
        views_tx: broadcast::Sender<AggregatedView>,
        health_tx: broadcast::Sender<HealthUpdate>,
        hints_tx: broadcast::Sender<ArbitrageHint>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            monitor,
            aggregator,
            events_rx,
            views_tx,
            health_tx,
            hints_tx,
            shutdown_rx,
            metrics,
        }
    }

    /// Rewarms the regime windows from the historical store before the live
    /// stream starts. In-flight work from a previous run is not replayed.
    pub async fn warm_up(&mut self, store: &dyn HistoricalStore, pairs: &[String], window: usize) {
        for pair in pairs {
            match store.recent_views(pair, window).await {
                Ok(views) if !views.is_empty() => {
                    self.aggregator.warm_up(pair, &views);
                }
                Ok(_) => {
                    info!("MarketDataAgent: no history for {} - cold start", pair);
                }
                Err(e) => {
                    warn!("MarketDataAgent: warm-up failed for {}: {}", pair, e);
                }
            }
        }
    }

    pub async fn run(mut self) {
        info!("MarketDataAgent started.");
        let mut refresh = tokio::time::interval(std::time::Duration::from_millis(500));
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = self.events_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event),
                        None => {
                            warn!("MarketDataAgent: event stream ended.");
                            break;
                        }
                    }
                }
                _ = refresh.tick() => {
                    let updates = self.monitor.refresh(Utc::now());
                    self.broadcast_health(updates);
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("MarketDataAgent: shutdown signal received.");
                        break;
                    }
                }
            }
        }

        info!(
            "MarketDataAgent stopped ({} ticks aggregated, {} stale).",
            self.aggregator.ticks_aggregated(),
            self.aggregator.stale_view_count()
        );
    }

    fn handle_event(&mut self, event: StreamEvent) {
        let now = Utc::now();
        match &event {
            StreamEvent::Tick(_) => self.metrics.ticks_total.inc(),
            StreamEvent::OverflowDrop { count, .. } => {
                self.metrics.ticks_dropped_total.inc_by(*count);
            }
            StreamEvent::Error { .. } => self.metrics.malformed_payloads_total.inc(),
            _ => {}
        }

        let updates = self.monitor.on_event(&event, now);
        self.broadcast_health(updates);

        if let StreamEvent::Tick(tick) = event {
            let weights = self.monitor.weights();
            let total = self.monitor.total_prior_weight();
            let result = self.aggregator.on_tick(tick, &weights, total, now);

            match result.view {
                Some(view) => {
                    self.metrics.views_total.inc();
                    // Send fails only when no receiver is attached yet.
                    let _ = self.views_tx.send(view);
                }
                None => self.metrics.stale_views_total.inc(),
            }
            if let Some(hint) = result.hint {
                let _ = self.hints_tx.send(hint);
            }
        }
    }

    fn broadcast_health(&self, updates: Vec<HealthUpdate>) {
        for update in updates {
            let _ = self.health_tx.send(update);
        }
    }
}
