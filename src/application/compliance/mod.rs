// Corrective action design and escalation
pub mod actions;

// The TRS control loop
pub mod engine;

// Trend projection of the measured correlation
pub mod forecast;

// Period ledger and regulatory report assembly
pub mod reporting;

use crate::application::compliance::engine::ComplianceEngine;
use crate::application::correlation::CorrelationHandle;
use crate::domain::market::AggregatedView;
use crate::domain::ports::PersistenceSink;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Operator commands accepted by the compliance engine.
#[derive(Debug)]
pub enum ComplianceCommand {
    ActivateOverride {
        justification: String,
        authorized_by: String,
        duration: Duration,
    },
}

/// Task wrapper around [`ComplianceEngine`]: runs the monitoring cadence and
/// the 24h report schedule, watches data staleness, and persists whatever
/// the engine emits.
pub struct ComplianceAgent {
    engine: ComplianceEngine,
    correlation: CorrelationHandle,
    views_rx: broadcast::Receiver<AggregatedView>,
    command_rx: mpsc::Receiver<ComplianceCommand>,
    sink: Arc<dyn PersistenceSink>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
    monitoring_interval_ms: u64,
    stale_threshold_ms: i64,
    last_view_at: Option<DateTime<Utc>>,
}

impl ComplianceAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: ComplianceEngine,
        correlation: CorrelationHandle,
        views_rx: broadcast::Receiver<AggregatedView>,
        command_rx: mpsc::Receiver<ComplianceCommand>,
        sink: Arc<dyn PersistenceSink>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
        monitoring_interval_ms: u64,
        stale_threshold_ms: i64,
    ) -> Self {
        Self {
            engine,
            correlation,
            views_rx,
            command_rx,
            sink,
            shutdown_rx,
            metrics,
            monitoring_interval_ms,
            stale_threshold_ms,
            last_view_at: None,
        }
    }

    pub async fn run(mut self) {
        info!("ComplianceAgent started.");
        let mut monitor = tokio::time::interval(std::time::Duration::from_millis(
            self.monitoring_interval_ms.max(1),
        ));
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut report_schedule =
            tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        report_schedule.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; consume it so the 24h
        // schedule starts one period from now.
        report_schedule.tick().await;

        loop {
            tokio::select! {
                _ = monitor.tick() => {
                    self.control_cycle().await;
                }
                _ = report_schedule.tick() => {
                    let envelope = self.engine.scheduled_report(Utc::now());
                    self.persist(envelope).await;
                }
                result = self.views_rx.recv() => {
                    match result {
                        Ok(view) => self.last_view_at = Some(view.as_of),
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => {
                            warn!("ComplianceAgent: view stream closed.");
                            break;
                        }
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(ComplianceCommand::ActivateOverride { justification, authorized_by, duration }) => {
                            if let Err(reason) = self.engine.activate_override(
                                justification,
                                authorized_by,
                                duration,
                                Utc::now(),
                            ) {
                                warn!("ComplianceAgent: override rejected: {}", reason);
                            }
                        }
                        None => {
                            info!("ComplianceAgent: command channel closed.");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("ComplianceAgent: shutdown signal received.");
                        break;
                    }
                }
            }
        }
        info!("ComplianceAgent stopped (status: {}).", self.engine.status());
    }

    async fn control_cycle(&mut self) {
        let now = Utc::now();
        let readings = self.correlation.read().await.clone();
        let stale = self
            .last_view_at
            .map(|at| (now - at).num_milliseconds() > self.stale_threshold_ms)
            .unwrap_or(true);

        let envelopes = self.engine.cycle(&readings, stale, now);
        self.metrics
            .compliance_status
            .set(self.engine.status().severity_rank() as i64);
        for envelope in envelopes {
            self.persist(envelope).await;
        }
    }

    async fn persist(&self, envelope: crate::domain::events::Envelope) {
        if let Err(e) = self.sink.append(envelope).await {
            warn!("ComplianceAgent: failed to persist record: {}", e);
        }
    }
}
