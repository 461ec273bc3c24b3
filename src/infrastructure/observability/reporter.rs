//! Push-based metrics reporter.
//!
//! Periodically outputs a metrics snapshot as structured JSON to stdout with
//! a `METRICS_JSON:` prefix for log collectors. Only sends data, never
//! accepts requests.

use crate::infrastructure::observability::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

#[derive(Serialize)]
struct MetricsSnapshot {
    timestamp: String,
    uptime_seconds: u64,
    version: String,
    ticks_total: u64,
    ticks_dropped_total: u64,
    views_total: u64,
    stale_views_total: u64,
    signals_emitted_total: u64,
    signals_filtered_total: u64,
    outcomes_total: u64,
    compliance_status: i64,
    portfolio_correlation: f64,
    portfolio_equity: f64,
    sink_degraded: bool,
}

pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_seconds: u64, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            "MetricsReporter: push-based metrics started (interval: {:?})",
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let snapshot = self.collect();
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => {
                            println!("METRICS_JSON:{}", json);
                            info!(
                                "Correlation: {:.4} | Status rank: {} | Signals: {} | Equity: {:.2}",
                                snapshot.portfolio_correlation,
                                snapshot.compliance_status,
                                snapshot.signals_emitted_total,
                                snapshot.portfolio_equity
                            );
                        }
                        Err(e) => info!("MetricsReporter: failed to serialize snapshot: {}", e),
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("MetricsReporter: shutdown signal received.");
                        break;
                    }
                }
            }
        }
    }

    fn collect(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ticks_total: self.metrics.ticks_total.get(),
            ticks_dropped_total: self.metrics.ticks_dropped_total.get(),
            views_total: self.metrics.views_total.get(),
            stale_views_total: self.metrics.stale_views_total.get(),
            signals_emitted_total: self.metrics.signals_emitted_total.get(),
            signals_filtered_total: self.metrics.signals_filtered_total.get(),
            outcomes_total: self.metrics.outcomes_total.get(),
            compliance_status: self.metrics.compliance_status.get(),
            portfolio_correlation: self.metrics.portfolio_correlation.get(),
            portfolio_equity: self.metrics.portfolio_equity.get(),
            sink_degraded: self.metrics.sink_degraded.get() != 0,
        }
    }
}
