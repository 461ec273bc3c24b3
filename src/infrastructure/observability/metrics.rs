//! Prometheus metrics definitions for the pipeline.
//!
//! All metrics use the `pairtrade_` prefix and are read-only.

use prometheus::{
    Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the signal-and-compliance pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks received across all exchanges
    pub ticks_total: IntCounter,
    /// Ticks discarded by adapter overflow
    pub ticks_dropped_total: IntCounter,
    /// Payloads rejected during normalization
    pub malformed_payloads_total: IntCounter,
    /// Aggregated views published
    pub views_total: IntCounter,
    /// Ticks that produced no view (no qualifying exchange)
    pub stale_views_total: IntCounter,
    /// Signals emitted past the quality gate
    pub signals_emitted_total: IntCounter,
    /// Signal candidates suppressed by the quality gate
    pub signals_suppressed_total: IntCounter,
    /// Signals cancelled by crisis handling
    pub signals_cancelled_total: IntCounter,
    /// Signals rejected by risk checks (filtered outcomes)
    pub signals_filtered_total: IntCounter,
    /// Outcomes joined by the correlation tracker
    pub outcomes_total: IntCounter,
    /// Compliance status severity rank (0=compliant .. 3=emergency)
    pub compliance_status: IntGauge,
    /// Rolling portfolio-wide correlation
    pub portfolio_correlation: GenericGauge<AtomicF64>,
    /// Simulated portfolio equity
    pub portfolio_equity: GenericGauge<AtomicF64>,
    /// Persistence sink degraded flag (0/1)
    pub sink_degraded: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_total = IntCounter::with_opts(Opts::new(
            "pairtrade_ticks_total",
            "Ticks received across all exchanges",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let ticks_dropped_total = IntCounter::with_opts(Opts::new(
            "pairtrade_ticks_dropped_total",
            "Ticks discarded by adapter overflow",
        ))?;
        registry.register(Box::new(ticks_dropped_total.clone()))?;

        let malformed_payloads_total = IntCounter::with_opts(Opts::new(
            "pairtrade_malformed_payloads_total",
            "Payloads rejected during normalization",
        ))?;
        registry.register(Box::new(malformed_payloads_total.clone()))?;

        let views_total = IntCounter::with_opts(Opts::new(
            "pairtrade_views_total",
            "Aggregated views published",
        ))?;
        registry.register(Box::new(views_total.clone()))?;

        let stale_views_total = IntCounter::with_opts(Opts::new(
            "pairtrade_stale_views_total",
            "Ticks that produced no view",
        ))?;
        registry.register(Box::new(stale_views_total.clone()))?;

        let signals_emitted_total = IntCounter::with_opts(Opts::new(
            "pairtrade_signals_emitted_total",
            "Signals emitted past the quality gate",
        ))?;
        registry.register(Box::new(signals_emitted_total.clone()))?;

        let signals_suppressed_total = IntCounter::with_opts(Opts::new(
            "pairtrade_signals_suppressed_total",
            "Signal candidates suppressed by the quality gate",
        ))?;
        registry.register(Box::new(signals_suppressed_total.clone()))?;

        let signals_cancelled_total = IntCounter::with_opts(Opts::new(
            "pairtrade_signals_cancelled_total",
            "Signals cancelled by crisis handling",
        ))?;
        registry.register(Box::new(signals_cancelled_total.clone()))?;

        let signals_filtered_total = IntCounter::with_opts(Opts::new(
            "pairtrade_signals_filtered_total",
            "Signals rejected by risk checks",
        ))?;
        registry.register(Box::new(signals_filtered_total.clone()))?;

        let outcomes_total = IntCounter::with_opts(Opts::new(
            "pairtrade_outcomes_total",
            "Outcomes joined by the correlation tracker",
        ))?;
        registry.register(Box::new(outcomes_total.clone()))?;

        let compliance_status = IntGauge::with_opts(Opts::new(
            "pairtrade_compliance_status",
            "Compliance status severity rank (0=compliant .. 3=emergency)",
        ))?;
        registry.register(Box::new(compliance_status.clone()))?;

        let portfolio_correlation = Gauge::with_opts(Opts::new(
            "pairtrade_portfolio_correlation",
            "Rolling portfolio-wide correlation",
        ))?;
        registry.register(Box::new(portfolio_correlation.clone()))?;

        let portfolio_equity = Gauge::with_opts(Opts::new(
            "pairtrade_portfolio_equity",
            "Simulated portfolio equity",
        ))?;
        registry.register(Box::new(portfolio_equity.clone()))?;

        let sink_degraded = IntGauge::with_opts(Opts::new(
            "pairtrade_sink_degraded",
            "Persistence sink degraded flag",
        ))?;
        registry.register(Box::new(sink_degraded.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_total,
            ticks_dropped_total,
            malformed_payloads_total,
            views_total,
            stale_views_total,
            signals_emitted_total,
            signals_suppressed_total,
            signals_cancelled_total,
            signals_filtered_total,
            outcomes_total,
            compliance_status,
            portfolio_correlation,
            portfolio_equity,
            sink_degraded,
        })
    }

    /// Text exposition of the whole registry for log shipping.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.ticks_total.inc_by(5);
        metrics.portfolio_correlation.set(0.87);
        metrics.compliance_status.set(1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("pairtrade_ticks_total 5"));
        assert!(text.contains("pairtrade_portfolio_correlation 0.87"));
        assert!(text.contains("pairtrade_compliance_status 1"));
    }

    #[test]
    fn test_double_registration_rejected() {
        // Each Metrics instance owns its registry; building two must work.
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.ticks_total.inc();
        assert_eq!(second.ticks_total.get(), 0);
    }
}
