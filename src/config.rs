use crate::domain::errors::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Execution latency sampling model for the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyDistribution {
    Uniform { min_ms: u64, max_ms: u64 },
    Zero,
}

/// Immutable pipeline configuration, constructed once at startup by the
/// external loader and validated before any task is spawned. The core never
/// reads the environment directly.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    // Compliance engine cadence and classification
    pub monitoring_interval_ms: u64,
    pub target_correlation: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub emergency_threshold: f64,

    // Simulator risk gates
    pub initial_cash: Decimal,
    pub max_position_size: f64,
    pub max_gross_exposure: f64,
    pub max_drawdown: f64,
    pub correlation_bucket_threshold: f64,

    // Signal quality gate (base values; override-able by corrective actions)
    pub min_confidence_threshold_base: f64,
    pub min_data_quality_base: f64,
    pub min_participants_base: usize,
    pub min_strength_base: f64,
    pub max_concurrent_signals: usize,

    // Signal synthesis
    pub ratio_window: usize,
    pub max_expected_return: f64,
    pub signal_horizon_hours: i64,
    pub signal_refresh_ms: u64,

    // Exchange weighting
    pub reliability_priors: HashMap<String, f64>,

    // Pairs to warm up from the historical store on startup
    pub pairs: Vec<String>,

    // Execution simulation
    pub slippage_base_bps: f64,
    pub market_impact_coef: f64,
    pub transaction_cost_bps: f64,
    pub latency_distribution: LatencyDistribution,

    // Aggregation
    pub warmup_window_steps: usize,
    pub freshness_window_ms: i64,
    pub stale_threshold_ms: i64,
    pub arbitrage_net_threshold_bps: f64,
    pub arbitrage_round_trip_cost_bps: f64,

    // Correlation tracking
    pub correlation_buffer_size: usize,

    // Score oracle budget
    pub oracle_max_requests_per_hour: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_ms: 10_000,
            target_correlation: 0.85,
            warning_threshold: 0.80,
            critical_threshold: 0.75,
            emergency_threshold: 0.70,

            initial_cash: dec!(100000),
            max_position_size: 0.10,
            max_gross_exposure: 0.50,
            max_drawdown: 0.20,
            correlation_bucket_threshold: 0.8,

            min_confidence_threshold_base: 0.6,
            min_data_quality_base: 0.8,
            min_participants_base: 2,
            min_strength_base: 0.1,
            max_concurrent_signals: 10,

            ratio_window: 200,
            max_expected_return: 0.02,
            signal_horizon_hours: 6,
            signal_refresh_ms: 200,

            reliability_priors: HashMap::new(),

            pairs: Vec::new(),

            slippage_base_bps: 5.0,
            market_impact_coef: 0.1,
            transaction_cost_bps: 8.0,
            latency_distribution: LatencyDistribution::Uniform {
                min_ms: 50,
                max_ms: 200,
            },

            warmup_window_steps: 60,
            freshness_window_ms: 2_000,
            stale_threshold_ms: 5_000,
            arbitrage_net_threshold_bps: 25.0,
            arbitrage_round_trip_cost_bps: 20.0,

            correlation_buffer_size: 1_000,

            oracle_max_requests_per_hour: 30,
        }
    }
}

impl CoreConfig {
    /// Validates the configuration. Failures here are fatal: the pipeline
    /// refuses to start rather than run with a misconfigured compliance
    /// target or risk gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.target_correlation) {
            return Err(ConfigError::InvalidTargetCorrelation(
                self.target_correlation,
            ));
        }

        if !(self.emergency_threshold < self.critical_threshold
            && self.critical_threshold < self.warning_threshold
            && self.warning_threshold <= self.target_correlation)
        {
            return Err(ConfigError::UnorderedThresholds(format!(
                "emergency={}, critical={}, warning={}, target={}",
                self.emergency_threshold,
                self.critical_threshold,
                self.warning_threshold,
                self.target_correlation
            )));
        }

        if self.reliability_priors.is_empty() {
            return Err(ConfigError::NoExchanges);
        }
        for (exchange, prior) in &self.reliability_priors {
            if !(0.0..=1.0).contains(prior) {
                return Err(ConfigError::InvalidReliabilityPrior {
                    exchange: exchange.clone(),
                    prior: *prior,
                });
            }
        }

        Self::check_fraction("max_position_size", self.max_position_size)?;
        Self::check_fraction("max_gross_exposure", self.max_gross_exposure)?;
        Self::check_fraction("max_drawdown", self.max_drawdown)?;
        Self::check_fraction(
            "correlation_bucket_threshold",
            self.correlation_bucket_threshold,
        )?;
        Self::check_fraction(
            "min_confidence_threshold_base",
            self.min_confidence_threshold_base,
        )?;
        Self::check_fraction("min_data_quality_base", self.min_data_quality_base)?;

        if let LatencyDistribution::Uniform { min_ms, max_ms } = self.latency_distribution
            && min_ms > max_ms
        {
            return Err(ConfigError::InvalidLatencyRange { min_ms, max_ms });
        }

        Ok(())
    }

    fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
        if value <= 0.0 || value > 1.0 {
            return Err(ConfigError::OutOfRange {
                name,
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }

    /// Convenience for tests: a valid config with the given exchange priors.
    pub fn with_priors(priors: &[(&str, f64)]) -> Self {
        Self {
            reliability_priors: priors
                .iter()
                .map(|(id, p)| (id.to_string(), *p))
                .collect(),
            ..Self::default()
        }
    }
}
