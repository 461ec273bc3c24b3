use crate::config::{CoreConfig, LatencyDistribution};
use crate::domain::trading::{FillResult, PositionSide};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::time::Duration;

/// Trait defining an execution latency simulation model.
pub trait LatencyModel: Send + Sync {
    /// Duration between order acceptance and fill confirmation.
    fn next_latency(&self) -> Duration;
}

/// Uniformly sampled latency, the default venue model.
#[derive(Debug, Clone)]
pub struct UniformLatency {
    min_ms: u64,
    max_ms: u64,
}

impl UniformLatency {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms: max_ms.max(min_ms),
        }
    }
}

impl LatencyModel for UniformLatency {
    fn next_latency(&self) -> Duration {
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }
}

/// Instant execution for tests and pure logic verification.
pub struct ZeroLatency;

impl LatencyModel for ZeroLatency {
    fn next_latency(&self) -> Duration {
        Duration::from_millis(0)
    }
}

/// Trait defining a slippage simulation model.
pub trait SlippageModel: Send + Sync {
    /// Effective execution price for an order against the reference price.
    fn execution_price(
        &self,
        reference: Decimal,
        quantity: Decimal,
        rolling_daily_volume: Decimal,
        side: PositionSide,
    ) -> Decimal;
}

/// Base slippage plus size-dependent market impact. The price always moves
/// against the taker: up for entries on the long side, down for shorts.
#[derive(Debug, Clone)]
pub struct ImpactSlippage {
    base_bps: f64,
    impact_coef: f64,
}

impl ImpactSlippage {
    pub fn new(base_bps: f64, impact_coef: f64) -> Self {
        Self {
            base_bps,
            impact_coef,
        }
    }

    fn slippage_factor(&self, quantity: Decimal, rolling_daily_volume: Decimal) -> f64 {
        let base = self.base_bps / 10_000.0;
        let volume = rolling_daily_volume.to_f64().unwrap_or(0.0);
        if volume <= 0.0 {
            return base;
        }
        let participation = quantity.to_f64().unwrap_or(0.0) / volume;
        base + participation * self.impact_coef
    }
}

impl SlippageModel for ImpactSlippage {
    fn execution_price(
        &self,
        reference: Decimal,
        quantity: Decimal,
        rolling_daily_volume: Decimal,
        side: PositionSide,
    ) -> Decimal {
        let factor = self.slippage_factor(quantity, rolling_daily_volume);
        let signed = match side {
            PositionSide::Long => 1.0 + factor,
            PositionSide::Short => 1.0 - factor,
        };
        let executed = reference.to_f64().unwrap_or(0.0) * signed;
        Decimal::from_f64(executed).unwrap_or(reference)
    }
}

/// Perfect execution at the reference price.
pub struct ZeroSlippage;

impl SlippageModel for ZeroSlippage {
    fn execution_price(
        &self,
        reference: Decimal,
        _quantity: Decimal,
        _rolling_daily_volume: Decimal,
        _side: PositionSide,
    ) -> Decimal {
        reference
    }
}

/// Flat per-notional transaction cost.
pub fn transaction_cost(notional: Decimal, cost_bps: f64) -> Decimal {
    let cost = notional.to_f64().unwrap_or(0.0).abs() * cost_bps / 10_000.0;
    Decimal::from_f64(cost).unwrap_or(Decimal::ZERO)
}

/// Fill policy: execution beyond the configured deviation limit fills only a
/// proportional fraction of the requested quantity.
#[derive(Debug, Clone)]
pub struct FillPolicy {
    /// Maximum tolerated |executed - reference| / reference.
    pub max_deviation: f64,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            max_deviation: 0.01,
        }
    }
}

impl FillPolicy {
    pub fn fill(&self, reference: Decimal, executed: Decimal) -> FillResult {
        let reference_f = reference.to_f64().unwrap_or(0.0);
        let executed_f = executed.to_f64().unwrap_or(0.0);
        if reference_f <= 0.0 || executed_f <= 0.0 {
            return FillResult::Failed;
        }
        let deviation = ((executed_f - reference_f) / reference_f).abs();
        if deviation <= self.max_deviation {
            FillResult::Filled
        } else {
            FillResult::PartialFill {
                fraction: (self.max_deviation / deviation).clamp(0.0, 1.0),
            }
        }
    }
}

/// The complete venue model used by the simulator.
pub struct ExecutionModel {
    pub latency: Box<dyn LatencyModel>,
    pub slippage: Box<dyn SlippageModel>,
    pub cost_bps: f64,
    pub fill_policy: FillPolicy,
}

impl ExecutionModel {
    pub fn from_core(config: &CoreConfig) -> Self {
        let latency: Box<dyn LatencyModel> = match config.latency_distribution {
            LatencyDistribution::Uniform { min_ms, max_ms } => {
                Box::new(UniformLatency::new(min_ms, max_ms))
            }
            LatencyDistribution::Zero => Box::new(ZeroLatency),
        };
        Self {
            latency,
            slippage: Box::new(ImpactSlippage::new(
                config.slippage_base_bps,
                config.market_impact_coef,
            )),
            cost_bps: config.transaction_cost_bps,
            fill_policy: FillPolicy::default(),
        }
    }
}
