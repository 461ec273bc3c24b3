use crate::application::simulation::portfolio::SimPortfolio;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// An injected market scenario evaluated against a portfolio clone. Results
/// live on this separate branch and never touch live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Signed shock applied to every marked price (e.g. -0.20).
    pub shock_pct: f64,
    pub shock_duration: Duration,
    /// How much of the loss is amplified by correlations breaking down.
    pub correlation_breakdown_factor: f64,
}

impl StressScenario {
    pub fn market_crash() -> Self {
        Self {
            name: "market_crash".to_string(),
            shock_pct: -0.20,
            shock_duration: Duration::hours(24),
            correlation_breakdown_factor: 0.5,
        }
    }

    pub fn flash_crash() -> Self {
        Self {
            name: "flash_crash".to_string(),
            shock_pct: -0.10,
            shock_duration: Duration::hours(1),
            correlation_breakdown_factor: 0.2,
        }
    }

    pub fn correlation_crisis() -> Self {
        Self {
            name: "correlation_crisis".to_string(),
            shock_pct: -0.05,
            shock_duration: Duration::hours(48),
            correlation_breakdown_factor: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: String,
    pub evaluated_at: DateTime<Utc>,
    pub pre_shock_equity: Decimal,
    pub shocked_equity: Decimal,
    pub total_loss: Decimal,
    pub loss_pct: f64,
}

/// Applies the scenario to a clone of the portfolio: every marked price is
/// shocked, open-position losses are computed, and the correlation-breakdown
/// amplification is added on top.
pub fn evaluate(
    portfolio: &SimPortfolio,
    scenario: &StressScenario,
    now: DateTime<Utc>,
) -> StressResult {
    let mut branch = portfolio.clone();
    let pre_shock_equity = branch.equity();

    let pairs: Vec<String> = branch.positions().keys().cloned().collect();
    for pair in &pairs {
        if let Some(price) = branch.last_price(pair) {
            let shocked = price.to_f64().unwrap_or(0.0) * (1.0 + scenario.shock_pct);
            branch.mark(pair, Decimal::from_f64(shocked.max(0.0)).unwrap_or(price));
        }
    }

    let shocked_equity = branch.equity();
    let direct_loss = (pre_shock_equity - shocked_equity).max(Decimal::ZERO);
    let breakdown_amplification = direct_loss.to_f64().unwrap_or(0.0)
        * scenario.correlation_breakdown_factor
        * 0.5;
    let total_loss =
        direct_loss + Decimal::from_f64(breakdown_amplification).unwrap_or(Decimal::ZERO);

    let loss_pct = if pre_shock_equity > Decimal::ZERO {
        (total_loss / pre_shock_equity).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };

    StressResult {
        scenario: scenario.name.clone(),
        evaluated_at: now,
        pre_shock_equity,
        shocked_equity: pre_shock_equity - total_loss,
        total_loss,
        loss_pct,
    }
}

/// Evaluates the standard scenario battery.
pub fn run_battery(portfolio: &SimPortfolio, now: DateTime<Utc>) -> Vec<StressResult> {
    [
        StressScenario::market_crash(),
        StressScenario::flash_crash(),
        StressScenario::correlation_crisis(),
    ]
    .iter()
    .map(|scenario| evaluate(portfolio, scenario, now))
    .collect()
}
