use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Expiry,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::Expiry => write!(f, "expiry"),
            CloseReason::Manual => write!(f, "manual"),
        }
    }
}

/// How the simulated venue filled an accepted order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FillResult {
    Filled,
    /// Limit breached; only `fraction` of the requested quantity filled.
    PartialFill { fraction: f64 },
    Failed,
}

/// A position held by the paper-trading simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedPosition {
    pub position_id: Uuid,
    pub signal_id: Uuid,
    pub pair: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    /// Set when the position was opened during a compliance override window.
    pub under_override: bool,
}

impl SimulatedPosition {
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (current_price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Signed return on the position at a mark price.
    pub fn return_at(&self, current_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let gross = (current_price - self.entry_price) / self.entry_price;
        match self.side {
            PositionSide::Long => gross,
            PositionSide::Short => -gross,
        }
    }

    /// Whether the mark price has reached the stop or take-profit level.
    pub fn exit_trigger(&self, current_price: Decimal) -> Option<CloseReason> {
        match self.side {
            PositionSide::Long => {
                if current_price <= self.stop_loss {
                    Some(CloseReason::StopLoss)
                } else if current_price >= self.take_profit {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if current_price >= self.stop_loss {
                    Some(CloseReason::StopLoss)
                } else if current_price <= self.take_profit {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }
}

/// Point-in-time portfolio state, advanced only forward in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub as_of: DateTime<Utc>,
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions: HashMap<String, SimulatedPosition>,
    pub gross_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub drawdown_from_peak: f64,
}

/// What happened to a signal, as reported back to the correlation tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// A position was opened and later closed.
    Closed(CloseReason),
    /// The signal was rejected by a risk check; realized return is the
    /// would-be return at horizon from the reference price.
    Filtered { reason: String },
    /// The signal's horizon elapsed before any fill.
    Expired,
}

/// Realized outcome for a signal, keyed by signal id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub signal_id: Uuid,
    pub pair: String,
    pub realized_return: f64,
    pub kind: OutcomeKind,
    pub under_override: bool,
    pub measured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: PositionSide) -> SimulatedPosition {
        SimulatedPosition {
            position_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            pair: "BTC/ETH".to_string(),
            side,
            entry_price: dec!(13.30),
            quantity: dec!(100),
            stop_loss: match side {
                PositionSide::Long => dec!(13.00),
                PositionSide::Short => dec!(13.60),
            },
            take_profit: match side {
                PositionSide::Long => dec!(14.00),
                PositionSide::Short => dec!(12.60),
            },
            opened_at: Utc::now(),
            closed_at: None,
            realized_pnl: None,
            under_override: false,
        }
    }

    #[test]
    fn test_long_pnl_and_triggers() {
        let pos = position(PositionSide::Long);
        assert_eq!(pos.unrealized_pnl(dec!(13.50)), dec!(20.00));
        assert_eq!(pos.exit_trigger(dec!(13.50)), None);
        assert_eq!(pos.exit_trigger(dec!(12.99)), Some(CloseReason::StopLoss));
        assert_eq!(pos.exit_trigger(dec!(14.10)), Some(CloseReason::TakeProfit));
    }

    #[test]
    fn test_short_pnl_and_triggers() {
        let pos = position(PositionSide::Short);
        assert_eq!(pos.unrealized_pnl(dec!(13.00)), dec!(30.00));
        assert_eq!(pos.exit_trigger(dec!(13.70)), Some(CloseReason::StopLoss));
        assert_eq!(pos.exit_trigger(dec!(12.50)), Some(CloseReason::TakeProfit));
    }

    #[test]
    fn test_return_at_sign() {
        let long = position(PositionSide::Long);
        assert!(long.return_at(dec!(13.50)) > Decimal::ZERO);
        let short = position(PositionSide::Short);
        assert!(short.return_at(dec!(13.50)) < Decimal::ZERO);
    }
}
