use crate::domain::trading::{CloseReason, PortfolioSnapshot, SimulatedPosition};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use tracing::debug;

/// The paper portfolio. Margin-style accounting: opening reserves the entry
/// notional plus costs for both sides; closing releases the reservation plus
/// the realized P&L minus exit costs.
#[derive(Debug, Clone)]
pub struct SimPortfolio {
    cash: Decimal,
    positions: HashMap<String, SimulatedPosition>,
    last_price: HashMap<String, Decimal>,
    peak_equity: Decimal,
    daily_anchor: (chrono::NaiveDate, Decimal),
}

impl SimPortfolio {
    pub fn new(initial_cash: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            cash: initial_cash,
            positions: HashMap::new(),
            last_price: HashMap::new(),
            peak_equity: initial_cash,
            daily_anchor: (now.date_naive(), initial_cash),
        }
    }

    pub fn mark(&mut self, pair: &str, price: Decimal) {
        self.last_price.insert(pair.to_string(), price);
    }

    pub fn last_price(&self, pair: &str) -> Option<Decimal> {
        self.last_price.get(pair).copied()
    }

    pub fn position(&self, pair: &str) -> Option<&SimulatedPosition> {
        self.positions.get(pair)
    }

    pub fn positions(&self) -> &HashMap<String, SimulatedPosition> {
        &self.positions
    }

    pub fn has_position(&self, pair: &str) -> bool {
        self.positions.contains_key(pair)
    }

    pub fn open_notional(&self) -> HashMap<String, Decimal> {
        self.positions
            .iter()
            .map(|(pair, p)| (pair.clone(), p.notional()))
            .collect()
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.notional()).sum()
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Cash plus the marked value of every reservation.
    pub fn equity(&self) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .values()
            .map(|p| {
                let mark = self
                    .last_price
                    .get(&p.pair)
                    .copied()
                    .unwrap_or(p.entry_price);
                p.notional() + p.unrealized_pnl(mark)
            })
            .sum();
        self.cash + positions_value
    }

    /// Opens a position, reserving its notional and deducting entry costs.
    /// One position per pair; a second open on the same pair is a bug.
    pub fn open(&mut self, position: SimulatedPosition, entry_cost: Decimal) {
        debug_assert!(!self.positions.contains_key(&position.pair));
        self.cash -= position.notional() + entry_cost;
        debug!(
            "SimPortfolio: opened {} {} {}@{} (cash {})",
            position.side, position.pair, position.quantity, position.entry_price, self.cash
        );
        self.positions.insert(position.pair.clone(), position);
    }

    /// Closes the pair's position at `exit_price`, returning the closed
    /// record and the net realized return on entry notional.
    pub fn close(
        &mut self,
        pair: &str,
        exit_price: Decimal,
        exit_cost: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<(SimulatedPosition, f64)> {
        let mut position = self.positions.remove(pair)?;
        let gross_pnl = position.unrealized_pnl(exit_price);
        let net_pnl = gross_pnl - exit_cost;
        self.cash += position.notional() + net_pnl;

        position.closed_at = Some(now);
        position.realized_pnl = Some(net_pnl);

        let notional = position.notional().to_f64().unwrap_or(0.0);
        let realized_return = if notional > 0.0 {
            net_pnl.to_f64().unwrap_or(0.0) / notional
        } else {
            0.0
        };

        debug!(
            "SimPortfolio: closed {} {} at {} ({}, pnl {})",
            position.side, position.pair, exit_price, reason, net_pnl
        );
        Some((position, realized_return))
    }

    /// Point-in-time snapshot; also rolls the daily P&L anchor and the
    /// equity peak forward.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> PortfolioSnapshot {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let today = now.date_naive();
        if today != self.daily_anchor.0 {
            self.daily_anchor = (today, equity);
        }

        let drawdown_from_peak = if self.peak_equity > Decimal::ZERO && equity < self.peak_equity {
            ((self.peak_equity - equity) / self.peak_equity)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        PortfolioSnapshot {
            as_of: now,
            equity,
            cash: self.cash,
            positions: self.positions.clone(),
            gross_exposure: self.gross_exposure(),
            daily_pnl: equity - self.daily_anchor.1,
            drawdown_from_peak,
        }
    }

    pub fn drawdown_from_peak(&self) -> f64 {
        let equity = self.equity();
        if self.peak_equity > Decimal::ZERO && equity < self.peak_equity {
            ((self.peak_equity - equity) / self.peak_equity)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::PositionSide;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn position(pair: &str, side: PositionSide, entry: Decimal, qty: Decimal) -> SimulatedPosition {
        SimulatedPosition {
            position_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            pair: pair.to_string(),
            side,
            entry_price: entry,
            quantity: qty,
            stop_loss: entry * dec!(0.98),
            take_profit: entry * dec!(1.04),
            opened_at: Utc::now(),
            closed_at: None,
            realized_pnl: None,
            under_override: false,
        }
    }

    #[test]
    fn test_open_close_round_trip() {
        let now = Utc::now();
        let mut portfolio = SimPortfolio::new(dec!(100000), now);
        portfolio.mark("BTC/ETH", dec!(13.30));

        portfolio.open(position("BTC/ETH", PositionSide::Long, dec!(13.30), dec!(100)), dec!(1.06));
        assert_eq!(portfolio.cash(), dec!(100000) - dec!(1330) - dec!(1.06));
        assert_eq!(portfolio.gross_exposure(), dec!(1330));

        portfolio.mark("BTC/ETH", dec!(13.50));
        // Equity reflects the unrealized gain of 20.
        assert_eq!(portfolio.equity(), dec!(100000) - dec!(1.06) + dec!(20));

        let (closed, realized) = portfolio
            .close("BTC/ETH", dec!(13.50), dec!(1.08), CloseReason::TakeProfit, now)
            .unwrap();
        assert_eq!(closed.realized_pnl, Some(dec!(18.92)));
        assert!((realized - 18.92 / 1330.0).abs() < 1e-9);
        assert_eq!(portfolio.cash(), dec!(100000) - dec!(1.06) + dec!(18.92));
        assert!(portfolio.positions().is_empty());
    }

    #[test]
    fn test_short_position_gains_on_decline() {
        let now = Utc::now();
        let mut portfolio = SimPortfolio::new(dec!(100000), now);
        portfolio.open(position("BTC/ETH", PositionSide::Short, dec!(13.30), dec!(100)), Decimal::ZERO);

        let (closed, realized) = portfolio
            .close("BTC/ETH", dec!(13.00), Decimal::ZERO, CloseReason::TakeProfit, now)
            .unwrap();
        assert_eq!(closed.realized_pnl, Some(dec!(30.00)));
        assert!(realized > 0.0);
        assert_eq!(portfolio.equity(), dec!(100030.00));
    }

    #[test]
    fn test_snapshot_tracks_drawdown_and_daily_pnl() {
        let now = Utc::now();
        let mut portfolio = SimPortfolio::new(dec!(100000), now);
        portfolio.open(position("BTC/ETH", PositionSide::Long, dec!(13.30), dec!(1000)), Decimal::ZERO);

        portfolio.mark("BTC/ETH", dec!(14.00));
        let up = portfolio.snapshot(now);
        assert_eq!(up.equity, dec!(100700));
        assert_eq!(up.drawdown_from_peak, 0.0);

        portfolio.mark("BTC/ETH", dec!(12.80));
        let down = portfolio.snapshot(now);
        assert_eq!(down.equity, dec!(99500));
        // Peak was 100700: drawdown ~1.19%.
        assert!((down.drawdown_from_peak - (100700.0 - 99500.0) / 100700.0).abs() < 1e-9);
        assert_eq!(down.daily_pnl, dec!(-500));
    }

    #[test]
    fn test_close_unknown_pair_is_none() {
        let mut portfolio = SimPortfolio::new(dec!(100000), Utc::now());
        assert!(
            portfolio
                .close("ETH/ADA", dec!(1), Decimal::ZERO, CloseReason::Manual, Utc::now())
                .is_none()
        );
    }
}
