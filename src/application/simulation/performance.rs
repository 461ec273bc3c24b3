use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running trade and equity performance, updated on every close.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    returns: Vec<f64>,
    wins: u32,
    losses: u32,
    realized_pnl: Decimal,
    peak_equity: Option<f64>,
    max_drawdown: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: u32,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub realized_pnl: Decimal,
}

impl PerformanceTracker {
    pub fn record_close(&mut self, realized_return: f64, realized_pnl: Decimal) {
        if realized_return.is_finite() {
            self.returns.push(realized_return);
        }
        if realized_pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.realized_pnl += realized_pnl;
    }

    /// Tracks the running peak and the deepest drawdown from it.
    pub fn record_equity(&mut self, equity: f64) {
        let peak = self.peak_equity.get_or_insert(equity);
        if equity > *peak {
            *peak = equity;
        } else if *peak > 0.0 {
            let drawdown = (*peak - equity) / *peak;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    pub fn drawdown_from_peak(&self, equity: f64) -> f64 {
        match self.peak_equity {
            Some(peak) if peak > 0.0 && equity < peak => (peak - equity) / peak,
            _ => 0.0,
        }
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total_trades = self.wins + self.losses;
        let win_rate = if total_trades > 0 {
            self.wins as f64 / total_trades as f64
        } else {
            0.0
        };
        PerformanceSummary {
            total_trades,
            win_rate,
            sharpe_ratio: sharpe(&self.returns),
            sortino_ratio: sortino(&self.returns),
            max_drawdown: self.max_drawdown,
            realized_pnl: self.realized_pnl,
        }
    }
}

/// Per-trade Sharpe over closed-trade returns (risk-free rate zero).
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev <= f64::EPSILON {
        return 0.0;
    }
    mean / std_dev
}

/// Like Sharpe but penalizing only downside deviation.
fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    if downside.is_empty() {
        // No losing trades: conventionally unbounded, report a large ratio.
        return if mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let downside_dev = (downside.iter().sum::<f64>() / n).sqrt();
    if downside_dev <= f64::EPSILON {
        return 0.0;
    }
    mean / downside_dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_win_rate_and_pnl() {
        let mut tracker = PerformanceTracker::default();
        tracker.record_close(0.01, dec!(100));
        tracker.record_close(0.02, dec!(200));
        tracker.record_close(-0.005, dec!(-50));

        let summary = tracker.summary();
        assert_eq!(summary.total_trades, 3);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.realized_pnl, dec!(250));
    }

    #[test]
    fn test_sharpe_positive_for_positive_drift() {
        let mut tracker = PerformanceTracker::default();
        for r in [0.01, -0.005, 0.02, 0.005, -0.01, 0.015, 0.008] {
            tracker.record_close(r, dec!(1));
        }
        let summary = tracker.summary();
        assert!(summary.sharpe_ratio > 0.0);
        assert!(summary.sortino_ratio > summary.sharpe_ratio);
    }

    #[test]
    fn test_drawdown_tracking() {
        let mut tracker = PerformanceTracker::default();
        tracker.record_equity(100_000.0);
        tracker.record_equity(110_000.0);
        tracker.record_equity(99_000.0);
        tracker.record_equity(105_000.0);

        let summary = tracker.summary();
        assert!((summary.max_drawdown - 0.1).abs() < 1e-9);
        // Current drawdown is measured against the standing peak.
        assert!((tracker.drawdown_from_peak(104_500.0) - 5_500.0 / 110_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tracker_is_neutral() {
        let tracker = PerformanceTracker::default();
        let summary = tracker.summary();
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.sharpe_ratio, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
    }
}
