use std::collections::VecDeque;

/// Fixed-window rolling mean and standard deviation with O(1) updates via
/// running sums. Shared by the health monitor (anomaly detection), the
/// aggregator (regime volatility) and the signal processor (ratio z-scores).
#[derive(Debug, Clone)]
pub struct RollingStats {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl RollingStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            values: VecDeque::with_capacity(window),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.values.len() == self.window
            && let Some(evicted) = self.values.pop_front()
        {
            self.sum -= evicted;
            self.sum_sq -= evicted * evicted;
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.window
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.sum / self.values.len() as f64)
    }

    /// Sample standard deviation (n-1 denominator).
    pub fn std_dev(&self) -> Option<f64> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }
        let n_f = n as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n_f) / (n_f - 1.0);
        // Running sums can drift slightly negative near zero variance.
        Some(variance.max(0.0).sqrt())
    }

    /// Z-score of a value against the current window.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let mean = self.mean()?;
        let std_dev = self.std_dev()?;
        if std_dev <= f64::EPSILON {
            return None;
        }
        Some((value - mean) / std_dev)
    }

    pub fn front(&self) -> Option<f64> {
        self.values.front().copied()
    }

    pub fn back(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Log returns of a price series; skips non-positive prices.
pub fn log_returns(prices: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut returns = Vec::new();
    let mut prev: Option<f64> = None;
    for price in prices {
        if let Some(p) = prev
            && p > 0.0
            && price > 0.0
        {
            returns.push((price / p).ln());
        }
        prev = Some(price);
    }
    returns
}

/// Median of a slice; averages the middle pair for even lengths.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Least-squares slope of y over x = 0..n-1. Returns None below 2 points.
pub fn linear_trend_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let sum_x = n_f * (n_f - 1.0) / 2.0;
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..n).map(|i| (i * i) as f64).sum();

    let denominator = n_f * sum_x2 - sum_x * sum_x;
    if denominator.abs() <= f64::EPSILON {
        return None;
    }
    Some((n_f * sum_xy - sum_x * sum_y) / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_stats_mean_and_std() {
        let mut stats = RollingStats::new(4);
        for v in [2.0, 4.0, 4.0, 4.0] {
            stats.push(v);
        }
        assert_eq!(stats.mean(), Some(3.5));
        // Sample std of [2,4,4,4] = 1.0
        assert!((stats.std_dev().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_stats_eviction() {
        let mut stats = RollingStats::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            stats.push(v);
        }
        assert_eq!(stats.len(), 3);
        assert_eq!(stats.mean(), Some(3.0));
        assert_eq!(stats.front(), Some(2.0));
    }

    #[test]
    fn test_z_score() {
        let mut stats = RollingStats::new(100);
        for i in 0..100 {
            stats.push((i % 2) as f64); // mean 0.5, std ~0.5025
        }
        let z = stats.z_score(1.5).unwrap();
        assert!(z > 1.9 && z < 2.1);
    }

    #[test]
    fn test_z_score_none_on_constant_window() {
        let mut stats = RollingStats::new(10);
        for _ in 0..10 {
            stats.push(5.0);
        }
        assert_eq!(stats.z_score(6.0), None);
    }

    #[test]
    fn test_log_returns_skip_nonpositive() {
        let returns = log_returns([100.0, 110.0, 0.0, 121.0]);
        assert_eq!(returns.len(), 1);
        assert!((returns[0] - (1.1f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_linear_trend_slope() {
        let slope = linear_trend_slope(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((slope - 1.0).abs() < 1e-12);
        assert_eq!(linear_trend_slope(&[1.0]), None);
    }
}
