use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::VecDeque;

/// Point-in-time summary of one rolling correlation stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub correlation: f64,
    pub sample_size: usize,
    /// Two-sided p-value of the t-test with df = n - 2.
    pub p_value: f64,
    /// 95% interval via the Fisher z-transform; (-1, 1) below 4 samples.
    pub confidence_interval_95: (f64, f64),
}

/// Bounded rolling Pearson correlation of (predicted, realized) return
/// pairs, updated in O(1) through running sums.
#[derive(Debug, Clone)]
pub struct RollingCorrelation {
    capacity: usize,
    ring: VecDeque<(f64, f64)>,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

impl RollingCorrelation {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            ring: VecDeque::with_capacity(capacity),
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
        }
    }

    pub fn push(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        if self.ring.len() == self.capacity
            && let Some((ex, ey)) = self.ring.pop_front()
        {
            self.sum_x -= ex;
            self.sum_y -= ey;
            self.sum_xx -= ex * ex;
            self.sum_yy -= ey * ey;
            self.sum_xy -= ex * ey;
        }
        self.ring.push_back((x, y));
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Pearson correlation; None below two samples or for degenerate
    /// variance (insufficient data, not zero).
    pub fn correlation(&self) -> Option<f64> {
        let n = self.ring.len();
        if n < 2 {
            return None;
        }
        let n_f = n as f64;
        let var_x = n_f * self.sum_xx - self.sum_x * self.sum_x;
        let var_y = n_f * self.sum_yy - self.sum_y * self.sum_y;
        if var_x <= 0.0 || var_y <= 0.0 {
            return None;
        }
        let cov = n_f * self.sum_xy - self.sum_x * self.sum_y;
        Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
    }

    /// Full summary; None while the correlation itself is undefined.
    pub fn stats(&self) -> Option<CorrelationStats> {
        let correlation = self.correlation()?;
        let n = self.ring.len();
        Some(CorrelationStats {
            correlation,
            sample_size: n,
            p_value: p_value(correlation, n),
            confidence_interval_95: fisher_interval(correlation, n),
        })
    }
}

/// Two-sided significance of r against zero, df = n - 2.
fn p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= f64::EPSILON {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// 95% CI via Fisher z; degenerates to (-1, 1) below 4 samples.
fn fisher_interval(r: f64, n: usize) -> (f64, f64) {
    if n < 4 {
        return (-1.0, 1.0);
    }
    let clamped = r.clamp(-0.999_999, 0.999_999);
    let z = clamped.atanh();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    ((z - 1.96 * se).tanh(), (z + 1.96 * se).tanh())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfectly_correlated_series() {
        let mut rolling = RollingCorrelation::new(100);
        for i in 0..50 {
            let x = i as f64 * 0.001;
            rolling.push(x, 2.0 * x + 0.5);
        }
        let stats = rolling.stats().unwrap();
        assert!(stats.correlation > 0.999);
        assert!(stats.p_value < 1e-6);
    }

    #[test]
    fn test_anticorrelated_series() {
        let mut rolling = RollingCorrelation::new(100);
        for i in 0..50 {
            let x = i as f64 * 0.001;
            rolling.push(x, -x);
        }
        assert!(rolling.correlation().unwrap() < -0.999);
    }

    #[test]
    fn test_insufficient_data() {
        let mut rolling = RollingCorrelation::new(100);
        assert!(rolling.correlation().is_none());
        rolling.push(0.01, 0.012);
        // n = 1 is undefined, not zero.
        assert!(rolling.correlation().is_none());
        assert!(rolling.stats().is_none());
    }

    #[test]
    fn test_degenerate_variance_is_insufficient() {
        let mut rolling = RollingCorrelation::new(100);
        for _ in 0..10 {
            rolling.push(0.01, 0.01);
        }
        assert!(rolling.correlation().is_none());
    }

    #[test]
    fn test_eviction_keeps_window_consistent() {
        let mut rolling = RollingCorrelation::new(10);
        // Fill with anticorrelated noise, then overwrite with correlated data.
        for i in 0..10 {
            let x = i as f64 * 0.01;
            rolling.push(x, -x);
        }
        for i in 0..10 {
            let x = i as f64 * 0.01;
            rolling.push(x, x);
        }
        assert_eq!(rolling.len(), 10);
        assert!(rolling.correlation().unwrap() > 0.999);
    }

    #[test]
    fn test_fisher_interval_brackets_estimate() {
        let mut rolling = RollingCorrelation::new(1000);
        // Noisy but strongly correlated data.
        for i in 0..200 {
            let x = (i as f64 * 0.37).sin() * 0.02;
            let noise = (i as f64 * 1.93).cos() * 0.004;
            rolling.push(x, x + noise);
        }
        let stats = rolling.stats().unwrap();
        let (low, high) = stats.confidence_interval_95;
        assert!(low < stats.correlation && stats.correlation < high);
        assert!(low > 0.8);
    }

    #[test]
    fn test_small_sample_interval_degenerates() {
        let mut rolling = RollingCorrelation::new(10);
        rolling.push(0.01, 0.01);
        rolling.push(0.02, 0.022);
        rolling.push(0.03, 0.029);
        let stats = rolling.stats().unwrap();
        assert_eq!(stats.confidence_interval_95, (-1.0, 1.0));
    }
}
