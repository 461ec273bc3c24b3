use crate::domain::market::MarketRegime;
use crate::domain::stats::{log_returns, median};
use std::collections::VecDeque;

/// One aggregated observation retained for regime classification.
#[derive(Debug, Clone)]
pub struct RegimeObservation {
    pub price: f64,
    pub participating_count: usize,
    pub data_quality: f64,
}

/// Thresholds for regime classification.
#[derive(Debug, Clone)]
pub struct RegimeConfig {
    pub window: usize,
    /// Per-step realized sigma of log returns above which a pair is Volatile.
    pub volatile_sigma: f64,
    /// Absolute relative move over the window above which a pair is Trending.
    pub trending_move: f64,
    pub illiquid_participants: f64,
    pub illiquid_quality: f64,
    /// Minimum observations before any non-Normal classification.
    pub min_observations: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: 60,
            volatile_sigma: 0.02,
            trending_move: 0.01,
            illiquid_participants: 2.0,
            illiquid_quality: 0.5,
            min_observations: 10,
        }
    }
}

/// Classifies the market regime of one pair over its recent observations.
///
/// Precedence: Crisis (portfolio-wide, decided by the aggregator) beats
/// Illiquid beats Volatile beats Trending; anything else is Normal.
/// Confidence is the clamped margin above the nearest deciding threshold.
pub fn classify(
    observations: &VecDeque<RegimeObservation>,
    crisis_active: bool,
    crisis_margin: f64,
    config: &RegimeConfig,
) -> (MarketRegime, f64) {
    if crisis_active {
        return (MarketRegime::Crisis, crisis_margin.clamp(0.0, 1.0));
    }

    if observations.len() < config.min_observations {
        return (MarketRegime::Normal, 0.0);
    }

    let mut participants: Vec<f64> = observations
        .iter()
        .map(|o| o.participating_count as f64)
        .collect();
    let median_participants = median(&mut participants).unwrap_or(0.0);
    let latest_quality = observations.back().map(|o| o.data_quality).unwrap_or(0.0);

    if median_participants < config.illiquid_participants
        || latest_quality < config.illiquid_quality
    {
        let participant_margin =
            (config.illiquid_participants - median_participants) / config.illiquid_participants;
        let quality_margin = (config.illiquid_quality - latest_quality) / config.illiquid_quality;
        let confidence = participant_margin.max(quality_margin).clamp(0.0, 1.0);
        return (MarketRegime::Illiquid, confidence);
    }

    let returns = log_returns(observations.iter().map(|o| o.price));
    let sigma = std_dev(&returns);

    if sigma > config.volatile_sigma {
        let confidence = ((sigma - config.volatile_sigma) / config.volatile_sigma).clamp(0.0, 1.0);
        return (MarketRegime::Volatile, confidence);
    }

    let first = observations.front().map(|o| o.price).unwrap_or(0.0);
    let last = observations.back().map(|o| o.price).unwrap_or(0.0);
    let relative_move = if first > 0.0 {
        ((last - first) / first).abs()
    } else {
        0.0
    };

    if relative_move > config.trending_move {
        let confidence =
            ((relative_move - config.trending_move) / config.trending_move).clamp(0.0, 1.0);
        return (MarketRegime::Trending, confidence);
    }

    // Normal: confidence is the distance to the nearest threshold.
    let sigma_headroom = (config.volatile_sigma - sigma) / config.volatile_sigma;
    let trend_headroom = (config.trending_move - relative_move) / config.trending_move;
    (
        MarketRegime::Normal,
        sigma_headroom.min(trend_headroom).clamp(0.0, 1.0),
    )
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observations(prices: &[f64], participants: usize, quality: f64) -> VecDeque<RegimeObservation> {
        prices
            .iter()
            .map(|&price| RegimeObservation {
                price,
                participating_count: participants,
                data_quality: quality,
            })
            .collect()
    }

    #[test]
    fn test_flat_series_is_normal() {
        let obs = observations(&[100.0; 60], 3, 0.9);
        let (regime, confidence) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Normal);
        assert!(confidence > 0.9);
    }

    #[test]
    fn test_noisy_series_is_volatile() {
        // Alternate +5%/-5% steps: sigma of log returns far above 0.02.
        let mut prices = vec![100.0];
        for i in 1..60 {
            let factor = if i % 2 == 0 { 1.05 } else { 0.95 };
            prices.push(prices[i - 1] * factor);
        }
        let obs = observations(&prices, 3, 0.9);
        let (regime, confidence) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Volatile);
        assert!(confidence > 0.5);
    }

    #[test]
    fn test_drift_series_is_trending() {
        // Steady +0.05% per step: 3% move over the window, sigma ~ 0.
        let prices: Vec<f64> = (0..60).map(|i| 100.0 * 1.0005f64.powi(i)).collect();
        let obs = observations(&prices, 3, 0.9);
        let (regime, _) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Trending);
    }

    #[test]
    fn test_single_exchange_is_illiquid() {
        let obs = observations(&[100.0; 60], 1, 0.9);
        let (regime, _) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Illiquid);
    }

    #[test]
    fn test_low_quality_is_illiquid() {
        let obs = observations(&[100.0; 60], 3, 0.3);
        let (regime, _) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Illiquid);
    }

    #[test]
    fn test_crisis_overrides_everything() {
        let obs = observations(&[100.0; 60], 3, 0.9);
        let (regime, confidence) = classify(&obs, true, 0.7, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Crisis);
        assert!((confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_short_history_is_normal_with_zero_confidence() {
        let obs = observations(&[100.0; 3], 1, 0.2);
        let (regime, confidence) = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(regime, MarketRegime::Normal);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_classification_is_deterministic_on_replay() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.4).sin()).collect();
        let obs = observations(&prices, 3, 0.9);
        let first = classify(&obs, false, 0.0, &RegimeConfig::default());
        let second = classify(&obs, false, 0.0, &RegimeConfig::default());
        assert_eq!(first.0, second.0);
        assert!((first.1 - second.1).abs() < 1e-15);
    }
}
