use crate::config::CoreConfig;
use crate::domain::market::{AggregatedView, MarketRegime};
use crate::domain::signal::SignalDirection;
use crate::domain::stats::RollingStats;
use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

/// Tuning for signal synthesis.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Rolling window for the pair-ratio mean and sigma.
    pub ratio_window: usize,
    /// Views retained per pair.
    pub view_history: usize,
    /// Gain applied to the z-deviation inside tanh.
    pub tanh_gain: f64,
    pub max_expected_return: f64,
    /// Decay rate of confidence in the normalized sigma.
    pub confidence_decay: f64,
    pub horizon: Duration,
    /// Minimum ratio samples before any signal is synthesized.
    pub min_samples: usize,
}

impl SignalConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            ratio_window: config.ratio_window,
            view_history: 500,
            tanh_gain: 5.0,
            max_expected_return: config.max_expected_return,
            horizon: Duration::hours(config.signal_horizon_hours),
            confidence_decay: 10.0,
            min_samples: 30,
        }
    }
}

/// Rolling per-pair state feeding signal synthesis.
#[derive(Debug)]
pub struct PairSignalState {
    views: VecDeque<AggregatedView>,
    ratio_stats: RollingStats,
    view_history: usize,
}

impl PairSignalState {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            views: VecDeque::with_capacity(config.view_history),
            ratio_stats: RollingStats::new(config.ratio_window),
            view_history: config.view_history,
        }
    }

    pub fn on_view(&mut self, view: AggregatedView) {
        if let Some(ratio) = view.aggregated_price.to_f64()
            && ratio > 0.0
        {
            self.ratio_stats.push(ratio);
        }
        if self.views.len() == self.view_history {
            self.views.pop_front();
        }
        self.views.push_back(view);
    }

    pub fn latest_view(&self) -> Option<&AggregatedView> {
        self.views.back()
    }

    pub fn sample_count(&self) -> usize {
        self.ratio_stats.len()
    }
}

/// An unfiltered signal candidate; the quality gate decides emission.
#[derive(Debug, Clone)]
pub struct SignalDraft {
    pub direction: SignalDirection,
    pub strength: f64,
    pub confidence: f64,
    pub predicted_return: f64,
    pub risk_score: f64,
    pub deviation: f64,
    pub horizon: Duration,
}

/// Mean-reversion synthesis: the pair ratio's z-deviation from its rolling
/// mean drives a tanh-squashed strength, with regime-aware adjustments.
/// Returns None while the ring buffer is below the minimum sample count, the
/// sigma is degenerate, or the regime is Crisis.
pub fn synthesize(
    state: &PairSignalState,
    view: &AggregatedView,
    config: &SignalConfig,
) -> Option<SignalDraft> {
    if view.regime == MarketRegime::Crisis {
        return None;
    }
    if state.ratio_stats.len() < config.min_samples {
        return None;
    }

    let ratio = view.aggregated_price.to_f64()?;
    let deviation = state.ratio_stats.z_score(ratio)?;
    let mean = state.ratio_stats.mean()?;
    let sigma = state.ratio_stats.std_dev()?;
    if mean <= 0.0 {
        return None;
    }

    let mut strength = -(config.tanh_gain * deviation).tanh();
    let sigma_normalized = sigma / mean;
    let mut confidence = (-config.confidence_decay * sigma_normalized).exp() * view.data_quality;
    let mut risk_score = ((1.0 - confidence) * 0.5).clamp(0.0, 1.0);
    let mut horizon = config.horizon;

    match view.regime {
        MarketRegime::Volatile => {
            strength *= 0.8;
            confidence *= 0.9;
            risk_score += 0.2;
            horizon = horizon / 2;
        }
        MarketRegime::Illiquid => {
            strength *= 0.7;
            confidence *= 0.85;
            risk_score += 0.3;
        }
        MarketRegime::Trending => {
            strength = (strength * 1.1).clamp(-1.0, 1.0);
            confidence = (confidence * 1.05).min(1.0);
        }
        MarketRegime::Normal => {}
        MarketRegime::Crisis => unreachable!("crisis returns early"),
    }

    let strength = strength.clamp(-1.0, 1.0);
    let confidence = confidence.clamp(0.0, 1.0);
    let risk_score = risk_score.clamp(0.0, 1.0);
    let predicted_return = strength * config.max_expected_return;

    let direction = if strength > 0.0 {
        SignalDirection::Long
    } else if strength < 0.0 {
        SignalDirection::Short
    } else {
        SignalDirection::Flat
    };

    Some(SignalDraft {
        direction,
        strength,
        confidence,
        predicted_return,
        risk_score,
        deviation,
        horizon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn config() -> SignalConfig {
        SignalConfig::from_core(&CoreConfig::default())
    }

    fn view(price: f64, regime: MarketRegime, quality: f64) -> AggregatedView {
        AggregatedView {
            pair: "BTC/ETH".to_string(),
            aggregated_price: Decimal::from_f64_retain(price).unwrap(),
            best_bid: Decimal::from_f64_retain(price - 0.01).unwrap(),
            best_ask: Decimal::from_f64_retain(price + 0.01).unwrap(),
            contributing_exchanges: vec!["binance".to_string(), "coinbase".to_string()],
            participating_count: 2,
            volume: Decimal::from(200),
            data_quality: quality,
            crossed_market: false,
            regime,
            regime_confidence: 0.8,
            as_of: Utc::now(),
        }
    }

    fn seeded_state(prices: &[f64]) -> PairSignalState {
        let cfg = config();
        let mut state = PairSignalState::new(&cfg);
        for &p in prices {
            state.on_view(view(p, MarketRegime::Normal, 0.95));
        }
        state
    }

    /// A tight oscillation around 13.3 with the last price well below mean.
    fn depressed_ratio_state() -> PairSignalState {
        let mut prices: Vec<f64> = (0..100)
            .map(|i| 13.3 + 0.01 * ((i as f64) * 0.7).sin())
            .collect();
        prices.push(13.2); // ~ -7 sigma below the rolling mean
        seeded_state(&prices)
    }

    #[test]
    fn test_below_mean_ratio_longs_the_pair() {
        let state = depressed_ratio_state();
        let v = view(13.2, MarketRegime::Normal, 0.95);
        let draft = synthesize(&state, &v, &config()).unwrap();

        assert_eq!(draft.direction, SignalDirection::Long);
        assert!(draft.strength > 0.9, "strength {}", draft.strength);
        assert!(draft.deviation < -3.0);
        assert!((draft.predicted_return - draft.strength * 0.02).abs() < 1e-12);
        assert!(draft.confidence > 0.5);
    }

    #[test]
    fn test_bounds_always_hold() {
        let state = depressed_ratio_state();
        for regime in [
            MarketRegime::Normal,
            MarketRegime::Trending,
            MarketRegime::Volatile,
            MarketRegime::Illiquid,
        ] {
            let v = view(13.2, regime, 0.95);
            if let Some(draft) = synthesize(&state, &v, &config()) {
                assert!((-1.0..=1.0).contains(&draft.strength));
                assert!((0.0..=1.0).contains(&draft.confidence));
                assert!((0.0..=1.0).contains(&draft.risk_score));
            }
        }
    }

    #[test]
    fn test_crisis_emits_nothing() {
        let state = depressed_ratio_state();
        let v = view(13.2, MarketRegime::Crisis, 0.95);
        assert!(synthesize(&state, &v, &config()).is_none());
    }

    #[test]
    fn test_volatile_regime_halves_horizon_and_dampens() {
        let state = depressed_ratio_state();
        let normal = synthesize(&state, &view(13.2, MarketRegime::Normal, 0.95), &config()).unwrap();
        let volatile =
            synthesize(&state, &view(13.2, MarketRegime::Volatile, 0.95), &config()).unwrap();

        assert_eq!(volatile.horizon, normal.horizon / 2);
        assert!(volatile.strength.abs() <= normal.strength.abs());
        assert!(volatile.confidence < normal.confidence);
        assert!(volatile.risk_score > normal.risk_score);
    }

    #[test]
    fn test_insufficient_samples_suppressed() {
        let state = seeded_state(&[13.3, 13.31, 13.29]);
        let v = view(13.2, MarketRegime::Normal, 0.95);
        assert!(synthesize(&state, &v, &config()).is_none());
    }

    #[test]
    fn test_confidence_scales_with_data_quality() {
        let state = depressed_ratio_state();
        let high = synthesize(&state, &view(13.2, MarketRegime::Normal, 0.95), &config()).unwrap();
        let low = synthesize(&state, &view(13.2, MarketRegime::Normal, 0.5), &config()).unwrap();
        assert!(high.confidence > low.confidence);
    }

    #[test]
    fn test_view_history_bounded() {
        let cfg = config();
        let mut state = PairSignalState::new(&cfg);
        for i in 0..600 {
            state.on_view(view(13.3 + i as f64 * 1e-4, MarketRegime::Normal, 0.9));
        }
        assert_eq!(state.views.len(), cfg.view_history);
    }
}
