// Signal synthesis math (ratio z-scores, regime adjustments)
pub mod generator;

// Rate-limited score oracle access
pub mod oracle;

// Versioned effective-thresholds snapshot channel
pub mod thresholds;

use crate::application::signals::generator::{PairSignalState, SignalConfig};
use crate::application::signals::oracle::OracleGate;
use crate::domain::events::{Envelope, EnvelopeKind};
use crate::domain::market::{AggregatedView, MarketRegime};
use crate::domain::ports::{PersistenceSink, ScoreContext};
use crate::domain::signal::{
    EffectiveThresholds, LiveTradingSignal, PendingPrediction, SignalDirection,
};
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Messages from the signal processor to the simulator.
#[derive(Debug, Clone)]
pub enum SignalCommand {
    Emit(LiveTradingSignal),
    /// Crisis cancellation of a not-yet-expired signal.
    Cancel(Uuid),
}

/// Messages from the signal processor to the correlation tracker.
#[derive(Debug, Clone)]
pub enum PredictionCommand {
    Register(PendingPrediction),
    Cancel(Uuid),
}

/// Portfolio-level aggregation of the currently active signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioSignalSummary {
    pub active_count: usize,
    pub avg_strength: f64,
    pub avg_confidence: f64,
    pub avg_risk_score: f64,
    pub regime_distribution: HashMap<MarketRegime, usize>,
}

/// Averages strength, confidence and risk across active signals and counts
/// the regimes they were generated under.
pub fn summarize_active<'a>(
    signals: impl IntoIterator<Item = &'a LiveTradingSignal>,
) -> PortfolioSignalSummary {
    let mut summary = PortfolioSignalSummary::default();
    let mut strength = 0.0;
    let mut confidence = 0.0;
    let mut risk = 0.0;
    for signal in signals {
        summary.active_count += 1;
        strength += signal.strength;
        confidence += signal.confidence;
        risk += signal.risk_score;
        *summary
            .regime_distribution
            .entry(signal.regime_at_generation)
            .or_insert(0) += 1;
    }
    if summary.active_count > 0 {
        let n = summary.active_count as f64;
        summary.avg_strength = strength / n;
        summary.avg_confidence = confidence / n;
        summary.avg_risk_score = risk / n;
    }
    summary
}

/// Turns aggregated views into gated trading signals.
///
/// Every emitted signal is simultaneously sent to the simulator and
/// registered with the correlation tracker as a pending prediction. Emission
/// pauses while the persistence sink is degraded.
pub struct SignalAgent {
    config: SignalConfig,
    base_thresholds: EffectiveThresholds,
    pairs: HashMap<String, PairSignalState>,
    active: HashMap<Uuid, LiveTradingSignal>,
    views_rx: broadcast::Receiver<AggregatedView>,
    thresholds_rx: watch::Receiver<EffectiveThresholds>,
    signals_tx: mpsc::Sender<SignalCommand>,
    predictions_tx: mpsc::Sender<PredictionCommand>,
    sink: Arc<dyn PersistenceSink>,
    oracle: OracleGate,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
    refresh_ms: u64,
}

impl SignalAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SignalConfig,
        base_thresholds: EffectiveThresholds,
        refresh_ms: u64,
        views_rx: broadcast::Receiver<AggregatedView>,
        thresholds_rx: watch::Receiver<EffectiveThresholds>,
        signals_tx: mpsc::Sender<SignalCommand>,
        predictions_tx: mpsc::Sender<PredictionCommand>,
        sink: Arc<dyn PersistenceSink>,
        oracle: OracleGate,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            base_thresholds,
            pairs: HashMap::new(),
            active: HashMap::new(),
            views_rx,
            thresholds_rx,
            signals_tx,
            predictions_tx,
            sink,
            oracle,
            shutdown_rx,
            metrics,
            refresh_ms,
        }
    }

    pub async fn run(mut self) {
        info!("SignalAgent started.");
        let mut refresh =
            tokio::time::interval(std::time::Duration::from_millis(self.refresh_ms.max(1)));
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = self.views_rx.recv() => {
                    match result {
                        Ok(view) => self.on_view(view).await,
                        Err(RecvError::Lagged(skipped)) => {
                            // Latest-wins: stale views superseded, order kept.
                            debug!("SignalAgent: lagged, {} stale views superseded", skipped);
                        }
                        Err(RecvError::Closed) => {
                            warn!("SignalAgent: view stream closed.");
                            break;
                        }
                    }
                }
                _ = refresh.tick() => {
                    self.expire_active();
                    if !self.active.is_empty() {
                        let summary = summarize_active(self.active.values());
                        debug!(
                            "SignalAgent: {} active, avg strength {:.3}, avg confidence {:.3}, avg risk {:.3}",
                            summary.active_count,
                            summary.avg_strength,
                            summary.avg_confidence,
                            summary.avg_risk_score
                        );
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("SignalAgent: shutdown signal received.");
                        break;
                    }
                }
            }
        }
        info!("SignalAgent stopped ({} signals active).", self.active.len());
    }

    async fn on_view(&mut self, view: AggregatedView) {
        let pair = view.pair.clone();
        let state = self
            .pairs
            .entry(pair.clone())
            .or_insert_with(|| PairSignalState::new(&self.config));
        state.on_view(view.clone());

        if view.regime == MarketRegime::Crisis {
            self.cancel_pair_signals(&pair).await;
            return;
        }

        // One active signal per pair; the refresh timer retires expired ones.
        if self.active.values().any(|s| s.pair == pair) {
            return;
        }

        let degraded = self.sink.is_degraded();
        self.metrics.sink_degraded.set(degraded as i64);
        if degraded {
            debug!("SignalAgent: sink degraded, emission paused");
            return;
        }

        let state = self.pairs.get(&pair).expect("state inserted above");
        let Some(draft) = generator::synthesize(state, &view, &self.config) else {
            return;
        };
        if draft.direction == SignalDirection::Flat {
            return;
        }

        let now = Utc::now();
        let thresholds = {
            let current = self.thresholds_rx.borrow().clone();
            if current.is_lapsed(now) {
                self.base_thresholds.clone()
            } else {
                current
            }
        };

        if thresholds.suppress_non_trending && view.regime != MarketRegime::Trending {
            self.metrics.signals_suppressed_total.inc();
            return;
        }
        if self.active.len() >= thresholds.max_concurrent_signals {
            return;
        }

        let factor = self
            .oracle
            .confidence_factor(
                ScoreContext {
                    pair: pair.clone(),
                    regime: view.regime,
                    deviation: draft.deviation,
                    data_quality: view.data_quality,
                },
                now,
            )
            .await;
        let confidence = (draft.confidence * factor).clamp(0.0, 1.0);

        let passes = confidence >= thresholds.min_confidence
            && view.data_quality >= thresholds.min_data_quality
            && view.participating_count >= thresholds.min_participants
            && draft.strength.abs() >= thresholds.min_strength;
        if !passes {
            self.metrics.signals_suppressed_total.inc();
            return;
        }

        let signal = LiveTradingSignal {
            signal_id: Uuid::new_v4(),
            pair: pair.clone(),
            direction: draft.direction,
            strength: draft.strength,
            confidence,
            predicted_return: draft.predicted_return,
            risk_score: draft.risk_score,
            regime_at_generation: view.regime,
            created_at: now,
            expires_at: now + draft.horizon,
        };

        debug!(
            "SignalAgent: {} {} strength={:.3} confidence={:.3} (regime {})",
            signal.pair, signal.direction, signal.strength, signal.confidence, view.regime
        );

        let prediction = PendingPrediction {
            signal_id: signal.signal_id,
            pair: pair.clone(),
            direction: signal.direction,
            predicted_return: signal.predicted_return,
            reference_price: view.aggregated_price,
            created_at: signal.created_at,
            expires_at: signal.expires_at,
        };

        if let Ok(envelope) = Envelope::new(EnvelopeKind::Signal, &signal) {
            if let Err(e) = self.sink.append(envelope).await {
                warn!("SignalAgent: failed to persist signal: {}", e);
            }
        }

        if self
            .predictions_tx
            .send(PredictionCommand::Register(prediction))
            .await
            .is_err()
        {
            warn!("SignalAgent: correlation tracker gone, dropping signal");
            return;
        }
        if self
            .signals_tx
            .send(SignalCommand::Emit(signal.clone()))
            .await
            .is_err()
        {
            warn!("SignalAgent: simulator gone, cancelling prediction");
            let _ = self
                .predictions_tx
                .send(PredictionCommand::Cancel(signal.signal_id))
                .await;
            return;
        }

        self.metrics.signals_emitted_total.inc();
        self.active.insert(signal.signal_id, signal);
    }

    /// Crisis: no new signals, and non-expired signals for the pair are
    /// cancelled before their horizon.
    async fn cancel_pair_signals(&mut self, pair: &str) {
        let now = Utc::now();
        let cancelled: Vec<Uuid> = self
            .active
            .values()
            .filter(|s| s.pair == pair && !s.is_expired(now))
            .map(|s| s.signal_id)
            .collect();

        for signal_id in cancelled {
            info!("SignalAgent: crisis cancel of signal {} on {}", signal_id, pair);
            self.active.remove(&signal_id);
            let _ = self.signals_tx.send(SignalCommand::Cancel(signal_id)).await;
            let _ = self
                .predictions_tx
                .send(PredictionCommand::Cancel(signal_id))
                .await;
            self.metrics.signals_cancelled_total.inc();
        }
    }

    fn expire_active(&mut self) {
        let now = Utc::now();
        self.active.retain(|_, signal| !signal.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signal(pair: &str, strength: f64, regime: MarketRegime) -> LiveTradingSignal {
        let now = Utc::now();
        LiveTradingSignal {
            signal_id: Uuid::new_v4(),
            pair: pair.to_string(),
            direction: SignalDirection::Long,
            strength,
            confidence: 0.8,
            predicted_return: strength * 0.02,
            risk_score: 0.3,
            regime_at_generation: regime,
            created_at: now,
            expires_at: now + Duration::hours(6),
        }
    }

    #[test]
    fn test_summarize_active_averages_and_regimes() {
        let signals = vec![
            signal("BTC/ETH", 0.6, MarketRegime::Trending),
            signal("BTC/ADA", -0.4, MarketRegime::Volatile),
            signal("ETH/ADA", 0.3, MarketRegime::Normal),
        ];
        let summary = summarize_active(signals.iter());

        assert_eq!(summary.active_count, 3);
        assert!((summary.avg_strength - (0.6 - 0.4 + 0.3) / 3.0).abs() < 1e-12);
        assert!((summary.avg_confidence - 0.8).abs() < 1e-12);
        assert!((summary.avg_risk_score - 0.3).abs() < 1e-12);
        assert_eq!(summary.regime_distribution[&MarketRegime::Trending], 1);
        assert_eq!(summary.regime_distribution.len(), 3);
    }

    #[test]
    fn test_summarize_empty_is_neutral() {
        let summary = summarize_active(std::iter::empty());
        assert_eq!(summary.active_count, 0);
        assert_eq!(summary.avg_strength, 0.0);
        assert!(summary.regime_distribution.is_empty());
    }
}
