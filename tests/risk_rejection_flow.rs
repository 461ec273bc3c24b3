//! Risk rejections are first-class outcomes: a filtered signal reaches the
//! correlation tracker and resolves to its would-be return at horizon,
//! leaving the portfolio untouched.

use chrono::{Duration, Utc};
use pairtrade::application::correlation::CorrelationTracker;
use pairtrade::application::simulation::execution::{ExecutionModel, FillPolicy, ZeroLatency, ZeroSlippage};
use pairtrade::application::simulation::risk::{RiskConfig, RiskPipeline};
use pairtrade::application::simulation::{SignalDecision, SimulationConfig, TradingSimulator};
use pairtrade::config::CoreConfig;
use pairtrade::domain::compliance::ExecutionConstraints;
use pairtrade::domain::market::{AggregatedView, MarketRegime};
use pairtrade::domain::signal::{LiveTradingSignal, PendingPrediction, SignalDirection};
use pairtrade::domain::trading::{Outcome, OutcomeKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn view(pair: &str, price: f64) -> AggregatedView {
    AggregatedView {
        pair: pair.to_string(),
        aggregated_price: Decimal::from_f64_retain(price).unwrap(),
        best_bid: Decimal::from_f64_retain(price * 0.9995).unwrap(),
        best_ask: Decimal::from_f64_retain(price * 1.0005).unwrap(),
        contributing_exchanges: vec!["binance".to_string(), "coinbase".to_string()],
        participating_count: 2,
        volume: dec!(100000),
        data_quality: 0.95,
        crossed_market: false,
        regime: MarketRegime::Normal,
        regime_confidence: 0.8,
        as_of: Utc::now(),
    }
}

fn signal(pair: &str) -> LiveTradingSignal {
    let now = Utc::now();
    LiveTradingSignal {
        signal_id: Uuid::new_v4(),
        pair: pair.to_string(),
        direction: SignalDirection::Long,
        strength: 0.8,
        confidence: 0.85,
        predicted_return: 0.016,
        risk_score: 0.2,
        regime_at_generation: MarketRegime::Normal,
        created_at: now,
        expires_at: now + Duration::hours(6),
    }
}

#[test]
fn test_rejected_signal_becomes_filtered_outcome_with_would_be_return() {
    // $100,000 equity, 2% position cap: the simulator's 5% sizing rule asks
    // for $5,000 and must be rejected.
    let core = CoreConfig::with_priors(&[("binance", 1.0)]);
    let mut risk_config = RiskConfig::from_core(&core);
    risk_config.max_position_size = 0.02;

    let execution = ExecutionModel {
        latency: Box::new(ZeroLatency),
        slippage: Box::new(ZeroSlippage),
        cost_bps: 0.0,
        fill_policy: FillPolicy::default(),
    };
    let now = Utc::now();
    let mut simulator = TradingSimulator::new(
        SimulationConfig::from_core(&core),
        RiskPipeline::new(risk_config),
        execution,
        now,
    );

    simulator.on_view(&view("BTC/ETH", 13.30), now);
    let equity_before = simulator.portfolio().equity();

    let s = signal("BTC/ETH");
    let decision = simulator.decide(&s, &ExecutionConstraints::default());
    let rejection = match decision {
        SignalDecision::Rejected(rejection) => rejection,
        other => panic!("expected rejection, got {:?}", other),
    };
    assert_eq!(rejection.code(), "position_size_exceeded");

    // No portfolio change from a rejected signal.
    assert_eq!(simulator.portfolio().equity(), equity_before);
    assert!(simulator.portfolio().positions().is_empty());

    // The tracker holds the filtered prediction open until horizon, then
    // measures the would-be return from the reference price.
    let mut tracker = CorrelationTracker::new(1000);
    tracker.register(PendingPrediction {
        signal_id: s.signal_id,
        pair: s.pair.clone(),
        direction: s.direction,
        predicted_return: s.predicted_return,
        reference_price: dec!(13.30),
        created_at: s.created_at,
        expires_at: s.expires_at,
    });
    tracker.on_outcome(&Outcome {
        signal_id: s.signal_id,
        pair: s.pair.clone(),
        realized_return: 0.0,
        kind: OutcomeKind::Filtered {
            reason: rejection.code().to_string(),
        },
        under_override: false,
        measured_at: now,
    });
    assert_eq!(tracker.pending_count(), 1);

    // The pair rallies 1% by the horizon: the filtered long would have
    // earned +1%, and that is what enters the correlation measurement.
    tracker.on_view(&view("BTC/ETH", 13.433));
    let resolved = tracker.resolve_expired(now + Duration::hours(7));
    assert_eq!(resolved, 1);
    assert_eq!(tracker.pending_count(), 0);
}
