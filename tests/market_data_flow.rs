//! Failover through the live market-data agent: when the primary exchange
//! drops, views continue without a gap from the remaining exchanges and a
//! health update marks the loss promptly.

use chrono::Utc;
use pairtrade::application::market_data::MarketDataAgent;
use pairtrade::application::market_data::aggregator::{AggregatorConfig, MarketDataAggregator};
use pairtrade::application::market_data::health::{HealthConfig, StreamHealthMonitor};
use pairtrade::domain::types::{StreamEvent, Tick};
use pairtrade::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

fn priors() -> HashMap<String, f64> {
    [
        ("binance".to_string(), 1.0),
        ("coinbase".to_string(), 0.9),
        ("kraken".to_string(), 0.8),
    ]
    .into()
}

fn tick(exchange: &str, price: f64) -> StreamEvent {
    let now = Utc::now();
    let p = Decimal::from_f64_retain(price).unwrap();
    StreamEvent::Tick(Tick {
        exchange_id: exchange.to_string(),
        pair_symbol: "BTC/USD".to_string(),
        bid: p - dec!(1),
        ask: p + dec!(1),
        last: p,
        volume: dec!(50),
        received_at: now,
        exchange_timestamp: now,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_primary_loss_keeps_views_flowing() {
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (views_tx, mut views_rx) = broadcast::channel(256);
    let (health_tx, mut health_rx) = broadcast::channel(64);
    let (hints_tx, _hints_rx) = broadcast::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new().unwrap());

    let agent = MarketDataAgent::new(
        StreamHealthMonitor::new(&priors(), HealthConfig::default()),
        MarketDataAggregator::new(AggregatorConfig::default()),
        events_rx,
        views_tx,
        health_tx,
        hints_tx,
        shutdown_rx,
        metrics.clone(),
    );
    let agent_task = tokio::spawn(agent.run());

    // All three exchanges healthy and ticking.
    for exchange in ["binance", "coinbase", "kraken"] {
        events_tx
            .send(StreamEvent::Connected {
                exchange_id: exchange.to_string(),
            })
            .await
            .unwrap();
    }
    for round in 0..12 {
        for exchange in ["binance", "coinbase", "kraken"] {
            events_tx
                .send(tick(exchange, 40_000.0 + round as f64))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Drain the healthy phase.
    let mut saw_three_way_view = false;
    while let Ok(view) = views_rx.try_recv() {
        if view.participating_count == 3 {
            saw_three_way_view = true;
        }
    }
    assert!(saw_three_way_view, "expected three-exchange views");
    while health_rx.try_recv().is_ok() {}

    // Primary drops; the next tick from a survivor must still produce a
    // view, with the lost exchange absent.
    events_tx
        .send(StreamEvent::Disconnected {
            exchange_id: "binance".to_string(),
            reason: "socket closed".to_string(),
        })
        .await
        .unwrap();
    events_tx.send(tick("coinbase", 40_020.0)).await.unwrap();
    events_tx.send(tick("kraken", 40_015.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut post_loss_views = Vec::new();
    while let Ok(view) = views_rx.try_recv() {
        post_loss_views.push(view);
    }
    let last = post_loss_views.last().expect("views continue after failover");
    assert!(
        !last
            .contributing_exchanges
            .contains(&"binance".to_string()),
        "lost exchange must not contribute"
    );
    assert!(last.participating_count >= 2);
    assert!(last.best_bid > Decimal::ZERO);

    // The disconnect is surfaced as a health update well within 2s.
    let mut disconnect_seen = false;
    while let Ok(update) = health_rx.try_recv() {
        if update.exchange_id == "binance" && !update.connected {
            disconnect_seen = true;
        }
    }
    assert!(disconnect_seen, "expected a binance disconnect health update");

    let _ = shutdown_tx.send(true);
    let _ = agent_task.await;
}
