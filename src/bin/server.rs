//! Pairtrade server - headless real-time signal-and-compliance pipeline.
//!
//! This binary is the composition root: it reads the environment, builds a
//! validated `CoreConfig`, wires the exchange adapters, persistence sink and
//! score oracle, and runs the pipeline until Ctrl+C. The library core never
//! touches the environment itself.
//!
//! # Environment Variables
//! - `MODE` - `replay` (scripted demo feed, default) or `websocket`
//! - `EXCHANGE_PRIORS` - e.g. `binance:1.0,coinbase:0.9,kraken:0.8`
//! - `PAIRS` - e.g. `BTC/USD,BTC/ETH`
//! - `MARKET_WS_URL` - WebSocket endpoint, `{exchange}` is substituted
//! - `MARKET_DATA_API_KEY` - forwarded to the oracle client if set
//! - `TARGET_CORRELATION`, `MONITORING_INTERVAL_MS` - compliance knobs
//! - `MAX_POSITION_SIZE`, `MAX_GROSS_EXPOSURE`, `MAX_DRAWDOWN` - risk gates
//! - `INITIAL_CASH` - simulator starting equity
//! - `SINK_PATH` - audit JSONL path (default `audit.jsonl`)
//! - `ORACLE_URL` - optional score oracle endpoint
//! - `OBSERVABILITY_INTERVAL` - metrics push interval in seconds
//!
//! Metrics are pushed as `METRICS_JSON:` lines to stdout - no HTTP server.

use anyhow::{Context, Result};
use pairtrade::application::system::{Pipeline, PipelineDeps};
use pairtrade::config::CoreConfig;
use pairtrade::domain::ports::{ScoreOracle, TickSource};
use pairtrade::infrastructure::exchange::replay::ScriptedTickSource;
use pairtrade::infrastructure::exchange::websocket::WebSocketTickSource;
use pairtrade::infrastructure::observability::MetricsReporter;
use pairtrade::infrastructure::oracle::HttpScoreOracle;
use pairtrade::infrastructure::persistence::{InMemoryHistory, JsonlSink};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Pairtrade server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = config_from_env()?;
    info!(
        "Configuration loaded: {} exchanges, {} pairs, target correlation {:.2}",
        config.reliability_priors.len(),
        config.pairs.len(),
        config.target_correlation
    );

    let adapters = adapters_from_env(&config)?;
    let sink_path = env::var("SINK_PATH").unwrap_or_else(|_| "audit.jsonl".to_string());
    let sink = Arc::new(JsonlSink::create(&sink_path, JsonlSink::DEFAULT_BUFFER).await?);
    let oracle = oracle_from_env();
    let history = Arc::new(InMemoryHistory::new());

    let pipeline = Pipeline::new(
        config,
        PipelineDeps {
            adapters,
            history,
            sink,
            oracle,
        },
    )?;

    info!("Starting pipeline...");
    let handle = pipeline.start().await?;
    info!("Pipeline running. Press Ctrl+C to shutdown.");

    // Surface health transitions and arbitrage hints on the console.
    let mut health_rx = handle.subscribe_health();
    tokio::spawn(async move {
        while let Ok(update) = health_rx.recv().await {
            info!(
                "Health: {} connected={} healthy={} quality={:.2}{}",
                update.exchange_id,
                update.connected,
                update.healthy,
                update.quality_score,
                if update.is_primary { " [primary]" } else { "" }
            );
        }
    });
    let mut hints_rx = handle.subscribe_hints();
    tokio::spawn(async move {
        while let Ok(hint) = hints_rx.recv().await {
            info!(
                "Arbitrage: {} buy {} / sell {} ({:.1} bps net)",
                hint.pair, hint.buy_on, hint.sell_on, hint.net_spread_bps
            );
        }
    });

    // Metrics push reporter.
    let interval = env::var("OBSERVABILITY_INTERVAL")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);
    let (reporter_shutdown_tx, reporter_shutdown_rx) = watch::channel(false);
    let reporter = MetricsReporter::new(
        handle.metrics.as_ref().clone(),
        interval,
        reporter_shutdown_rx,
    );
    tokio::spawn(reporter.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = reporter_shutdown_tx.send(true);
    handle.shutdown().await;
    info!("Goodbye.");
    Ok(())
}

/// The external config loader: environment in, validated `CoreConfig` out.
fn config_from_env() -> Result<CoreConfig> {
    let mut config = CoreConfig {
        reliability_priors: parse_priors(
            &env::var("EXCHANGE_PRIORS")
                .unwrap_or_else(|_| "binance:1.0,coinbase:0.9,kraken:0.8".to_string()),
        )?,
        pairs: env::var("PAIRS")
            .unwrap_or_else(|_| "BTC/USD".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        ..CoreConfig::default()
    };

    if let Ok(value) = env::var("TARGET_CORRELATION") {
        config.target_correlation = value.parse().context("Failed to parse TARGET_CORRELATION")?;
    }
    if let Ok(value) = env::var("MONITORING_INTERVAL_MS") {
        config.monitoring_interval_ms = value
            .parse()
            .context("Failed to parse MONITORING_INTERVAL_MS")?;
    }
    if let Ok(value) = env::var("MAX_POSITION_SIZE") {
        config.max_position_size = value.parse().context("Failed to parse MAX_POSITION_SIZE")?;
    }
    if let Ok(value) = env::var("MAX_GROSS_EXPOSURE") {
        config.max_gross_exposure = value.parse().context("Failed to parse MAX_GROSS_EXPOSURE")?;
    }
    if let Ok(value) = env::var("MAX_DRAWDOWN") {
        config.max_drawdown = value.parse().context("Failed to parse MAX_DRAWDOWN")?;
    }
    if let Ok(value) = env::var("INITIAL_CASH") {
        let cash: f64 = value.parse().context("Failed to parse INITIAL_CASH")?;
        config.initial_cash = Decimal::from_f64_retain(cash)
            .context("INITIAL_CASH out of range")?;
    }

    config.validate().context("Configuration rejected")?;
    Ok(config)
}

fn parse_priors(raw: &str) -> Result<HashMap<String, f64>> {
    let mut priors = HashMap::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let (exchange, prior) = entry
            .trim()
            .split_once(':')
            .with_context(|| format!("Invalid EXCHANGE_PRIORS entry '{}'", entry))?;
        priors.insert(
            exchange.trim().to_string(),
            prior
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid prior in '{}'", entry))?,
        );
    }
    Ok(priors)
}

fn adapters_from_env(config: &CoreConfig) -> Result<Vec<Arc<dyn TickSource>>> {
    let mode = env::var("MODE").unwrap_or_else(|_| "replay".to_string());
    let mut adapters: Vec<Arc<dyn TickSource>> = Vec::new();

    match mode.as_str() {
        "websocket" => {
            let template = env::var("MARKET_WS_URL")
                .context("MARKET_WS_URL required for MODE=websocket")?;
            for exchange in config.reliability_priors.keys() {
                let url = Url::parse(&template.replace("{exchange}", exchange))
                    .with_context(|| format!("Invalid MARKET_WS_URL for {}", exchange))?;
                adapters.push(Arc::new(WebSocketTickSource::new(
                    exchange,
                    url,
                    config.pairs.clone(),
                )));
            }
        }
        _ => {
            // Scripted demo feed: a slow sine around a base price per pair.
            info!("MODE=replay: running against a scripted demo feed");
            for exchange in config.reliability_priors.keys() {
                for pair in &config.pairs {
                    let prices: Vec<f64> = (0..3_600)
                        .map(|i| 40_000.0 * (1.0 + 0.002 * (i as f64 / 30.0).sin()))
                        .collect();
                    adapters.push(Arc::new(ScriptedTickSource::from_prices(
                        exchange,
                        pair,
                        &prices,
                        Duration::from_millis(1_000),
                    )));
                }
            }
        }
    }
    Ok(adapters)
}

fn oracle_from_env() -> Option<Arc<dyn ScoreOracle>> {
    let endpoint = env::var("ORACLE_URL").ok()?;
    let url = Url::parse(&endpoint).ok()?;
    let api_key = env::var("MARKET_DATA_API_KEY").ok();
    info!("Score oracle enabled at {}", url);
    Some(Arc::new(HttpScoreOracle::new(url, api_key)))
}
