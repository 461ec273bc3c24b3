use crate::application::compliance::engine::{ComplianceConfig, ComplianceEngine};
use crate::application::compliance::{ComplianceAgent, ComplianceCommand};
use crate::application::correlation::{CorrelationAgent, CorrelationHandle, CorrelationTracker};
use crate::application::market_data::MarketDataAgent;
use crate::application::market_data::aggregator::{AggregatorConfig, MarketDataAggregator};
use crate::application::market_data::health::{HealthConfig, StreamHealthMonitor};
use crate::application::signals::generator::SignalConfig;
use crate::application::signals::oracle::OracleGate;
use crate::application::signals::thresholds::ThresholdsPublisher;
use crate::application::signals::{PredictionCommand, SignalAgent, SignalCommand};
use crate::application::simulation::execution::ExecutionModel;
use crate::application::simulation::risk::{RiskConfig, RiskPipeline};
use crate::application::simulation::{SimulationConfig, SimulatorAgent, TradingSimulator};
use crate::config::CoreConfig;
use crate::domain::events::HealthUpdate;
use crate::domain::market::{AggregatedView, ArbitrageHint};
use crate::domain::ports::{HistoricalStore, PersistenceSink, ScoreOracle, TickSource};
use crate::domain::trading::Outcome;
use crate::domain::types::StreamEvent;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

// Channel capacities.
const MERGED_EVENTS_CAPACITY: usize = 4096;
const VIEWS_CAPACITY: usize = 256;
const HEALTH_CAPACITY: usize = 64;
const HINTS_CAPACITY: usize = 64;
const SIGNALS_CAPACITY: usize = 256;
const PREDICTIONS_CAPACITY: usize = 1024;
const OUTCOMES_CAPACITY: usize = 1024;
const COMMANDS_CAPACITY: usize = 16;

/// External collaborators injected into the pipeline by the composition
/// root. No global lookup: every component receives its dependencies here.
pub struct PipelineDeps {
    pub adapters: Vec<Arc<dyn TickSource>>,
    pub history: Arc<dyn HistoricalStore>,
    pub sink: Arc<dyn PersistenceSink>,
    pub oracle: Option<Arc<dyn ScoreOracle>>,
}

/// The assembled real-time pipeline: one task per component, bounded typed
/// channels between them, single shutdown signal.
pub struct Pipeline {
    config: CoreConfig,
    deps: PipelineDeps,
    metrics: Arc<Metrics>,
}

/// Running pipeline handle. Dropping it does not stop the tasks; call
/// [`PipelineHandle::shutdown`].
pub struct PipelineHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    views_tx: broadcast::Sender<AggregatedView>,
    health_tx: broadcast::Sender<HealthUpdate>,
    hints_tx: broadcast::Sender<ArbitrageHint>,
    pub correlation: CorrelationHandle,
    pub compliance_tx: mpsc::Sender<ComplianceCommand>,
    pub metrics: Arc<Metrics>,
}

impl Pipeline {
    /// Validates the configuration and prepares the pipeline. Invalid
    /// configuration is fatal here, before any task starts.
    pub fn new(config: CoreConfig, deps: PipelineDeps) -> Result<Self> {
        config.validate().context("Invalid pipeline configuration")?;
        if deps.adapters.is_empty() {
            bail!("No exchange adapters supplied");
        }
        let metrics = Arc::new(Metrics::new()?);
        Ok(Self {
            config,
            deps,
            metrics,
        })
    }

    pub async fn start(self) -> Result<PipelineHandle> {
        let Pipeline {
            config,
            deps,
            metrics,
        } = self;
        let now = Utc::now();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(MERGED_EVENTS_CAPACITY);
        let (views_tx, _) = broadcast::channel::<AggregatedView>(VIEWS_CAPACITY);
        let (health_tx, _) = broadcast::channel::<HealthUpdate>(HEALTH_CAPACITY);
        let (hints_tx, _) = broadcast::channel::<ArbitrageHint>(HINTS_CAPACITY);
        let (signals_tx, signals_rx) = mpsc::channel::<SignalCommand>(SIGNALS_CAPACITY);
        let (predictions_tx, predictions_rx) =
            mpsc::channel::<PredictionCommand>(PREDICTIONS_CAPACITY);
        let (outcomes_tx, outcomes_rx) = mpsc::channel::<Outcome>(OUTCOMES_CAPACITY);
        let (compliance_tx, compliance_rx) = mpsc::channel::<ComplianceCommand>(COMMANDS_CAPACITY);

        let mut tasks = Vec::new();

        // A: per-exchange adapters feeding the merged event stream.
        let mut connected = 0usize;
        for adapter in &deps.adapters {
            match adapter.connect().await {
                Ok(mut rx) => {
                    connected += 1;
                    let tx = events_tx.clone();
                    let mut shutdown = shutdown_rx.clone();
                    let exchange = adapter.exchange_id().to_string();
                    tasks.push(tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                event = rx.recv() => {
                                    match event {
                                        Some(event) => {
                                            if tx.send(event).await.is_err() {
                                                break;
                                            }
                                        }
                                        None => break,
                                    }
                                }
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() {
                                        break;
                                    }
                                }
                            }
                        }
                        info!("Pipeline: adapter stream {} detached", exchange);
                    }));
                }
                Err(e) => {
                    warn!(
                        "Pipeline: adapter {} failed to connect: {}",
                        adapter.exchange_id(),
                        e
                    );
                }
            }
        }
        if connected == 0 {
            bail!("All exchange adapters failed to connect");
        }
        drop(events_tx);

        // B + C: health monitoring and aggregation.
        let monitor = StreamHealthMonitor::new(&config.reliability_priors, HealthConfig::default());
        let aggregator = MarketDataAggregator::new(AggregatorConfig::from_core(&config));
        let mut market_data = MarketDataAgent::new(
            monitor,
            aggregator,
            events_rx,
            views_tx.clone(),
            health_tx.clone(),
            hints_tx.clone(),
            shutdown_rx.clone(),
            metrics.clone(),
        );
        market_data
            .warm_up(
                deps.history.as_ref(),
                &config.pairs,
                config.warmup_window_steps,
            )
            .await;

        // F's publishers: D reads thresholds, G reads execution constraints.
        let (thresholds_publisher, thresholds_rx) = ThresholdsPublisher::new(&config);
        let base_thresholds = thresholds_publisher.base().clone();
        let (engine, constraints_rx) = ComplianceEngine::new(
            ComplianceConfig::from_core(&config),
            thresholds_publisher,
            now,
        );

        // D: signal processing.
        let signal_agent = SignalAgent::new(
            SignalConfig::from_core(&config),
            base_thresholds,
            config.signal_refresh_ms,
            views_tx.subscribe(),
            thresholds_rx,
            signals_tx,
            predictions_tx,
            deps.sink.clone(),
            OracleGate::new(deps.oracle.clone(), config.oracle_max_requests_per_hour),
            shutdown_rx.clone(),
            metrics.clone(),
        );

        // E: correlation tracking.
        let tracker = CorrelationTracker::new(config.correlation_buffer_size);
        let (correlation_agent, correlation) = CorrelationAgent::new(
            tracker,
            predictions_rx,
            outcomes_rx,
            views_tx.subscribe(),
            shutdown_rx.clone(),
            metrics.clone(),
        );

        // F: compliance control loop.
        let compliance_agent = ComplianceAgent::new(
            engine,
            correlation.clone(),
            views_tx.subscribe(),
            compliance_rx,
            deps.sink.clone(),
            shutdown_rx.clone(),
            metrics.clone(),
            config.monitoring_interval_ms,
            config.stale_threshold_ms,
        );

        // G: paper-trading simulator.
        let simulator = TradingSimulator::new(
            SimulationConfig::from_core(&config),
            RiskPipeline::new(RiskConfig::from_core(&config)),
            ExecutionModel::from_core(&config),
            now,
        );
        let simulator_agent = SimulatorAgent::new(
            simulator,
            signals_rx,
            views_tx.subscribe(),
            constraints_rx,
            outcomes_tx,
            deps.sink.clone(),
            shutdown_rx.clone(),
            metrics.clone(),
        );

        tasks.push(tokio::spawn(market_data.run()));
        tasks.push(tokio::spawn(signal_agent.run()));
        tasks.push(tokio::spawn(correlation_agent.run()));
        tasks.push(tokio::spawn(compliance_agent.run()));
        tasks.push(tokio::spawn(simulator_agent.run()));

        info!(
            "Pipeline: started with {} adapters, {} pairs warmed",
            connected,
            config.pairs.len()
        );

        Ok(PipelineHandle {
            shutdown_tx,
            tasks,
            views_tx,
            health_tx,
            hints_tx,
            correlation,
            compliance_tx,
            metrics,
        })
    }
}

impl PipelineHandle {
    pub fn subscribe_views(&self) -> broadcast::Receiver<AggregatedView> {
        self.views_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthUpdate> {
        self.health_tx.subscribe()
    }

    pub fn subscribe_hints(&self) -> broadcast::Receiver<ArbitrageHint> {
        self.hints_tx.subscribe()
    }

    /// Signals shutdown and waits for every task to flush and exit. The
    /// simulator force-closes open positions on the way out.
    pub async fn shutdown(self) {
        info!("Pipeline: shutdown requested.");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!("Pipeline: task ended abnormally: {}", e);
            }
        }
        info!("Pipeline: all tasks stopped.");
    }
}
