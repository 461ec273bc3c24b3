use crate::domain::errors::{OracleError, SinkError, TransportError};
use crate::domain::events::Envelope;
use crate::domain::market::{AggregatedView, MarketRegime};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc::Receiver;

use crate::domain::types::StreamEvent;

/// A per-exchange market data stream. Implementations own their transport
/// (WebSocket, polled REST, scripted replay) and reconnection policy.
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Canonical exchange identifier (e.g. "binance").
    fn exchange_id(&self) -> &str;

    /// Establishes the underlying transport and begins emitting events.
    /// Transient drops are recovered internally with backoff; only
    /// unrecoverable setup failures surface here.
    async fn connect(&self) -> Result<Receiver<StreamEvent>, TransportError>;
}

/// Read-only historical store used by the aggregator for regime warm-up.
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    /// Last `limit` aggregated observations for a pair, oldest first.
    async fn recent_views(&self, pair: &str, limit: usize) -> Result<Vec<AggregatedView>>;
}

/// Append-only persistence sink for audit records. Implementations buffer
/// writes; a full buffer surfaces as `SinkError::BufferFull` so the pipeline
/// can degrade instead of losing records.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append(&self, envelope: Envelope) -> Result<(), SinkError>;

    /// Whether the sink is currently refusing appends (degraded mode).
    fn is_degraded(&self) -> bool {
        false
    }
}

/// Context handed to the score oracle for one pair evaluation.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub pair: String,
    pub regime: MarketRegime,
    pub deviation: f64,
    pub data_quality: f64,
}

/// Adjustment returned by the score oracle. The factor is hard-clamped to
/// [0.8, 1.2] before use regardless of what the oracle returns.
#[derive(Debug, Clone)]
pub struct ScoreAdjustment {
    pub factor: f64,
    pub features: HashMap<String, f64>,
    pub confidence: f64,
}

/// Optional external scoring oracle used to enrich signal confidence.
#[async_trait]
pub trait ScoreOracle: Send + Sync {
    async fn score(&self, context: ScoreContext) -> Result<ScoreAdjustment, OracleError>;
}
