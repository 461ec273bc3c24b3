use crate::domain::errors::SinkError;
use crate::domain::events::{Envelope, EnvelopeKind};
use crate::domain::market::AggregatedView;
use crate::domain::ports::{HistoricalStore, PersistenceSink};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory append-only sink. Used by tests and as the default sink when no
/// file path is configured; enters degraded mode when the bounded buffer
/// fills, like the file sink.
pub struct InMemorySink {
    envelopes: Mutex<Vec<Envelope>>,
    capacity: usize,
    degraded: AtomicBool,
    /// Test hook: force append failures.
    fail_appends: AtomicBool,
}

impl InMemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            envelopes: Mutex::new(Vec::new()),
            capacity,
            degraded: AtomicBool::new(false),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().expect("sink poisoned").clone()
    }

    pub fn count_by_kind(&self, kind: EnvelopeKind) -> usize {
        self.envelopes
            .lock()
            .expect("sink poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
        if !failing {
            self.degraded.store(false, Ordering::SeqCst);
        }
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn append(&self, envelope: Envelope) -> Result<(), SinkError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            self.degraded.store(true, Ordering::SeqCst);
            return Err(SinkError::Io("append failure injected".to_string()));
        }
        let mut envelopes = self.envelopes.lock().expect("sink poisoned");
        if envelopes.len() >= self.capacity {
            self.degraded.store(true, Ordering::SeqCst);
            return Err(SinkError::BufferFull {
                capacity: self.capacity,
            });
        }
        envelopes.push(envelope);
        self.degraded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

/// In-memory historical store feeding the aggregator's regime warm-up.
#[derive(Default)]
pub struct InMemoryHistory {
    views: Mutex<HashMap<String, Vec<AggregatedView>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, pair: &str, views: Vec<AggregatedView>) {
        self.views
            .lock()
            .expect("history poisoned")
            .insert(pair.to_string(), views);
    }
}

#[async_trait]
impl HistoricalStore for InMemoryHistory {
    async fn recent_views(&self, pair: &str, limit: usize) -> Result<Vec<AggregatedView>> {
        let views = self.views.lock().expect("history poisoned");
        let Some(all) = views.get(pair) else {
            return Ok(Vec::new());
        };
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::new(EnvelopeKind::Signal, &json!({"x": 1})).unwrap()
    }

    #[tokio::test]
    async fn test_append_and_count() {
        let sink = InMemorySink::default();
        sink.append(envelope()).await.unwrap();
        sink.append(Envelope::new(EnvelopeKind::Outcome, &json!({})).unwrap())
            .await
            .unwrap();
        assert_eq!(sink.count_by_kind(EnvelopeKind::Signal), 1);
        assert_eq!(sink.count_by_kind(EnvelopeKind::Outcome), 1);
        assert!(!sink.is_degraded());
    }

    #[tokio::test]
    async fn test_degraded_on_full_buffer() {
        let sink = InMemorySink::new(2);
        sink.append(envelope()).await.unwrap();
        sink.append(envelope()).await.unwrap();
        let err = sink.append(envelope()).await.unwrap_err();
        assert!(matches!(err, SinkError::BufferFull { capacity: 2 }));
        assert!(sink.is_degraded());
    }

    #[tokio::test]
    async fn test_injected_failure_degrades() {
        let sink = InMemorySink::default();
        sink.set_failing(true);
        assert!(sink.append(envelope()).await.is_err());
        assert!(sink.is_degraded());
        sink.set_failing(false);
        assert!(sink.append(envelope()).await.is_ok());
        assert!(!sink.is_degraded());
    }

    #[tokio::test]
    async fn test_history_returns_tail() {
        let history = InMemoryHistory::new();
        let views: Vec<AggregatedView> = Vec::new();
        history.seed("BTC/ETH", views);
        assert!(history.recent_views("BTC/ETH", 10).await.unwrap().is_empty());
        assert!(history.recent_views("ETH/ADA", 10).await.unwrap().is_empty());
    }
}
