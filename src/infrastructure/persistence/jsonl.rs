use crate::domain::errors::SinkError;
use crate::domain::events::Envelope;
use crate::domain::ports::PersistenceSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Append-only JSONL sink: one envelope per line, written by a dedicated
/// task behind a bounded buffer.
///
/// When the buffer fills the sink reports degraded and `append` blocks until
/// space frees up. Audit records are never dropped; the pipeline upstream
/// stops emitting new signals while degraded (correctness over liveness).
pub struct JsonlSink {
    tx: mpsc::Sender<Envelope>,
    degraded: Arc<AtomicBool>,
}

impl JsonlSink {
    /// Default in-memory buffer before backpressure engages.
    pub const DEFAULT_BUFFER: usize = 10_000;

    pub async fn create(path: impl AsRef<Path>, buffer: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open sink file {}", path.display()))?;
        info!("JsonlSink: appending to {}", path.display());

        let (tx, mut rx) = mpsc::channel::<Envelope>(buffer.max(1));
        tokio::spawn(async move {
            let mut writer = tokio::io::BufWriter::new(file);
            while let Some(envelope) = rx.recv().await {
                match serde_json::to_string(&envelope) {
                    Ok(line) => {
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            error!("JsonlSink: write failed: {}", e);
                            break;
                        }
                        if let Err(e) = writer.write_all(b"\n").await {
                            error!("JsonlSink: write failed: {}", e);
                            break;
                        }
                        // Flush when the queue drains so shutdown never
                        // leaves buffered records behind.
                        if rx.is_empty()
                            && let Err(e) = writer.flush().await
                        {
                            error!("JsonlSink: flush failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => error!("JsonlSink: serialization failed: {}", e),
                }
            }
            let _ = writer.flush().await;
            info!("JsonlSink: writer stopped.");
        });

        Ok(Self {
            tx,
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn append(&self, envelope: Envelope) -> Result<(), SinkError> {
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.degraded.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                // Buffer full: flag degraded, then block rather than lose
                // the record.
                self.degraded.store(true, Ordering::SeqCst);
                self.tx
                    .send(envelope)
                    .await
                    .map_err(|_| SinkError::Closed)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EnvelopeKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_appends_one_line_per_envelope() {
        let dir = std::env::temp_dir().join(format!("pairtrade-sink-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("audit.jsonl");

        let sink = JsonlSink::create(&path, 64).await.unwrap();
        for i in 0..5 {
            sink.append(Envelope::new(EnvelopeKind::Signal, &json!({ "seq": i })).unwrap())
                .await
                .unwrap();
        }

        // Give the writer task a moment to drain and flush.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        let first: Envelope = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, EnvelopeKind::Signal);
        assert_eq!(first.payload["seq"], 0);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
