use crate::domain::errors::TransportError;
use crate::domain::ports::TickSource;
use crate::domain::types::StreamEvent;
use crate::infrastructure::exchange::{BoundedForwarder, WireTicker, reconnect_backoff};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Per-adapter delivery buffer (drop-oldest on consumer lag).
const EVENT_BUFFER: usize = 1024;

/// Generic WebSocket tick source. The venue is expected to stream ticker
/// JSON objects (see [`WireTicker`]); subscription happens via a JSON
/// message listing the requested symbols.
pub struct WebSocketTickSource {
    exchange_id: String,
    ws_url: Url,
    symbols: Vec<String>,
}

impl WebSocketTickSource {
    pub fn new(exchange_id: &str, ws_url: Url, symbols: Vec<String>) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            ws_url,
            symbols,
        }
    }

    async fn run_stream(
        exchange_id: String,
        ws_url: Url,
        symbols: Vec<String>,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut forwarder = BoundedForwarder::new(&exchange_id, EVENT_BUFFER);
        let mut attempt: u32 = 0;

        loop {
            match Self::connect_and_stream(&exchange_id, &ws_url, &symbols, &tx, &mut forwarder)
                .await
            {
                Ok(()) => {
                    info!("WebSocketTickSource: {} stream closed by peer", exchange_id);
                    attempt = 0;
                }
                Err(e) => {
                    warn!(
                        "WebSocketTickSource: {} transport error: {}",
                        exchange_id, e
                    );
                    attempt = attempt.saturating_add(1);
                }
            }

            forwarder.push(StreamEvent::Disconnected {
                exchange_id: exchange_id.clone(),
                reason: "reconnecting".to_string(),
            });
            if !forwarder.flush(&tx) {
                debug!("WebSocketTickSource: {} consumer gone, stopping", exchange_id);
                return;
            }

            let backoff = reconnect_backoff(attempt);
            debug!(
                "WebSocketTickSource: {} reconnecting in {:?}",
                exchange_id, backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn connect_and_stream(
        exchange_id: &str,
        ws_url: &Url,
        symbols: &[String],
        tx: &mpsc::Sender<StreamEvent>,
        forwarder: &mut BoundedForwarder,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(ws_url.as_str()).await?;
        info!("WebSocketTickSource: {} connected", exchange_id);
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": symbols,
            "id": Utc::now().timestamp_millis(),
        });
        write.send(Message::Text(subscribe.to_string().into())).await?;

        forwarder.push(StreamEvent::Connected {
            exchange_id: exchange_id.to_string(),
        });
        if !forwarder.flush(tx) {
            return Ok(());
        }

        while let Some(message) = read.next().await {
            let message = message?;
            match message {
                Message::Text(text) => {
                    let received_at = Utc::now();
                    match serde_json::from_str::<WireTicker>(&text) {
                        Ok(wire) => match wire.into_tick(exchange_id, received_at) {
                            Ok(tick) => forwarder.push(StreamEvent::Tick(tick)),
                            Err(reason) => {
                                debug!(
                                    "WebSocketTickSource: {} rejected payload: {}",
                                    exchange_id, reason
                                );
                                forwarder.push(StreamEvent::Error {
                                    exchange_id: exchange_id.to_string(),
                                    message: reason,
                                });
                            }
                        },
                        Err(e) => {
                            // Subscription acks and heartbeats land here.
                            debug!(
                                "WebSocketTickSource: {} unparsed frame: {}",
                                exchange_id, e
                            );
                        }
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => {
                    return Ok(());
                }
                _ => {}
            }
            if !forwarder.flush(tx) {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TickSource for WebSocketTickSource {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    async fn connect(&self) -> Result<mpsc::Receiver<StreamEvent>, TransportError> {
        if self.symbols.is_empty() {
            return Err(TransportError::ConnectFailed {
                exchange: self.exchange_id.clone(),
                reason: "no symbols configured".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(Self::run_stream(
            self.exchange_id.clone(),
            self.ws_url.clone(),
            self.symbols.clone(),
            tx,
        ));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_symbols() {
        let source = WebSocketTickSource::new(
            "binance",
            Url::parse("wss://example.invalid/stream").unwrap(),
            Vec::new(),
        );
        let err = source.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_connect_returns_stream_immediately() {
        // The transport dials in the background; connect itself must not
        // block on an unreachable endpoint.
        let source = WebSocketTickSource::new(
            "binance",
            Url::parse("wss://example.invalid:9/stream").unwrap(),
            vec!["btcusdt@ticker".to_string()],
        );
        let rx = source.connect().await.unwrap();
        drop(rx);
    }
}
