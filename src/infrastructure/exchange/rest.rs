use crate::domain::errors::TransportError;
use crate::domain::ports::TickSource;
use crate::domain::types::StreamEvent;
use crate::infrastructure::exchange::{BoundedForwarder, WireTicker};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const EVENT_BUFFER: usize = 1024;

/// Polled REST ticker source for venues without a streaming feed. Each poll
/// fetches the full ticker array and emits one tick per symbol.
pub struct PolledRestSource {
    exchange_id: String,
    endpoint: Url,
    poll_interval: Duration,
}

impl PolledRestSource {
    pub fn new(exchange_id: &str, endpoint: Url, poll_interval: Duration) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            endpoint,
            poll_interval,
        }
    }

    async fn run_poller(
        exchange_id: String,
        endpoint: Url,
        poll_interval: Duration,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let client = reqwest::Client::new();
        let mut forwarder = BoundedForwarder::new(&exchange_id, EVENT_BUFFER);
        let mut connected = false;
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match Self::poll_once(&client, &endpoint, &exchange_id).await {
                Ok(events) => {
                    if !connected {
                        connected = true;
                        forwarder.push(StreamEvent::Connected {
                            exchange_id: exchange_id.clone(),
                        });
                    }
                    for event in events {
                        forwarder.push(event);
                    }
                }
                Err(reason) => {
                    warn!("PolledRestSource: {} poll failed: {}", exchange_id, reason);
                    if connected {
                        connected = false;
                        forwarder.push(StreamEvent::Disconnected {
                            exchange_id: exchange_id.clone(),
                            reason,
                        });
                    }
                }
            }
            if !forwarder.flush(&tx) {
                debug!("PolledRestSource: {} consumer gone, stopping", exchange_id);
                return;
            }
        }
    }

    async fn poll_once(
        client: &reqwest::Client,
        endpoint: &Url,
        exchange_id: &str,
    ) -> Result<Vec<StreamEvent>, String> {
        let response = client
            .get(endpoint.as_str())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let tickers: Vec<WireTicker> = response.json().await.map_err(|e| e.to_string())?;

        let received_at = Utc::now();
        let mut events = Vec::with_capacity(tickers.len());
        for wire in tickers {
            match wire.into_tick(exchange_id, received_at) {
                Ok(tick) => events.push(StreamEvent::Tick(tick)),
                Err(reason) => {
                    debug!("PolledRestSource: {} rejected payload: {}", exchange_id, reason);
                    events.push(StreamEvent::Error {
                        exchange_id: exchange_id.to_string(),
                        message: reason,
                    });
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl TickSource for PolledRestSource {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    async fn connect(&self) -> Result<mpsc::Receiver<StreamEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        info!(
            "PolledRestSource: {} polling {} every {:?}",
            self.exchange_id, self.endpoint, self.poll_interval
        );
        tokio::spawn(Self::run_poller(
            self.exchange_id.clone(),
            self.endpoint.clone(),
            self.poll_interval,
            tx,
        ));
        Ok(rx)
    }
}
