// Scripted replay source for tests and dry runs
pub mod replay;

// Polled REST ticker source
pub mod rest;

// WebSocket streaming source
pub mod websocket;

use crate::domain::types::{StreamEvent, Tick, normalize_pair_symbol};
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Reconnect backoff: exponential from 1s, capped at 60s, +/-20% jitter.
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let base = 1u64 << attempt.min(6);
    let capped = base.min(60) as f64;
    let mut rng = rand::rng();
    let jitter = rng.random_range(-0.2..=0.2);
    Duration::from_millis(((capped * (1.0 + jitter)) * 1000.0).max(100.0) as u64)
}

/// Ticker payload shared by the streaming and polled transports.
#[derive(Debug, Deserialize)]
pub struct WireTicker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    #[serde(default)]
    pub volume: f64,
    /// Exchange-side timestamp in epoch milliseconds.
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

impl WireTicker {
    /// Validates and normalizes the payload into a canonical tick.
    /// Malformed payloads are rejected with a reason (logged and counted by
    /// the caller, never propagated downstream).
    pub fn into_tick(self, exchange_id: &str, received_at: DateTime<Utc>) -> Result<Tick, String> {
        let pair_symbol = normalize_pair_symbol(&self.symbol)?;
        if !(self.bid.is_finite() && self.ask.is_finite() && self.last.is_finite()) {
            return Err(format!("non-finite prices in {} payload", self.symbol));
        }
        if self.bid <= 0.0 || self.ask <= 0.0 || self.last <= 0.0 {
            return Err(format!("non-positive prices in {} payload", self.symbol));
        }
        let exchange_timestamp = Utc
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .ok_or_else(|| format!("invalid timestamp {}", self.timestamp_ms))?;

        Ok(Tick {
            exchange_id: exchange_id.to_string(),
            pair_symbol,
            bid: Decimal::from_f64(self.bid).unwrap_or(Decimal::ZERO),
            ask: Decimal::from_f64(self.ask).unwrap_or(Decimal::ZERO),
            last: Decimal::from_f64(self.last).unwrap_or(Decimal::ZERO),
            volume: Decimal::from_f64(self.volume.max(0.0)).unwrap_or(Decimal::ZERO),
            received_at,
            exchange_timestamp,
        })
    }
}

/// Bounded drop-oldest delivery buffer between a transport task and the
/// consumer channel. When the consumer lags beyond the capacity, the oldest
/// events are discarded and accounted as an `OverflowDrop`.
pub struct BoundedForwarder {
    exchange_id: String,
    buffer: VecDeque<StreamEvent>,
    capacity: usize,
    dropped: u64,
}

impl BoundedForwarder {
    pub fn new(exchange_id: &str, capacity: usize) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: StreamEvent) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
            self.dropped += 1;
        }
        self.buffer.push_back(event);
    }

    /// Drains whatever the consumer can take right now; reports accumulated
    /// drops once there is room again.
    pub fn flush(&mut self, tx: &mpsc::Sender<StreamEvent>) -> bool {
        while let Some(event) = self.buffer.pop_front() {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.buffer.push_front(event);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        if self.dropped > 0 {
            let report = StreamEvent::OverflowDrop {
                exchange_id: self.exchange_id.clone(),
                count: self.dropped,
            };
            // The counter survives until the report actually goes out.
            if tx.try_send(report).is_ok() {
                debug!(
                    "BoundedForwarder: {} dropped {} events on overflow",
                    self.exchange_id, self.dropped
                );
                self.dropped = 0;
            }
        }
        true
    }
}
