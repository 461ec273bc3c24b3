use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Known quote currencies, longest first so "BTCUSDT" resolves to BTC/USDT
/// rather than BTC/USD + trailing "T".
pub const QUOTE_CURRENCIES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "GBP", "BTC", "ETH"];

/// A single top-of-book observation from one exchange.
///
/// Ticks are immutable and live for exactly one pass through the pipeline:
/// adapter -> health monitor -> aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub exchange_id: String,
    pub pair_symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: Decimal,
    pub received_at: DateTime<Utc>,
    pub exchange_timestamp: DateTime<Utc>,
}

impl Tick {
    /// Wire-to-receipt latency in milliseconds. Clock skew can make this
    /// negative; callers clamp.
    pub fn latency_ms(&self) -> i64 {
        (self.received_at - self.exchange_timestamp).num_milliseconds()
    }

    /// Quoted spread in basis points relative to the mid price.
    pub fn spread_bps(&self) -> f64 {
        let bid = self.bid.to_f64().unwrap_or(0.0);
        let ask = self.ask.to_f64().unwrap_or(0.0);
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return 0.0;
        }
        ((ask - bid) / mid) * 10_000.0
    }

    /// A tick is crossed when its own bid exceeds its own ask.
    pub fn is_crossed(&self) -> bool {
        self.bid > self.ask
    }
}

/// Events emitted by a tick source adapter.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected {
        exchange_id: String,
    },
    Disconnected {
        exchange_id: String,
        reason: String,
    },
    Tick(Tick),
    /// The adapter's bounded buffer overflowed and the oldest `count` ticks
    /// were discarded before delivery.
    OverflowDrop {
        exchange_id: String,
        count: u64,
    },
    Error {
        exchange_id: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn exchange_id(&self) -> &str {
        match self {
            StreamEvent::Connected { exchange_id }
            | StreamEvent::Disconnected { exchange_id, .. }
            | StreamEvent::OverflowDrop { exchange_id, .. }
            | StreamEvent::Error { exchange_id, .. } => exchange_id,
            StreamEvent::Tick(tick) => &tick.exchange_id,
        }
    }
}

/// Normalizes an exchange-specific symbol to the canonical `BASE/QUOTE`
/// uppercase form (e.g. "btcusdt" -> "BTC/USDT", "BTC-USD" -> "BTC/USD").
pub fn normalize_pair_symbol(symbol: &str) -> Result<String, String> {
    if symbol.is_empty() {
        return Err("Cannot normalize empty symbol".to_string());
    }

    let upper = symbol.to_ascii_uppercase().replace('-', "/");

    if let Some((base, quote)) = upper.split_once('/') {
        if base.is_empty() || quote.is_empty() {
            return Err(format!("Malformed pair symbol: '{}'", symbol));
        }
        return Ok(format!("{}/{}", base, quote));
    }

    // Concatenated form: match known quote currencies, longest first.
    for quote in QUOTE_CURRENCIES {
        if upper.ends_with(quote) && upper.len() > quote.len() {
            let base = &upper[..upper.len() - quote.len()];
            if base.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Ok(format!("{}/{}", base, quote));
            }
        }
    }

    Err(format!(
        "Cannot normalize pair symbol: '{}' - no recognized quote currency",
        symbol
    ))
}
