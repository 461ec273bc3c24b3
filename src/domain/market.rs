use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of market state driving signal adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Normal,
    Trending,
    Volatile,
    Illiquid,
    Crisis,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Normal => write!(f, "Normal"),
            MarketRegime::Trending => write!(f, "Trending"),
            MarketRegime::Volatile => write!(f, "Volatile"),
            MarketRegime::Illiquid => write!(f, "Illiquid"),
            MarketRegime::Crisis => write!(f, "Crisis"),
        }
    }
}

/// The reliability-weighted consolidated state of a pair across exchanges at
/// a point in time. Recomputed per tick; never shared mutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedView {
    pub pair: String,
    pub aggregated_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub contributing_exchanges: Vec<String>,
    pub participating_count: usize,
    /// Summed reported volume of the contributing exchanges.
    pub volume: Decimal,
    pub data_quality: f64,
    /// Set when contributing quotes cross (best bid above best ask);
    /// data_quality has already been reduced when this is set.
    pub crossed_market: bool,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub as_of: DateTime<Utc>,
}

/// A cross-exchange price dislocation worth flagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageHint {
    pub pair: String,
    pub buy_on: String,
    pub sell_on: String,
    pub gross_spread_bps: f64,
    pub net_spread_bps: f64,
    pub detected_at: DateTime<Utc>,
}

/// Live health view of a single exchange stream. Mutated only by the stream
/// health monitor; quality decays monotonically without fresh ticks.
#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    pub exchange_id: String,
    pub connected: bool,
    pub ewma_latency_ms: f64,
    pub messages_per_sec: f64,
    pub error_count_24h: u64,
    pub quality_score: f64,
    pub reliability_weight: f64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl StreamHealth {
    pub fn offline(exchange_id: &str) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            connected: false,
            ewma_latency_ms: 0.0,
            messages_per_sec: 0.0,
            error_count_24h: 0,
            quality_score: 0.0,
            reliability_weight: 0.0,
            last_message_at: None,
        }
    }

    /// An exchange is healthy when connected with acceptable quality.
    pub fn is_healthy(&self) -> bool {
        self.connected && self.quality_score > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_health_is_unhealthy() {
        let health = StreamHealth::offline("kraken");
        assert!(!health.is_healthy());
        assert_eq!(health.reliability_weight, 0.0);
    }

    #[test]
    fn test_regime_display() {
        assert_eq!(MarketRegime::Volatile.to_string(), "Volatile");
        assert_eq!(MarketRegime::Crisis.to_string(), "Crisis");
    }
}
