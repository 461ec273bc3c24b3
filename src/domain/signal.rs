use crate::domain::market::MarketRegime;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Long,
    Short,
    Flat,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Long => write!(f, "LONG"),
            SignalDirection::Short => write!(f, "SHORT"),
            SignalDirection::Flat => write!(f, "FLAT"),
        }
    }
}

impl SignalDirection {
    /// Sign used when converting a price move into a signed return.
    pub fn sign(&self) -> f64 {
        match self {
            SignalDirection::Long => 1.0,
            SignalDirection::Short => -1.0,
            SignalDirection::Flat => 0.0,
        }
    }
}

/// A pair-trading signal. Immutable once emitted; shared read-only with the
/// simulator and the correlation tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTradingSignal {
    pub signal_id: Uuid,
    pub pair: String,
    pub direction: SignalDirection,
    /// Mean-reversion strength in [-1, 1].
    pub strength: f64,
    pub confidence: f64,
    pub predicted_return: f64,
    pub risk_score: f64,
    pub regime_at_generation: MarketRegime,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LiveTradingSignal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn horizon(&self) -> Duration {
        self.expires_at - self.created_at
    }
}

/// The current, possibly overridden, signal-gate parameters the signal
/// processor uses. Published by the compliance engine as a versioned
/// snapshot; the processor reads the whole struct atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveThresholds {
    pub version: u64,
    pub min_confidence: f64,
    pub min_data_quality: f64,
    pub min_participants: usize,
    pub min_strength: f64,
    pub max_concurrent_signals: usize,
    /// Emergency state: only Trending-regime signals may be emitted.
    pub suppress_non_trending: bool,
    pub effective_until: Option<DateTime<Utc>>,
}

impl EffectiveThresholds {
    /// Whether the override window (if any) has lapsed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.effective_until.map(|t| now >= t).unwrap_or(false)
    }
}

/// A prediction registered with the correlation tracker when a signal is
/// emitted, awaiting its realized outcome.
#[derive(Debug, Clone)]
pub struct PendingPrediction {
    pub signal_id: Uuid,
    pub pair: String,
    pub direction: SignalDirection,
    pub predicted_return: f64,
    /// Aggregated price at signal creation; the reference for would-be
    /// returns of filtered or expired signals.
    pub reference_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
