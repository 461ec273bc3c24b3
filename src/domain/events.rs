use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current envelope schema version. Bumped on any payload layout change.
pub const ENVELOPE_SCHEMA_VERSION: u32 = 3;

/// Emitted by the stream health monitor on threshold crossings
/// (healthy<->degraded, connected<->disconnected, primary changes).
#[derive(Debug, Clone, Serialize)]
pub struct HealthUpdate {
    pub exchange_id: String,
    pub connected: bool,
    pub healthy: bool,
    pub quality_score: f64,
    pub reliability_weight: f64,
    pub is_primary: bool,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Record kinds accepted by the append-only persistence sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Signal,
    Outcome,
    Violation,
    CorrectiveAction,
    RegulatoryReport,
    PortfolioSnapshot,
}

/// Self-describing, versioned record appended to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wraps a serializable payload at the current schema version.
    pub fn new<T: Serialize>(kind: EnvelopeKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            schema_version: ENVELOPE_SCHEMA_VERSION,
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wraps_payload_with_version() {
        #[derive(Serialize)]
        struct Sample {
            value: f64,
        }

        let envelope = Envelope::new(EnvelopeKind::Signal, &Sample { value: 0.5 }).unwrap();
        assert_eq!(envelope.schema_version, ENVELOPE_SCHEMA_VERSION);
        assert_eq!(envelope.kind, EnvelopeKind::Signal);
        assert_eq!(envelope.payload["value"], 0.5);
    }

    #[test]
    fn test_envelope_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EnvelopeKind::RegulatoryReport).unwrap();
        assert_eq!(json, "\"regulatory_report\"");
        let json = serde_json::to_string(&EnvelopeKind::CorrectiveAction).unwrap();
        assert_eq!(json, "\"corrective_action\"");
    }
}
