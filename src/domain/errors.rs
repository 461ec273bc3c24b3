use thiserror::Error;

/// Errors local to a tick source adapter. Recovered with backoff and retry;
/// never propagated past the adapter boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {exchange} failed: {reason}")]
    ConnectFailed { exchange: String, reason: String },

    #[error("Connection to {exchange} lost: {reason}")]
    ConnectionLost { exchange: String, reason: String },

    #[error("Malformed payload from {exchange}: {detail}")]
    MalformedPayload { exchange: String, detail: String },
}

/// Errors from the score oracle; always degraded gracefully.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Score oracle rate limit reached ({limit}/hr)")]
    RateLimited { limit: u32 },

    #[error("Score oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Score oracle returned out-of-range factor {0}")]
    OutOfRangeFactor(f64),
}

/// Errors from the append-only persistence sink. A full buffer applies
/// backpressure to the whole pipeline rather than losing audit records.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Persistence buffer full ({capacity} envelopes)")]
    BufferFull { capacity: usize },

    #[error("Persistence I/O failure: {0}")]
    Io(String),

    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    #[error("Persistence sink closed")]
    Closed,
}

/// A signal failed a risk check. Not an error path: reported back to the
/// correlation tracker as a filtered outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskRejection {
    #[error("Position size {requested_pct:.2}% exceeds limit {max_pct:.2}%")]
    PositionSizeExceeded { requested_pct: f64, max_pct: f64 },

    #[error("Gross exposure {projected_pct:.2}% exceeds limit {max_pct:.2}%")]
    GrossExposureExceeded { projected_pct: f64, max_pct: f64 },

    #[error(
        "Correlated bucket with {existing_pair} (rho={correlation:.2}) exceeds size limit {max_pct:.2}%"
    )]
    CorrelatedBucketExceeded {
        existing_pair: String,
        correlation: f64,
        max_pct: f64,
    },

    #[error("Drawdown kill-switch engaged: {drawdown_pct:.2}% > {max_pct:.2}%")]
    DrawdownKillSwitch { drawdown_pct: f64, max_pct: f64 },

    #[error("New position openings halted by compliance")]
    OpeningsHalted,
}

impl RiskRejection {
    /// Stable machine-readable code recorded in filtered outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::PositionSizeExceeded { .. } => "position_size_exceeded",
            RiskRejection::GrossExposureExceeded { .. } => "gross_exposure_exceeded",
            RiskRejection::CorrelatedBucketExceeded { .. } => "correlated_bucket_exceeded",
            RiskRejection::DrawdownKillSwitch { .. } => "drawdown_kill_switch",
            RiskRejection::OpeningsHalted => "openings_halted",
        }
    }
}

/// Fatal configuration errors; reject at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target_correlation {0} outside [-1, 1]")]
    InvalidTargetCorrelation(f64),

    #[error("Compliance thresholds must satisfy emergency < critical < warning < target (got {0})")]
    UnorderedThresholds(String),

    #[error("No exchange adapters configured")]
    NoExchanges,

    #[error("{name} must be within ({min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid latency distribution: min {min_ms}ms > max {max_ms}ms")]
    InvalidLatencyRange { min_ms: u64, max_ms: u64 },

    #[error("Reliability prior for {exchange} must be in [0, 1], got {prior}")]
    InvalidReliabilityPrior { exchange: String, prior: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_rejection_codes() {
        let rejection = RiskRejection::PositionSizeExceeded {
            requested_pct: 5.0,
            max_pct: 2.0,
        };
        assert_eq!(rejection.code(), "position_size_exceeded");
        assert!(rejection.to_string().contains("5.00%"));
        assert!(rejection.to_string().contains("2.00%"));

        assert_eq!(RiskRejection::OpeningsHalted.code(), "openings_halted");
    }

    #[test]
    fn test_sink_error_formatting() {
        let err = SinkError::BufferFull { capacity: 10_000 };
        assert!(err.to_string().contains("10000"));
    }
}
