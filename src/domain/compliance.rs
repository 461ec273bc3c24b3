use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Regulatory compliance status derived from the measured correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    Compliant,
    Warning,
    Critical,
    Emergency,
    /// Not enough samples to measure correlation; never a violation.
    Unknown,
    /// Human-authorized override window.
    ForcedCompliant,
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceStatus::Compliant => write!(f, "COMPLIANT"),
            ComplianceStatus::Warning => write!(f, "WARNING"),
            ComplianceStatus::Critical => write!(f, "CRITICAL"),
            ComplianceStatus::Emergency => write!(f, "EMERGENCY"),
            ComplianceStatus::Unknown => write!(f, "UNKNOWN"),
            ComplianceStatus::ForcedCompliant => write!(f, "FORCED_COMPLIANT"),
        }
    }
}

impl ComplianceStatus {
    /// Ordering for escalation checks; higher is worse. Unknown and
    /// ForcedCompliant do not participate in escalation.
    pub fn severity_rank(&self) -> u8 {
        match self {
            ComplianceStatus::Compliant
            | ComplianceStatus::Unknown
            | ComplianceStatus::ForcedCompliant => 0,
            ComplianceStatus::Warning => 1,
            ComplianceStatus::Critical => 2,
            ComplianceStatus::Emergency => 3,
        }
    }
}

/// What a compliance measurement refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementScope {
    Pair(String),
    Portfolio,
}

impl fmt::Display for MeasurementScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementScope::Pair(pair) => write!(f, "{}", pair),
            MeasurementScope::Portfolio => write!(f, "PORTFOLIO"),
        }
    }
}

/// One correlation measurement against the regulatory target. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceMeasurement {
    pub as_of: DateTime<Utc>,
    pub scope: MeasurementScope,
    pub measured_correlation: f64,
    pub sample_size: usize,
    pub confidence_interval_95: (f64, f64),
    pub p_value: f64,
    pub status: ComplianceStatus,
    /// `target - measured`; positive values indicate under-performance.
    pub trs_gap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationSeverity {
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationSeverity::Warning => write!(f, "warning"),
            ViolationSeverity::Critical => write!(f, "critical"),
            ViolationSeverity::Emergency => write!(f, "emergency"),
        }
    }
}

/// Lifecycle of an open violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationState {
    Observed,
    Escalated,
    Resolved,
    Reportable,
}

/// A recorded instance of status worse than Compliant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: Uuid,
    pub scope: MeasurementScope,
    pub severity: ViolationSeverity,
    pub state: ViolationState,
    pub first_observed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub correlation_at_open: f64,
    pub contributing_factors: BTreeSet<String>,
    pub reported_to_regulator: bool,
}

impl Violation {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// A bounded-duration override of signal-gate thresholds or execution
/// constraints, triggered by a violation. Only the compliance engine writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectiveAction {
    pub action_id: Uuid,
    pub triggered_by: Uuid,
    pub severity: ViolationSeverity,
    pub parameter_overrides: HashMap<String, f64>,
    pub applied_at: DateTime<Utc>,
    pub effective_until: DateTime<Utc>,
    pub expected_improvement: f64,
    pub observed_improvement: Option<f64>,
    pub successful: Option<bool>,
}

impl CorrectiveAction {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.effective_until
    }
}

/// Projection of the portfolio correlation forward in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceForecast {
    pub as_of: DateTime<Utc>,
    pub trend_slope_per_interval: f64,
    pub projected_correlation_1h: f64,
    pub projected_correlation_24h: f64,
    pub violation_probability_1h: f64,
    pub violation_probability_24h: f64,
}

/// One-shot human-authorized override. Duration is capped by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub justification: String,
    pub authorized_by: String,
}

/// Versioned execution-side constraints published by the compliance engine
/// and read atomically by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConstraints {
    pub version: u64,
    pub halt_new_positions: bool,
    /// Multiplier on the per-position size cap (0.5 under Critical actions).
    pub position_size_factor: f64,
    /// Trades opened while true are flagged `under_override`.
    pub under_override: bool,
    pub effective_until: Option<DateTime<Utc>>,
}

impl Default for ExecutionConstraints {
    fn default() -> Self {
        Self {
            version: 0,
            halt_new_positions: false,
            position_size_factor: 1.0,
            under_override: false,
            effective_until: None,
        }
    }
}

/// Violation counts per severity for a reporting period.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub warning: u32,
    pub critical: u32,
    pub emergency: u32,
}

impl ViolationCounts {
    pub fn total(&self) -> u32 {
        self.warning + self.critical + self.emergency
    }

    pub fn record(&mut self, severity: ViolationSeverity) {
        match severity {
            ViolationSeverity::Warning => self.warning += 1,
            ViolationSeverity::Critical => self.critical += 1,
            ViolationSeverity::Emergency => self.emergency += 1,
        }
    }
}

/// Summary of a corrective action for the regulatory envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action_id: Uuid,
    pub triggered_by: Uuid,
    pub successful: bool,
}

/// The regulator-facing report envelope. Field layout is fixed; see the
/// persistence sink for the versioned wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryReport {
    pub report_id: String,
    pub reporting_period_hours: u32,
    pub as_of: DateTime<Utc>,
    pub average_correlation: f64,
    pub time_in_compliance_fraction: f64,
    pub violations: ViolationCounts,
    pub corrective_actions: Vec<ActionSummary>,
    pub meets_regulatory_standard: bool,
    pub overall_risk_rating: f64,
}

impl RegulatoryReport {
    /// Standard test: avg >= 0.80, time in compliance >= 0.75, at most two
    /// critical violations in the period.
    pub fn evaluate_standard(
        average_correlation: f64,
        time_in_compliance_fraction: f64,
        critical_count: u32,
    ) -> bool {
        average_correlation >= 0.80 && time_in_compliance_fraction >= 0.75 && critical_count <= 2
    }

    /// Risk rating in [0, 1]; higher is riskier.
    pub fn risk_rating(average_correlation: f64, time_in_compliance_fraction: f64) -> f64 {
        (1.0 - average_correlation.max(0.0) * time_in_compliance_fraction).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity_rank_ordering() {
        assert!(
            ComplianceStatus::Emergency.severity_rank() > ComplianceStatus::Critical.severity_rank()
        );
        assert!(
            ComplianceStatus::Critical.severity_rank() > ComplianceStatus::Warning.severity_rank()
        );
        assert_eq!(ComplianceStatus::Unknown.severity_rank(), 0);
        assert_eq!(ComplianceStatus::ForcedCompliant.severity_rank(), 0);
    }

    #[test]
    fn test_regulatory_standard_evaluation() {
        assert!(RegulatoryReport::evaluate_standard(0.83, 0.785, 1));
        assert!(!RegulatoryReport::evaluate_standard(0.79, 0.9, 0));
        assert!(!RegulatoryReport::evaluate_standard(0.85, 0.70, 0));
        assert!(!RegulatoryReport::evaluate_standard(0.85, 0.9, 3));
    }

    #[test]
    fn test_risk_rating_bounds() {
        let rating = RegulatoryReport::risk_rating(0.83, 0.785);
        assert!((rating - (1.0 - 0.83 * 0.785)).abs() < 1e-12);
        assert_eq!(RegulatoryReport::risk_rating(-0.5, 0.5), 1.0);
        assert!(RegulatoryReport::risk_rating(1.0, 1.0) >= 0.0);
    }

    #[test]
    fn test_violation_counts_record() {
        let mut counts = ViolationCounts::default();
        counts.record(ViolationSeverity::Warning);
        counts.record(ViolationSeverity::Critical);
        counts.record(ViolationSeverity::Critical);
        assert_eq!(counts.warning, 1);
        assert_eq!(counts.critical, 2);
        assert_eq!(counts.total(), 3);
    }
}
