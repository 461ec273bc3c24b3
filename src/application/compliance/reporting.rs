use crate::domain::compliance::{
    ActionSummary, ComplianceMeasurement, ComplianceStatus, RegulatoryReport, ViolationCounts,
    ViolationSeverity,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Measurements retained for trend fitting and inspection.
const MEASUREMENT_HISTORY: usize = 10_000;

/// Accumulates compliance history for the current reporting period and
/// assembles the regulator-facing report envelope.
pub struct ComplianceLedger {
    measurements: VecDeque<ComplianceMeasurement>,
    period_started_at: DateTime<Utc>,
    last_status: Option<(ComplianceStatus, DateTime<Utc>)>,
    observed: Duration,
    compliant: Duration,
    correlation_sum: f64,
    correlation_count: u64,
    violations: ViolationCounts,
    actions: Vec<ActionSummary>,
    report_seq: u64,
}

impl ComplianceLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            measurements: VecDeque::new(),
            period_started_at: now,
            last_status: None,
            observed: Duration::zero(),
            compliant: Duration::zero(),
            correlation_sum: 0.0,
            correlation_count: 0,
            violations: ViolationCounts::default(),
            actions: Vec::new(),
            report_seq: 0,
        }
    }

    /// Records a portfolio measurement and advances the status-time ledger.
    /// Unknown status contributes to neither the observed nor the compliant
    /// time.
    pub fn record_measurement(&mut self, measurement: ComplianceMeasurement) {
        let now = measurement.as_of;
        if let Some((status, since)) = self.last_status {
            let span = now - since;
            if span > Duration::zero() && status != ComplianceStatus::Unknown {
                self.observed += span;
                if matches!(
                    status,
                    ComplianceStatus::Compliant | ComplianceStatus::ForcedCompliant
                ) {
                    self.compliant += span;
                }
            }
        }
        self.last_status = Some((measurement.status, now));

        if measurement.status != ComplianceStatus::Unknown {
            self.correlation_sum += measurement.measured_correlation;
            self.correlation_count += 1;
        }

        if self.measurements.len() == MEASUREMENT_HISTORY {
            self.measurements.pop_front();
        }
        self.measurements.push_back(measurement);
    }

    pub fn record_violation(&mut self, severity: ViolationSeverity) {
        self.violations.record(severity);
    }

    pub fn record_action(&mut self, summary: ActionSummary) {
        self.actions.push(summary);
    }

    /// Portfolio correlation history, oldest first, for trend fitting.
    pub fn correlation_history(&self) -> Vec<f64> {
        self.measurements
            .iter()
            .filter(|m| m.status != ComplianceStatus::Unknown)
            .map(|m| m.measured_correlation)
            .collect()
    }

    pub fn average_correlation(&self) -> f64 {
        if self.correlation_count == 0 {
            return 0.0;
        }
        self.correlation_sum / self.correlation_count as f64
    }

    /// Fraction of observed (non-Unknown) time spent compliant. Extending
    /// the interval by compliant time can only raise this.
    pub fn time_in_compliance_fraction(&self) -> f64 {
        let observed_ms = self.observed.num_milliseconds();
        if observed_ms <= 0 {
            return 1.0;
        }
        (self.compliant.num_milliseconds() as f64 / observed_ms as f64).clamp(0.0, 1.0)
    }

    /// Assembles the report for the period to date. When `reset_period` is
    /// set (the 24h schedule), the period accumulators start over.
    pub fn build_report(&mut self, now: DateTime<Utc>, reset_period: bool) -> RegulatoryReport {
        self.report_seq += 1;
        let average_correlation = self.average_correlation();
        let time_in_compliance = self.time_in_compliance_fraction();
        let period_hours = ((now - self.period_started_at).num_minutes() as f64 / 60.0)
            .ceil()
            .max(0.0) as u32;

        let report = RegulatoryReport {
            report_id: format!("REG-{:06}", self.report_seq),
            reporting_period_hours: period_hours,
            as_of: now,
            average_correlation,
            time_in_compliance_fraction: time_in_compliance,
            violations: self.violations,
            corrective_actions: self.actions.clone(),
            meets_regulatory_standard: RegulatoryReport::evaluate_standard(
                average_correlation,
                time_in_compliance,
                self.violations.critical,
            ),
            overall_risk_rating: RegulatoryReport::risk_rating(
                average_correlation,
                time_in_compliance,
            ),
        };

        if reset_period {
            self.period_started_at = now;
            self.observed = Duration::zero();
            self.compliant = Duration::zero();
            self.correlation_sum = 0.0;
            self.correlation_count = 0;
            self.violations = ViolationCounts::default();
            self.actions.clear();
        }

        report
    }
}
