use crate::application::compliance::actions::{
    self, DesignedAction, ExecutionAdjustment, action_successful,
};
use crate::application::compliance::forecast;
use crate::application::compliance::reporting::ComplianceLedger;
use crate::application::correlation::CorrelationReadings;
use crate::application::signals::thresholds::ThresholdsPublisher;
use crate::config::CoreConfig;
use crate::domain::compliance::{
    ActionSummary, ComplianceForecast, ComplianceMeasurement, ComplianceStatus, CorrectiveAction,
    EmergencyOverride, ExecutionConstraints, MeasurementScope, Violation, ViolationSeverity,
    ViolationState,
};
use crate::domain::events::{Envelope, EnvelopeKind};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub target_correlation: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub emergency_threshold: f64,
    pub monitoring_interval_ms: u64,
    /// Corrective actions are judged after this many monitoring intervals.
    pub observation_intervals: u32,
    /// Hard cap on one override activation.
    pub override_cap: Duration,
}

impl ComplianceConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            target_correlation: config.target_correlation,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            emergency_threshold: config.emergency_threshold,
            monitoring_interval_ms: config.monitoring_interval_ms,
            observation_intervals: 3,
            override_cap: Duration::minutes(60),
        }
    }
}

#[derive(Debug)]
struct ActiveAction {
    action: CorrectiveAction,
    correlation_at_apply: f64,
    observe_at: DateTime<Utc>,
    observed: bool,
}

/// The TRS compliance control loop, free of channels and I/O so the whole
/// decision surface is unit-testable. Each cycle returns the envelopes to
/// persist; the agent wrapper feeds the sink.
pub struct ComplianceEngine {
    config: ComplianceConfig,
    thresholds: ThresholdsPublisher,
    constraints_tx: watch::Sender<ExecutionConstraints>,
    constraints_version: u64,
    ledger: ComplianceLedger,
    open_violation: Option<Violation>,
    active_action: Option<ActiveAction>,
    override_state: Option<EmergencyOverride>,
    status: ComplianceStatus,
    last_forecast: Option<ComplianceForecast>,
}

impl ComplianceEngine {
    pub fn new(
        config: ComplianceConfig,
        thresholds: ThresholdsPublisher,
        now: DateTime<Utc>,
    ) -> (Self, watch::Receiver<ExecutionConstraints>) {
        let (constraints_tx, constraints_rx) = watch::channel(ExecutionConstraints::default());
        (
            Self {
                config,
                thresholds,
                constraints_tx,
                constraints_version: 0,
                ledger: ComplianceLedger::new(now),
                open_violation: None,
                active_action: None,
                override_state: None,
                status: ComplianceStatus::Unknown,
                last_forecast: None,
            },
            constraints_rx,
        )
    }

    pub fn status(&self) -> ComplianceStatus {
        self.status
    }

    pub fn forecast(&self) -> Option<&ComplianceForecast> {
        self.last_forecast.as_ref()
    }

    pub fn open_violation(&self) -> Option<&Violation> {
        self.open_violation.as_ref()
    }

    /// Status by threshold floor: falling below warning/critical/emergency
    /// levels worsens the classification one level at a time.
    fn classify(&self, correlation: f64) -> ComplianceStatus {
        if correlation < self.config.emergency_threshold {
            ComplianceStatus::Emergency
        } else if correlation < self.config.critical_threshold {
            ComplianceStatus::Critical
        } else if correlation < self.config.warning_threshold {
            ComplianceStatus::Warning
        } else {
            ComplianceStatus::Compliant
        }
    }

    /// One monitoring cycle. `stale` suspends status transitions (all
    /// exchanges quiet); measurement recording continues from the buffers.
    pub fn cycle(
        &mut self,
        readings: &CorrelationReadings,
        stale: bool,
        now: DateTime<Utc>,
    ) -> Vec<Envelope> {
        let mut out = Vec::new();

        self.expire_override(now);
        self.expire_action(now);

        let new_status = if self.override_state.is_some() {
            ComplianceStatus::ForcedCompliant
        } else {
            match readings.portfolio {
                None => ComplianceStatus::Unknown,
                Some(stats) => {
                    if stale {
                        // Transitions suspended until data resumes.
                        self.status
                    } else {
                        self.classify(stats.correlation)
                    }
                }
            }
        };

        let measurement = self.measurement_for(readings, new_status, now);
        self.ledger.record_measurement(measurement);

        if !stale && self.override_state.is_none() {
            let correlation = readings.portfolio.map(|s| s.correlation);
            if new_status.severity_rank() > self.status.severity_rank() {
                if let Some(correlation) = correlation {
                    self.on_worsening(new_status, correlation, readings, now, &mut out);
                }
            } else if new_status == ComplianceStatus::Compliant
                && self.status.severity_rank() > 0
            {
                self.resolve_violation(now, &mut out);
            }
        }
        self.status = new_status;

        self.observe_action(readings, now, &mut out);

        self.last_forecast = forecast::project(
            &self.ledger.correlation_history(),
            self.config.monitoring_interval_ms,
            self.config.warning_threshold,
            now,
        );
        if let Some(fc) = &self.last_forecast
            && fc.violation_probability_1h > 0.8
        {
            debug!(
                "ComplianceEngine: projected correlation {:.3} at t+1h (violation probability {:.2})",
                fc.projected_correlation_1h, fc.violation_probability_1h
            );
        }

        out
    }

    fn measurement_for(
        &self,
        readings: &CorrelationReadings,
        status: ComplianceStatus,
        now: DateTime<Utc>,
    ) -> ComplianceMeasurement {
        match readings.portfolio {
            Some(stats) => ComplianceMeasurement {
                as_of: now,
                scope: MeasurementScope::Portfolio,
                measured_correlation: stats.correlation,
                sample_size: stats.sample_size,
                confidence_interval_95: stats.confidence_interval_95,
                p_value: stats.p_value,
                status,
                trs_gap: self.config.target_correlation - stats.correlation,
            },
            None => ComplianceMeasurement {
                as_of: now,
                scope: MeasurementScope::Portfolio,
                measured_correlation: 0.0,
                sample_size: 0,
                confidence_interval_95: (-1.0, 1.0),
                p_value: 1.0,
                status: ComplianceStatus::Unknown,
                trs_gap: self.config.target_correlation,
            },
        }
    }

    fn on_worsening(
        &mut self,
        status: ComplianceStatus,
        correlation: f64,
        readings: &CorrelationReadings,
        now: DateTime<Utc>,
        out: &mut Vec<Envelope>,
    ) {
        let severity = match status {
            ComplianceStatus::Warning => ViolationSeverity::Warning,
            ComplianceStatus::Critical => ViolationSeverity::Critical,
            ComplianceStatus::Emergency => ViolationSeverity::Emergency,
            _ => return,
        };

        let mut factors = BTreeSet::new();
        factors.insert(format!("portfolio_correlation={:.4}", correlation));
        if let Some(stats) = readings.portfolio
            && stats.sample_size < 30
        {
            factors.insert("low_sample_count".to_string());
        }
        for (pair, stats) in &readings.pairs {
            if stats.correlation < self.config.warning_threshold {
                factors.insert(format!("pair_underperforming:{}", pair));
            }
        }

        let violation_id = match &mut self.open_violation {
            Some(open) if open.is_open() => {
                open.state = ViolationState::Escalated;
                open.severity = open.severity.max(severity);
                open.contributing_factors.extend(factors);
                info!(
                    "ComplianceEngine: violation {} escalated to {}",
                    open.violation_id, open.severity
                );
                open.violation_id
            }
            _ => {
                let violation = Violation {
                    violation_id: Uuid::new_v4(),
                    scope: MeasurementScope::Portfolio,
                    severity,
                    state: ViolationState::Observed,
                    first_observed_at: now,
                    resolved_at: None,
                    correlation_at_open: correlation,
                    contributing_factors: factors,
                    reported_to_regulator: false,
                };
                warn!(
                    "ComplianceEngine: {} violation {} opened (correlation {:.4})",
                    severity, violation.violation_id, correlation
                );
                let id = violation.violation_id;
                self.open_violation = Some(violation);
                id
            }
        };
        self.ledger.record_violation(severity);

        let reportable = matches!(
            severity,
            ViolationSeverity::Critical | ViolationSeverity::Emergency
        );
        if reportable && let Some(open) = &mut self.open_violation {
            open.state = ViolationState::Reportable;
            open.reported_to_regulator = true;
        }
        if let Some(open) = &self.open_violation {
            push_envelope(out, EnvelopeKind::Violation, open);
        }

        self.apply_action(severity, violation_id, now, out);

        if reportable {
            let report = self.ledger.build_report(now, false);
            info!(
                "ComplianceEngine: immediate regulatory report {} (meets standard: {})",
                report.report_id, report.meets_regulatory_standard
            );
            push_envelope(out, EnvelopeKind::RegulatoryReport, &report);
        }
    }

    fn apply_action(
        &mut self,
        severity: ViolationSeverity,
        violation_id: Uuid,
        now: DateTime<Utc>,
        out: &mut Vec<Envelope>,
    ) {
        let designed: DesignedAction =
            actions::design_action(severity, violation_id, self.thresholds.base(), now);

        self.thresholds
            .apply_overrides(&designed.threshold_overrides, designed.action.effective_until);
        self.publish_constraints(
            designed.execution,
            Some(designed.action.effective_until),
        );

        info!(
            "ComplianceEngine: corrective action {} applied for {} ({} overrides, until {})",
            designed.action.action_id,
            severity,
            designed.action.parameter_overrides.len(),
            designed.action.effective_until
        );
        push_envelope(out, EnvelopeKind::CorrectiveAction, &designed.action);

        let correlation_at_apply = self
            .ledger
            .correlation_history()
            .last()
            .copied()
            .unwrap_or(0.0);
        let observe_after = Duration::milliseconds(
            (self.config.monitoring_interval_ms * self.config.observation_intervals as u64) as i64,
        );
        self.active_action = Some(ActiveAction {
            action: designed.action,
            correlation_at_apply,
            observe_at: now + observe_after,
            observed: false,
        });
    }

    /// After the observation window, compare the measured improvement with
    /// the action's expectation; failed actions escalate one level.
    fn observe_action(
        &mut self,
        readings: &CorrelationReadings,
        now: DateTime<Utc>,
        out: &mut Vec<Envelope>,
    ) {
        let Some(active) = &mut self.active_action else {
            return;
        };
        if active.observed || now < active.observe_at {
            return;
        }
        let Some(stats) = readings.portfolio else {
            return;
        };

        let improvement = stats.correlation - active.correlation_at_apply;
        let successful = action_successful(&active.action, improvement);
        active.action.observed_improvement = Some(improvement);
        active.action.successful = Some(successful);
        active.observed = true;

        info!(
            "ComplianceEngine: action {} observed improvement {:.4} (successful: {})",
            active.action.action_id, improvement, successful
        );
        push_envelope(out, EnvelopeKind::CorrectiveAction, &active.action);
        self.ledger.record_action(ActionSummary {
            action_id: active.action.action_id,
            triggered_by: active.action.triggered_by,
            successful,
        });

        if !successful {
            let severity = active.action.severity;
            let violation_id = active.action.triggered_by;
            if let Some(next) = actions::escalate(severity) {
                warn!(
                    "ComplianceEngine: action for {} failed, escalating to {}",
                    severity, next
                );
                if let Some(open) = &mut self.open_violation {
                    open.state = ViolationState::Escalated;
                    open.severity = open.severity.max(next);
                }
                self.ledger.record_violation(next);
                self.apply_action(next, violation_id, now, out);
            }
        }
    }

    fn resolve_violation(&mut self, now: DateTime<Utc>, out: &mut Vec<Envelope>) {
        if let Some(mut violation) = self.open_violation.take() {
            violation.resolved_at = Some(now);
            if violation.state != ViolationState::Reportable {
                violation.state = ViolationState::Resolved;
            }
            info!(
                "ComplianceEngine: violation {} resolved after {}s",
                violation.violation_id,
                (now - violation.first_observed_at).num_seconds()
            );
            push_envelope(out, EnvelopeKind::Violation, &violation);
        }
    }

    fn expire_action(&mut self, now: DateTime<Utc>) {
        if let Some(active) = &self.active_action
            && now >= active.action.effective_until
        {
            info!(
                "ComplianceEngine: corrective action {} expired, reverting",
                active.action.action_id
            );
            self.thresholds.revert();
            self.publish_constraints(
                ExecutionAdjustment {
                    halt_new_positions: false,
                    position_size_factor: 1.0,
                },
                None,
            );
            self.active_action = None;
        }
    }

    fn expire_override(&mut self, now: DateTime<Utc>) {
        if let Some(active) = &self.override_state
            && now >= active.expires_at
        {
            info!("ComplianceEngine: emergency override expired");
            self.override_state = None;
            self.republish_override_flag(false);
        }
    }

    /// One-shot human-authorized override: status is forced compliant for at
    /// most the configured cap, and all trades in the window are flagged.
    pub fn activate_override(
        &mut self,
        justification: String,
        authorized_by: String,
        requested: Duration,
        now: DateTime<Utc>,
    ) -> Result<&EmergencyOverride, String> {
        if justification.trim().is_empty() {
            return Err("override requires a justification".to_string());
        }
        if self.override_state.is_some() {
            return Err("an override is already active".to_string());
        }

        let duration = requested.min(self.config.override_cap);
        let active = EmergencyOverride {
            activated_at: now,
            expires_at: now + duration,
            justification,
            authorized_by,
        };
        warn!(
            "ComplianceEngine: emergency override active until {} (authorized by {}): {}",
            active.expires_at, active.authorized_by, active.justification
        );
        self.override_state = Some(active);
        self.status = ComplianceStatus::ForcedCompliant;
        self.republish_override_flag(true);
        Ok(self.override_state.as_ref().expect("just set"))
    }

    /// Assembles the scheduled (24h) report and starts a new period.
    pub fn scheduled_report(&mut self, now: DateTime<Utc>) -> Envelope {
        let report = self.ledger.build_report(now, true);
        info!(
            "ComplianceEngine: scheduled report {} (avg correlation {:.4}, in compliance {:.1}%, meets standard: {})",
            report.report_id,
            report.average_correlation,
            report.time_in_compliance_fraction * 100.0,
            report.meets_regulatory_standard
        );
        Envelope::new(EnvelopeKind::RegulatoryReport, &report)
            .expect("report serialization is infallible")
    }

    fn publish_constraints(
        &mut self,
        execution: ExecutionAdjustment,
        effective_until: Option<DateTime<Utc>>,
    ) {
        self.constraints_version += 1;
        let under_override = self.override_state.is_some();
        let _ = self.constraints_tx.send(ExecutionConstraints {
            version: self.constraints_version,
            halt_new_positions: execution.halt_new_positions,
            position_size_factor: execution.position_size_factor,
            under_override,
            effective_until,
        });
    }

    fn republish_override_flag(&mut self, under_override: bool) {
        self.constraints_version += 1;
        let mut next = self.constraints_tx.borrow().clone();
        next.version = self.constraints_version;
        next.under_override = under_override;
        let _ = self.constraints_tx.send(next);
    }
}

fn push_envelope<T: serde::Serialize>(out: &mut Vec<Envelope>, kind: EnvelopeKind, payload: &T) {
    match Envelope::new(kind, payload) {
        Ok(envelope) => out.push(envelope),
        Err(e) => warn!("ComplianceEngine: failed to serialize {:?}: {}", kind, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::correlation::rolling::CorrelationStats;
    use std::collections::HashMap;

    fn engine() -> (ComplianceEngine, watch::Receiver<ExecutionConstraints>) {
        let config = CoreConfig::with_priors(&[("binance", 1.0)]);
        let (thresholds, _rx) = ThresholdsPublisher::new(&config);
        ComplianceEngine::new(ComplianceConfig::from_core(&config), thresholds, Utc::now())
    }

    fn readings(correlation: f64) -> CorrelationReadings {
        CorrelationReadings {
            portfolio: Some(CorrelationStats {
                correlation,
                sample_size: 200,
                p_value: 0.001,
                confidence_interval_95: (correlation - 0.05, correlation + 0.05),
            }),
            pairs: HashMap::new(),
            pending_count: 0,
            updated_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_classification_bands() {
        let (engine, _rx) = engine();
        assert_eq!(engine.classify(0.90), ComplianceStatus::Compliant);
        assert_eq!(engine.classify(0.82), ComplianceStatus::Compliant);
        assert_eq!(engine.classify(0.78), ComplianceStatus::Warning);
        assert_eq!(engine.classify(0.73), ComplianceStatus::Critical);
        assert_eq!(engine.classify(0.68), ComplianceStatus::Emergency);
    }

    #[test]
    fn test_no_data_is_unknown_not_violation() {
        let (mut engine, _rx) = engine();
        let out = engine.cycle(&CorrelationReadings::default(), false, Utc::now());
        assert_eq!(engine.status(), ComplianceStatus::Unknown);
        assert!(engine.open_violation().is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn test_warning_violation_opens_and_applies_action() {
        let (mut engine, rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.90), false, now);
        assert_eq!(engine.status(), ComplianceStatus::Compliant);

        let out = engine.cycle(&readings(0.78), false, now + Duration::seconds(10));
        assert_eq!(engine.status(), ComplianceStatus::Warning);
        assert!(engine.open_violation().is_some());
        let kinds: Vec<EnvelopeKind> = out.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EnvelopeKind::Violation));
        assert!(kinds.contains(&EnvelopeKind::CorrectiveAction));
        // Warning is not reportable.
        assert!(!kinds.contains(&EnvelopeKind::RegulatoryReport));
        // Execution side untouched for Warning.
        assert!(!rx.borrow().halt_new_positions);
    }

    #[test]
    fn test_emergency_halts_openings_and_reports() {
        let (mut engine, rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.90), false, now);
        let out = engine.cycle(&readings(0.68), false, now + Duration::seconds(10));

        assert_eq!(engine.status(), ComplianceStatus::Emergency);
        let constraints = rx.borrow().clone();
        assert!(constraints.halt_new_positions);
        let kinds: Vec<EnvelopeKind> = out.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EnvelopeKind::RegulatoryReport));
        let violation = engine.open_violation().unwrap();
        assert!(violation.reported_to_regulator);
        assert_eq!(violation.state, ViolationState::Reportable);
    }

    #[test]
    fn test_stale_data_suspends_transitions() {
        let (mut engine, _rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.90), false, now);
        assert_eq!(engine.status(), ComplianceStatus::Compliant);

        // Correlation collapses but data is stale: status holds.
        engine.cycle(&readings(0.60), true, now + Duration::seconds(10));
        assert_eq!(engine.status(), ComplianceStatus::Compliant);
        assert!(engine.open_violation().is_none());

        // Data resumes: transition fires.
        engine.cycle(&readings(0.60), false, now + Duration::seconds(20));
        assert_eq!(engine.status(), ComplianceStatus::Emergency);
    }

    #[test]
    fn test_violation_resolves_on_recovery() {
        let (mut engine, _rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.90), false, now);
        engine.cycle(&readings(0.78), false, now + Duration::seconds(10));
        assert!(engine.open_violation().is_some());

        let out = engine.cycle(&readings(0.90), false, now + Duration::seconds(20));
        assert!(engine.open_violation().is_none());
        assert!(out.iter().any(|e| e.kind == EnvelopeKind::Violation));
        assert_eq!(engine.status(), ComplianceStatus::Compliant);
    }

    #[test]
    fn test_failed_action_escalates() {
        let (mut engine, rx) = engine();
        let start = Utc::now();
        engine.cycle(&readings(0.90), false, start);
        engine.cycle(&readings(0.78), false, start + Duration::seconds(10));
        assert_eq!(engine.status(), ComplianceStatus::Warning);

        // Past the observation window with no improvement: Warning action
        // fails and escalates to Critical.
        let later = start + Duration::seconds(45);
        let out = engine.cycle(&readings(0.78), false, later);
        let violation = engine.open_violation().unwrap();
        assert_eq!(violation.severity, ViolationSeverity::Critical);
        assert_eq!(violation.state, ViolationState::Escalated);
        assert!(out.iter().any(|e| e.kind == EnvelopeKind::CorrectiveAction));
        // Critical action halves execution size caps.
        assert_eq!(rx.borrow().position_size_factor, 0.5);
    }

    #[test]
    fn test_successful_action_recorded() {
        let (mut engine, _rx) = engine();
        let start = Utc::now();
        engine.cycle(&readings(0.90), false, start);
        engine.cycle(&readings(0.78), false, start + Duration::seconds(10));

        // Correlation improves well past 80% of the expected 0.02.
        let later = start + Duration::seconds(45);
        let out = engine.cycle(&readings(0.82), false, later);
        let action_envelopes: Vec<&Envelope> = out
            .iter()
            .filter(|e| e.kind == EnvelopeKind::CorrectiveAction)
            .collect();
        assert_eq!(action_envelopes.len(), 1);
        assert_eq!(action_envelopes[0].payload["successful"], true);
    }

    #[test]
    fn test_override_caps_duration_and_flags_constraints() {
        let (mut engine, rx) = engine();
        let now = Utc::now();
        let active = engine
            .activate_override(
                "Market disruption - temporary correlation breakdown".to_string(),
                "risk-desk".to_string(),
                Duration::hours(5),
                now,
            )
            .unwrap();
        assert_eq!(active.expires_at, now + Duration::minutes(60));
        assert_eq!(engine.status(), ComplianceStatus::ForcedCompliant);
        assert!(rx.borrow().under_override);

        // While overridden, a collapsed correlation does not escalate.
        engine.cycle(&readings(0.50), false, now + Duration::seconds(10));
        assert_eq!(engine.status(), ComplianceStatus::ForcedCompliant);
        assert!(engine.open_violation().is_none());

        // After expiry the next cycle classifies normally.
        engine.cycle(&readings(0.50), false, now + Duration::minutes(61));
        assert_eq!(engine.status(), ComplianceStatus::Emergency);
        assert!(!rx.borrow().under_override);
    }

    #[test]
    fn test_override_requires_justification() {
        let (mut engine, _rx) = engine();
        assert!(
            engine
                .activate_override("  ".to_string(), "ops".to_string(), Duration::minutes(10), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn test_scheduled_report_resets_period_counters() {
        let (mut engine, _rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.90), false, now);
        engine.cycle(&readings(0.78), false, now + Duration::seconds(10));

        let envelope = engine.scheduled_report(now + Duration::hours(24));
        assert_eq!(envelope.kind, EnvelopeKind::RegulatoryReport);
        assert_eq!(envelope.payload["violations"]["warning"], 1);

        let second = engine.scheduled_report(now + Duration::hours(48));
        assert_eq!(second.payload["violations"]["warning"], 0);
    }

    #[test]
    fn test_forecast_tracks_declining_trend() {
        let (mut engine, _rx) = engine();
        let start = Utc::now();
        for (i, corr) in [0.87, 0.86, 0.85, 0.84, 0.83, 0.82].iter().enumerate() {
            engine.cycle(
                &readings(*corr),
                false,
                start + Duration::seconds(10 * i as i64),
            );
        }
        let forecast = engine.forecast().expect("enough history");
        assert!(forecast.trend_slope_per_interval < 0.0);
        assert!(forecast.violation_probability_24h > 0.9);
    }

    #[test]
    fn test_trs_gap_identity_in_measurements() {
        let (mut engine, _rx) = engine();
        let now = Utc::now();
        engine.cycle(&readings(0.78), false, now);
        // gap recorded as target - measured, exactly.
        let history = engine.ledger.correlation_history();
        assert_eq!(history.len(), 1);
        assert!((history[0] - 0.78).abs() < 1e-12);
    }
}
