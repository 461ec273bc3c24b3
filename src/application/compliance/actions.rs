use crate::application::signals::thresholds::{
    PARAM_MAX_CONCURRENT, PARAM_MIN_CONFIDENCE, PARAM_MIN_DATA_QUALITY,
    PARAM_SUPPRESS_NON_TRENDING,
};
use crate::domain::compliance::{CorrectiveAction, ViolationSeverity};
use crate::domain::signal::EffectiveThresholds;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Execution-side knobs attached to a corrective action, applied through the
/// constraints channel rather than the thresholds channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionAdjustment {
    pub halt_new_positions: bool,
    pub position_size_factor: f64,
}

/// A fully designed corrective action ready to apply.
#[derive(Debug, Clone)]
pub struct DesignedAction {
    pub action: CorrectiveAction,
    pub threshold_overrides: HashMap<String, f64>,
    pub execution: ExecutionAdjustment,
}

/// Deterministic corrective-action design by severity.
///
/// Warning:   confidence gate +0.05, concurrent signals -20%, 15 min.
/// Critical:  confidence +0.10, data quality +0.05, halve size caps, 30 min.
/// Emergency: halt new positions, suppress non-Trending signals, 60 min.
pub fn design_action(
    severity: ViolationSeverity,
    triggered_by: Uuid,
    base: &EffectiveThresholds,
    now: DateTime<Utc>,
) -> DesignedAction {
    let mut threshold_overrides = HashMap::new();
    let mut execution = ExecutionAdjustment {
        halt_new_positions: false,
        position_size_factor: 1.0,
    };

    let (duration, expected_improvement) = match severity {
        ViolationSeverity::Warning => {
            threshold_overrides.insert(
                PARAM_MIN_CONFIDENCE.to_string(),
                (base.min_confidence + 0.05).min(1.0),
            );
            threshold_overrides.insert(
                PARAM_MAX_CONCURRENT.to_string(),
                (base.max_concurrent_signals as f64 * 0.8).floor().max(1.0),
            );
            (Duration::minutes(15), 0.02)
        }
        ViolationSeverity::Critical => {
            threshold_overrides.insert(
                PARAM_MIN_CONFIDENCE.to_string(),
                (base.min_confidence + 0.10).min(1.0),
            );
            threshold_overrides.insert(
                PARAM_MIN_DATA_QUALITY.to_string(),
                (base.min_data_quality + 0.05).min(1.0),
            );
            execution.position_size_factor = 0.5;
            (Duration::minutes(30), 0.05)
        }
        ViolationSeverity::Emergency => {
            threshold_overrides.insert(PARAM_SUPPRESS_NON_TRENDING.to_string(), 1.0);
            execution.halt_new_positions = true;
            (Duration::minutes(60), 0.08)
        }
    };

    // The audit record carries every knob the action touched.
    let mut parameter_overrides = threshold_overrides.clone();
    parameter_overrides.insert(
        "position_size_factor".to_string(),
        execution.position_size_factor,
    );
    if execution.halt_new_positions {
        parameter_overrides.insert("halt_new_positions".to_string(), 1.0);
    }

    DesignedAction {
        action: CorrectiveAction {
            action_id: Uuid::new_v4(),
            triggered_by,
            severity,
            parameter_overrides,
            applied_at: now,
            effective_until: now + duration,
            expected_improvement,
            observed_improvement: None,
            successful: None,
        },
        threshold_overrides,
        execution,
    }
}

/// Whether the observed improvement clears the success bar (80% of the
/// expected improvement).
pub fn action_successful(action: &CorrectiveAction, observed_improvement: f64) -> bool {
    observed_improvement >= action.expected_improvement * 0.8
}

/// The severity a failed action escalates to, if any.
pub fn escalate(severity: ViolationSeverity) -> Option<ViolationSeverity> {
    match severity {
        ViolationSeverity::Warning => Some(ViolationSeverity::Critical),
        ViolationSeverity::Critical => Some(ViolationSeverity::Emergency),
        ViolationSeverity::Emergency => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signals::thresholds::ThresholdsPublisher;
    use crate::config::CoreConfig;

    fn base() -> EffectiveThresholds {
        let (publisher, _rx) = ThresholdsPublisher::new(&CoreConfig::with_priors(&[("binance", 1.0)]));
        publisher.base().clone()
    }

    #[test]
    fn test_warning_action_raises_confidence_and_trims_concurrency() {
        let now = Utc::now();
        let designed = design_action(ViolationSeverity::Warning, Uuid::new_v4(), &base(), now);

        assert!(
            (designed.threshold_overrides[PARAM_MIN_CONFIDENCE] - 0.65).abs() < 1e-12,
            "base 0.60 + 0.05"
        );
        assert_eq!(designed.threshold_overrides[PARAM_MAX_CONCURRENT], 8.0);
        assert_eq!(designed.action.effective_until, now + Duration::minutes(15));
        assert!(!designed.execution.halt_new_positions);
        assert_eq!(designed.execution.position_size_factor, 1.0);
    }

    #[test]
    fn test_critical_action_halves_size_caps() {
        let now = Utc::now();
        let designed = design_action(ViolationSeverity::Critical, Uuid::new_v4(), &base(), now);

        assert!((designed.threshold_overrides[PARAM_MIN_CONFIDENCE] - 0.70).abs() < 1e-12);
        assert!((designed.threshold_overrides[PARAM_MIN_DATA_QUALITY] - 0.85).abs() < 1e-12);
        assert_eq!(designed.execution.position_size_factor, 0.5);
        assert_eq!(designed.action.effective_until, now + Duration::minutes(30));
    }

    #[test]
    fn test_emergency_action_halts_openings() {
        let now = Utc::now();
        let designed = design_action(ViolationSeverity::Emergency, Uuid::new_v4(), &base(), now);

        assert!(designed.execution.halt_new_positions);
        assert_eq!(designed.threshold_overrides[PARAM_SUPPRESS_NON_TRENDING], 1.0);
        assert_eq!(designed.action.effective_until, now + Duration::minutes(60));
    }

    #[test]
    fn test_success_bar_is_eighty_percent_of_expected() {
        let now = Utc::now();
        let designed = design_action(ViolationSeverity::Warning, Uuid::new_v4(), &base(), now);
        // Expected improvement 0.02: bar at 0.016.
        assert!(action_successful(&designed.action, 0.016));
        assert!(action_successful(&designed.action, 0.025));
        assert!(!action_successful(&designed.action, 0.015));
    }

    #[test]
    fn test_escalation_chain_tops_out_at_emergency() {
        assert_eq!(
            escalate(ViolationSeverity::Warning),
            Some(ViolationSeverity::Critical)
        );
        assert_eq!(
            escalate(ViolationSeverity::Critical),
            Some(ViolationSeverity::Emergency)
        );
        assert_eq!(escalate(ViolationSeverity::Emergency), None);
    }
}
