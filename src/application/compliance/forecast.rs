use crate::domain::compliance::ComplianceForecast;
use crate::domain::stats::linear_trend_slope;
use chrono::{DateTime, Utc};

/// Measurements used for the trend fit.
const FORECAST_WINDOW: usize = 6;

/// Sharpness of the violation-probability sigmoid in correlation units.
const SIGMOID_SCALE: f64 = 40.0;

/// Fits a linear trend over the most recent measurements and projects the
/// correlation at t+1h and t+24h. Returns None below two measurements.
pub fn project(
    history: &[f64],
    interval_ms: u64,
    violation_threshold: f64,
    now: DateTime<Utc>,
) -> Option<ComplianceForecast> {
    if history.len() < 2 || interval_ms == 0 {
        return None;
    }
    let window: Vec<f64> = history
        .iter()
        .rev()
        .take(FORECAST_WINDOW)
        .rev()
        .copied()
        .collect();
    let slope = linear_trend_slope(&window)?;
    let current = *window.last()?;

    let steps_1h = 3_600_000.0 / interval_ms as f64;
    let steps_24h = steps_1h * 24.0;
    let projected_1h = (current + slope * steps_1h).clamp(-1.0, 1.0);
    let projected_24h = (current + slope * steps_24h).clamp(-1.0, 1.0);

    Some(ComplianceForecast {
        as_of: now,
        trend_slope_per_interval: slope,
        projected_correlation_1h: projected_1h,
        projected_correlation_24h: projected_24h,
        violation_probability_1h: violation_probability(projected_1h, violation_threshold),
        violation_probability_24h: violation_probability(projected_24h, violation_threshold),
    })
}

/// 1.0 when the projection is already below the threshold; otherwise a
/// sigmoid decaying with the margin above it.
pub fn violation_probability(projected: f64, threshold: f64) -> f64 {
    if projected < threshold {
        return 1.0;
    }
    let margin = projected - threshold;
    (2.0 / (1.0 + (margin * SIGMOID_SCALE).exp())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declining_trend_projects_violation() {
        let history = vec![0.87, 0.86, 0.85, 0.84, 0.83, 0.82];
        let forecast = project(&history, 10_000, 0.80, Utc::now()).unwrap();

        assert!(forecast.trend_slope_per_interval < 0.0);
        assert!(forecast.projected_correlation_1h < 0.82);
        // 24h of decline at -0.01 per 10s pins the projection at the floor.
        assert_eq!(forecast.projected_correlation_24h, -1.0);
        assert_eq!(forecast.violation_probability_24h, 1.0);
    }

    #[test]
    fn test_stable_compliant_series_has_low_probability() {
        let history = vec![0.90, 0.90, 0.90, 0.90, 0.90, 0.90];
        let forecast = project(&history, 10_000, 0.80, Utc::now()).unwrap();

        assert!(forecast.trend_slope_per_interval.abs() < 1e-9);
        assert!((forecast.projected_correlation_1h - 0.90).abs() < 1e-9);
        assert!(forecast.violation_probability_1h < 0.05);
    }

    #[test]
    fn test_probability_is_one_below_threshold() {
        assert_eq!(violation_probability(0.75, 0.80), 1.0);
        assert_eq!(violation_probability(0.80, 0.80), 1.0);
    }

    #[test]
    fn test_probability_decays_with_margin() {
        let near = violation_probability(0.81, 0.80);
        let far = violation_probability(0.95, 0.80);
        assert!(near > far);
        assert!(near < 1.0);
        assert!(far < 0.01);
    }

    #[test]
    fn test_insufficient_history() {
        assert!(project(&[0.85], 10_000, 0.80, Utc::now()).is_none());
    }

    #[test]
    fn test_only_recent_window_is_fitted() {
        // Old rising data followed by six flat points: slope ~ 0.
        let mut history = vec![0.10, 0.20, 0.30, 0.40];
        history.extend([0.85; 6]);
        let forecast = project(&history, 10_000, 0.80, Utc::now()).unwrap();
        assert!(forecast.trend_slope_per_interval.abs() < 1e-9);
    }
}
