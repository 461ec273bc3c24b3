use crate::config::CoreConfig;
use crate::domain::signal::EffectiveThresholds;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::info;

/// Override parameter names understood by the publisher. Values are absolute
/// (the compliance engine resolves deltas against the base before
/// publishing).
pub const PARAM_MIN_CONFIDENCE: &str = "min_confidence_threshold";
pub const PARAM_MIN_DATA_QUALITY: &str = "min_data_quality";
pub const PARAM_MAX_CONCURRENT: &str = "max_concurrent_signals";
pub const PARAM_SUPPRESS_NON_TRENDING: &str = "suppress_non_trending";

/// Publishes versioned `EffectiveThresholds` snapshots to the signal
/// processor. Owned by the compliance engine; the processor reads the
/// current snapshot atomically through the watch receiver.
pub struct ThresholdsPublisher {
    base: EffectiveThresholds,
    tx: watch::Sender<EffectiveThresholds>,
    version: u64,
}

impl ThresholdsPublisher {
    pub fn new(config: &CoreConfig) -> (Self, watch::Receiver<EffectiveThresholds>) {
        let base = EffectiveThresholds {
            version: 0,
            min_confidence: config.min_confidence_threshold_base,
            min_data_quality: config.min_data_quality_base,
            min_participants: config.min_participants_base,
            min_strength: config.min_strength_base,
            max_concurrent_signals: config.max_concurrent_signals,
            suppress_non_trending: false,
            effective_until: None,
        };
        let (tx, rx) = watch::channel(base.clone());
        (
            Self {
                base,
                tx,
                version: 0,
            },
            rx,
        )
    }

    pub fn base(&self) -> &EffectiveThresholds {
        &self.base
    }

    /// Applies absolute overrides on top of the base until the given time.
    pub fn apply_overrides(
        &mut self,
        overrides: &HashMap<String, f64>,
        effective_until: DateTime<Utc>,
    ) {
        self.version += 1;
        let mut next = self.base.clone();
        next.version = self.version;
        next.effective_until = Some(effective_until);

        for (name, value) in overrides {
            match name.as_str() {
                PARAM_MIN_CONFIDENCE => next.min_confidence = value.clamp(0.0, 1.0),
                PARAM_MIN_DATA_QUALITY => next.min_data_quality = value.clamp(0.0, 1.0),
                PARAM_MAX_CONCURRENT => {
                    next.max_concurrent_signals = value.max(0.0).round() as usize;
                }
                PARAM_SUPPRESS_NON_TRENDING => next.suppress_non_trending = *value != 0.0,
                other => {
                    // Unknown parameters are ignored; execution-side
                    // overrides travel on the constraints channel instead.
                    tracing::debug!("ThresholdsPublisher: ignoring override '{}'", other);
                }
            }
        }

        info!(
            "ThresholdsPublisher: v{} published (conf>={:.2}, dq>={:.2}, max_concurrent={}, suppress_non_trending={}, until {})",
            next.version,
            next.min_confidence,
            next.min_data_quality,
            next.max_concurrent_signals,
            next.suppress_non_trending,
            effective_until
        );
        let _ = self.tx.send(next);
    }

    /// Reverts to the base thresholds (corrective action expired).
    pub fn revert(&mut self) {
        self.version += 1;
        let mut next = self.base.clone();
        next.version = self.version;
        info!("ThresholdsPublisher: v{} reverted to base", next.version);
        let _ = self.tx.send(next);
    }
}
