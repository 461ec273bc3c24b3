use crate::domain::ports::{ScoreContext, ScoreOracle};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Hard clamp applied to whatever factor the oracle returns.
const FACTOR_FLOOR: f64 = 0.8;
const FACTOR_CEIL: f64 = 1.2;

/// Rate-limited access to the optional score oracle. When the oracle is
/// absent, over budget or failing, confidence proceeds unadjusted.
pub struct OracleGate {
    oracle: Option<Arc<dyn ScoreOracle>>,
    max_per_hour: u32,
    calls: VecDeque<DateTime<Utc>>,
    misses: u64,
}

impl OracleGate {
    pub fn new(oracle: Option<Arc<dyn ScoreOracle>>, max_per_hour: u32) -> Self {
        Self {
            oracle,
            max_per_hour,
            calls: VecDeque::new(),
            misses: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    /// Multiplicative confidence factor for one evaluation. Always in
    /// [0.8, 1.2]; 1.0 on any degradation.
    pub async fn confidence_factor(&mut self, context: ScoreContext, now: DateTime<Utc>) -> f64 {
        let Some(oracle) = self.oracle.clone() else {
            return 1.0;
        };

        let cutoff = now - Duration::hours(1);
        while self.calls.front().is_some_and(|t| *t < cutoff) {
            self.calls.pop_front();
        }
        if self.calls.len() >= self.max_per_hour as usize {
            self.misses += 1;
            return 1.0;
        }
        self.calls.push_back(now);

        match oracle.score(context).await {
            Ok(adjustment) => adjustment.factor.clamp(FACTOR_FLOOR, FACTOR_CEIL),
            Err(e) => {
                self.misses += 1;
                debug!("OracleGate: score unavailable: {}", e);
                1.0
            }
        }
    }

    pub fn miss_count(&self) -> u64 {
        self.misses
    }
}
