use crate::domain::events::HealthUpdate;
use crate::domain::market::StreamHealth;
use crate::domain::types::StreamEvent;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Tuning for the per-exchange quality score.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub ewma_alpha: f64,
    pub latency_norm_ms: f64,
    pub spread_norm_bps: f64,
    pub freshness_full_ms: i64,
    pub freshness_zero_ms: i64,
    pub anomaly_z_threshold: f64,
    pub anomaly_penalty: f64,
    pub anomaly_hold_ms: i64,
    pub healthy_threshold: f64,
    pub failback_quality: f64,
    pub failback_sustain_secs: i64,
    pub message_rate_window_secs: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            latency_norm_ms: 200.0,
            spread_norm_bps: 50.0,
            freshness_full_ms: 2_000,
            freshness_zero_ms: 30_000,
            anomaly_z_threshold: 3.0,
            anomaly_penalty: 0.4,
            anomaly_hold_ms: 60_000,
            healthy_threshold: 0.7,
            failback_quality: 0.85,
            failback_sustain_secs: 60,
            message_rate_window_secs: 10,
        }
    }
}

/// Time-bounded rolling mean/std of recent prices, used for the 1-minute
/// anomaly baseline.
#[derive(Debug, Default)]
struct TimedPriceWindow {
    samples: VecDeque<(DateTime<Utc>, f64)>,
    sum: f64,
    sum_sq: f64,
}

impl TimedPriceWindow {
    fn push(&mut self, at: DateTime<Utc>, price: f64, window: Duration) {
        self.samples.push_back((at, price));
        self.sum += price;
        self.sum_sq += price * price;
        let cutoff = at - window;
        while let Some(&(ts, p)) = self.samples.front() {
            if ts >= cutoff {
                break;
            }
            self.samples.pop_front();
            self.sum -= p;
            self.sum_sq -= p * p;
        }
    }

    fn z_score(&self, price: f64) -> Option<f64> {
        let n = self.samples.len();
        if n < 5 {
            return None;
        }
        let n_f = n as f64;
        let mean = self.sum / n_f;
        let variance = ((self.sum_sq - self.sum * self.sum / n_f) / (n_f - 1.0)).max(0.0);
        let std_dev = variance.sqrt();
        if std_dev <= f64::EPSILON {
            return None;
        }
        Some((price - mean) / std_dev)
    }
}

#[derive(Debug)]
struct ExchangeState {
    health: StreamHealth,
    prior: f64,
    message_times: VecDeque<DateTime<Utc>>,
    /// Coarse 24x1h error ring keyed by hour index since epoch.
    error_hours: VecDeque<(i64, u64)>,
    prices: TimedPriceWindow,
    last_spread_bps: f64,
    anomaly_until: Option<DateTime<Utc>>,
    failback_candidate_since: Option<DateTime<Utc>>,
    was_healthy: bool,
}

impl ExchangeState {
    fn new(exchange_id: &str, prior: f64) -> Self {
        Self {
            health: StreamHealth::offline(exchange_id),
            prior,
            message_times: VecDeque::new(),
            error_hours: VecDeque::new(),
            prices: TimedPriceWindow::default(),
            last_spread_bps: 0.0,
            anomaly_until: None,
            failback_candidate_since: None,
            was_healthy: false,
        }
    }

    fn record_error(&mut self, now: DateTime<Utc>) {
        let hour = now.timestamp() / 3600;
        match self.error_hours.back_mut() {
            Some((h, count)) if *h == hour => *count += 1,
            _ => self.error_hours.push_back((hour, 1)),
        }
        while let Some(&(h, _)) = self.error_hours.front() {
            if hour - h < 24 {
                break;
            }
            self.error_hours.pop_front();
        }
    }

    fn error_count_24h(&self) -> u64 {
        self.error_hours.iter().map(|(_, c)| c).sum()
    }
}

/// Tracks connectivity, latency, throughput and data quality per exchange,
/// and elects the active primary with failover/failback hysteresis.
///
/// Single writer: only the market data agent mutates this.
pub struct StreamHealthMonitor {
    config: HealthConfig,
    exchanges: HashMap<String, ExchangeState>,
    primary: Option<String>,
}

impl StreamHealthMonitor {
    pub fn new(priors: &HashMap<String, f64>, config: HealthConfig) -> Self {
        let exchanges = priors
            .iter()
            .map(|(id, prior)| (id.clone(), ExchangeState::new(id, *prior)))
            .collect();
        Self {
            config,
            exchanges,
            primary: None,
        }
    }

    /// Applies one stream event. Returns health updates for any threshold
    /// crossings (connected, healthy, primary election).
    pub fn on_event(&mut self, event: &StreamEvent, now: DateTime<Utc>) -> Vec<HealthUpdate> {
        let exchange_id = event.exchange_id().to_string();
        let Some(state) = self.exchanges.get_mut(&exchange_id) else {
            warn!(
                "StreamHealthMonitor: event from unconfigured exchange '{}'",
                exchange_id
            );
            return Vec::new();
        };

        match event {
            StreamEvent::Connected { .. } => {
                state.health.connected = true;
                debug!("StreamHealthMonitor: {} connected", exchange_id);
            }
            StreamEvent::Disconnected { reason, .. } => {
                state.health.connected = false;
                state.failback_candidate_since = None;
                info!(
                    "StreamHealthMonitor: {} disconnected ({})",
                    exchange_id, reason
                );
            }
            StreamEvent::Tick(tick) => {
                state.health.connected = true;
                state.health.last_message_at = Some(tick.received_at);

                let latency = tick.latency_ms().max(0) as f64;
                state.health.ewma_latency_ms = if state.health.ewma_latency_ms == 0.0 {
                    latency
                } else {
                    self.config.ewma_alpha * latency
                        + (1.0 - self.config.ewma_alpha) * state.health.ewma_latency_ms
                };

                state.message_times.push_back(tick.received_at);
                let cutoff = now - Duration::seconds(self.config.message_rate_window_secs);
                while state.message_times.front().is_some_and(|t| *t < cutoff) {
                    state.message_times.pop_front();
                }

                state.last_spread_bps = tick.spread_bps();

                let price = tick.last.to_f64().unwrap_or(0.0);
                if let Some(z) = state.prices.z_score(price)
                    && z.abs() > self.config.anomaly_z_threshold
                {
                    debug!(
                        "StreamHealthMonitor: {} price jump {:.1} sigma on {}",
                        exchange_id, z, tick.pair_symbol
                    );
                    state.anomaly_until =
                        Some(now + Duration::milliseconds(self.config.anomaly_hold_ms));
                }
                state
                    .prices
                    .push(tick.received_at, price, Duration::seconds(60));
            }
            StreamEvent::Error { message, .. } => {
                state.record_error(now);
                debug!("StreamHealthMonitor: {} error: {}", exchange_id, message);
            }
            StreamEvent::OverflowDrop { count, .. } => {
                state.record_error(now);
                warn!(
                    "StreamHealthMonitor: {} dropped {} buffered ticks",
                    exchange_id, count
                );
            }
        }

        self.refresh(now)
    }

    /// Recomputes scores with the current clock (freshness decays without
    /// fresh ticks) and re-elects the primary. Safe to call on a timer.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Vec<HealthUpdate> {
        let mut updates = Vec::new();

        for state in self.exchanges.values_mut() {
            let quality = Self::quality_score(&self.config, state, now);
            state.health.quality_score = quality;
            state.health.reliability_weight = if state.health.connected {
                quality * state.prior
            } else {
                0.0
            };
            state.health.messages_per_sec = state.message_times.len() as f64
                / self.config.message_rate_window_secs.max(1) as f64;
            state.health.error_count_24h = state.error_count_24h();

            // Failback candidacy: sustained quality above the bar.
            if state.health.connected && quality > self.config.failback_quality {
                state.failback_candidate_since.get_or_insert(now);
            } else {
                state.failback_candidate_since = None;
            }

            let healthy = state.health.connected && quality >= self.config.healthy_threshold;
            if healthy != state.was_healthy {
                state.was_healthy = healthy;
                updates.push(HealthUpdate {
                    exchange_id: state.health.exchange_id.clone(),
                    connected: state.health.connected,
                    healthy,
                    quality_score: quality,
                    reliability_weight: state.health.reliability_weight,
                    is_primary: false,
                    at: now,
                    reason: Some(if healthy {
                        "quality recovered".to_string()
                    } else if !state.health.connected {
                        "disconnected".to_string()
                    } else {
                        "quality degraded".to_string()
                    }),
                });
            }
        }

        if let Some(update) = self.elect_primary(now) {
            updates.push(update);
        }

        for update in &mut updates {
            update.is_primary = self.primary.as_deref() == Some(update.exchange_id.as_str());
        }

        updates
    }

    /// Active primary: highest reliability weight among connected exchanges.
    /// A standing primary is only displaced by a disconnect, or by a
    /// higher-weight exchange that has sustained failback-grade quality.
    fn elect_primary(&mut self, now: DateTime<Utc>) -> Option<HealthUpdate> {
        let best = self
            .exchanges
            .values()
            .filter(|s| s.health.connected)
            .max_by(|a, b| {
                a.health
                    .reliability_weight
                    .partial_cmp(&b.health.reliability_weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| s.health.exchange_id.clone())?;

        let current_ok = self
            .primary
            .as_ref()
            .and_then(|id| self.exchanges.get(id))
            .map(|s| s.health.connected)
            .unwrap_or(false);

        let should_switch = if !current_ok {
            self.primary.as_deref() != Some(best.as_str())
        } else if self.primary.as_deref() == Some(best.as_str()) {
            false
        } else {
            // Failback hysteresis: only switch to a better exchange after it
            // has sustained high quality for the configured window.
            let candidate = self.exchanges.get(&best);
            candidate
                .and_then(|s| s.failback_candidate_since)
                .map(|since| {
                    (now - since).num_seconds() >= self.config.failback_sustain_secs
                })
                .unwrap_or(false)
        };

        if !should_switch {
            return None;
        }

        info!(
            "StreamHealthMonitor: primary failover {} -> {}",
            self.primary.as_deref().unwrap_or("<none>"),
            best
        );
        self.primary = Some(best.clone());
        let state = &self.exchanges[&best];
        Some(HealthUpdate {
            exchange_id: best,
            connected: true,
            healthy: state.was_healthy,
            quality_score: state.health.quality_score,
            reliability_weight: state.health.reliability_weight,
            is_primary: true,
            at: now,
            reason: Some("elected primary".to_string()),
        })
    }

    fn quality_score(config: &HealthConfig, state: &ExchangeState, now: DateTime<Utc>) -> f64 {
        let latency_term = 1.0 - (state.health.ewma_latency_ms / config.latency_norm_ms).min(1.0);
        let spread_term = 1.0 - (state.last_spread_bps / config.spread_norm_bps).min(1.0);

        let freshness = match state.health.last_message_at {
            None => 0.0,
            Some(last) => {
                let age_ms = (now - last).num_milliseconds();
                if age_ms <= config.freshness_full_ms {
                    1.0
                } else if age_ms >= config.freshness_zero_ms {
                    0.0
                } else {
                    let span = (config.freshness_zero_ms - config.freshness_full_ms) as f64;
                    1.0 - (age_ms - config.freshness_full_ms) as f64 / span
                }
            }
        };

        let penalty = match state.anomaly_until {
            Some(until) if now < until => config.anomaly_penalty,
            _ => 0.0,
        };

        (0.4 * latency_term + 0.3 * spread_term + 0.3 * freshness - penalty).clamp(0.0, 1.0)
    }

    /// Current reliability weights; disconnected exchanges carry zero.
    pub fn weights(&self) -> HashMap<String, f64> {
        self.exchanges
            .iter()
            .map(|(id, s)| (id.clone(), s.health.reliability_weight))
            .collect()
    }

    /// Sum of priors: the total weight if every exchange were healthy.
    pub fn total_prior_weight(&self) -> f64 {
        self.exchanges.values().map(|s| s.prior).sum()
    }

    pub fn active_primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn snapshot(&self) -> Vec<StreamHealth> {
        self.exchanges.values().map(|s| s.health.clone()).collect()
    }
}
