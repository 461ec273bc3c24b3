use crate::application::market_data::regime::{self, RegimeConfig, RegimeObservation};
use crate::config::CoreConfig;
use crate::domain::market::{AggregatedView, ArbitrageHint, MarketRegime};
use crate::domain::stats::log_returns;
use crate::domain::types::Tick;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Tuning for view aggregation, crisis detection and arbitrage hints.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub freshness_window_ms: i64,
    pub regime: RegimeConfig,
    pub crisis_quality: f64,
    pub crisis_sustain_ms: i64,
    pub crossed_quality_penalty: f64,
    pub arbitrage_net_threshold_bps: f64,
    pub arbitrage_round_trip_cost_bps: f64,
}

impl AggregatorConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            freshness_window_ms: config.freshness_window_ms,
            regime: RegimeConfig {
                window: config.warmup_window_steps.max(2),
                ..RegimeConfig::default()
            },
            crisis_quality: 0.6,
            crisis_sustain_ms: 30_000,
            crossed_quality_penalty: 0.2,
            arbitrage_net_threshold_bps: config.arbitrage_net_threshold_bps,
            arbitrage_round_trip_cost_bps: config.arbitrage_round_trip_cost_bps,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from_core(&CoreConfig::default())
    }
}

#[derive(Debug, Default)]
struct PairBook {
    last_ticks: HashMap<String, Tick>,
    observations: VecDeque<RegimeObservation>,
    volatile_flag: bool,
    last_quality: f64,
    arbitrage_open: bool,
}

/// Result of folding one tick into the aggregated state.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub view: Option<AggregatedView>,
    pub hint: Option<ArbitrageHint>,
}

/// Merges per-exchange ticks into a single reliability-weighted view per
/// pair, classifies the regime, and flags cross-exchange arbitrage.
///
/// Single writer: only the market data agent mutates this.
pub struct MarketDataAggregator {
    config: AggregatorConfig,
    pairs: HashMap<String, PairBook>,
    crisis_since: Option<DateTime<Utc>>,
    stale_views: u64,
    ticks_aggregated: u64,
}

impl MarketDataAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            pairs: HashMap::new(),
            crisis_since: None,
            stale_views: 0,
            ticks_aggregated: 0,
        }
    }

    /// Seeds the regime window for a pair from the historical store.
    /// Replaying the same window always yields the same classification.
    pub fn warm_up(&mut self, pair: &str, views: &[AggregatedView]) {
        let book = self.pairs.entry(pair.to_string()).or_default();
        book.observations.clear();
        let window = self.config.regime.window;
        for view in views.iter().rev().take(window).rev() {
            book.observations.push_back(RegimeObservation {
                price: view.aggregated_price.to_f64().unwrap_or(0.0),
                participating_count: view.participating_count,
                data_quality: view.data_quality,
            });
        }
        book.last_quality = views.last().map(|v| v.data_quality).unwrap_or(0.0);
        info!(
            "MarketDataAggregator: warmed up {} with {} observations",
            pair,
            book.observations.len()
        );
    }

    /// Folds one tick into the pair's book and recomputes the view.
    /// `weights` are the monitor's current reliability weights and
    /// `total_prior_weight` the weight if every exchange were healthy.
    pub fn on_tick(
        &mut self,
        tick: Tick,
        weights: &HashMap<String, f64>,
        total_prior_weight: f64,
        now: DateTime<Utc>,
    ) -> Aggregation {
        let pair = tick.pair_symbol.clone();
        let freshness_window = Duration::milliseconds(self.config.freshness_window_ms);
        let book = self.pairs.entry(pair.clone()).or_default();
        book.last_ticks.insert(tick.exchange_id.clone(), tick);

        // Contributing set: exchanges with a fresh tick and non-zero weight.
        let cutoff = now - freshness_window;
        let merged = {
            let fresh: Vec<(&Tick, f64)> = book
                .last_ticks
                .values()
                .filter(|t| t.received_at >= cutoff)
                .filter_map(|t| {
                    let w = weights.get(&t.exchange_id).copied().unwrap_or(0.0);
                    (w > 0.0).then_some((t, w))
                })
                .collect();
            merge_fresh(&fresh, self.config.freshness_window_ms, now)
        };

        let Some(merged) = merged else {
            self.stale_views += 1;
            debug!("MarketDataAggregator: no qualifying ticks for {}", pair);
            return Aggregation::default();
        };

        let mut data_quality = if total_prior_weight > 0.0 {
            (merged.weight_sum / total_prior_weight).min(1.0) * merged.mean_freshness
        } else {
            0.0
        };
        if merged.crossed_market {
            data_quality = (data_quality - self.config.crossed_quality_penalty).max(0.0);
        }

        let participating_count = merged.contributing.len();
        let hint = self.resolve_arbitrage(&pair, merged.arbitrage.as_ref(), now);

        let book = self.pairs.get_mut(&pair).expect("book inserted above");
        book.observations.push_back(RegimeObservation {
            price: merged.weighted_price,
            participating_count,
            data_quality,
        });
        while book.observations.len() > self.config.regime.window {
            book.observations.pop_front();
        }
        book.last_quality = data_quality;
        book.volatile_flag = {
            let returns = log_returns(book.observations.iter().map(|o| o.price));
            realized_sigma(&returns) > self.config.regime.volatile_sigma
        };

        let (crisis_active, crisis_margin) = self.update_crisis(now);
        let book = self.pairs.get(&pair).expect("book present");
        let (regime, regime_confidence) = regime::classify(
            &book.observations,
            crisis_active,
            crisis_margin,
            &self.config.regime,
        );

        self.ticks_aggregated += 1;

        Aggregation {
            view: Some(AggregatedView {
                pair,
                aggregated_price: Decimal::from_f64_retain(merged.weighted_price)
                    .unwrap_or(Decimal::ZERO),
                best_bid: merged.best_bid,
                best_ask: merged.best_ask,
                contributing_exchanges: merged.contributing,
                participating_count,
                volume: merged.volume,
                data_quality,
                crossed_market: merged.crossed_market,
                regime,
                regime_confidence,
                as_of: now,
            }),
            hint,
        }
    }

    /// Crisis: every pair volatile and average quality below the bar,
    /// sustained for longer than the configured window.
    fn update_crisis(&mut self, now: DateTime<Utc>) -> (bool, f64) {
        let tracked: Vec<&PairBook> = self
            .pairs
            .values()
            .filter(|b| b.observations.len() >= self.config.regime.min_observations)
            .collect();
        if tracked.is_empty() {
            self.crisis_since = None;
            return (false, 0.0);
        }

        let all_volatile = tracked.iter().all(|b| b.volatile_flag);
        let avg_quality =
            tracked.iter().map(|b| b.last_quality).sum::<f64>() / tracked.len() as f64;
        let condition = all_volatile && avg_quality < self.config.crisis_quality;

        if condition {
            let since = *self.crisis_since.get_or_insert(now);
            let sustained =
                (now - since).num_milliseconds() > self.config.crisis_sustain_ms;
            let margin = (self.config.crisis_quality - avg_quality) / self.config.crisis_quality;
            (sustained, margin)
        } else {
            self.crisis_since = None;
            (false, 0.0)
        }
    }

    /// Applies once-per-opportunity gating to a candidate dislocation. The
    /// hint re-arms when the net spread falls back under the threshold.
    fn resolve_arbitrage(
        &mut self,
        pair: &str,
        candidate: Option<&ArbitrageCandidate>,
        now: DateTime<Utc>,
    ) -> Option<ArbitrageHint> {
        let threshold = self.config.arbitrage_net_threshold_bps;
        let round_trip = self.config.arbitrage_round_trip_cost_bps;
        let book = self.pairs.get_mut(pair)?;

        let Some(candidate) = candidate else {
            book.arbitrage_open = false;
            return None;
        };
        let net_spread_bps = candidate.gross_spread_bps - round_trip;
        if net_spread_bps <= threshold {
            book.arbitrage_open = false;
            return None;
        }
        if book.arbitrage_open {
            return None;
        }
        book.arbitrage_open = true;

        info!(
            "MarketDataAggregator: arbitrage on {}: buy {} / sell {} ({:.1} bps net)",
            pair, candidate.buy_on, candidate.sell_on, net_spread_bps
        );
        Some(ArbitrageHint {
            pair: pair.to_string(),
            buy_on: candidate.buy_on.clone(),
            sell_on: candidate.sell_on.clone(),
            gross_spread_bps: candidate.gross_spread_bps,
            net_spread_bps,
            detected_at: now,
        })
    }

    pub fn stale_view_count(&self) -> u64 {
        self.stale_views
    }

    pub fn ticks_aggregated(&self) -> u64 {
        self.ticks_aggregated
    }

    /// Regime classification of a pair from its current window, without
    /// folding a tick. Used to verify warm-up idempotence.
    pub fn current_regime(&mut self, pair: &str, now: DateTime<Utc>) -> Option<(MarketRegime, f64)> {
        let (crisis_active, crisis_margin) = self.update_crisis(now);
        let book = self.pairs.get(pair)?;
        Some(regime::classify(
            &book.observations,
            crisis_active,
            crisis_margin,
            &self.config.regime,
        ))
    }
}

/// Owned result of merging the fresh tick set, so the pair book can be
/// mutated afterwards without holding tick borrows.
struct MergedBook {
    weight_sum: f64,
    weighted_price: f64,
    best_bid: Decimal,
    best_ask: Decimal,
    crossed_market: bool,
    mean_freshness: f64,
    volume: Decimal,
    contributing: Vec<String>,
    arbitrage: Option<ArbitrageCandidate>,
}

struct ArbitrageCandidate {
    buy_on: String,
    sell_on: String,
    gross_spread_bps: f64,
}

fn merge_fresh(
    fresh: &[(&Tick, f64)],
    freshness_window_ms: i64,
    now: DateTime<Utc>,
) -> Option<MergedBook> {
    if fresh.is_empty() {
        return None;
    }

    let weight_sum: f64 = fresh.iter().map(|(_, w)| w).sum();
    let weighted_price: f64 = fresh
        .iter()
        .map(|(t, w)| t.last.to_f64().unwrap_or(0.0) * w)
        .sum::<f64>()
        / weight_sum;

    let best_bid = fresh.iter().map(|(t, _)| t.bid).max().unwrap_or(Decimal::ZERO);
    let best_ask = fresh.iter().map(|(t, _)| t.ask).min().unwrap_or(Decimal::ZERO);

    let mean_freshness: f64 = fresh
        .iter()
        .map(|(t, _)| {
            let age = (now - t.received_at).num_milliseconds().max(0) as f64;
            1.0 - (age / freshness_window_ms as f64).min(1.0)
        })
        .sum::<f64>()
        / fresh.len() as f64;

    // Candidate dislocation: buy at the cheapest ask, sell at the richest bid.
    let arbitrage = if fresh.len() >= 2 {
        let buy = fresh.iter().min_by(|(a, _), (b, _)| a.ask.cmp(&b.ask));
        let sell = fresh.iter().max_by(|(a, _), (b, _)| a.bid.cmp(&b.bid));
        match (buy, sell) {
            (Some((buy_tick, _)), Some((sell_tick, _))) => {
                let buy_price = buy_tick.ask.to_f64().unwrap_or(0.0);
                let sell_price = sell_tick.bid.to_f64().unwrap_or(0.0);
                (buy_price > 0.0 && sell_price > buy_price).then(|| ArbitrageCandidate {
                    buy_on: buy_tick.exchange_id.clone(),
                    sell_on: sell_tick.exchange_id.clone(),
                    gross_spread_bps: (sell_price - buy_price) / buy_price * 10_000.0,
                })
            }
            _ => None,
        }
    } else {
        None
    };

    Some(MergedBook {
        weight_sum,
        weighted_price,
        best_bid,
        best_ask,
        crossed_market: best_bid > best_ask,
        mean_freshness,
        volume: fresh.iter().map(|(t, _)| t.volume).sum(),
        contributing: fresh.iter().map(|(t, _)| t.exchange_id.clone()).collect(),
        arbitrage,
    })
}

fn realized_sigma(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt()
}
