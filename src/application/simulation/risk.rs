use crate::config::CoreConfig;
use crate::domain::compliance::ExecutionConstraints;
use crate::domain::errors::RiskRejection;
use crate::domain::signal::LiveTradingSignal;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position_size: f64,
    pub max_gross_exposure: f64,
    pub max_drawdown: f64,
    pub correlation_bucket_threshold: f64,
}

impl RiskConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            max_position_size: config.max_position_size,
            max_gross_exposure: config.max_gross_exposure,
            max_drawdown: config.max_drawdown,
            correlation_bucket_threshold: config.correlation_bucket_threshold,
        }
    }
}

/// Everything a risk check needs to evaluate one candidate order.
pub struct RiskContext<'a> {
    pub signal: &'a LiveTradingSignal,
    /// Candidate order notional.
    pub notional: Decimal,
    pub equity: Decimal,
    /// Current gross exposure across open positions.
    pub gross_exposure: Decimal,
    pub drawdown_from_peak: f64,
    /// Open notional per pair.
    pub open_notional: &'a HashMap<String, Decimal>,
    /// Price-return correlation of the candidate pair against each held pair.
    pub candidate_correlations: &'a HashMap<String, f64>,
    pub constraints: &'a ExecutionConstraints,
}

/// A single risk check. Checks run in priority order (lower first); the
/// first rejection wins and is reported back as a filtered outcome.
pub trait RiskValidator: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection>;
    fn priority(&self) -> u8 {
        100
    }
}

/// Compliance halt: no new openings while the emergency constraint holds.
pub struct HaltValidator;

impl RiskValidator for HaltValidator {
    fn name(&self) -> &str {
        "HaltValidator"
    }

    fn validate(&self, _config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        if ctx.constraints.halt_new_positions {
            return Err(RiskRejection::OpeningsHalted);
        }
        Ok(())
    }

    fn priority(&self) -> u8 {
        5
    }
}

/// Kill-switch: beyond the drawdown limit no new positions open at all.
pub struct DrawdownValidator;

impl RiskValidator for DrawdownValidator {
    fn name(&self) -> &str {
        "DrawdownValidator"
    }

    fn validate(&self, config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        if ctx.drawdown_from_peak > config.max_drawdown {
            return Err(RiskRejection::DrawdownKillSwitch {
                drawdown_pct: ctx.drawdown_from_peak * 100.0,
                max_pct: config.max_drawdown * 100.0,
            });
        }
        Ok(())
    }

    fn priority(&self) -> u8 {
        10
    }
}

/// Per-position cap: candidate notional (plus any existing position in the
/// pair) against equity, scaled by the compliance size factor.
pub struct PositionSizeValidator;

impl PositionSizeValidator {
    fn effective_cap(config: &RiskConfig, ctx: &RiskContext<'_>) -> f64 {
        config.max_position_size * ctx.constraints.position_size_factor
    }
}

impl RiskValidator for PositionSizeValidator {
    fn name(&self) -> &str {
        "PositionSizeValidator"
    }

    fn validate(&self, config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        if ctx.equity <= Decimal::ZERO {
            return Ok(());
        }
        let existing = ctx
            .open_notional
            .get(&ctx.signal.pair)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let requested_pct = ((ctx.notional + existing) / ctx.equity)
            .to_f64()
            .unwrap_or(0.0);
        let max_pct = Self::effective_cap(config, ctx);
        if requested_pct > max_pct {
            return Err(RiskRejection::PositionSizeExceeded {
                requested_pct: requested_pct * 100.0,
                max_pct: max_pct * 100.0,
            });
        }
        Ok(())
    }

    fn priority(&self) -> u8 {
        20
    }
}

/// Portfolio-wide gross exposure cap.
pub struct GrossExposureValidator;

impl RiskValidator for GrossExposureValidator {
    fn name(&self) -> &str {
        "GrossExposureValidator"
    }

    fn validate(&self, config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        if ctx.equity <= Decimal::ZERO {
            return Ok(());
        }
        let projected_pct = ((ctx.gross_exposure + ctx.notional) / ctx.equity)
            .to_f64()
            .unwrap_or(0.0);
        if projected_pct > config.max_gross_exposure {
            return Err(RiskRejection::GrossExposureExceeded {
                projected_pct: projected_pct * 100.0,
                max_pct: config.max_gross_exposure * 100.0,
            });
        }
        Ok(())
    }

    fn priority(&self) -> u8 {
        30
    }
}

/// Pairs correlated above the bucket threshold share one size limit: the
/// candidate plus every bucketed position must fit under the per-position
/// cap.
pub struct CorrelatedExposureValidator;

impl RiskValidator for CorrelatedExposureValidator {
    fn name(&self) -> &str {
        "CorrelatedExposureValidator"
    }

    fn validate(&self, config: &RiskConfig, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        if ctx.equity <= Decimal::ZERO {
            return Ok(());
        }
        let mut bucket_notional = ctx.notional;
        let mut bucketed_with: Option<(&str, f64)> = None;
        for (pair, notional) in ctx.open_notional {
            let correlation = ctx
                .candidate_correlations
                .get(pair)
                .copied()
                .unwrap_or(0.0);
            if correlation.abs() > config.correlation_bucket_threshold {
                bucket_notional += *notional;
                let strongest = bucketed_with.map(|(_, c)| c).unwrap_or(0.0);
                if correlation.abs() > strongest.abs() {
                    bucketed_with = Some((pair.as_str(), correlation));
                }
            }
        }
        let Some((bucket_pair, correlation)) = bucketed_with else {
            return Ok(());
        };

        let max_pct = config.max_position_size * ctx.constraints.position_size_factor;
        let bucket_pct = (bucket_notional / ctx.equity).to_f64().unwrap_or(0.0);
        if bucket_pct > max_pct {
            return Err(RiskRejection::CorrelatedBucketExceeded {
                existing_pair: bucket_pair.to_string(),
                correlation,
                max_pct: max_pct * 100.0,
            });
        }
        Ok(())
    }

    fn priority(&self) -> u8 {
        40
    }
}

/// Priority-ordered validator pipeline.
pub struct RiskPipeline {
    config: RiskConfig,
    validators: Vec<Box<dyn RiskValidator>>,
}

impl RiskPipeline {
    pub fn new(config: RiskConfig) -> Self {
        let mut validators: Vec<Box<dyn RiskValidator>> = vec![
            Box::new(HaltValidator),
            Box::new(DrawdownValidator),
            Box::new(PositionSizeValidator),
            Box::new(GrossExposureValidator),
            Box::new(CorrelatedExposureValidator),
        ];
        validators.sort_by_key(|v| v.priority());
        Self { config, validators }
    }

    pub fn max_drawdown(&self) -> f64 {
        self.config.max_drawdown
    }

    pub fn check(&self, ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
        for validator in &self.validators {
            if let Err(rejection) = validator.validate(&self.config, ctx) {
                debug!(
                    "RiskPipeline: {} rejected {} on {}: {}",
                    validator.name(),
                    ctx.signal.signal_id,
                    ctx.signal.pair,
                    rejection
                );
                return Err(rejection);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketRegime;
    use crate::domain::signal::SignalDirection;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn signal(pair: &str) -> LiveTradingSignal {
        let now = Utc::now();
        LiveTradingSignal {
            signal_id: Uuid::new_v4(),
            pair: pair.to_string(),
            direction: SignalDirection::Long,
            strength: 0.7,
            confidence: 0.8,
            predicted_return: 0.014,
            risk_score: 0.2,
            regime_at_generation: MarketRegime::Normal,
            created_at: now,
            expires_at: now + chrono::Duration::hours(6),
        }
    }

    fn config() -> RiskConfig {
        RiskConfig {
            max_position_size: 0.10,
            max_gross_exposure: 0.50,
            max_drawdown: 0.20,
            correlation_bucket_threshold: 0.8,
        }
    }

    struct Fixture {
        signal: LiveTradingSignal,
        open_notional: HashMap<String, Decimal>,
        candidate_correlations: HashMap<String, f64>,
        constraints: ExecutionConstraints,
    }

    impl Fixture {
        fn new(pair: &str) -> Self {
            Self {
                signal: signal(pair),
                open_notional: HashMap::new(),
                candidate_correlations: HashMap::new(),
                constraints: ExecutionConstraints::default(),
            }
        }

        fn ctx(&self, notional: Decimal, equity: Decimal, gross: Decimal, drawdown: f64) -> RiskContext<'_> {
            RiskContext {
                signal: &self.signal,
                notional,
                equity,
                gross_exposure: gross,
                drawdown_from_peak: drawdown,
                open_notional: &self.open_notional,
                candidate_correlations: &self.candidate_correlations,
                constraints: &self.constraints,
            }
        }
    }

    #[test]
    fn test_small_order_passes() {
        let fixture = Fixture::new("BTC/ETH");
        let pipeline = RiskPipeline::new(config());
        let ctx = fixture.ctx(dec!(5000), dec!(100000), dec!(0), 0.0);
        assert!(pipeline.check(&ctx).is_ok());
    }

    #[test]
    fn test_position_size_rejection_carries_code() {
        let mut risk_config = config();
        risk_config.max_position_size = 0.02;
        let fixture = Fixture::new("BTC/ETH");
        let pipeline = RiskPipeline::new(risk_config);
        // $5,000 on $100,000 equity against a 2% cap.
        let ctx = fixture.ctx(dec!(5000), dec!(100000), dec!(0), 0.0);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "position_size_exceeded");
    }

    #[test]
    fn test_gross_exposure_rejection() {
        let fixture = Fixture::new("BTC/ETH");
        let pipeline = RiskPipeline::new(config());
        let ctx = fixture.ctx(dec!(8000), dec!(100000), dec!(45000), 0.0);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "gross_exposure_exceeded");
    }

    #[test]
    fn test_drawdown_kill_switch_beats_other_checks() {
        let fixture = Fixture::new("BTC/ETH");
        let pipeline = RiskPipeline::new(config());
        let ctx = fixture.ctx(dec!(500000), dec!(100000), dec!(0), 0.25);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "drawdown_kill_switch");
    }

    #[test]
    fn test_halt_constraint_rejects_first() {
        let mut fixture = Fixture::new("BTC/ETH");
        fixture.constraints.halt_new_positions = true;
        let pipeline = RiskPipeline::new(config());
        let ctx = fixture.ctx(dec!(100), dec!(100000), dec!(0), 0.0);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "openings_halted");
    }

    #[test]
    fn test_correlated_pairs_share_one_bucket() {
        let mut fixture = Fixture::new("BTC/ETH");
        fixture.open_notional.insert("BTC/ADA".to_string(), dec!(7000));
        fixture
            .candidate_correlations
            .insert("BTC/ADA".to_string(), 0.9);
        let pipeline = RiskPipeline::new(config());

        // 7k existing + 6k candidate = 13% of equity in one 10% bucket.
        let ctx = fixture.ctx(dec!(6000), dec!(100000), dec!(7000), 0.0);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "correlated_bucket_exceeded");

        // Uncorrelated pairs are not bucketed.
        fixture
            .candidate_correlations
            .insert("BTC/ADA".to_string(), 0.3);
        let ctx = fixture.ctx(dec!(6000), dec!(100000), dec!(7000), 0.0);
        assert!(pipeline.check(&ctx).is_ok());
    }

    #[test]
    fn test_size_factor_halves_the_cap() {
        let mut fixture = Fixture::new("BTC/ETH");
        fixture.constraints.position_size_factor = 0.5;
        let pipeline = RiskPipeline::new(config());
        // 8% would pass the 10% cap, but the halved cap is 5%.
        let ctx = fixture.ctx(dec!(8000), dec!(100000), dec!(0), 0.0);
        let rejection = pipeline.check(&ctx).unwrap_err();
        assert_eq!(rejection.code(), "position_size_exceeded");
    }

    #[test]
    fn test_existing_position_counts_toward_cap() {
        let mut fixture = Fixture::new("BTC/ETH");
        fixture.open_notional.insert("BTC/ETH".to_string(), dec!(6000));
        let pipeline = RiskPipeline::new(config());
        // 6k existing + 5k new = 11% > 10%.
        let ctx = fixture.ctx(dec!(5000), dec!(100000), dec!(6000), 0.0);
        assert!(pipeline.check(&ctx).is_err());
    }
}
