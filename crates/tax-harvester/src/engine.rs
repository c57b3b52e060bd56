//! Tax Harvesting Engine
//!
//! Runs the pipeline for one request: validate, normalize, filter, screen for
//! wash sales, select per holding period, assemble. Every call is a pure
//! function of the request and the engine configuration.

use crate::assembler::{HarvestReport, ReportAssembler};
use crate::config::{EngineConfig, HarvestOptions};
use crate::eligibility::{self, EligibilityRules, Partition};
use crate::error::{HarvestError, HarvestResult};
use crate::models::{HoldingPeriod, RawPosition, ResidualTargets, TargetSpec, TaxLot};
use crate::normalizer;
use crate::selector::{self, BucketSelection, Budget, SelectorSettings};
use crate::tax_calculator::TaxCalculator;
use crate::validation;
use crate::wash_sale::WashSaleIndex;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything one harvest run needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestRequest {
    pub portfolio: Vec<RawPosition>,
    #[serde(default)]
    pub targets: TargetSpec,
    #[serde(default)]
    pub options: HarvestOptions,
}

impl HarvestRequest {
    pub fn new(portfolio: Vec<RawPosition>, targets: TargetSpec, options: HarvestOptions) -> Self {
        Self {
            portfolio,
            targets,
            options,
        }
    }
}

/// Tax-lot harvesting engine
#[derive(Debug, Clone, Default)]
pub struct TaxHarvester {
    config: EngineConfig,
}

impl TaxHarvester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with caller-built thresholds, rejected if out of range
    pub fn with_config(config: EngineConfig) -> anyhow::Result<Self> {
        config.check()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run on the blocking pool so a long search never stalls the executor
    pub async fn run_async(&self, request: HarvestRequest) -> HarvestResult<HarvestReport> {
        let harvester = self.clone();
        let lot_count = request.portfolio.len();
        let mode = request.options.optimization_level;

        tokio::task::spawn_blocking(move || harvester.run(&request))
            .await
            .map_err(|e| HarvestError::Computation {
                bucket: None,
                lot_count,
                mode,
                reason: e.to_string(),
            })?
    }

    pub fn run(&self, request: &HarvestRequest) -> HarvestResult<HarvestReport> {
        let options = &request.options;
        let as_of = options.effective_as_of();
        let residuals = request.targets.residuals();

        tracing::info!(
            positions = request.portfolio.len(),
            residual_st = %residuals.short_term,
            residual_lt = %residuals.long_term,
            level = %options.optimization_level,
            %as_of,
            "Running tax harvest"
        );

        if options.validate_inputs {
            validation::validate_request(&request.portfolio, options, as_of)?;
        }

        let lots = normalizer::normalize(
            &request.portfolio,
            &options.corporate_actions,
            as_of,
            options.long_term_days,
        )?;

        let index = WashSaleIndex::new(
            options.wash_sale_config.clone(),
            &options.similarity_table,
            options.transaction_history.as_deref(),
        )
        .with_portfolio_purchases(&lots);

        let rules = EligibilityRules::new(options.account_types.clone(), options.excluded_lot_ids.iter().cloned());
        let partition = eligibility::partition(lots, &rules);

        ensure_lots(&partition, &residuals)?;

        let budget = options
            .time_budget_ms
            .or(self.config.default_time_budget_ms)
            .map(Budget::from_millis)
            .unwrap_or_default();

        let bucket = BucketRun {
            config: &self.config,
            options,
            index: &index,
            as_of,
            budget,
        };
        let short_term = bucket.run(&partition, HoldingPeriod::ShortTerm, residuals.short_term)?;
        let long_term = bucket.run(&partition, HoldingPeriod::LongTerm, residuals.long_term)?;

        let calculator = TaxCalculator::new(options.tax_config.clone());
        let report = ReportAssembler::new(&calculator, &index, as_of)
            .with_mode(options.optimization_level)
            .assemble(partition, short_term, long_term, residuals)?;

        tracing::info!(
            recommendations = report.recommendations.len(),
            total_gain = %report.summary.total_gain,
            estimated_tax = %report.summary.tax_impact.estimated_tax,
            "Tax harvest complete"
        );

        Ok(report)
    }
}

/// A nonzero residual needs at least one eligible lot in its bucket.
/// Short-term is checked first.
fn ensure_lots(partition: &Partition, residuals: &ResidualTargets) -> HarvestResult<()> {
    for term in [HoldingPeriod::ShortTerm, HoldingPeriod::LongTerm] {
        let residual = residuals.for_term(term);
        if !residual.is_zero() && partition.bucket(term).is_empty() {
            return Err(HarvestError::NoLotsFound { term, residual });
        }
    }
    Ok(())
}

/// Per-call state shared by both bucket searches
struct BucketRun<'a> {
    config: &'a EngineConfig,
    options: &'a HarvestOptions,
    index: &'a WashSaleIndex,
    as_of: NaiveDate,
    budget: Budget,
}

impl BucketRun<'_> {
    fn run(&self, partition: &Partition, term: HoldingPeriod, residual: Decimal) -> HarvestResult<BucketSelection> {
        let mut candidates = partition.bucket(term);
        let blocked = self.screen_wash_sales(term, residual, &mut candidates)?;

        let settings = SelectorSettings::new(self.options.optimization_level, self.config)
            .with_partial_lots(self.options.allow_partial_lots)
            .with_max_candidates(self.options.candidate_cap());

        let mut selection = selector::select(term, &candidates, residual, &settings, &self.budget)?;
        selection.blocked_by_wash_sale = blocked;

        tracing::info!(
            term = %term,
            residual = %residual,
            candidates = selection.candidates_considered,
            selected = selection.lots.len(),
            distance = %selection.distance,
            strategy = %selection.strategy,
            blocked = selection.blocked_by_wash_sale.len(),
            "Bucket done"
        );

        Ok(selection)
    }

    /// Apply the wash-sale policy to the loss candidates of a bucket.
    /// Returns the ids of lots removed from candidacy.
    fn screen_wash_sales(
        &self,
        term: HoldingPeriod,
        residual: Decimal,
        candidates: &mut Vec<&TaxLot>,
    ) -> HarvestResult<Vec<String>> {
        // Only loss lots are constrained, and they only compete for a loss target
        if residual >= Decimal::ZERO || !self.index.has_history() {
            return Ok(Vec::new());
        }

        let flagged: Vec<String> = candidates
            .iter()
            .filter(|lot| lot.is_loss() && self.index.is_violation(lot, self.as_of))
            .map(|lot| lot.id.clone())
            .collect();
        if flagged.is_empty() {
            return Ok(flagged);
        }

        let strict = self.index.config().strict_mode;
        let accept = self.options.accept_wash_sale_violations;

        if strict && accept {
            return Err(HarvestError::WashSaleViolation { lot_ids: flagged });
        }
        if accept {
            tracing::debug!(term = %term, flagged = flagged.len(), "Keeping wash-sale lots as accepted");
            return Ok(Vec::new());
        }

        tracing::debug!(term = %term, blocked = ?flagged, "Removing wash-sale lots");
        candidates.retain(|lot| !flagged.contains(&lot.id));
        Ok(flagged)
    }
}

/// Recommend lots to sell so realized gains approach the targets.
///
/// Residual targets are `target - realized` per holding period.
pub async fn run_tax_harvesting(
    portfolio: Vec<RawPosition>,
    target_st: Decimal,
    target_lt: Decimal,
    realized_st: Decimal,
    realized_lt: Decimal,
    options: HarvestOptions,
) -> HarvestResult<HarvestReport> {
    let request = HarvestRequest::new(
        portfolio,
        TargetSpec::new(target_st, target_lt, realized_st, realized_lt),
        options,
    );
    TaxHarvester::new().run_async(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wash_sale::PurchaseRecord;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// One short-term SPY loss of 400 and one gain lot
    fn request(history: Vec<PurchaseRecord>, strict: bool, accept: bool) -> HarvestRequest {
        let portfolio = vec![
            RawPosition::new("SPY", dec!(10), dec!(500), dec!(5400), date(2024, 3, 1)).with_id("spy-1"),
            RawPosition::new("AAPL", dec!(10), dec!(200), dec!(1500), date(2024, 2, 1)).with_id("aapl-1"),
        ];
        let mut options = HarvestOptions::default().with_as_of(date(2024, 6, 30)).with_history(history);
        options.wash_sale_config.strict_mode = strict;
        options.accept_wash_sale_violations = accept;

        HarvestRequest::new(portfolio, TargetSpec::new(dec!(-400), dec!(0), dec!(0), dec!(0)), options)
    }

    #[test]
    fn test_with_config_rejects_oversized_exact_search() {
        let config = EngineConfig {
            exact_search_max_lots: 130,
            ..EngineConfig::default()
        };
        let err = TaxHarvester::with_config(config).unwrap_err();
        assert!(err.to_string().contains("exact_search_max_lots 130"));

        let config = EngineConfig {
            exact_search_max_lots: 12,
            ..EngineConfig::default()
        };
        let harvester = TaxHarvester::with_config(config).unwrap();
        assert_eq!(harvester.config().exact_search_max_lots, 12);
    }

    #[test]
    fn test_same_symbol_purchase_blocks_loss() {
        let report = TaxHarvester::new()
            .run(&request(vec![PurchaseRecord::new("SPY", date(2024, 6, 15))], false, false))
            .unwrap();

        assert!(report.recommendations.is_empty());
        assert_eq!(report.short_term.blocked_by_wash_sale, vec!["spy-1".to_string()]);
        assert_eq!(report.summary.wash_sale_blocked, 1);
        assert_eq!(report.summary.short_term_distance, dec!(400));
    }

    #[test]
    fn test_accepted_violation_is_annotated() {
        let report = TaxHarvester::new()
            .run(&request(vec![PurchaseRecord::new("SPY", date(2024, 7, 10))], false, true))
            .unwrap();

        let rec = report.recommendation("spy-1").unwrap();
        let flag = rec.wash_sale.as_ref().unwrap();
        assert_eq!(flag.purchase_date, date(2024, 7, 10));
        assert_eq!(flag.disallowed_loss, dec!(400));
        assert_eq!(report.summary.wash_sale_flagged, 1);
    }

    #[test]
    fn test_strict_accept_fails() {
        let err = TaxHarvester::new()
            .run(&request(vec![PurchaseRecord::new("VOO", date(2024, 6, 20))], true, true))
            .unwrap_err();

        assert!(matches!(err, HarvestError::WashSaleViolation { .. }));
    }

    #[test]
    fn test_similar_symbol_only_matters_in_strict_mode() {
        let history = vec![PurchaseRecord::new("VOO", date(2024, 6, 20))];

        let lenient = TaxHarvester::new().run(&request(history.clone(), false, false)).unwrap();
        assert_eq!(lenient.lot_ids(), vec!["spy-1"]);

        let strict = TaxHarvester::new().run(&request(history, true, false)).unwrap();
        assert!(strict.recommendations.is_empty());
        assert_eq!(strict.short_term.blocked_by_wash_sale, vec!["spy-1".to_string()]);
    }

    #[test]
    fn test_purchase_outside_window_is_clean() {
        let report = TaxHarvester::new()
            .run(&request(vec![PurchaseRecord::new("SPY", date(2024, 5, 1))], true, false))
            .unwrap();

        assert_eq!(report.lot_ids(), vec!["spy-1"]);
        assert!(report.recommendations[0].wash_sale.is_none());
    }

    #[test]
    fn test_realized_gains_reduce_target() {
        let mut req = request(Vec::new(), false, false);
        req.options.transaction_history = None;
        // 200 already realized leaves 500, the AAPL gain
        req.targets = TargetSpec::new(dec!(700), dec!(0), dec!(200), dec!(0));

        let report = TaxHarvester::new().run(&req).unwrap();
        assert_eq!(report.summary.residual_short_term, dec!(500));
        assert_eq!(report.lot_ids(), vec!["aapl-1"]);
        assert_eq!(report.summary.short_term_distance, dec!(0));
    }

    #[test]
    fn test_time_budget_falls_back() {
        let mut req = request(Vec::new(), false, false);
        req.options.transaction_history = None;
        req.options.optimization_level = crate::models::OptimizationLevel::Thorough;
        req.options.time_budget_ms = Some(0);
        req.targets = TargetSpec::new(dec!(500), dec!(0), dec!(0), dec!(0));

        let report = TaxHarvester::new().run(&req).unwrap();
        assert_eq!(report.short_term.strategy, crate::models::OptimizationLevel::Fast);
        assert!(report.short_term.fallback_reason.is_some());
        assert_eq!(report.lot_ids(), vec!["aapl-1"]);
    }
}
