//! Result Assembler
//!
//! Turns the two bucket selections into ranked recommendations plus a
//! summary, and re-checks the output before it leaves the engine.

use crate::eligibility::{ExcludedLot, ExclusionReason, Partition};
use crate::error::{HarvestError, HarvestResult};
use crate::models::{AccountType, HoldingPeriod, OptimizationLevel, ResidualTargets};
use crate::selector::{BucketSelection, SelectedLot};
use crate::tax_calculator::{TaxCalculator, TaxImpact};
use crate::wash_sale::{WashSaleFlag, WashSaleIndex};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A lot to sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub lot_id: String,
    pub symbol: String,
    pub name: Option<String>,
    /// Shares to sell; less than `lot_quantity` for a partial sale
    pub quantity: Decimal,
    pub lot_quantity: Decimal,
    pub price: Decimal,
    /// Basis of the shares sold
    pub cost_basis: Decimal,
    pub proceeds: Decimal,
    pub actual_gain: Decimal,
    pub term: HoldingPeriod,
    pub account_type: AccountType,
    pub acquired_date: NaiveDate,
    pub partial: bool,
    /// 1-based, short-term bucket first
    pub rank: usize,
    pub wash_sale: Option<WashSaleFlag>,
    pub estimated_tax: Decimal,
}

/// Aggregate view of a harvest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub as_of: NaiveDate,
    pub total_positions: usize,
    pub eligible_positions: usize,
    pub selected_positions: usize,
    pub excluded_positions: usize,
    pub excluded_by_reason: BTreeMap<ExclusionReason, usize>,
    pub total_proceeds: Decimal,
    pub short_term_gain: Decimal,
    pub long_term_gain: Decimal,
    pub total_gain: Decimal,
    pub tax_impact: TaxImpact,
    pub residual_short_term: Decimal,
    pub residual_long_term: Decimal,
    pub short_term_distance: Decimal,
    pub long_term_distance: Decimal,
    /// Recommendations carrying a wash-sale annotation
    pub wash_sale_flagged: usize,
    pub wash_sale_blocked: usize,
}

/// Full engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestReport {
    pub recommendations: Vec<Recommendation>,
    pub summary: HarvestSummary,
    pub short_term: BucketSelection,
    pub long_term: BucketSelection,
    pub excluded: Vec<ExcludedLot>,
}

impl HarvestReport {
    pub fn recommendation(&self, lot_id: &str) -> Option<&Recommendation> {
        self.recommendations.iter().find(|r| r.lot_id == lot_id)
    }

    pub fn lot_ids(&self) -> Vec<&str> {
        self.recommendations.iter().map(|r| r.lot_id.as_str()).collect()
    }
}

/// Builds a [`HarvestReport`] from the per-bucket selections
pub struct ReportAssembler<'a> {
    calculator: &'a TaxCalculator,
    index: &'a WashSaleIndex,
    as_of: NaiveDate,
    mode: OptimizationLevel,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(calculator: &'a TaxCalculator, index: &'a WashSaleIndex, as_of: NaiveDate) -> Self {
        Self {
            calculator,
            index,
            as_of,
            mode: OptimizationLevel::default(),
        }
    }

    /// Level the selections were requested at, reported in output errors
    pub fn with_mode(mut self, mode: OptimizationLevel) -> Self {
        self.mode = mode;
        self
    }

    fn recommend(&self, selected: &SelectedLot, rank: usize) -> Recommendation {
        let lot = &selected.lot;
        let quantity = selected.quantity;

        Recommendation {
            lot_id: lot.id.clone(),
            symbol: lot.symbol.clone(),
            name: lot.name.clone(),
            quantity,
            lot_quantity: lot.quantity,
            price: lot.price,
            cost_basis: lot.basis_for_quantity(quantity).round_dp(2),
            proceeds: (quantity * lot.price).round_dp(2),
            actual_gain: selected.gain,
            term: lot.term,
            account_type: lot.account_type,
            acquired_date: lot.acquired_date,
            partial: selected.partial,
            rank,
            wash_sale: self.index.check(lot, self.as_of),
            estimated_tax: self.calculator.estimate(selected.gain, lot.term),
        }
    }

    pub fn assemble(
        &self,
        partition: Partition,
        short_term: BucketSelection,
        long_term: BucketSelection,
        residuals: ResidualTargets,
    ) -> HarvestResult<HarvestReport> {
        let recommendations: Vec<Recommendation> = short_term
            .lots
            .iter()
            .chain(long_term.lots.iter())
            .enumerate()
            .map(|(i, selected)| self.recommend(selected, i + 1))
            .collect();

        self.check_output(&recommendations)?;

        let short_term_gain: Decimal = short_term.lots.iter().map(|l| l.gain).sum();
        let long_term_gain: Decimal = long_term.lots.iter().map(|l| l.gain).sum();

        let summary = HarvestSummary {
            as_of: self.as_of,
            total_positions: partition.total(),
            eligible_positions: partition.eligible.len(),
            selected_positions: recommendations.len(),
            excluded_positions: partition.excluded.len(),
            excluded_by_reason: partition.excluded_by_reason(),
            total_proceeds: recommendations.iter().map(|r| r.proceeds).sum(),
            short_term_gain,
            long_term_gain,
            total_gain: short_term_gain + long_term_gain,
            tax_impact: self.calculator.impact(short_term_gain, long_term_gain),
            residual_short_term: residuals.short_term,
            residual_long_term: residuals.long_term,
            short_term_distance: short_term.distance,
            long_term_distance: long_term.distance,
            wash_sale_flagged: recommendations.iter().filter(|r| r.wash_sale.is_some()).count(),
            wash_sale_blocked: short_term.blocked_by_wash_sale.len() + long_term.blocked_by_wash_sale.len(),
        };

        Ok(HarvestReport {
            recommendations,
            summary,
            short_term,
            long_term,
            excluded: partition.excluded,
        })
    }

    /// No lot twice; in strict mode no recommended loss may be a wash sale.
    fn check_output(&self, recommendations: &[Recommendation]) -> HarvestResult<()> {
        let mut seen = HashSet::new();
        for rec in recommendations {
            if !seen.insert(rec.lot_id.as_str()) {
                return Err(HarvestError::Computation {
                    bucket: Some(rec.term),
                    lot_count: recommendations.len(),
                    mode: self.mode,
                    reason: format!("lot {} selected twice", rec.lot_id),
                });
            }
        }

        if self.index.config().strict_mode {
            let violating: Vec<String> = recommendations
                .iter()
                .filter(|r| r.wash_sale.is_some())
                .map(|r| r.lot_id.clone())
                .collect();
            if !violating.is_empty() {
                return Err(HarvestError::WashSaleViolation { lot_ids: violating });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LotOrigin, TaxLot};
    use crate::selector::{select, Budget, SelectorSettings};
    use crate::similarity::SimilarityTable;
    use crate::tax_calculator::TaxConfig;
    use crate::wash_sale::{PurchaseRecord, WashSaleConfig};
    use crate::config::EngineConfig;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot(id: &str, term: HoldingPeriod, quantity: Decimal, price: Decimal, basis: Decimal) -> TaxLot {
        TaxLot {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            name: None,
            quantity,
            price,
            cost_basis: basis,
            acquired_date: date(2023, 1, 3),
            term,
            unrealized_gain: quantity * price - basis,
            account_type: AccountType::Taxable,
            included_in_selling: true,
            source_index: 0,
            origin: LotOrigin::Position,
        }
    }

    fn bucket(lots: &[TaxLot], term: HoldingPeriod, target: Decimal, partial: bool) -> BucketSelection {
        let refs: Vec<&TaxLot> = lots.iter().filter(|l| l.term == term).collect();
        let settings = SelectorSettings::new(OptimizationLevel::Thorough, &EngineConfig::default())
            .with_partial_lots(partial);
        select(term, &refs, target, &settings, &Budget::unlimited()).unwrap()
    }

    fn calculator() -> TaxCalculator {
        TaxCalculator::new(TaxConfig::new(dec!(0.30), dec!(0.15), dec!(0), dec!(0)))
    }

    #[test]
    fn test_assemble_summary() {
        let lots = vec![
            lot("st", HoldingPeriod::ShortTerm, dec!(10), dec!(50), dec!(300)),
            lot("lt", HoldingPeriod::LongTerm, dec!(20), dec!(100), dec!(1000)),
        ];
        let short_term = bucket(&lots, HoldingPeriod::ShortTerm, dec!(200), false);
        let long_term = bucket(&lots, HoldingPeriod::LongTerm, dec!(1000), false);
        let partition = Partition {
            eligible: lots.clone(),
            excluded: Vec::new(),
        };

        let calculator = calculator();
        let index = WashSaleIndex::new(WashSaleConfig::default(), &SimilarityTable::empty(), None);
        let assembler = ReportAssembler::new(&calculator, &index, date(2024, 6, 30));
        let residuals = ResidualTargets {
            short_term: dec!(200),
            long_term: dec!(1000),
        };

        let report = assembler.assemble(partition, short_term, long_term, residuals).unwrap();

        assert_eq!(report.lot_ids(), vec!["st", "lt"]);
        assert_eq!(report.recommendations[0].rank, 1);
        assert_eq!(report.recommendations[1].rank, 2);
        assert_eq!(report.recommendations[0].estimated_tax, dec!(60));
        assert_eq!(report.recommendations[1].estimated_tax, dec!(150));

        let summary = &report.summary;
        assert_eq!(summary.total_positions, 2);
        assert_eq!(summary.selected_positions, 2);
        assert_eq!(summary.total_proceeds, dec!(2500));
        assert_eq!(summary.total_gain, dec!(1200));
        assert_eq!(summary.tax_impact.estimated_tax, dec!(210));
        assert_eq!(summary.short_term_distance, dec!(0));
    }

    #[test]
    fn test_partial_recommendation_prorates_basis() {
        let lots = vec![lot("lt", HoldingPeriod::LongTerm, dec!(20), dec!(100), dec!(1000))];
        let long_term = bucket(&lots, HoldingPeriod::LongTerm, dec!(250), true);
        let short_term = bucket(&lots, HoldingPeriod::ShortTerm, dec!(0), true);

        let calculator = calculator();
        let index = WashSaleIndex::new(WashSaleConfig::default(), &SimilarityTable::empty(), None);
        let assembler = ReportAssembler::new(&calculator, &index, date(2024, 6, 30));
        let report = assembler
            .assemble(Partition::default(), short_term, long_term, ResidualTargets::default())
            .unwrap();

        let rec = report.recommendation("lt").unwrap();
        assert!(rec.partial);
        assert_eq!(rec.quantity, dec!(5));
        assert_eq!(rec.lot_quantity, dec!(20));
        assert_eq!(rec.cost_basis, dec!(250));
        assert_eq!(rec.proceeds, dec!(500));
        assert_eq!(rec.actual_gain, dec!(250));
    }

    #[test]
    fn test_strict_output_check_rejects_wash_sale() {
        let lots = vec![lot("spy", HoldingPeriod::ShortTerm, dec!(10), dec!(40), dec!(500))];
        let short_term = bucket(&lots, HoldingPeriod::ShortTerm, dec!(-100), false);
        let long_term = bucket(&lots, HoldingPeriod::LongTerm, dec!(0), false);

        let history = vec![PurchaseRecord::new("VOO", date(2024, 6, 20))];
        let index = WashSaleIndex::new(
            WashSaleConfig::default().strict(),
            &SimilarityTable::default(),
            Some(history.as_slice()),
        );
        let calculator = calculator();
        let assembler = ReportAssembler::new(&calculator, &index, date(2024, 6, 30));

        let err = assembler
            .assemble(Partition::default(), short_term, long_term, ResidualTargets::default())
            .unwrap_err();
        assert!(matches!(err, HarvestError::WashSaleViolation { ref lot_ids } if lot_ids == &["spy".to_string()]));
    }

    #[test]
    fn test_double_selection_reports_requested_mode() {
        let lots = vec![lot("dup", HoldingPeriod::ShortTerm, dec!(10), dec!(50), dec!(300))];
        let mut carried = lots[0].clone();
        carried.term = HoldingPeriod::LongTerm;
        let short_term = bucket(&lots, HoldingPeriod::ShortTerm, dec!(200), false);
        let long_term = bucket(&[carried], HoldingPeriod::LongTerm, dec!(200), false);

        let calculator = calculator();
        let index = WashSaleIndex::new(WashSaleConfig::default(), &SimilarityTable::empty(), None);
        let assembler = ReportAssembler::new(&calculator, &index, date(2024, 6, 30)).with_mode(OptimizationLevel::Fast);

        let err = assembler
            .assemble(Partition::default(), short_term, long_term, ResidualTargets::default())
            .unwrap_err();
        match err {
            HarvestError::Computation { bucket, lot_count, mode, reason } => {
                assert_eq!(bucket, Some(HoldingPeriod::LongTerm));
                assert_eq!(lot_count, 2);
                assert_eq!(mode, OptimizationLevel::Fast);
                assert_eq!(reason, "lot dup selected twice");
            }
            other => panic!("expected a computation error, got {other:?}"),
        }
    }
}
