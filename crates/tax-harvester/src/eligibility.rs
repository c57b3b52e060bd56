//! Eligibility Filter
//!
//! Splits lots into eligible and excluded buckets. Every lot lands in exactly
//! one bucket, and each excluded lot carries one reason.

use crate::models::{AccountType, HoldingPeriod, TaxLot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Why a lot was removed from candidacy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    ManuallyExcluded,
    NonTaxableAccount,
    ZeroOrNegativeQuantity,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::ManuallyExcluded => write!(f, "manually-excluded"),
            ExclusionReason::NonTaxableAccount => write!(f, "non-taxable-account"),
            ExclusionReason::ZeroOrNegativeQuantity => write!(f, "zero-or-negative-quantity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedLot {
    pub lot: TaxLot,
    pub reason: ExclusionReason,
}

/// Rules the filter applies
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    pub account_types: Vec<AccountType>,
    /// Lot ids the caller excluded by hand
    pub excluded_lot_ids: HashSet<String>,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self {
            account_types: vec![AccountType::Taxable],
            excluded_lot_ids: HashSet::new(),
        }
    }
}

impl EligibilityRules {
    pub fn new(account_types: Vec<AccountType>, excluded_lot_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            account_types,
            excluded_lot_ids: excluded_lot_ids.into_iter().collect(),
        }
    }

    fn exclusion_reason(&self, lot: &TaxLot) -> Option<ExclusionReason> {
        if !lot.included_in_selling || self.excluded_lot_ids.contains(&lot.id) {
            Some(ExclusionReason::ManuallyExcluded)
        } else if !self.account_types.contains(&lot.account_type) {
            Some(ExclusionReason::NonTaxableAccount)
        } else if lot.quantity <= Decimal::ZERO {
            Some(ExclusionReason::ZeroOrNegativeQuantity)
        } else {
            None
        }
    }
}

/// Result of filtering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub eligible: Vec<TaxLot>,
    pub excluded: Vec<ExcludedLot>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.eligible.len() + self.excluded.len()
    }

    /// Eligible lots of one holding period, in input order
    pub fn bucket(&self, term: HoldingPeriod) -> Vec<&TaxLot> {
        self.eligible.iter().filter(|lot| lot.term == term).collect()
    }

    pub fn excluded_by_reason(&self) -> BTreeMap<ExclusionReason, usize> {
        let mut counts = BTreeMap::new();
        for excluded in &self.excluded {
            *counts.entry(excluded.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Partition lots under `rules`
pub fn partition(lots: Vec<TaxLot>, rules: &EligibilityRules) -> Partition {
    let mut result = Partition::default();

    for lot in lots {
        match rules.exclusion_reason(&lot) {
            Some(reason) => result.excluded.push(ExcludedLot { lot, reason }),
            None => result.eligible.push(lot),
        }
    }

    tracing::debug!(
        eligible = result.eligible.len(),
        excluded = result.excluded.len(),
        "Partitioned lots"
    );

    result
}
