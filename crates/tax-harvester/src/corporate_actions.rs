//! Corporate Action Adjuster
//!
//! Applies splits, mergers, spinoffs and reinvested dividends to lots before
//! they are classified. Actions run once each, in effective-date order, and only
//! touch lots acquired strictly before the effective date.

use crate::error::ValidationErrors;
use crate::models::LotOrigin;
use crate::normalizer::PendingLot;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of corporate action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateActionKind {
    /// `ratio` new shares per old share; total basis unchanged
    Split,
    /// Exchange into `new_symbol` at `ratio`; `adjustment` is the basis weight carried over
    Merger,
    /// `ratio` shares of `new_symbol` per parent share; `adjustment` is the basis weight moved
    Spinoff,
    /// `adjustment` cash per share, reinvested at `price`
    Dividend,
}

impl std::fmt::Display for CorporateActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorporateActionKind::Split => write!(f, "split"),
            CorporateActionKind::Merger => write!(f, "merger"),
            CorporateActionKind::Spinoff => write!(f, "spinoff"),
            CorporateActionKind::Dividend => write!(f, "dividend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: CorporateActionKind,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub ratio: Option<Decimal>,
    #[serde(default)]
    pub adjustment: Option<Decimal>,
    #[serde(default)]
    pub new_symbol: Option<String>,
    /// Market price of the spun-off security, or the dividend reinvestment price
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl CorporateAction {
    pub fn split(symbol: &str, effective_date: NaiveDate, ratio: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: CorporateActionKind::Split,
            effective_date,
            ratio: Some(ratio),
            adjustment: None,
            new_symbol: None,
            price: None,
        }
    }

    pub fn merger(symbol: &str, effective_date: NaiveDate, new_symbol: &str, ratio: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: CorporateActionKind::Merger,
            effective_date,
            ratio: Some(ratio),
            adjustment: None,
            new_symbol: Some(new_symbol.to_string()),
            price: None,
        }
    }

    pub fn spinoff(
        symbol: &str,
        effective_date: NaiveDate,
        new_symbol: &str,
        ratio: Decimal,
        basis_weight: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: CorporateActionKind::Spinoff,
            effective_date,
            ratio: Some(ratio),
            adjustment: Some(basis_weight),
            new_symbol: Some(new_symbol.to_string()),
            price: Some(price),
        }
    }

    pub fn reinvested_dividend(
        symbol: &str,
        effective_date: NaiveDate,
        cash_per_share: Decimal,
        reinvest_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: CorporateActionKind::Dividend,
            effective_date,
            ratio: None,
            adjustment: Some(cash_per_share),
            new_symbol: None,
            price: Some(reinvest_price),
        }
    }

    fn applies_to(&self, lot: &PendingLot) -> bool {
        lot.symbol.eq_ignore_ascii_case(&self.symbol) && lot.acquired_date < self.effective_date
    }
}

/// Check action records, reporting every missing or out-of-range field.
pub fn validate_actions(actions: &[CorporateAction], errors: &mut ValidationErrors) {
    for (i, action) in actions.iter().enumerate() {
        let field = |name: &str| format!("corporate_actions[{}].{}", i, name);

        if action.symbol.trim().is_empty() {
            errors.push(field("symbol"), "is required");
        }

        let positive = |value: Option<Decimal>, name: &str, errors: &mut ValidationErrors| match value {
            None => errors.push(field(name), format!("is required for a {}", action.kind)),
            Some(v) if v <= Decimal::ZERO => errors.push(field(name), "must be positive"),
            Some(_) => {}
        };

        match action.kind {
            CorporateActionKind::Split => positive(action.ratio, "ratio", errors),
            CorporateActionKind::Merger => {
                positive(action.ratio, "ratio", errors);
                if let Some(weight) = action.adjustment {
                    if weight <= Decimal::ZERO || weight > Decimal::ONE {
                        errors.push(field("adjustment"), "basis weight must be in (0, 1]");
                    }
                }
            }
            CorporateActionKind::Spinoff => {
                positive(action.ratio, "ratio", errors);
                positive(action.price, "price", errors);
                match action.adjustment {
                    None => errors.push(field("adjustment"), "is required for a spinoff"),
                    Some(weight) if weight < Decimal::ZERO || weight > Decimal::ONE => {
                        errors.push(field("adjustment"), "basis weight must be in [0, 1]")
                    }
                    Some(_) => {}
                }
            }
            CorporateActionKind::Dividend => {
                positive(action.adjustment, "adjustment", errors);
                positive(action.price, "price", errors);
            }
        }

        if matches!(action.kind, CorporateActionKind::Merger | CorporateActionKind::Spinoff)
            && action.new_symbol.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            errors.push(field("new_symbol"), format!("is required for a {}", action.kind));
        }
    }
}

/// Apply actions in effective-date order. Actions after `as_of` are ignored.
///
/// Assumes the actions passed [`validate_actions`]. An adjustment that would
/// leave the decimal range is reported against the action and skipped for
/// that lot. Synthetic lot ids never repeat an existing id.
pub(crate) fn apply(
    lots: &mut Vec<PendingLot>,
    actions: &[CorporateAction],
    as_of: NaiveDate,
    errors: &mut ValidationErrors,
) {
    let mut ordered: Vec<(usize, &CorporateAction)> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.effective_date <= as_of)
        .collect();
    // Stable: same-day actions keep caller order
    ordered.sort_by_key(|(_, a)| a.effective_date);

    let mut taken: HashSet<String> = lots.iter().map(|lot| lot.id.clone()).collect();

    for (index, action) in ordered {
        let mut created = Vec::new();
        let mut overflowed = |lot_id: &str, field: &str| {
            errors.push(
                format!("corporate_actions[{}].{}", index, field),
                format!("{} of lot {} exceeds the supported decimal range", action.kind, lot_id),
            )
        };

        for lot in lots.iter_mut().filter(|lot| action.applies_to(lot)) {
            match action.kind {
                CorporateActionKind::Split => {
                    match lot.quantity.checked_mul(action.ratio.unwrap_or(Decimal::ONE)) {
                        Some(quantity) => lot.quantity = quantity,
                        None => overflowed(&lot.id, "ratio"),
                    }
                }
                CorporateActionKind::Merger => {
                    let Some(quantity) = lot.quantity.checked_mul(action.ratio.unwrap_or(Decimal::ONE)) else {
                        overflowed(&lot.id, "ratio");
                        continue;
                    };
                    // Weight is in (0, 1], so the basis only shrinks
                    lot.cost_basis *= action.adjustment.unwrap_or(Decimal::ONE);
                    lot.quantity = quantity;
                    if let Some(new_symbol) = &action.new_symbol {
                        lot.symbol = new_symbol.trim().to_uppercase();
                    }
                }
                CorporateActionKind::Spinoff => {
                    let Some(quantity) = lot.quantity.checked_mul(action.ratio.unwrap_or(Decimal::ZERO)) else {
                        overflowed(&lot.id, "ratio");
                        continue;
                    };
                    let moved_basis = lot.cost_basis * action.adjustment.unwrap_or(Decimal::ZERO);
                    lot.cost_basis -= moved_basis;

                    let new_symbol = action.new_symbol.as_deref().unwrap_or_default().trim().to_uppercase();
                    created.push(PendingLot {
                        id: fresh_id(&mut taken, format!("{}-spinoff-{}", lot.id, new_symbol)),
                        symbol: new_symbol,
                        name: None,
                        quantity,
                        price: action.price.unwrap_or(Decimal::ZERO),
                        cost_basis: moved_basis,
                        // Holding period tacks onto the parent's
                        acquired_date: lot.acquired_date,
                        account_type: lot.account_type,
                        included_in_selling: lot.included_in_selling,
                        source_index: lot.source_index,
                        origin: LotOrigin::CorporateAction {
                            parent_id: lot.id.clone(),
                            action: action.kind.to_string(),
                        },
                    });
                }
                CorporateActionKind::Dividend => {
                    let reinvest_price = action.price.unwrap_or(Decimal::ONE);
                    let Some((cash, quantity)) = lot
                        .quantity
                        .checked_mul(action.adjustment.unwrap_or(Decimal::ZERO))
                        .and_then(|cash| Some((cash, cash.checked_div(reinvest_price)?)))
                    else {
                        overflowed(&lot.id, "adjustment");
                        continue;
                    };
                    if cash <= Decimal::ZERO {
                        continue;
                    }

                    created.push(PendingLot {
                        id: fresh_id(
                            &mut taken,
                            format!("{}-div-{}", lot.id, action.effective_date.format("%Y%m%d")),
                        ),
                        symbol: lot.symbol.clone(),
                        name: lot.name.clone(),
                        quantity,
                        price: lot.price,
                        cost_basis: cash,
                        acquired_date: action.effective_date,
                        account_type: lot.account_type,
                        included_in_selling: lot.included_in_selling,
                        source_index: lot.source_index,
                        origin: LotOrigin::CorporateAction {
                            parent_id: lot.id.clone(),
                            action: action.kind.to_string(),
                        },
                    });
                }
            }
        }

        tracing::debug!(
            symbol = %action.symbol,
            kind = %action.kind,
            date = %action.effective_date,
            created = created.len(),
            "Applied corporate action"
        );
        lots.extend(created);
    }
}

/// `base`, or `base-2`, `base-3`, ... when already taken.
fn fresh_id(taken: &mut HashSet<String>, base: String) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
