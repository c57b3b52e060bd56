//! Lot Normalizer
//!
//! Turns raw position records into canonical tax lots. Records are checked as a
//! batch and any bad field rejects the whole batch.

use crate::corporate_actions::{self, CorporateAction};
use crate::error::{HarvestError, HarvestResult, ValidationErrors};
use crate::models::{AccountType, HoldingPeriod, LotOrigin, RawAmount, RawPosition, TaxLot};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

const OUT_OF_RANGE: &str = "market value or gain exceeds the supported decimal range";

/// A lot whose quantity and basis are still subject to corporate actions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingLot {
    pub id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub quantity: Decimal,
    pub price: Decimal,
    pub cost_basis: Decimal,
    pub acquired_date: NaiveDate,
    pub account_type: AccountType,
    pub included_in_selling: bool,
    pub source_index: usize,
    pub origin: LotOrigin,
}

impl PendingLot {
    /// Market value less basis, or `None` when it leaves the decimal range.
    fn unrealized_gain(&self) -> Option<Decimal> {
        self.quantity
            .checked_mul(self.price)
            .and_then(|value| value.checked_sub(self.cost_basis))
    }

    fn classify(self, as_of: NaiveDate, long_term_days: u32) -> Option<TaxLot> {
        let term = HoldingPeriod::classify(self.acquired_date, as_of, long_term_days);
        let unrealized_gain = self.unrealized_gain()?;

        Some(TaxLot {
            id: self.id,
            symbol: self.symbol,
            name: self.name,
            quantity: self.quantity,
            price: self.price,
            cost_basis: self.cost_basis,
            acquired_date: self.acquired_date,
            term,
            unrealized_gain,
            account_type: self.account_type,
            included_in_selling: self.included_in_selling,
            source_index: self.source_index,
            origin: self.origin,
        })
    }
}

/// Parse a date in any of the accepted import formats
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    // Timestamps such as 2023-04-01T00:00:00Z
    trimmed
        .get(..10)
        .filter(|_| trimmed.len() > 10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn decimal_field(
    index: usize,
    field: &str,
    value: &Option<RawAmount>,
    errors: &mut ValidationErrors,
) -> Option<Decimal> {
    match value {
        None => {
            errors.push_record(index, field, "is required");
            None
        }
        Some(raw) => match raw.to_decimal() {
            Some(d) => Some(d),
            None => {
                errors.push_record(index, field, format!("is not numeric: {:?}", raw));
                None
            }
        },
    }
}

/// Check one record, collecting every violation.
pub(crate) fn check_record(
    index: usize,
    record: &RawPosition,
    as_of: NaiveDate,
    errors: &mut ValidationErrors,
) -> Option<PendingLot> {
    let before = errors.len();

    let symbol = match record.symbol.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_uppercase()),
        _ => {
            errors.push_record(index, "symbol", "is required");
            None
        }
    };

    let quantity = decimal_field(index, "quantity", &record.quantity, errors);
    let price = decimal_field(index, "price", &record.price, errors);
    if let Some(p) = price {
        if p < Decimal::ZERO {
            errors.push_record(index, "price", "must not be negative");
        }
    }
    let cost_basis = decimal_field(index, "cost_basis", &record.cost_basis, errors);

    let acquired_date = match record.acquired_date.as_deref() {
        None => {
            errors.push_record(index, "acquired_date", "is required");
            None
        }
        Some(raw) => match parse_date(raw) {
            None => {
                errors.push_record(index, "acquired_date", format!("is not a valid date: '{}'", raw));
                None
            }
            Some(date) if date > as_of => {
                errors.push_record(index, "acquired_date", format!("{} is in the future (as of {})", date, as_of));
                None
            }
            Some(date) => Some(date),
        },
    };

    let account_type = match record.account_type.as_deref() {
        None => Some(AccountType::Taxable),
        Some(raw) => match raw.parse::<AccountType>() {
            Ok(account) => Some(account),
            Err(e) => {
                errors.push_record(index, "account_type", e);
                None
            }
        },
    };

    if errors.len() > before {
        return None;
    }

    let lot = PendingLot {
        id: record
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("lot-{}", index + 1)),
        symbol: symbol?,
        name: record.name.clone(),
        quantity: quantity?,
        price: price?,
        cost_basis: cost_basis?,
        acquired_date: acquired_date?,
        account_type: account_type?,
        included_in_selling: record.included_in_selling.unwrap_or(true),
        source_index: index,
        origin: LotOrigin::Position,
    };

    if lot.unrealized_gain().is_none() {
        errors.push_record(index, "quantity", OUT_OF_RANGE);
        return None;
    }

    Some(lot)
}

/// Check every record of a portfolio, including lot id uniqueness.
pub(crate) fn check_records(
    records: &[RawPosition],
    as_of: NaiveDate,
    errors: &mut ValidationErrors,
) -> Vec<PendingLot> {
    let mut lots = Vec::with_capacity(records.len());
    let mut seen_ids = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        if let Some(lot) = check_record(index, record, as_of, errors) {
            if !seen_ids.insert(lot.id.clone()) {
                errors.push_record(index, "id", format!("duplicate lot id '{}'", lot.id));
                continue;
            }
            lots.push(lot);
        }
    }

    lots
}

/// Normalize a batch of positions into tax lots.
///
/// Corporate actions are applied before the holding period and unrealized gain
/// are derived, so both always reflect adjusted quantity and basis.
pub fn normalize(
    records: &[RawPosition],
    actions: &[CorporateAction],
    as_of: NaiveDate,
    long_term_days: u32,
) -> HarvestResult<Vec<TaxLot>> {
    let mut errors = ValidationErrors::new();
    let mut pending = check_records(records, as_of, &mut errors);
    corporate_actions::validate_actions(actions, &mut errors);
    if !errors.is_empty() {
        return Err(HarvestError::Validation(errors));
    }

    corporate_actions::apply(&mut pending, actions, as_of, &mut errors);

    // Synthetic lots must not collide with any other lot
    let mut seen_ids = HashSet::with_capacity(pending.len());
    let mut lots = Vec::with_capacity(pending.len());
    for lot in pending {
        let index = lot.source_index;
        if !seen_ids.insert(lot.id.clone()) {
            errors.push_record(index, "id", format!("lot id '{}' is not unique after corporate actions", lot.id));
            continue;
        }
        match lot.classify(as_of, long_term_days) {
            Some(lot) => lots.push(lot),
            None => errors.push_record(index, "quantity", OUT_OF_RANGE),
        }
    }

    errors.into_result()?;
    Ok(lots)
}
