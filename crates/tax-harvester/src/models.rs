//! Shared domain types: raw positions, canonical tax lots and targets.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Holding period classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

impl HoldingPeriod {
    pub fn is_long_term(&self) -> bool {
        matches!(self, HoldingPeriod::LongTerm)
    }

    /// Derive the holding period for a lot held from `acquired` until `as_of`.
    pub fn classify(acquired: NaiveDate, as_of: NaiveDate, long_term_days: u32) -> Self {
        if (as_of - acquired).num_days() >= long_term_days as i64 {
            HoldingPeriod::LongTerm
        } else {
            HoldingPeriod::ShortTerm
        }
    }
}

impl std::fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldingPeriod::ShortTerm => write!(f, "short-term"),
            HoldingPeriod::LongTerm => write!(f, "long-term"),
        }
    }
}

/// Account a lot is held in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "taxable")]
    Taxable,
    #[serde(rename = "traditional-ira")]
    TraditionalIra,
    #[serde(rename = "roth-ira")]
    RothIra,
    #[serde(rename = "401k")]
    FourOhOneK,
    #[serde(rename = "hsa")]
    Hsa,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Taxable => write!(f, "taxable"),
            AccountType::TraditionalIra => write!(f, "traditional-ira"),
            AccountType::RothIra => write!(f, "roth-ira"),
            AccountType::FourOhOneK => write!(f, "401k"),
            AccountType::Hsa => write!(f, "hsa"),
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "taxable" | "brokerage" | "individual" => Ok(AccountType::Taxable),
            "traditional-ira" | "ira" | "traditional" => Ok(AccountType::TraditionalIra),
            "roth-ira" | "roth" => Ok(AccountType::RothIra),
            "401k" | "401-k" => Ok(AccountType::FourOhOneK),
            "hsa" => Ok(AccountType::Hsa),
            _ => Err(format!("unknown account type '{}'", s)),
        }
    }
}

/// Search strategy for the target-matching selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// Greedy, knowingly non-optimal
    Fast,
    /// Coarse subset-sum DP
    #[default]
    Balanced,
    /// Exact search on small buckets, fine DP up to the safety threshold
    Thorough,
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationLevel::Fast => write!(f, "fast"),
            OptimizationLevel::Balanced => write!(f, "balanced"),
            OptimizationLevel::Thorough => write!(f, "thorough"),
        }
    }
}

/// A numeric field as it arrives from an import layer: a number or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(Decimal),
    Text(String),
}

impl RawAmount {
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            RawAmount::Number(d) => Some(*d),
            RawAmount::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',' && *c != '$').collect();
                Decimal::from_str(&cleaned).ok()
            }
        }
    }
}

impl From<Decimal> for RawAmount {
    fn from(value: Decimal) -> Self {
        RawAmount::Number(value)
    }
}

/// A position record as supplied by the portfolio source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPosition {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub quantity: Option<RawAmount>,
    pub price: Option<RawAmount>,
    /// Total cost basis of the position
    pub cost_basis: Option<RawAmount>,
    pub acquired_date: Option<String>,
    pub account_type: Option<String>,
    pub included_in_selling: Option<bool>,
}

impl RawPosition {
    /// Convenience constructor for a fully-populated record
    pub fn new(
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        cost_basis: Decimal,
        acquired_date: NaiveDate,
    ) -> Self {
        Self {
            id: None,
            symbol: Some(symbol.to_string()),
            name: None,
            quantity: Some(quantity.into()),
            price: Some(price.into()),
            cost_basis: Some(cost_basis.into()),
            acquired_date: Some(acquired_date.format("%Y-%m-%d").to_string()),
            account_type: None,
            included_in_selling: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_account(mut self, account_type: AccountType) -> Self {
        self.account_type = Some(account_type.to_string());
        self
    }

    pub fn excluded(mut self) -> Self {
        self.included_in_selling = Some(false);
        self
    }
}

/// Where a lot came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LotOrigin {
    /// Taken directly from a portfolio record
    Position,
    /// Created by a spinoff or reinvested dividend of `parent_id`
    CorporateAction { parent_id: String, action: String },
}

/// Canonical tax lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLot {
    pub id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub quantity: Decimal,
    /// Current market price per share
    pub price: Decimal,
    /// Total cost basis, may be negative after adjustment
    pub cost_basis: Decimal,
    pub acquired_date: NaiveDate,
    pub term: HoldingPeriod,
    pub unrealized_gain: Decimal,
    pub account_type: AccountType,
    pub included_in_selling: bool,
    /// Index of the portfolio record this lot derives from
    pub source_index: usize,
    pub origin: LotOrigin,
}

impl TaxLot {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn is_loss(&self) -> bool {
        self.unrealized_gain < Decimal::ZERO
    }

    /// Cost basis attributable to selling `quantity` shares
    pub fn basis_for_quantity(&self, quantity: Decimal) -> Decimal {
        if quantity == self.quantity || self.quantity.is_zero() {
            self.cost_basis
        } else {
            match self.cost_basis.checked_mul(quantity) {
                Some(scaled) => scaled / self.quantity,
                None => self.cost_basis * (quantity / self.quantity),
            }
        }
    }

    /// Gain realized by selling `quantity` shares of this lot
    pub fn gain_for_quantity(&self, quantity: Decimal) -> Decimal {
        if quantity == self.quantity {
            self.unrealized_gain
        } else {
            quantity * self.price - self.basis_for_quantity(quantity)
        }
    }
}

/// Caller's gain targets and what is already booked this tax year
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    pub target_st: Decimal,
    pub target_lt: Decimal,
    pub realized_st: Decimal,
    pub realized_lt: Decimal,
}

impl TargetSpec {
    pub fn new(target_st: Decimal, target_lt: Decimal, realized_st: Decimal, realized_lt: Decimal) -> Self {
        Self {
            target_st,
            target_lt,
            realized_st,
            realized_lt,
        }
    }

    /// Residual targets, computed once per call.
    pub fn residuals(&self) -> ResidualTargets {
        ResidualTargets {
            short_term: self.target_st - self.realized_st,
            long_term: self.target_lt - self.realized_lt,
        }
    }
}

/// Target minus realized, per term. Never mutated after entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualTargets {
    pub short_term: Decimal,
    pub long_term: Decimal,
}

impl ResidualTargets {
    pub fn for_term(&self, term: HoldingPeriod) -> Decimal {
        match term {
            HoldingPeriod::ShortTerm => self.short_term,
            HoldingPeriod::LongTerm => self.long_term,
        }
    }
}
