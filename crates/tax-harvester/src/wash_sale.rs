//! Wash Sale Index
//!
//! Decides whether selling a lot at a loss would be disallowed because a
//! substantially identical security was bought inside the wash-sale window.
//! Enforcement is advisory: without purchase history the index reports no
//! violation instead of failing.

use crate::error::ValidationErrors;
use crate::models::TaxLot;
use crate::similarity::SimilarityTable;
use crate::tax_calculator::TaxJurisdiction;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Wash-sale window and matching rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WashSaleConfig {
    /// Days before the sale during which a purchase triggers the rule
    pub before_days: i64,
    /// Days after the sale during which a purchase triggers the rule
    pub after_days: i64,
    /// Also match near-identical securities from the similarity table
    pub strict_mode: bool,
    /// Informational only
    pub jurisdiction: String,
    /// Minimum similarity score for a strict-mode match
    pub similarity_threshold: f64,
}

impl Default for WashSaleConfig {
    fn default() -> Self {
        Self::for_jurisdiction(TaxJurisdiction::US)
    }
}

impl WashSaleConfig {
    pub fn for_jurisdiction(jurisdiction: TaxJurisdiction) -> Self {
        let (before_days, after_days) = match jurisdiction {
            TaxJurisdiction::US | TaxJurisdiction::Canada => (30, 30),
            // Bed and breakfast: repurchases within 30 days after the sale
            TaxJurisdiction::UK => (0, 30),
            TaxJurisdiction::Australia | TaxJurisdiction::Germany => (0, 0),
        };

        Self {
            before_days,
            after_days,
            strict_mode: false,
            jurisdiction: jurisdiction.code().to_string(),
            similarity_threshold: 0.9,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self
    }

    pub fn validate(&self, prefix: &str, errors: &mut ValidationErrors) {
        if self.before_days < 0 {
            errors.push(format!("{}.before_days", prefix), "must be >= 0");
        }
        if self.after_days < 0 {
            errors.push(format!("{}.after_days", prefix), "must be >= 0");
        }
        if !self.similarity_threshold.is_finite() || !(0.0..=1.0).contains(&self.similarity_threshold) {
            errors.push(format!("{}.similarity_threshold", prefix), "must be within [0, 1]");
        }
    }
}

/// Dates around a sale during which a purchase disallows the loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashSaleWindow {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl WashSaleWindow {
    pub fn around(sale_date: NaiveDate, config: &WashSaleConfig) -> Self {
        Self {
            window_start: sale_date - Duration::days(config.before_days.max(0)),
            window_end: sale_date + Duration::days(config.after_days.max(0)),
        }
    }

    /// Check if a date is within this window
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.window_start && date <= self.window_end
    }

    /// First day a repurchase no longer triggers the rule
    pub fn safe_repurchase_date(&self) -> NaiveDate {
        self.window_end + Duration::days(1)
    }
}

/// A purchase from the caller's transaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub symbol: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    /// Lot created by this purchase, if known
    #[serde(default)]
    pub lot_id: Option<String>,
}

impl PurchaseRecord {
    pub fn new(symbol: &str, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            date,
            quantity: None,
            lot_id: None,
        }
    }
}

/// Annotation for a loss sale that conflicts with a purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSaleFlag {
    pub lot_id: String,
    pub symbol: String,
    pub purchase_symbol: String,
    pub purchase_date: NaiveDate,
    pub purchase_lot_id: Option<String>,
    /// 1.0 for the same symbol
    pub similarity: f64,
    /// Loss that would be disallowed
    pub disallowed_loss: Decimal,
    pub window: WashSaleWindow,
}

/// Similarity graph plus purchase history, built once per call
pub struct WashSaleIndex {
    config: WashSaleConfig,
    graph: BTreeMap<String, BTreeMap<String, f64>>,
    /// Purchases by upper-cased symbol, sorted by date. `None` when no history was supplied.
    purchases: Option<HashMap<String, Vec<PurchaseRecord>>>,
}

impl WashSaleIndex {
    pub fn new(config: WashSaleConfig, table: &SimilarityTable, history: Option<&[PurchaseRecord]>) -> Self {
        let purchases = history.map(|records| {
            let mut by_symbol: HashMap<String, Vec<PurchaseRecord>> = HashMap::new();
            for record in records {
                by_symbol
                    .entry(record.symbol.trim().to_uppercase())
                    .or_default()
                    .push(record.clone());
            }
            by_symbol
        });

        let mut index = Self {
            config,
            graph: table.graph(),
            purchases,
        };
        index.sort_purchases();
        index
    }

    /// Treat the acquisition of every portfolio lot as a purchase.
    ///
    /// No-op when no history was supplied.
    pub fn with_portfolio_purchases<'a>(mut self, lots: impl IntoIterator<Item = &'a TaxLot>) -> Self {
        if let Some(purchases) = self.purchases.as_mut() {
            for lot in lots {
                purchases.entry(lot.symbol.to_uppercase()).or_default().push(PurchaseRecord {
                    symbol: lot.symbol.clone(),
                    date: lot.acquired_date,
                    quantity: Some(lot.quantity),
                    lot_id: Some(lot.id.clone()),
                });
            }
            self.sort_purchases();
        }
        self
    }

    fn sort_purchases(&mut self) {
        if let Some(purchases) = self.purchases.as_mut() {
            for records in purchases.values_mut() {
                records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.lot_id.cmp(&b.lot_id)));
            }
        }
    }

    pub fn config(&self) -> &WashSaleConfig {
        &self.config
    }

    pub fn has_history(&self) -> bool {
        self.purchases.is_some()
    }

    pub fn window(&self, sale_date: NaiveDate) -> WashSaleWindow {
        WashSaleWindow::around(sale_date, &self.config)
    }

    /// Symbols whose purchase conflicts with a loss sale of `symbol`, with
    /// their similarity. Strict mode only ever adds to the exact match.
    pub fn matching_symbols(&self, symbol: &str) -> Vec<(String, f64)> {
        let symbol = symbol.to_uppercase();
        let mut matches = vec![(symbol.clone(), 1.0)];

        if self.config.strict_mode {
            if let Some(neighbors) = self.graph.get(&symbol) {
                matches.extend(
                    neighbors
                        .iter()
                        .filter(|(_, score)| **score >= self.config.similarity_threshold)
                        .map(|(other, score)| (other.clone(), *score)),
                );
            }
        }

        matches
    }

    /// Earliest conflicting purchase for selling `lot` on `sale_date`, if any
    pub fn check(&self, lot: &TaxLot, sale_date: NaiveDate) -> Option<WashSaleFlag> {
        // Only loss sales are constrained
        if lot.unrealized_gain >= Decimal::ZERO {
            return None;
        }
        let purchases = self.purchases.as_ref()?;
        let window = self.window(sale_date);

        self.matching_symbols(&lot.symbol)
            .into_iter()
            .filter_map(|(symbol, similarity)| {
                purchases
                    .get(&symbol)?
                    .iter()
                    .find(|p| window.contains(p.date) && p.lot_id.as_deref() != Some(lot.id.as_str()))
                    .map(|p| (p, symbol, similarity))
            })
            .min_by(|a, b| a.0.date.cmp(&b.0.date).then_with(|| a.1.cmp(&b.1)))
            .map(|(purchase, symbol, similarity)| WashSaleFlag {
                lot_id: lot.id.clone(),
                symbol: lot.symbol.clone(),
                purchase_symbol: symbol,
                purchase_date: purchase.date,
                purchase_lot_id: purchase.lot_id.clone(),
                similarity,
                disallowed_loss: -lot.unrealized_gain,
                window,
            })
    }

    pub fn is_violation(&self, lot: &TaxLot, sale_date: NaiveDate) -> bool {
        self.check(lot, sale_date).is_some()
    }
}
