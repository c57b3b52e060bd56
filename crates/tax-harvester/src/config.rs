use crate::corporate_actions::CorporateAction;
use crate::models::{AccountType, OptimizationLevel};
use crate::similarity::SimilarityTable;
use crate::tax_calculator::TaxConfig;
use crate::wash_sale::{PurchaseRecord, WashSaleConfig};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;

/// Options layout understood by this engine
pub const OPTIONS_VERSION: u32 = 1;

/// Largest bucket the exact search accepts; each half enumerates 2^20 subsets
pub const MAX_EXACT_SEARCH_LOTS: usize = 40;

/// Process-level tier thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub exact_search_max_lots: usize,     // 32
    pub thorough_max_lots: usize,         // 200
    pub balanced_max_cells: usize,        // 10,000
    pub thorough_max_cells: usize,        // 250,000
    pub default_time_budget_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exact_search_max_lots: 32,
            thorough_max_lots: 200,
            balanced_max_cells: 10_000,
            thorough_max_cells: 250_000,
            default_time_budget_ms: None,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    /// Read `TAX_HARVEST_*` overrides, falling back to the defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            exact_search_max_lots: env_or("TAX_HARVEST_EXACT_SEARCH_MAX_LOTS", defaults.exact_search_max_lots)?,
            thorough_max_lots: env_or("TAX_HARVEST_THOROUGH_MAX_LOTS", defaults.thorough_max_lots)?,
            balanced_max_cells: env_or("TAX_HARVEST_BALANCED_MAX_CELLS", defaults.balanced_max_cells)?,
            thorough_max_cells: env_or("TAX_HARVEST_THOROUGH_MAX_CELLS", defaults.thorough_max_cells)?,
            default_time_budget_ms: match env::var("TAX_HARVEST_TIME_BUDGET_MS") {
                Ok(raw) => Some(
                    raw.trim()
                        .parse()
                        .with_context(|| format!("TAX_HARVEST_TIME_BUDGET_MS must be a number, got '{}'", raw))?,
                ),
                Err(_) => None,
            },
        };

        config.check().context("Invalid tax harvester configuration")?;
        Ok(config)
    }

    /// Reject thresholds the selector cannot honor
    pub fn check(&self) -> Result<()> {
        if self.exact_search_max_lots > MAX_EXACT_SEARCH_LOTS {
            anyhow::bail!(
                "exact_search_max_lots {} exceeds {}",
                self.exact_search_max_lots,
                MAX_EXACT_SEARCH_LOTS
            );
        }
        if self.balanced_max_cells < 2 || self.thorough_max_cells < 2 {
            anyhow::bail!("DP tables need at least 2 cells");
        }
        Ok(())
    }
}

/// Per-call options. Unknown versions are rejected during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestOptions {
    pub tax_config: TaxConfig,
    pub wash_sale_config: WashSaleConfig,
    /// Account types whose lots may be sold
    pub account_types: Vec<AccountType>,
    pub excluded_lot_ids: Vec<String>,
    pub optimization_level: OptimizationLevel,
    /// Cap the candidate pool per bucket at `max_lots`
    pub performance_mode: bool,
    pub max_lots: usize,
    pub corporate_actions: Vec<CorporateAction>,
    pub validate_inputs: bool,
    pub allow_partial_lots: bool,
    pub accept_wash_sale_violations: bool,
    pub similarity_table: SimilarityTable,
    /// Recent purchases; wash-sale checks are skipped without it
    pub transaction_history: Option<Vec<PurchaseRecord>>,
    /// Sale date and classification date; today (UTC) when absent
    pub as_of: Option<NaiveDate>,
    /// Overrides the engine's default time budget
    pub time_budget_ms: Option<u64>,
    pub long_term_days: u32,
    pub version: u32,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            tax_config: TaxConfig::default(),
            wash_sale_config: WashSaleConfig::default(),
            account_types: vec![AccountType::Taxable],
            excluded_lot_ids: Vec::new(),
            optimization_level: OptimizationLevel::default(),
            performance_mode: true,
            max_lots: 500,
            corporate_actions: Vec::new(),
            validate_inputs: true,
            allow_partial_lots: false,
            accept_wash_sale_violations: false,
            similarity_table: SimilarityTable::default(),
            transaction_history: None,
            as_of: None,
            time_budget_ms: None,
            long_term_days: 365,
            version: OPTIONS_VERSION,
        }
    }
}

impl HarvestOptions {
    pub fn with_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn with_history(mut self, history: Vec<PurchaseRecord>) -> Self {
        self.transaction_history = Some(history);
        self
    }

    /// Date used for classification and as the sale date
    pub fn effective_as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| chrono::Utc::now().date_naive())
    }

    pub fn candidate_cap(&self) -> Option<usize> {
        self.performance_mode.then_some(self.max_lots)
    }
}
