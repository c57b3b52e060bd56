//! Tax Harvester
//!
//! Recommends which tax lots to sell so realized short-term and long-term
//! gains approach caller-supplied targets. Handles account eligibility,
//! wash-sale windows and corporate-action-adjusted cost basis.

pub mod assembler;
pub mod config;
pub mod corporate_actions;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod selector;
pub mod similarity;
pub mod tax_calculator;
pub mod validation;
pub mod wash_sale;


pub use assembler::{HarvestReport, HarvestSummary, Recommendation};
pub use config::{EngineConfig, HarvestOptions, OPTIONS_VERSION};
pub use corporate_actions::{CorporateAction, CorporateActionKind};
pub use eligibility::{ExcludedLot, ExclusionReason};
pub use engine::{run_tax_harvesting, HarvestRequest, TaxHarvester};
pub use error::{FieldViolation, HarvestError, HarvestResult, ValidationErrors};
pub use models::{AccountType, HoldingPeriod, OptimizationLevel, RawAmount, RawPosition, TargetSpec, TaxLot};
pub use selector::{BucketSelection, SelectedLot};
pub use similarity::SimilarityTable;
pub use tax_calculator::{TaxCalculator, TaxConfig, TaxImpact, TaxJurisdiction};
pub use wash_sale::{PurchaseRecord, WashSaleConfig, WashSaleFlag};
