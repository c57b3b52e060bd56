//! One-pass request validation.
//!
//! Every violated field is collected before anything is computed, so a caller
//! sees the whole list at once.

use crate::config::{HarvestOptions, OPTIONS_VERSION};
use crate::corporate_actions;
use crate::error::{HarvestResult, ValidationErrors};
use crate::models::RawPosition;
use crate::normalizer;
use chrono::NaiveDate;

/// Collect every field violation in the portfolio and options
pub fn collect_violations(portfolio: &[RawPosition], options: &HarvestOptions, as_of: NaiveDate) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if options.version != OPTIONS_VERSION {
        errors.push(
            "options.version",
            format!("unsupported version {}, expected {}", options.version, OPTIONS_VERSION),
        );
    }

    normalizer::check_records(portfolio, as_of, &mut errors);

    options.tax_config.validate("tax_config", &mut errors);
    options.wash_sale_config.validate("wash_sale_config", &mut errors);
    options.similarity_table.validate("similarity_table", &mut errors);
    corporate_actions::validate_actions(&options.corporate_actions, &mut errors);

    if options.max_lots < 1 {
        errors.push("options.max_lots", "must be at least 1");
    }
    if options.account_types.is_empty() {
        errors.push("options.account_types", "at least one account type is required");
    }
    if options.long_term_days < 1 {
        errors.push("options.long_term_days", "must be at least 1");
    }

    errors
}

/// Validate a request, failing with every violation found
pub fn validate_request(portfolio: &[RawPosition], options: &HarvestOptions, as_of: NaiveDate) -> HarvestResult<()> {
    let errors = collect_violations(portfolio, options, as_of);
    if !errors.is_empty() {
        tracing::warn!(violations = errors.len(), "Harvest request rejected");
    }
    errors.into_result()
}
