//! Tax Calculator
//!
//! Flat-rate tax estimates for the recommendation summary. Rates never feed
//! back into lot selection.

use crate::error::ValidationErrors;
use crate::models::HoldingPeriod;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported tax jurisdictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaxJurisdiction {
    /// United States - wash sale (30 days), short/long term (1 year)
    #[default]
    US,
    /// United Kingdom - bed and breakfast rule (30 days after)
    UK,
    /// Canada - superficial loss (30 days before/after)
    Canada,
    /// Australia - CGT discount (12 months)
    Australia,
    /// Germany - flat tax, no wash sale equivalent
    Germany,
}

impl std::fmt::Display for TaxJurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaxJurisdiction::US => write!(f, "United States"),
            TaxJurisdiction::UK => write!(f, "United Kingdom"),
            TaxJurisdiction::Canada => write!(f, "Canada"),
            TaxJurisdiction::Australia => write!(f, "Australia"),
            TaxJurisdiction::Germany => write!(f, "Germany"),
        }
    }
}

impl TaxJurisdiction {
    /// Short code used in configuration files
    pub fn code(&self) -> &'static str {
        match self {
            TaxJurisdiction::US => "US",
            TaxJurisdiction::UK => "UK",
            TaxJurisdiction::Canada => "CA",
            TaxJurisdiction::Australia => "AU",
            TaxJurisdiction::Germany => "DE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "US" | "USA" => Some(TaxJurisdiction::US),
            "UK" | "GB" => Some(TaxJurisdiction::UK),
            "CA" | "CANADA" => Some(TaxJurisdiction::Canada),
            "AU" | "AUSTRALIA" => Some(TaxJurisdiction::Australia),
            "DE" | "GERMANY" => Some(TaxJurisdiction::Germany),
            _ => None,
        }
    }
}

/// Flat rates used to estimate tax on realized gains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxConfig {
    pub short_term_rate: Decimal,
    pub long_term_rate: Decimal,
    pub state_rate: Decimal,
    /// Net investment income tax; zero when it does not apply
    pub net_investment_income_rate: Decimal,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self::for_jurisdiction(TaxJurisdiction::US)
    }
}

/// `mantissa` × 10^-`scale`
fn rate(mantissa: i64, scale: u32) -> Decimal {
    Decimal::new(mantissa, scale)
}

impl TaxConfig {
    pub fn new(short_term_rate: Decimal, long_term_rate: Decimal, state_rate: Decimal, niit_rate: Decimal) -> Self {
        Self {
            short_term_rate,
            long_term_rate,
            state_rate,
            net_investment_income_rate: niit_rate,
        }
    }

    /// Top-bracket federal rates per jurisdiction, no state tax
    pub fn for_jurisdiction(jurisdiction: TaxJurisdiction) -> Self {
        match jurisdiction {
            TaxJurisdiction::US => Self::new(rate(37, 2), rate(20, 2), Decimal::ZERO, rate(38, 3)),
            TaxJurisdiction::UK => Self::new(rate(20, 2), rate(20, 2), Decimal::ZERO, Decimal::ZERO),
            // 50% inclusion rate
            TaxJurisdiction::Canada => Self::new(rate(25, 2), rate(25, 2), Decimal::ZERO, Decimal::ZERO),
            // 50% CGT discount after 12 months
            TaxJurisdiction::Australia => Self::new(rate(45, 2), rate(225, 3), Decimal::ZERO, Decimal::ZERO),
            // 25% + solidarity surcharge
            TaxJurisdiction::Germany => Self::new(rate(26375, 5), rate(26375, 5), Decimal::ZERO, Decimal::ZERO),
        }
    }

    /// Federal + state + NIIT rate applied to gains of `term`
    pub fn combined_rate(&self, term: HoldingPeriod) -> Decimal {
        let federal = match term {
            HoldingPeriod::ShortTerm => self.short_term_rate,
            HoldingPeriod::LongTerm => self.long_term_rate,
        };
        federal + self.state_rate + self.net_investment_income_rate
    }

    /// Estimated tax on a gain; negative for a loss (tax saved)
    pub fn estimate(&self, gain: Decimal, term: HoldingPeriod) -> Decimal {
        (gain * self.combined_rate(term)).round_dp(2)
    }

    pub fn validate(&self, prefix: &str, errors: &mut ValidationErrors) {
        let rates = [
            ("short_term_rate", self.short_term_rate),
            ("long_term_rate", self.long_term_rate),
            ("state_rate", self.state_rate),
            ("net_investment_income_rate", self.net_investment_income_rate),
        ];
        for (name, value) in rates {
            if value < Decimal::ZERO || value > Decimal::ONE {
                errors.push(format!("{}.{}", prefix, name), format!("{} is outside [0, 1]", value));
            }
        }
    }
}

/// Tax impact of a set of realized gains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxImpact {
    pub short_term_gain: Decimal,
    pub long_term_gain: Decimal,
    pub short_term_tax: Decimal,
    pub long_term_tax: Decimal,
    /// Net estimate, negative when losses save tax
    pub estimated_tax: Decimal,
    pub tax_owed: Decimal,
    pub tax_saved: Decimal,
}

/// Estimates tax for realized gains under a [`TaxConfig`]
pub struct TaxCalculator {
    config: TaxConfig,
}

impl TaxCalculator {
    pub fn new(config: TaxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TaxConfig {
        &self.config
    }

    pub fn estimate(&self, gain: Decimal, term: HoldingPeriod) -> Decimal {
        self.config.estimate(gain, term)
    }

    /// Aggregate impact of per-term gain totals
    pub fn impact(&self, short_term_gain: Decimal, long_term_gain: Decimal) -> TaxImpact {
        let short_term_tax = self.estimate(short_term_gain, HoldingPeriod::ShortTerm);
        let long_term_tax = self.estimate(long_term_gain, HoldingPeriod::LongTerm);
        let estimated_tax = short_term_tax + long_term_tax;

        TaxImpact {
            short_term_gain,
            long_term_gain,
            short_term_tax,
            long_term_tax,
            estimated_tax,
            tax_owed: estimated_tax.max(Decimal::ZERO),
            tax_saved: (-estimated_tax).max(Decimal::ZERO),
        }
    }
}
