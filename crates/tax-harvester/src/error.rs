use crate::models::{HoldingPeriod, OptimizationLevel};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path of the offending field, e.g. `portfolio[3].quantity`
    pub field: String,
    /// Index of the portfolio record, when the field belongs to one
    pub record_index: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            record_index: None,
            message: message.into(),
        });
    }

    /// Record a violation on a field of portfolio record `index`.
    pub fn push_record(&mut self, index: usize, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: format!("portfolio[{}].{}", index, field),
            record_index: Some(index),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Fields that failed, in the order they were found
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), HarvestError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{} invalid field(s): {}", self.violations.len(), parts.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("No eligible {term} lots for a residual target of {residual}")]
    NoLotsFound { term: HoldingPeriod, residual: Decimal },

    #[error("Wash sale rule forbids selling lots: {}", lot_ids.join(", "))]
    WashSaleViolation { lot_ids: Vec<String> },

    #[error("Computation failed ({}, {lot_count} lots, {mode} mode): {reason}", bucket.map(|b| b.to_string()).unwrap_or_else(|| "engine".to_string()))]
    Computation {
        bucket: Option<HoldingPeriod>,
        lot_count: usize,
        mode: OptimizationLevel,
        reason: String,
    },
}

impl HarvestError {
    pub fn computation(
        bucket: HoldingPeriod,
        lot_count: usize,
        mode: OptimizationLevel,
        reason: impl Into<String>,
    ) -> Self {
        Self::Computation {
            bucket: Some(bucket),
            lot_count,
            mode,
            reason: reason.into(),
        }
    }
}

pub type HarvestResult<T> = Result<T, HarvestError>;
