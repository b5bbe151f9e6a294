//! Progress Calculator
//!
//! `progress = round(100 * filled_required / total_required)`, clamped to
//! `0..=100`. A catalog without required fields is complete by definition.
//! Pure: no I/O, no clock, no randomness.

use serde_json::Value;

use crate::catalog::FieldCatalog;
use crate::models::Responses;

/// True when a stored value counts as an answer
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Filled/total counts behind a progress value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBreakdown {
    pub filled_required: usize,
    pub total_required: usize,
}

impl ProgressBreakdown {
    pub fn percent(&self) -> u8 {
        if self.total_required == 0 {
            return 100;
        }
        let ratio = self.filled_required as f64 / self.total_required as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Count required catalog fields with a filled response
pub fn breakdown(responses: &Responses, catalog: &FieldCatalog) -> ProgressBreakdown {
    let mut total_required = 0;
    let mut filled_required = 0;

    for field in catalog.required_fields() {
        total_required += 1;
        if responses.get(&field.key).is_some_and(is_filled) {
            filled_required += 1;
        }
    }

    ProgressBreakdown {
        filled_required,
        total_required,
    }
}

/// Completion percentage for a response set
pub fn calculate(responses: &Responses, catalog: &FieldCatalog) -> u8 {
    breakdown(responses, catalog).percent()
}
