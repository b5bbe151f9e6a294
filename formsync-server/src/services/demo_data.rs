//! Demo autofill record generation
//!
//! Every catalog field gets its `demoValue` when the catalog defines one,
//! otherwise a deterministic placeholder derived from the field key.

use formsync_common::{FieldCatalog, FieldDefinition};
use serde_json::{json, Value};

/// Replacement record set for a demo fill, in catalog order
pub fn generate(catalog: &FieldCatalog) -> Vec<(String, Value)> {
    catalog
        .fields()
        .iter()
        .map(|field| (field.key.clone(), demo_value(field)))
        .collect()
}

fn demo_value(field: &FieldDefinition) -> Value {
    if let Some(value) = &field.demo_value {
        return value.clone();
    }

    let key = field.key.as_str();
    if key.contains("date") {
        json!("2024-01-15")
    } else if key.contains("count") || key.contains("revenue") {
        json!(250)
    } else if key.contains("url") || key.contains("website") {
        json!("https://example.com")
    } else if key.contains("contact") || key.contains("email") {
        json!("compliance@example.com")
    } else if key.contains("enforced") || key.contains("documented") {
        json!("yes")
    } else {
        json!(format!("Demo {}", humanize(key)))
    }
}

fn humanize(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
