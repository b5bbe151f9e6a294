//! Field Format Normalizer
//!
//! Converts an assessment payload (flat map or `{fieldId, value}` records)
//! into the canonical `fieldKey -> value` map:
//!
//! 1. keys starting with [`METADATA_PREFIX`] are dropped
//! 2. null and empty-string values are dropped
//! 3. record references are resolved against the variant catalog; entries
//!    that fail to resolve are logged and skipped, never fatal
//! 4. the result always uses canonical keys
//!
//! Flat-map keys are canonical by contract. A numeric flat key that matches a
//! catalog wire id is translated to its canonical key; other keys pass
//! through and are counted in [`NormalizeReport::passthrough`].

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::FieldCatalog;
use crate::models::{AssessmentVariant, FieldRecord, FieldRef, ResponsePayload, Responses};

/// Leading marker of internal metadata keys
pub const METADATA_PREFIX: &str = "_";

/// A field reference that could not be mapped to a canonical key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Field reference '{field_ref}' does not resolve in catalog {variant}")]
    UnresolvedField {
        field_ref: String,
        variant: AssessmentVariant,
    },
}

/// Normalized responses plus what was dropped along the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub responses: Responses,
    pub skipped_metadata: usize,
    pub skipped_empty: usize,
    /// Flat keys kept verbatim because the catalog does not know them
    pub passthrough: usize,
    pub unresolved: Vec<FormatError>,
}

/// True for values that count as "no answer" on the wire
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn is_metadata_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

/// Normalize a payload, discarding the report
pub fn normalize(payload: &ResponsePayload, catalog: &FieldCatalog) -> Responses {
    normalize_with_report(payload, catalog).responses
}

/// Normalize a payload and report skipped entries
pub fn normalize_with_report(payload: &ResponsePayload, catalog: &FieldCatalog) -> NormalizeReport {
    let report = match payload {
        ResponsePayload::Flat(map) => from_flat(map, catalog),
        ResponsePayload::Records(records) => from_records(records, catalog),
    };

    debug!(
        variant = %catalog.variant(),
        kept = report.responses.len(),
        skipped_metadata = report.skipped_metadata,
        skipped_empty = report.skipped_empty,
        passthrough = report.passthrough,
        unresolved = report.unresolved.len(),
        "Normalized response payload"
    );

    report
}

fn from_flat(map: &serde_json::Map<String, Value>, catalog: &FieldCatalog) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    for (key, value) in map {
        if is_metadata_key(key) {
            report.skipped_metadata += 1;
            continue;
        }
        if is_empty_value(value) {
            report.skipped_empty += 1;
            continue;
        }

        let canonical = if catalog.get(key).is_some() {
            key.clone()
        } else {
            let by_id = key
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|id| catalog.get_by_id(id))
                .map(|def| def.key.clone());
            match by_id {
                Some(canonical) => canonical,
                None => {
                    debug!(variant = %catalog.variant(), key = %key, "Keeping non-catalog field key");
                    report.passthrough += 1;
                    key.clone()
                }
            }
        };

        report.responses.insert(canonical, value.clone());
    }

    report
}

fn from_records(records: &[FieldRecord], catalog: &FieldCatalog) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    for record in records {
        if let FieldRef::Key(key) = &record.field_id {
            if is_metadata_key(key) {
                report.skipped_metadata += 1;
                continue;
            }
        }
        if is_empty_value(&record.value) {
            report.skipped_empty += 1;
            continue;
        }

        match catalog.resolve(&record.field_id) {
            Some(def) => {
                report.responses.insert(def.key.clone(), record.value.clone());
            }
            None => {
                let err = FormatError::UnresolvedField {
                    field_ref: record.field_id.to_string(),
                    variant: catalog.variant(),
                };
                warn!("Skipping response entry: {}", err);
                report.unresolved.push(err);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(value: Value) -> ResponsePayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_metadata_and_empty_values_dropped() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::A);
        let payload = flat(json!({"field_1": "A", "_metadata": "x", "field_2": ""}));

        let out = normalize(&payload, &catalog);

        let expected: Responses = [("field_1".to_string(), json!("A"))].into_iter().collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_empty_input_yields_empty_map() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::A);
        assert!(normalize(&flat(json!({})), &catalog).is_empty());
        assert!(normalize(&ResponsePayload::Records(vec![]), &catalog).is_empty());
    }

    #[test]
    fn test_null_dropped_but_false_and_zero_kept() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::B);
        let payload = flat(json!({
            "mfa_enforced": false,
            "penetration_test_date": null,
            "third_party_audits": 0
        }));

        let report = normalize_with_report(&payload, &catalog);
        assert_eq!(report.responses.len(), 2);
        assert_eq!(report.responses["mfa_enforced"], json!(false));
        assert_eq!(report.skipped_empty, 1);
    }

    #[test]
    fn test_records_resolved_to_canonical_keys() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::B);
        let payload = ResponsePayload::Records(vec![
            FieldRecord { field_id: FieldRef::Id(201), value: json!("yes") },
            FieldRecord { field_id: FieldRef::Key("202".into()), value: json!("quarterly") },
            FieldRecord { field_id: FieldRef::Key("mfa_enforced".into()), value: json!(true) },
        ]);

        let out = normalize(&payload, &catalog);
        assert_eq!(out["security_policy_documented"], json!("yes"));
        assert_eq!(out["access_control_reviews"], json!("quarterly"));
        assert_eq!(out["mfa_enforced"], json!(true));
    }

    #[test]
    fn test_unresolved_records_skipped_not_fatal() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::B);
        let payload = ResponsePayload::Records(vec![
            FieldRecord { field_id: FieldRef::Id(9999), value: json!("lost") },
            FieldRecord { field_id: FieldRef::Key("_meta".into()), value: json!("x") },
            FieldRecord { field_id: FieldRef::Id(205), value: json!("TLS 1.3") },
        ]);

        let report = normalize_with_report(&payload, &catalog);
        assert_eq!(report.responses.len(), 1);
        assert_eq!(report.skipped_metadata, 1);
        assert_eq!(
            report.unresolved,
            vec![FormatError::UnresolvedField {
                field_ref: "9999".to_string(),
                variant: AssessmentVariant::B,
            }]
        );
    }

    #[test]
    fn test_numeric_flat_key_translated() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::C);
        let out = normalize(&flat(json!({"301": "v2.1", "free_text": "kept"})), &catalog);
        assert_eq!(out["api_standard_version"], json!("v2.1"));
        assert_eq!(out["free_text"], json!("kept"));
        assert!(!out.contains_key("301"));
    }

    #[test]
    fn test_non_catalog_flat_keys_are_counted() {
        let catalog = FieldCatalog::builtin(AssessmentVariant::C);
        let report = normalize_with_report(
            &flat(json!({
                "301": "v2.1",
                "free_text": "kept",
                "9999": "unknown id",
                "_meta": "x"
            })),
            &catalog,
        );
        assert_eq!(report.passthrough, 2);
        assert_eq!(report.skipped_metadata, 1);
        assert_eq!(report.responses["free_text"], json!("kept"));
        assert_eq!(report.responses["9999"], json!("unknown id"));
        assert_eq!(report.responses["api_standard_version"], json!("v2.1"));
    }
}
