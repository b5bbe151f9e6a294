//! Field catalogs per assessment variant
//!
//! The business question catalogs are owned elsewhere; this module provides
//! the lookup interface plus a small built-in catalog per variant. A JSON
//! catalog file can replace the built-ins at startup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::models::{AssessmentVariant, FieldRef};
use crate::{Error, Result};

/// Static definition of one assessment question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Canonical field key
    pub key: String,
    /// Numeric wire id used by record-shaped payloads
    pub id: i64,
    pub variant: AssessmentVariant,
    /// Catalog section the question belongs to
    #[serde(default)]
    pub group: String,
    pub required: bool,
    #[serde(default)]
    pub max_partial_score: u32,
    /// Value written by demo autofill
    #[serde(default)]
    pub demo_value: Option<Value>,
}

/// Read-only field catalog for one variant
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    variant: AssessmentVariant,
    fields: Vec<FieldDefinition>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<i64, usize>,
}

impl FieldCatalog {
    /// Build a catalog, rejecting duplicate keys/ids and foreign-variant fields
    pub fn new(variant: AssessmentVariant, fields: Vec<FieldDefinition>) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(fields.len());
        let mut by_id = HashMap::with_capacity(fields.len());

        for (idx, field) in fields.iter().enumerate() {
            if field.variant != variant {
                return Err(Error::Config(format!(
                    "Field '{}' belongs to variant {} but was added to catalog {}",
                    field.key, field.variant, variant
                )));
            }
            if field.key.is_empty() || field.key.starts_with(crate::normalize::METADATA_PREFIX) {
                return Err(Error::Config(format!(
                    "Invalid field key '{}' in catalog {}",
                    field.key, variant
                )));
            }
            if by_key.insert(field.key.clone(), idx).is_some() {
                return Err(Error::Config(format!(
                    "Duplicate field key '{}' in catalog {}",
                    field.key, variant
                )));
            }
            if by_id.insert(field.id, idx).is_some() {
                return Err(Error::Config(format!(
                    "Duplicate field id {} in catalog {}",
                    field.id, variant
                )));
            }
        }

        Ok(Self {
            variant,
            fields,
            by_key,
            by_id,
        })
    }

    /// Built-in catalog for a variant
    pub fn builtin(variant: AssessmentVariant) -> Self {
        let rows: &[(&str, i64, &str, bool, u32)] = match variant {
            AssessmentVariant::A => BUILTIN_A,
            AssessmentVariant::B => BUILTIN_B,
            AssessmentVariant::C => BUILTIN_C,
        };

        let fields = rows
            .iter()
            .map(|(key, id, group, required, max_partial_score)| FieldDefinition {
                key: key.to_string(),
                id: *id,
                variant,
                group: group.to_string(),
                required: *required,
                max_partial_score: *max_partial_score,
                demo_value: None,
            })
            .collect();

        // Built-in tables are unique by construction; see test_builtin_catalogs_are_valid
        Self::index_unchecked(variant, fields)
    }

    fn index_unchecked(variant: AssessmentVariant, fields: Vec<FieldDefinition>) -> Self {
        let by_key = fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.key.clone(), idx))
            .collect();
        let by_id = fields.iter().enumerate().map(|(idx, f)| (f.id, idx)).collect();
        Self {
            variant,
            fields,
            by_key,
            by_id,
        }
    }

    pub fn variant(&self) -> AssessmentVariant {
        self.variant
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldDefinition> {
        self.by_key.get(key).map(|&idx| &self.fields[idx])
    }

    pub fn get_by_id(&self, id: i64) -> Option<&FieldDefinition> {
        self.by_id.get(&id).map(|&idx| &self.fields[idx])
    }

    /// Resolve a wire field reference to its definition
    ///
    /// String references are tried as canonical keys first, then as numeric
    /// ids written as strings.
    pub fn resolve(&self, field_ref: &FieldRef) -> Option<&FieldDefinition> {
        match field_ref {
            FieldRef::Id(id) => self.get_by_id(*id),
            FieldRef::Key(key) => self
                .get(key)
                .or_else(|| key.trim().parse::<i64>().ok().and_then(|id| self.get_by_id(id))),
        }
    }

    /// Required fields, in catalog order
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Catalogs for all variants
#[derive(Debug, Clone)]
pub struct CatalogSet {
    catalogs: HashMap<AssessmentVariant, FieldCatalog>,
}

impl CatalogSet {
    /// Built-in catalogs for every variant
    pub fn builtin() -> Self {
        let catalogs = AssessmentVariant::ALL
            .iter()
            .map(|&v| (v, FieldCatalog::builtin(v)))
            .collect();
        Self { catalogs }
    }

    /// Build from a flat list of definitions (grouped by their variant)
    ///
    /// Variants with no definitions fall back to the built-in catalog.
    pub fn from_definitions(definitions: Vec<FieldDefinition>) -> Result<Self> {
        let mut grouped: HashMap<AssessmentVariant, Vec<FieldDefinition>> = HashMap::new();
        for def in definitions {
            grouped.entry(def.variant).or_default().push(def);
        }

        let mut catalogs = HashMap::new();
        for variant in AssessmentVariant::ALL {
            let catalog = match grouped.remove(&variant) {
                Some(fields) => FieldCatalog::new(variant, fields)?,
                None => FieldCatalog::builtin(variant),
            };
            catalogs.insert(variant, catalog);
        }

        Ok(Self { catalogs })
    }

    /// Load a JSON array of field definitions
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let definitions: Vec<FieldDefinition> = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse catalog {}: {}", path.display(), e))
        })?;
        tracing::info!(
            path = %path.display(),
            definitions = definitions.len(),
            "Loaded field catalog file"
        );
        Self::from_definitions(definitions)
    }

    pub fn get(&self, variant: AssessmentVariant) -> &FieldCatalog {
        // Every variant is populated by both constructors
        &self.catalogs[&variant]
    }
}

impl Default for CatalogSet {
    fn default() -> Self {
        Self::builtin()
    }
}

// (key, wire id, group, required, max partial score)
const BUILTIN_A: &[(&str, i64, &str, bool, u32)] = &[
    ("legal_entity_name", 101, "Company Profile", true, 0),
    ("registration_number", 102, "Company Profile", true, 0),
    ("incorporation_date", 103, "Company Profile", true, 0),
    ("registered_address", 104, "Company Profile", true, 0),
    ("ultimate_beneficial_owners", 105, "Ownership", true, 0),
    ("annual_revenue", 106, "Financials", true, 0),
    ("employee_count", 107, "Financials", false, 0),
    ("corporate_website", 108, "Company Profile", false, 0),
];

const BUILTIN_B: &[(&str, i64, &str, bool, u32)] = &[
    ("security_policy_documented", 201, "Governance", true, 4),
    ("access_control_reviews", 202, "Access Control", true, 4),
    ("mfa_enforced", 203, "Access Control", true, 4),
    ("encryption_at_rest", 204, "Data Protection", true, 4),
    ("encryption_in_transit", 205, "Data Protection", true, 4),
    ("incident_response_plan", 206, "Operations", true, 4),
    ("penetration_test_date", 207, "Operations", true, 2),
    ("third_party_audits", 208, "Governance", false, 2),
];

const BUILTIN_C: &[(&str, i64, &str, bool, u32)] = &[
    ("api_standard_version", 301, "Technical", true, 0),
    ("consent_management", 302, "Consent", true, 0),
    ("data_sharing_scope", 303, "Consent", true, 0),
    ("dispute_contact", 304, "Operations", true, 0),
    ("sandbox_url", 305, "Technical", false, 0),
];
