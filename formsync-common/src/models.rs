//! Domain models and wire types shared by server and client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Task identifier
pub type TaskId = i64;

/// Company identifier (opaque "current company" context)
pub type CompanyId = i64;

/// Canonical `fieldKey -> value` representation of a task's responses
pub type Responses = BTreeMap<String, Value>;

/// Assessment question-set variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentVariant {
    A,
    B,
    C,
}

impl AssessmentVariant {
    pub const ALL: [AssessmentVariant; 3] = [Self::A, Self::B, Self::C];

    /// URL path segment for this variant
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
        }
    }
}

impl fmt::Display for AssessmentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssessmentVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Self::A),
            "b" => Ok(Self::B),
            "c" => Ok(Self::C),
            other => Err(Error::InvalidInput(format!(
                "Unknown assessment variant: {}",
                other
            ))),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    ReadyForSubmission,
    Submitted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::ReadyForSubmission => "ready_for_submission",
            Self::Submitted => "submitted",
        }
    }

    /// Status implied by a freshly recomputed progress value
    ///
    /// `Submitted` is terminal: recomputation never moves a task out of it.
    pub fn derive(current: TaskStatus, progress: u8) -> TaskStatus {
        if current == TaskStatus::Submitted {
            return TaskStatus::Submitted;
        }
        match progress {
            0 => TaskStatus::NotStarted,
            p if p >= 100 => TaskStatus::ReadyForSubmission,
            _ => TaskStatus::InProgress,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "ready_for_submission" => Ok(Self::ReadyForSubmission),
            "submitted" => Ok(Self::Submitted),
            other => Err(Error::InvalidInput(format!("Unknown task status: {}", other))),
        }
    }
}

/// Assessment task owned by a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub company_id: CompanyId,
    pub variant: AssessmentVariant,
    pub status: TaskStatus,
    /// Cached completion percentage (0..=100)
    pub progress: u8,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// One stored response per field per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub task_id: TaskId,
    pub field_key: String,
    pub value: Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

// ========================================
// Wire types
// ========================================

/// Field identifier as sent on the wire: numeric id or string key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Id(i64),
    Key(String),
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Id(id) => write!(f, "{}", id),
            FieldRef::Key(key) => f.write_str(key),
        }
    }
}

/// Array-shaped payload entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    pub field_id: FieldRef,
    #[serde(default)]
    pub value: Value,
}

/// Response payload shape, decided once at the ingress boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// `{ "fieldKey": value, ... }`
    Flat(serde_json::Map<String, Value>),
    /// `[ { "fieldId": 12, "value": ... }, ... ]`
    Records(Vec<FieldRecord>),
}

impl ResponsePayload {
    pub fn len(&self) -> usize {
        match self {
            ResponsePayload::Flat(map) => map.len(),
            ResponsePayload::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Responses> for ResponsePayload {
    fn from(responses: Responses) -> Self {
        ResponsePayload::Flat(responses.into_iter().collect())
    }
}

/// Body of the batch-update endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub responses: ResponsePayload,
}

/// Body of the single-field endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldUpdateRequest {
    #[serde(default)]
    pub value: Value,
}

/// Response of every write endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub updated_count: usize,
    pub progress: u8,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

/// Response of the clear / demo-autofill endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResponse {
    pub success: bool,
    pub message: String,
    pub progress: u8,
    #[serde(default)]
    pub field_count: usize,
}

/// Authoritative progress state, used for reconnect resync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub progress: u8,
    pub status: TaskStatus,
    #[serde(default)]
    pub bulk_in_progress: bool,
    pub timestamp: DateTime<Utc>,
}

/// Progress snapshot plus the full canonical response set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsesSnapshot {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub responses: Responses,
}
