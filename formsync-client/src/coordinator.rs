//! Batch Update Coordinator
//!
//! Normalizes an edit payload and walks the [`FallbackChain`] until a stage
//! persists at least one field. Stage failures are logged and absorbed; the
//! caller only sees [`ClientError::TotalFailure`] when nothing was stored.

use chrono::{DateTime, Utc};
use formsync_common::models::{AssessmentVariant, ResponsePayload, Responses, TaskId, TaskStatus};
use formsync_common::{normalize, FieldCatalog};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{FallbackChain, Stage, StageKind};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::transport::AssessmentTransport;

/// Result of a successful persist
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Fields the server accepted
    pub updated_count: usize,
    /// Stage that succeeded
    pub stage: StageKind,
    /// Fields handed to the chain after normalization
    pub attempted: usize,
    pub progress: Option<u8>,
    pub status: Option<TaskStatus>,
    /// Server timestamp of the progress figures
    pub timestamp: Option<DateTime<Utc>>,
    /// Keys the per-field stage could not write; empty for batch stages
    pub failed: Vec<String>,
}

impl BatchOutcome {
    fn skipped() -> Self {
        Self {
            updated_count: 0,
            stage: StageKind::Skipped,
            attempted: 0,
            progress: None,
            status: None,
            timestamp: None,
            failed: Vec::new(),
        }
    }
}

pub struct BatchCoordinator {
    transport: Arc<dyn AssessmentTransport>,
    chain: FallbackChain,
}

impl BatchCoordinator {
    pub fn new(transport: Arc<dyn AssessmentTransport>, chain: FallbackChain) -> Self {
        Self { transport, chain }
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    /// Normalize `payload` against `catalog` and persist it
    pub async fn persist(
        &self,
        task_id: TaskId,
        payload: &ResponsePayload,
        catalog: &FieldCatalog,
    ) -> ClientResult<BatchOutcome> {
        let responses = normalize::normalize(payload, catalog);
        self.persist_normalized(catalog.variant(), task_id, &responses)
            .await
    }

    /// Persist an already canonical response map
    pub async fn persist_normalized(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        responses: &Responses,
    ) -> ClientResult<BatchOutcome> {
        if responses.is_empty() {
            debug!(task_id, "Nothing to persist");
            return Ok(BatchOutcome::skipped());
        }

        let attempted = responses.len();
        for stage in self.chain.stages() {
            let result = match stage {
                Stage::VariantBatch => self
                    .transport
                    .variant_batch(variant, task_id, responses)
                    .await,
                Stage::LegacyBatch => self
                    .transport
                    .legacy_batch(task_id, responses)
                    .await,
                Stage::PerField {
                    group_size,
                    group_delay,
                } => {
                    let entries: Vec<(&str, &Value)> =
                        responses.iter().map(|(k, v)| (k.as_str(), v)).collect();
                    match self
                        .per_field(variant, task_id, &entries, *group_size, *group_delay)
                        .await
                    {
                        Some(outcome) => return Ok(BatchOutcome { attempted, ..outcome }),
                        None => continue,
                    }
                }
            };

            match result {
                Ok(response) => {
                    info!(
                        task_id,
                        stage = ?stage.kind(),
                        updated = response.updated_count,
                        progress = response.progress,
                        "Responses persisted"
                    );
                    return Ok(BatchOutcome {
                        updated_count: response.updated_count,
                        stage: stage.kind(),
                        attempted,
                        progress: Some(response.progress),
                        status: Some(response.status),
                        timestamp: Some(response.timestamp),
                        failed: Vec::new(),
                    });
                }
                Err(e) => {
                    warn!(task_id, stage = ?stage.kind(), "Persist stage failed: {}", e);
                }
            }
        }

        warn!(task_id, attempted, "Every persist stage failed");
        Err(ClientError::TotalFailure { task_id, attempted })
    }

    /// Clear individual answers through the single-field endpoints
    pub async fn clear_fields(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        keys: &[String],
    ) -> ClientResult<BatchOutcome> {
        if keys.is_empty() {
            return Ok(BatchOutcome::skipped());
        }

        let (group_size, group_delay) = self
            .chain
            .stages()
            .iter()
            .find_map(|stage| match stage {
                Stage::PerField {
                    group_size,
                    group_delay,
                } => Some((*group_size, *group_delay)),
                _ => None,
            })
            .unwrap_or((1, Duration::ZERO));

        let null = Value::Null;
        let entries: Vec<(&str, &Value)> = keys.iter().map(|k| (k.as_str(), &null)).collect();

        match self
            .per_field(variant, task_id, &entries, group_size, group_delay)
            .await
        {
            Some(outcome) => Ok(BatchOutcome {
                attempted: keys.len(),
                ..outcome
            }),
            None => Err(ClientError::TotalFailure {
                task_id,
                attempted: keys.len(),
            }),
        }
    }

    /// One field: variant endpoint, then the legacy endpoint
    async fn write_field(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        key: &str,
        value: &Value,
    ) -> Result<(), TransportError> {
        match self
            .transport
            .variant_field(variant, task_id, key, value, true)
            .await
        {
            Ok(_) => Ok(()),
            Err(primary) => {
                debug!(task_id, field = key, "Variant field write failed: {}", primary);
                self.transport
                    .legacy_field(task_id, key, value, true)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Returns `None` when no field was persisted
    async fn per_field(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        entries: &[(&str, &Value)],
        group_size: usize,
        group_delay: Duration,
    ) -> Option<BatchOutcome> {
        let mut updated = 0usize;
        let mut failed = Vec::new();
        let group_count = entries.chunks(group_size.max(1)).len();

        for (index, group) in entries.chunks(group_size.max(1)).enumerate() {
            let results = join_all(
                group
                    .iter()
                    .map(|(key, value)| self.write_field(variant, task_id, key, value)),
            )
            .await;

            for ((key, _), result) in group.iter().zip(&results) {
                match result {
                    Ok(()) => updated += 1,
                    Err(e) => {
                        warn!(task_id, field = *key, "Field write failed: {}", e);
                        failed.push(key.to_string());
                    }
                }
            }

            if index + 1 < group_count && !group_delay.is_zero() {
                tokio::time::sleep(group_delay).await;
            }
        }

        if updated == 0 {
            return None;
        }

        // Per-field writes are silent; one recalculation announces the change
        let snapshot = match self.transport.recalculate(task_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(task_id, "Progress recalculation failed: {}", e);
                None
            }
        };

        info!(
            task_id,
            updated,
            attempted = entries.len(),
            "Responses persisted field by field"
        );

        Some(BatchOutcome {
            updated_count: updated,
            stage: StageKind::PerField,
            attempted: entries.len(),
            progress: snapshot.as_ref().map(|s| s.progress),
            status: snapshot.as_ref().map(|s| s.status),
            timestamp: snapshot.map(|s| s.timestamp),
            failed,
        })
    }
}
