//! Response write endpoints
//!
//! Variant batch and single-field endpoints plus their variant-agnostic
//! legacy counterparts. All of them normalize, persist, recompute progress
//! and answer with `{updatedCount, progress, status, timestamp}`.

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use formsync_common::models::{
    BatchUpdateRequest, FieldRef, FieldUpdateRequest, ResponsePayload, Responses, Task, TaskId,
    UpdateResponse,
};
use formsync_common::normalize::{self, METADATA_PREFIX};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::task_for_variant;
use crate::db::{responses, tasks};
use crate::services::progress_service;
use crate::{ApiError, ApiResult, AppState};

/// `?silent=true` skips the per-write broadcast
#[derive(Debug, Default, Deserialize)]
pub struct WriteQuery {
    #[serde(default)]
    pub silent: bool,
}

/// POST /assessment/:variant/batch-update/:task_id
pub async fn batch_update(
    State(state): State<AppState>,
    Path((variant, task_id)): Path<(String, TaskId)>,
    Json(request): Json<BatchUpdateRequest>,
) -> ApiResult<Json<UpdateResponse>> {
    let task = task_for_variant(&state, &variant, task_id).await?;
    apply_batch(&state, &task, &request.responses).await.map(Json)
}

/// POST /assessment/legacy-batch-update/:task_id
///
/// Variant comes from the task row.
pub async fn legacy_batch_update(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    Json(request): Json<BatchUpdateRequest>,
) -> ApiResult<Json<UpdateResponse>> {
    let task = tasks::get_task(&state.db, task_id).await?;
    apply_batch(&state, &task, &request.responses).await.map(Json)
}

/// POST /assessment/:variant/response/:task_id/:field_key
pub async fn field_update(
    State(state): State<AppState>,
    Path((variant, task_id, field_key)): Path<(String, TaskId, String)>,
    Query(query): Query<WriteQuery>,
    Json(request): Json<FieldUpdateRequest>,
) -> ApiResult<Json<UpdateResponse>> {
    let task = task_for_variant(&state, &variant, task_id).await?;
    apply_field(&state, &task, &field_key, request.value, query.silent)
        .await
        .map(Json)
}

/// POST /assessment/legacy-response/:task_id/:field_key
pub async fn legacy_field_update(
    State(state): State<AppState>,
    Path((task_id, field_key)): Path<(TaskId, String)>,
    Query(query): Query<WriteQuery>,
    Json(request): Json<FieldUpdateRequest>,
) -> ApiResult<Json<UpdateResponse>> {
    let task = tasks::get_task(&state.db, task_id).await?;
    apply_field(&state, &task, &field_key, request.value, query.silent)
        .await
        .map(Json)
}

async fn apply_batch(
    state: &AppState,
    task: &Task,
    payload: &ResponsePayload,
) -> ApiResult<UpdateResponse> {
    let catalog = state.catalogs.get(task.variant);
    let report = normalize::normalize_with_report(payload, catalog);

    if !report.unresolved.is_empty() {
        warn!(
            task_id = task.id,
            unresolved = report.unresolved.len(),
            "Skipped unresolvable fields in batch update"
        );
    }

    let summary =
        responses::upsert_responses(&state.db, task.id, &report.responses, state.max_lock_wait_ms)
            .await?;
    let snapshot = progress_service::recompute_and_broadcast(state, task.id).await?;

    info!(
        task_id = task.id,
        received = payload.len(),
        written = summary.written,
        changed = summary.changed,
        progress = snapshot.progress,
        "Batch update applied"
    );

    Ok(UpdateResponse {
        updated_count: summary.written,
        progress: snapshot.progress,
        status: snapshot.status,
        timestamp: snapshot.timestamp,
    })
}

async fn apply_field(
    state: &AppState,
    task: &Task,
    field_key: &str,
    value: Value,
    silent: bool,
) -> ApiResult<UpdateResponse> {
    if field_key.starts_with(METADATA_PREFIX) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is a metadata key and cannot be stored",
            field_key
        )));
    }

    let catalog = state.catalogs.get(task.variant);
    let key = catalog
        .resolve(&FieldRef::Key(field_key.to_string()))
        .map(|def| def.key.clone())
        .unwrap_or_else(|| field_key.to_string());

    // An empty value clears the answer
    if normalize::is_empty_value(&value) {
        responses::clear_field(&state.db, task.id, &key, state.max_lock_wait_ms).await?;
    } else {
        let single: Responses = [(key.clone(), value)].into_iter().collect();
        responses::upsert_responses(&state.db, task.id, &single, state.max_lock_wait_ms).await?;
    }

    let snapshot = if silent {
        progress_service::recompute(state, task.id).await?.1
    } else {
        progress_service::recompute_and_broadcast(state, task.id).await?
    };

    tracing::debug!(task_id = task.id, field = %key, silent, "Field update applied");

    Ok(UpdateResponse {
        updated_count: 1,
        progress: snapshot.progress,
        status: snapshot.status,
        timestamp: snapshot.timestamp,
    })
}

/// Build response write routes
pub fn response_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/assessment/:variant/batch-update/:task_id",
            post(batch_update),
        )
        .route(
            "/assessment/legacy-batch-update/:task_id",
            post(legacy_batch_update),
        )
        .route(
            "/assessment/:variant/response/:task_id/:field_key",
            post(field_update),
        )
        .route(
            "/assessment/legacy-response/:task_id/:field_key",
            post(legacy_field_update),
        )
}
