//! Progress snapshot endpoints (the pull side of resync)

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use formsync_common::models::{ProgressSnapshot, ResponsesSnapshot, TaskId};

use super::task_for_variant;
use crate::db::{responses, tasks};
use crate::services::progress_service;
use crate::{ApiError, ApiResult, AppState};

/// GET /assessment/progress/:task_id
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let task = tasks::get_task(&state.db, task_id).await?;
    Ok(Json(progress_service::snapshot(&state, &task)))
}

/// POST /assessment/progress/:task_id/recalculate
pub async fn recalculate(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let snapshot = progress_service::recompute_and_broadcast(&state, task_id).await?;
    Ok(Json(snapshot))
}

/// GET /assessment/:variant/responses/:task_id
///
/// Task row and responses are read in one transaction so the snapshot is
/// consistent with the returned map.
pub async fn get_responses(
    State(state): State<AppState>,
    Path((variant, task_id)): Path<(String, TaskId)>,
) -> ApiResult<Json<ResponsesSnapshot>> {
    task_for_variant(&state, &variant, task_id).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::from)?;
    let task = tasks::get_task(&mut *tx, task_id).await?;
    let current = responses::load_responses(&mut *tx, task_id).await?;
    tx.commit().await.map_err(ApiError::from)?;

    Ok(Json(ResponsesSnapshot {
        snapshot: progress_service::snapshot(&state, &task),
        responses: current,
    }))
}

/// Build progress routes
pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/assessment/progress/:task_id", get(get_progress))
        .route(
            "/assessment/progress/:task_id/recalculate",
            post(recalculate),
        )
        .route("/assessment/:variant/responses/:task_id", get(get_responses))
}
