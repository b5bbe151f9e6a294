//! Bulk clear and demo autofill endpoints

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use formsync_common::models::{BulkOperationResponse, TaskId};

use super::task_for_variant;
use crate::services::{bulk_populator, demo_data, BulkMode};
use crate::{ApiResult, AppState};

/// POST /assessment/:variant/clear/:task_id
pub async fn clear_responses(
    State(state): State<AppState>,
    Path((variant, task_id)): Path<(String, TaskId)>,
) -> ApiResult<Json<BulkOperationResponse>> {
    let task = task_for_variant(&state, &variant, task_id).await?;
    let outcome = bulk_populator::run(&state, &task, BulkMode::Clear).await?;

    Ok(Json(BulkOperationResponse {
        success: true,
        message: format!("Cleared {} responses", outcome.removed),
        progress: outcome.snapshot.progress,
        field_count: 0,
    }))
}

/// POST /assessment/:variant/demo-autofill/:task_id
pub async fn demo_autofill(
    State(state): State<AppState>,
    Path((variant, task_id)): Path<(String, TaskId)>,
) -> ApiResult<Json<BulkOperationResponse>> {
    let task = task_for_variant(&state, &variant, task_id).await?;
    let records = demo_data::generate(state.catalogs.get(task.variant));
    let outcome = bulk_populator::run(&state, &task, BulkMode::Populate(records)).await?;

    Ok(Json(BulkOperationResponse {
        success: true,
        message: format!("Populated {} demo responses", outcome.inserted),
        progress: outcome.snapshot.progress,
        field_count: outcome.inserted,
    }))
}

/// Build bulk operation routes
pub fn bulk_routes() -> Router<AppState> {
    Router::new()
        .route("/assessment/:variant/clear/:task_id", post(clear_responses))
        .route(
            "/assessment/:variant/demo-autofill/:task_id",
            post(demo_autofill),
        )
}
