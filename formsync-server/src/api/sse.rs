//! GET /events: SSE change feed scoped to a task or a company

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use formsync_common::models::{CompanyId, TaskId};
use serde::Deserialize;

use crate::sse::Scope;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub task_id: Option<TaskId>,
    pub company_id: Option<CompanyId>,
}

impl EventsQuery {
    /// Task scope wins when both are given
    fn scope(&self) -> Option<Scope> {
        match (self.task_id, self.company_id) {
            (Some(task_id), _) => Some(Scope::Task(task_id)),
            (None, Some(company_id)) => Some(Scope::Company(company_id)),
            (None, None) => None,
        }
    }
}

/// GET /events?taskId=…|companyId=…
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = query
        .scope()
        .ok_or_else(|| ApiError::BadRequest("taskId or companyId is required".to_string()))?;

    Ok(state.broadcaster.handle_sse_connection(scope))
}

/// Build SSE routes
pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
