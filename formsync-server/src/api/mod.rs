//! HTTP API handlers for formsync-server

pub mod bulk;
pub mod health;
pub mod progress;
pub mod responses;
pub mod sse;

pub use bulk::bulk_routes;
pub use health::health_routes;
pub use progress::progress_routes;
pub use responses::response_routes;
pub use sse::sse_routes;

use formsync_common::models::{AssessmentVariant, Task, TaskId};

use crate::db::tasks;
use crate::{ApiError, ApiResult, AppState};

/// Load a task addressed through a variant-specific path
///
/// Unknown variant segments and variant mismatches are 400; unknown tasks 404.
pub(crate) async fn task_for_variant(
    state: &AppState,
    variant: &str,
    task_id: TaskId,
) -> ApiResult<Task> {
    let variant: AssessmentVariant = variant.parse()?;
    let task = tasks::get_task(&state.db, task_id).await?;

    if task.variant != variant {
        return Err(ApiError::BadRequest(format!(
            "Task {} is an assessment {} task, not {}",
            task_id, task.variant, variant
        )));
    }

    Ok(task)
}
