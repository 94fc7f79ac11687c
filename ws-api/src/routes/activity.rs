use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{debug, warn};
use ws_activity::{WorkspaceActivity, WorkspaceStatus};

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/v1/activity/{workspace_id}",
        get(get_activity).put(notify_activity),
    )
}

/// Activity ping. Only running workspaces get their expiration pushed out.
///
/// The caller is never told about a failed status lookup; the ping is dropped.
async fn notify_activity(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> ApiResult<StatusCode> {
    validate_id(&workspace_id)?;

    let status = match state.runtimes.status_of(&workspace_id).await {
        Ok(status) => status,
        Err(e) => {
            warn!(workspace_id = %workspace_id, "Dropping activity ping, status lookup failed: {}", e);
            return Ok(StatusCode::NO_CONTENT);
        }
    };
    if status == WorkspaceStatus::Running {
        state
            .tracker
            .update(&workspace_id, state.clock.now_millis())
            .await?;
    } else {
        debug!(workspace_id = %workspace_id, %status, "Ignoring activity on a workspace that is not running");
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn get_activity(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> ApiResult<Json<WorkspaceActivity>> {
    validate_id(&workspace_id)?;

    state
        .store()
        .find_activity(&workspace_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("No activity recorded for workspace '{}'", workspace_id))
        })
}

fn validate_id(workspace_id: &str) -> ApiResult<()> {
    if workspace_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Workspace id must not be empty".to_string()));
    }
    Ok(())
}
