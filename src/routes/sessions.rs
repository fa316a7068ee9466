use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use crate::response::{ok, AppError};
use crate::state::AppState;
use crate::workers::{WorkerError, WorkerManager};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_sessions)).route(
        "/:userId",
        post(start_session).get(get_session).delete(stop_session),
    )
}

fn workers(state: &AppState) -> Result<Arc<WorkerManager>, AppError> {
    state.workers().ok_or_else(|| WorkerError::Disabled.into())
}

async fn list_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let workers = workers(&state)?;
    Ok(ok(workers.snapshots()))
}

async fn start_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::validation("userId is required"));
    }
    let session = workers(&state)?.start_session(&user_id).await?;
    Ok((StatusCode::CREATED, ok(session.snapshot())))
}

async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = workers(&state)?
        .session(&user_id)
        .ok_or_else(|| AppError::not_found(format!("no scan session for {user_id}")))?;
    Ok(ok(session.snapshot()))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stopped = workers(&state)?.stop_session(&user_id).await?;
    Ok(ok(serde_json::json!({ "userId": user_id, "stopped": stopped })))
}
