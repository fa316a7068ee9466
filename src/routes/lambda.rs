use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::memory::RecalibrationParams;
use crate::response::{ok, AppError};
use crate::state::AppState;
use crate::types::LambdaSource;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:userId", get(get_lambda).put(override_lambda))
        .route("/:userId/recalibrate", post(recalibrate))
}

#[derive(Debug, Deserialize)]
struct OverrideBody {
    lambda: f64,
    source: Option<LambdaSource>,
}

async fn get_lambda(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.service().lambda(&user_id).await?))
}

async fn override_lambda(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .service()
        .import_lambda(&user_id, body.lambda, body.source)
        .await?;
    Ok(ok(record))
}

async fn recalibrate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Option<Json<RecalibrationParams>>,
) -> Result<impl IntoResponse, AppError> {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    if !params.learning_rate.is_finite() || !params.target_accuracy.is_finite() {
        return Err(AppError::validation("recalibration parameters must be finite"));
    }
    let outcome = state.service().recalibrate(&user_id, params).await?;
    Ok(ok(outcome))
}
