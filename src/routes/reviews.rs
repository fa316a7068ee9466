use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::history::RawReviewEvent;
use crate::response::{ok, AppError};
use crate::service::OutcomeReport;
use crate::state::AppState;
use crate::types::{CandidateEvaluation, DueItem};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/outcomes", post(record_outcome))
        .route(
            "/:userId/items/:itemId/recommendation",
            get(get_recommendation),
        )
        .route("/:userId/items/:itemId/dismiss", post(dismiss_item))
        .route("/:userId/due", get(list_due))
        .route("/:userId/events", get(list_events))
        .route("/:userId/events/import", post(import_events))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationDto {
    recommended_interval_sec: u64,
    predicted_retention: f64,
    lambda: f64,
    spacing_sum: f64,
    candidates: Vec<CandidateEvaluation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DueListDto {
    count: usize,
    items: Vec<DueItem>,
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    events: Vec<RawReviewEvent>,
}

async fn record_outcome(
    State(state): State<AppState>,
    Json(report): Json<OutcomeReport>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.service().ingest_outcome(report).await?;
    Ok((StatusCode::CREATED, ok(receipt)))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let rec = state.service().recommendation(&user_id, &item_id).await?;
    Ok(ok(RecommendationDto {
        recommended_interval_sec: rec.recommendation.interval_sec,
        predicted_retention: rec.recommendation.predicted_retention,
        lambda: rec.lambda,
        spacing_sum: rec.spacing_sum,
        candidates: rec.recommendation.candidates,
    }))
}

async fn dismiss_item(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.service().dismiss(&user_id, &item_id).await?;
    Ok(ok(serde_json::json!({ "itemId": item_id, "dismissed": true })))
}

async fn list_due(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let items = state.service().due_items(&user_id).await?;
    Ok(ok(DueListDto {
        count: items.len(),
        items,
    }))
}

async fn list_events(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.service().events(&user_id).await?;
    Ok(ok(events))
}

async fn import_events(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<ImportBody>,
) -> Result<impl IntoResponse, AppError> {
    let imported = state.service().import_events(&user_id, body.events).await?;
    Ok((
        StatusCode::CREATED,
        ok(serde_json::json!({ "imported": imported })),
    ))
}
