use std::time::{Duration, Instant, SystemTime};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::state::AppState;

const PROBE_USER: &str = "__health_probe__";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/info", get(info))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    service: &'static str,
    version: &'static str,
    start_time: String,
    uptime: u64,
    scanner_enabled: bool,
    active_sessions: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    history: &'static str,
    history_latency_ms: Option<u64>,
}

enum ProbeStatus {
    Connected { latency_ms: u64 },
    Timeout,
    Disconnected,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn system_time_iso(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn probe_history(state: &AppState) -> ProbeStatus {
    let history = state.service().history();
    let start = Instant::now();
    match tokio::time::timeout(PROBE_TIMEOUT, history.events_for_user(PROBE_USER)).await {
        Ok(Ok(_)) => ProbeStatus::Connected {
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(_)) => ProbeStatus::Disconnected,
        Err(_) => ProbeStatus::Timeout,
    }
}

async fn root() -> Response {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_iso(),
    })
    .into_response()
}

async fn live() -> Response {
    Json(HealthResponse {
        status: "healthy",
        timestamp: now_iso(),
    })
    .into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let workers = state.workers();
    Json(InfoResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        start_time: system_time_iso(state.started_at_system()),
        uptime: state.uptime_seconds(),
        scanner_enabled: state.config().scan.enabled && workers.is_some(),
        active_sessions: workers.map(|w| w.session_count()).unwrap_or(0),
    })
    .into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let (status, history, latency) = match probe_history(&state).await {
        ProbeStatus::Connected { latency_ms } => ("healthy", "connected", Some(latency_ms)),
        ProbeStatus::Timeout => ("degraded", "timeout", None),
        ProbeStatus::Disconnected => ("unhealthy", "disconnected", None),
    };

    let status_code = match status {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            timestamp: now_iso(),
            uptime: state.uptime_seconds(),
            history,
            history_latency_ms: latency,
        }),
    )
        .into_response()
}
