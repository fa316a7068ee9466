use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

use crate::core::EventBus;
use crate::response::{ok, AppError};
use crate::state::AppState;

const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    event_types: Option<String>,
}

#[derive(Debug, Serialize)]
struct RealtimeEventDto<'a> {
    r#type: &'a str,
    payload: serde_json::Value,
}

/// Drops the bus subscription when the SSE stream goes away.
struct SubscriptionGuard {
    bus: Arc<EventBus>,
    subscriber_id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let bus = Arc::clone(&self.bus);
        let id = std::mem::take(&mut self.subscriber_id);
        tokio::spawn(async move {
            bus.unsubscribe(&id).await;
        });
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/:userId/stream", get(user_stream))
        .route("/stats", get(get_stats))
}

fn allowed_event_types() -> HashSet<&'static str> {
    ["item-due", "outcome-recorded", "lambda-updated", "review-dismissed"]
        .into_iter()
        .collect()
}

fn parse_event_types(raw: Option<&str>) -> Option<Vec<String>> {
    let allowed = allowed_event_types();
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|v| allowed.contains(v))
            .map(str::to_string)
            .collect()
    })
}

fn ping_event() -> Event {
    let payload = serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339() });
    let data = serde_json::to_string(&RealtimeEventDto {
        r#type: "ping",
        payload,
    })
    .unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(uuid::Uuid::new_v4().to_string())
        .event("ping")
        .data(data)
}

async fn user_stream(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::validation("userId is required"));
    }

    let bus = state.service().bus();
    let event_types = parse_event_types(query.event_types.as_deref());
    let (subscriber_id, receiver) = bus.subscribe_filtered(Some(user_id), event_types).await;
    let guard = SubscriptionGuard {
        bus: Arc::clone(&bus),
        subscriber_id,
    };

    let events = BroadcastStream::new(receiver).filter_map(move |msg| {
        let _guard = &guard;
        let event = match msg {
            Ok(envelope) => {
                let payload = serde_json::to_value(&envelope.event)
                    .ok()
                    .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
                    .unwrap_or(serde_json::Value::Null);
                let data = serde_json::to_string(&RealtimeEventDto {
                    r#type: envelope.event.event_type(),
                    payload,
                })
                .unwrap_or_else(|_| "{}".to_string());
                Some(Ok::<Event, Infallible>(
                    Event::default()
                        .id(envelope.id)
                        .event(envelope.event.event_type())
                        .data(data),
                ))
            }
            Err(_) => None,
        };
        async move { event }
    });

    let initial = stream::once(async { Ok::<Event, Infallible>(ping_event()) });
    let pings = IntervalStream::new(tokio::time::interval(std::time::Duration::from_secs(
        PING_INTERVAL_SECS,
    )))
    .map(|_| Ok::<Event, Infallible>(ping_event()));

    Ok(Sse::new(initial.chain(stream::select(events, pings))))
}

async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.service().bus().stats().await))
}
