use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::types::{Outcome, ReviewEvent};

/// Review event as delivered by collaborators, with every field alias they
/// are known to emit. Converted to the canonical [`ReviewEvent`] at the boundary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawReviewEvent {
    pub id: Option<String>,
    pub user_id: String,
    pub item_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub correctness: Option<serde_json::Value>,
    pub correct: Option<serde_json::Value>,
    pub time_since_last_review_sec: Option<f64>,
    pub time_since_last_review: Option<f64>,
    pub time_since_last: Option<f64>,
    pub n_reps: Option<i64>,
    pub n_repetition: Option<i64>,
    pub response_time_ms: Option<u64>,
    pub metadata: Option<serde_json::Value>,
}

fn truthy(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

impl RawReviewEvent {
    /// `None` when the event carries no usable timestamp.
    pub fn into_event(self) -> Option<ReviewEvent> {
        let timestamp = self.timestamp.or(self.created_at)?;
        let correctness = self
            .correctness
            .as_ref()
            .and_then(truthy)
            .or_else(|| self.correct.as_ref().and_then(truthy))
            .map(Outcome::from_correct)
            .unwrap_or(Outcome::Forgotten);
        let time_since_last_review_sec = self
            .time_since_last_review_sec
            .or(self.time_since_last_review)
            .or(self.time_since_last)
            .unwrap_or(0.0);
        let n_reps = self.n_reps.or(self.n_repetition).unwrap_or(1);

        Some(ReviewEvent {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: self.user_id,
            item_id: self.item_id,
            timestamp,
            correctness,
            time_since_last_review_sec,
            n_reps,
            response_time_ms: self.response_time_ms,
            metadata: self.metadata,
        })
    }
}

/// Convert a batch of raw events, skipping those without a timestamp.
pub fn events_from_raw(raw: Vec<RawReviewEvent>) -> Vec<ReviewEvent> {
    raw.into_iter()
        .filter_map(|r| {
            let item_id = r.item_id.clone();
            let converted = r.into_event();
            if converted.is_none() {
                warn!(item_id = %item_id, "Review event without timestamp, skipping");
            }
            converted
        })
        .collect()
}
