//! Review history: the event log shared with the persistence collaborator.

mod raw;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::ReviewEvent;

pub use raw::{events_from_raw, RawReviewEvent};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history source unavailable: {0}")]
    Unavailable(String),
    #[error("sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait ReviewHistory: Send + Sync {
    /// All events of a user in chronological order.
    async fn events_for_user(&self, user_id: &str) -> Result<Vec<ReviewEvent>, HistoryError>;

    /// Events of one (user, item) pair in chronological order.
    async fn events_for_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Vec<ReviewEvent>, HistoryError> {
        let mut events = self.events_for_user(user_id).await?;
        events.retain(|e| e.item_id == item_id);
        Ok(events)
    }

    async fn append(&self, event: ReviewEvent) -> Result<(), HistoryError>;
}

/// Group events by item id. Items come out in ascending id order and each
/// item's events are sorted by timestamp (ties keep insertion order).
pub fn group_by_item(events: Vec<ReviewEvent>) -> BTreeMap<String, Vec<ReviewEvent>> {
    let mut by_item: BTreeMap<String, Vec<ReviewEvent>> = BTreeMap::new();
    for event in events {
        by_item.entry(event.item_id.clone()).or_default().push(event);
    }
    for events in by_item.values_mut() {
        events.sort_by_key(|e| e.timestamp);
    }
    by_item
}

#[derive(Default)]
pub struct InMemoryHistory {
    events: RwLock<HashMap<String, Vec<ReviewEvent>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_events(&self) -> usize {
        self.events.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ReviewHistory for InMemoryHistory {
    async fn events_for_user(&self, user_id: &str) -> Result<Vec<ReviewEvent>, HistoryError> {
        let mut events = self
            .events
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn append(&self, event: ReviewEvent) -> Result<(), HistoryError> {
        self.events
            .write()
            .entry(event.user_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use chrono::{Duration, Utc};

    fn event(item: &str, minutes_ago: i64) -> ReviewEvent {
        ReviewEvent::new(
            "u1",
            item,
            Utc::now() - Duration::minutes(minutes_ago),
            Outcome::Recalled,
            0.0,
            1,
        )
    }

    #[test]
    fn test_group_by_item_orders_items_and_events() {
        let grouped = group_by_item(vec![event("b", 1), event("a", 5), event("b", 10)]);
        let keys: Vec<&String> = grouped.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        let b = &grouped["b"];
        assert!(b[0].timestamp < b[1].timestamp);
    }

    #[tokio::test]
    async fn test_in_memory_history_filters_by_user_and_item() {
        let history = InMemoryHistory::new();
        history.append(event("w1", 3)).await.unwrap();
        history.append(event("w2", 2)).await.unwrap();
        history.append(event("w1", 1)).await.unwrap();
        let mut other = event("w1", 1);
        other.user_id = "u2".into();
        history.append(other).await.unwrap();

        assert_eq!(history.total_events(), 4);
        assert_eq!(history.events_for_user("u1").await.unwrap().len(), 3);
        let w1 = history.events_for_item("u1", "w1").await.unwrap();
        assert_eq!(w1.len(), 2);
        assert!(w1[0].timestamp <= w1[1].timestamp);
        assert!(history.events_for_user("nobody").await.unwrap().is_empty());
    }
}
