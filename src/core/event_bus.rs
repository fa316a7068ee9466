use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::types::{LambdaSource, Outcome};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SchedulerEvent {
    #[serde(rename = "item-due")]
    ItemDue(ItemDuePayload),

    #[serde(rename = "outcome-recorded")]
    OutcomeRecorded(OutcomeRecordedPayload),

    #[serde(rename = "lambda-updated")]
    LambdaUpdated(LambdaUpdatedPayload),

    #[serde(rename = "review-dismissed")]
    ReviewDismissed(ReviewDismissedPayload),
}

impl SchedulerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::ItemDue(_) => "item-due",
            SchedulerEvent::OutcomeRecorded(_) => "outcome-recorded",
            SchedulerEvent::LambdaUpdated(_) => "lambda-updated",
            SchedulerEvent::ReviewDismissed(_) => "review-dismissed",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            SchedulerEvent::ItemDue(p) => &p.user_id,
            SchedulerEvent::OutcomeRecorded(p) => &p.user_id,
            SchedulerEvent::LambdaUpdated(p) => &p.user_id,
            SchedulerEvent::ReviewDismissed(p) => &p.user_id,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            SchedulerEvent::ItemDue(p) => Some(&p.item_id),
            SchedulerEvent::OutcomeRecorded(p) => Some(&p.item_id),
            SchedulerEvent::LambdaUpdated(_) => None,
            SchedulerEvent::ReviewDismissed(p) => Some(&p.item_id),
        }
    }

    /// Events that close an outstanding due prompt for their item.
    pub fn resolves_prompt(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::OutcomeRecorded(_) | SchedulerEvent::ReviewDismissed(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDuePayload {
    pub user_id: String,
    pub item_id: String,
    pub elapsed_sec: f64,
    pub recommended_interval_sec: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecordedPayload {
    pub user_id: String,
    pub item_id: String,
    pub event_id: String,
    pub correctness: Outcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaUpdatedPayload {
    pub user_id: String,
    pub previous: f64,
    pub updated: f64,
    pub source: LambdaSource,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDismissedPayload {
    pub user_id: String,
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub event: SchedulerEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: SchedulerEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

type SubscriberId = String;

struct Subscriber {
    user_id: Option<String>,
    event_types: Option<Vec<String>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl Subscriber {
    fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(ref user_id) = self.user_id {
            if envelope.event.user_id() != user_id {
                return false;
            }
        }

        if let Some(ref event_types) = self.event_types {
            if !event_types
                .iter()
                .any(|t| t == envelope.event.event_type())
            {
                return false;
            }
        }

        true
    }
}

pub struct EventBus {
    global_sender: broadcast::Sender<EventEnvelope>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    event_count: RwLock<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global_sender,
            subscribers: RwLock::new(HashMap::new()),
            event_count: RwLock::new(0),
        }
    }

    pub async fn publish(&self, event: SchedulerEvent) {
        let envelope = EventEnvelope::new(event);
        let event_type = envelope.event.event_type();

        {
            let mut count = self.event_count.write().await;
            *count += 1;
        }

        let subscribers = self.subscribers.read().await;
        let mut sent_count = 0usize;

        for subscriber in subscribers.values() {
            if subscriber.matches(&envelope) && subscriber.sender.send(envelope.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if self.global_sender.send(envelope.clone()).is_err() {
            debug!("No global subscribers for event");
        }

        debug!(
            event_type = event_type,
            user_id = %envelope.event.user_id(),
            sent_to = sent_count,
            "Event published"
        );
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    pub async fn subscribe_filtered(
        &self,
        user_id: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> (SubscriberId, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let subscriber_id = uuid::Uuid::new_v4().to_string();

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(
                subscriber_id.clone(),
                Subscriber {
                    user_id,
                    event_types,
                    sender,
                },
            );
        }

        debug!(subscriber_id = %subscriber_id, "New filtered subscription created");

        (subscriber_id, receiver)
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(subscriber_id).is_some() {
            debug!(subscriber_id = %subscriber_id, "Subscription removed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers.len() + self.global_sender.receiver_count()
    }

    pub async fn event_count(&self) -> u64 {
        *self.event_count.read().await
    }

    pub async fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_events: self.event_count().await,
            subscriber_count: self.subscriber_count().await,
            global_subscribers: self.global_sender.receiver_count(),
            filtered_subscribers: self.subscribers.read().await.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusStats {
    pub total_events: u64,
    pub subscriber_count: usize,
    pub global_subscribers: usize,
    pub filtered_subscribers: usize,
}
