use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    EventBus, LambdaUpdatedPayload, OutcomeRecordedPayload, ReviewDismissedPayload, SchedulerEvent,
};
use crate::history::{events_from_raw, group_by_item, HistoryError, RawReviewEvent, ReviewHistory};
use crate::memory::{
    compute_spacing_sum, retention, EstimatorError, IntervalRecommender, ItemRecommendation,
    LambdaUpdate, OnlineEstimator, Recalibration, RecalibrationParams, RecommendError,
};
use crate::scanner::evaluate_due_items;
use crate::store::{DecayParameterStore, StoreError};
use crate::types::{DecayParameterRecord, DueItem, LambdaSource, Observation, Outcome, ReviewEvent};

const MAX_IMPORT_BATCH: usize = 1000;
const TIMESTAMP_FUTURE_LIMIT_SECS: i64 = 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Recommend(#[from] RecommendError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub user_id: String,
    pub item_id: String,
    pub variant_id: Option<String>,
    pub correctness: Outcome,
    pub response_time_ms: Option<u64>,
    pub n_reps: Option<i64>,
    pub time_since_last_review_sec: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReceipt {
    pub event: ReviewEvent,
    pub lambda: LambdaUpdate,
}

fn require_id(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Entry point for everything the presentation and persistence collaborators
/// ask of the scheduler.
pub struct ReviewService {
    history: Arc<dyn ReviewHistory>,
    store: Arc<dyn DecayParameterStore>,
    estimator: OnlineEstimator,
    recommender: Arc<IntervalRecommender>,
    bus: Arc<EventBus>,
}

impl ReviewService {
    pub fn new(
        history: Arc<dyn ReviewHistory>,
        store: Arc<dyn DecayParameterStore>,
        estimator: OnlineEstimator,
        recommender: Arc<IntervalRecommender>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            history,
            store,
            estimator,
            recommender,
            bus,
        }
    }

    pub fn history(&self) -> Arc<dyn ReviewHistory> {
        Arc::clone(&self.history)
    }

    pub fn recommender(&self) -> Arc<IntervalRecommender> {
        Arc::clone(&self.recommender)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Record one outcome and feed it to the online estimator.
    ///
    /// Missing `timeSinceLastReviewSec` is derived from the previous event of
    /// the same item (0 for a first review); missing `nReps` is the prior
    /// event count plus one.
    pub async fn ingest_outcome(&self, report: OutcomeReport) -> Result<OutcomeReceipt, ServiceError> {
        require_id("userId", &report.user_id)?;
        require_id("itemId", &report.item_id)?;

        let now = Utc::now();
        let timestamp = report.timestamp.unwrap_or(now);
        if timestamp > now + Duration::seconds(TIMESTAMP_FUTURE_LIMIT_SECS) {
            return Err(ServiceError::Validation(
                "timestamp is too far in the future".to_string(),
            ));
        }

        let prior = self
            .history
            .events_for_item(&report.user_id, &report.item_id)
            .await?;

        let t = report.time_since_last_review_sec.unwrap_or_else(|| {
            prior
                .last()
                .map(|last| ((timestamp - last.timestamp).num_milliseconds() as f64 / 1000.0).max(0.0))
                .unwrap_or(0.0)
        });
        let n = report.n_reps.unwrap_or(prior.len() as i64 + 1);

        let mut event = ReviewEvent::new(
            &report.user_id,
            &report.item_id,
            timestamp,
            report.correctness,
            t,
            n,
        );
        event.response_time_ms = report.response_time_ms;
        event.metadata = report
            .variant_id
            .as_ref()
            .map(|variant_id| serde_json::json!({ "variantId": variant_id }));

        self.history.append(event.clone()).await?;

        self.bus
            .publish(SchedulerEvent::OutcomeRecorded(OutcomeRecordedPayload {
                user_id: event.user_id.clone(),
                item_id: event.item_id.clone(),
                event_id: event.id.clone(),
                correctness: event.correctness,
                timestamp: event.timestamp,
            }))
            .await;

        let observed = Observation {
            t_next_sec: t,
            n_next: n,
            outcome: report.correctness,
        };
        let window = self.recommender.recent_window(&prior);
        let update = match self
            .estimator
            .update_lambda(self.store.as_ref(), &report.user_id, window, &observed)
            .await
        {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    user_id = %report.user_id,
                    item_id = %report.item_id,
                    error = %e,
                    "Lambda update failed, outcome kept"
                );
                self.unapplied_update(&report.user_id, window, &observed).await
            }
        };

        if update.applied && update.updated != update.previous {
            self.publish_lambda(&report.user_id, update.previous, update.updated, LambdaSource::Online)
                .await;
        }

        Ok(OutcomeReceipt {
            event,
            lambda: update,
        })
    }

    pub async fn recommendation(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<ItemRecommendation, ServiceError> {
        require_id("userId", user_id)?;
        require_id("itemId", item_id)?;
        let events = self.history.events_for_item(user_id, item_id).await?;
        Ok(self.recommender.recommend_for_item(user_id, &events).await?)
    }

    /// Every currently due item, most overdue first. Does not touch scanner state.
    pub async fn due_items(&self, user_id: &str) -> Result<Vec<DueItem>, ServiceError> {
        require_id("userId", user_id)?;
        let events = self.history.events_for_user(user_id).await?;
        let by_item = group_by_item(events);
        let mut due =
            evaluate_due_items(&self.recommender, user_id, &by_item, Utc::now(), false).await;
        due.sort_by(|a, b| b.overdue_ratio().total_cmp(&a.overdue_ratio()));
        Ok(due)
    }

    pub async fn dismiss(&self, user_id: &str, item_id: &str) -> Result<(), ServiceError> {
        require_id("userId", user_id)?;
        require_id("itemId", item_id)?;
        self.bus
            .publish(SchedulerEvent::ReviewDismissed(ReviewDismissedPayload {
                user_id: user_id.to_string(),
                item_id: item_id.to_string(),
                timestamp: Utc::now(),
            }))
            .await;
        Ok(())
    }

    pub async fn events(&self, user_id: &str) -> Result<Vec<ReviewEvent>, ServiceError> {
        require_id("userId", user_id)?;
        Ok(self.history.events_for_user(user_id).await?)
    }

    /// Append history delivered by a collaborator in its raw shape. The path
    /// user wins over any `userId` inside the payload.
    pub async fn import_events(
        &self,
        user_id: &str,
        raw: Vec<RawReviewEvent>,
    ) -> Result<usize, ServiceError> {
        require_id("userId", user_id)?;
        if raw.len() > MAX_IMPORT_BATCH {
            return Err(ServiceError::Validation(format!(
                "events array exceeds maximum size of {MAX_IMPORT_BATCH}"
            )));
        }

        let mut imported = 0usize;
        for mut event in events_from_raw(raw) {
            if event.item_id.trim().is_empty() {
                warn!(user_id = %user_id, "Imported event without itemId, skipping");
                continue;
            }
            event.user_id = user_id.to_string();
            self.history.append(event).await?;
            imported += 1;
        }

        info!(user_id = %user_id, imported = imported, "Review events imported");
        Ok(imported)
    }

    pub async fn lambda(&self, user_id: &str) -> Result<DecayParameterRecord, ServiceError> {
        require_id("userId", user_id)?;
        Ok(self.store.get_or_init(user_id).await?)
    }

    /// External override, clamped to the estimator bounds.
    pub async fn import_lambda(
        &self,
        user_id: &str,
        lambda: f64,
        source: Option<LambdaSource>,
    ) -> Result<DecayParameterRecord, ServiceError> {
        require_id("userId", user_id)?;
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(ServiceError::Validation(
                "lambda must be a positive finite number".to_string(),
            ));
        }

        let previous = self.store.get_or_init(user_id).await?;
        let record = DecayParameterRecord {
            lambda: self.estimator.config().clamp(lambda),
            source: source.unwrap_or(LambdaSource::Imported),
            ..previous.clone()
        };
        let stored = self.store.put(record).await?;

        info!(
            user_id = %user_id,
            previous = previous.lambda,
            updated = stored.lambda,
            source = stored.source.as_str(),
            "Lambda overridden"
        );
        self.publish_lambda(user_id, previous.lambda, stored.lambda, stored.source)
            .await;
        Ok(stored)
    }

    pub async fn recalibrate(
        &self,
        user_id: &str,
        params: RecalibrationParams,
    ) -> Result<Recalibration, ServiceError> {
        require_id("userId", user_id)?;
        let events = self.history.events_for_user(user_id).await?;
        let outcome = match self
            .estimator
            .recalibrate(self.store.as_ref(), user_id, &events, &params)
            .await
        {
            Ok(outcome) => outcome,
            Err(EstimatorError::NoEvents) => {
                return Err(ServiceError::Validation(
                    "no review events to recalibrate from".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        if outcome.updated != outcome.previous {
            self.publish_lambda(user_id, outcome.previous, outcome.updated, LambdaSource::AutoAdjust)
                .await;
        }
        Ok(outcome)
    }

    /// Receipt for an outcome whose λ write did not go through: the last
    /// readable λ, unchanged.
    async fn unapplied_update(
        &self,
        user_id: &str,
        prior_events: &[ReviewEvent],
        observed: &Observation,
    ) -> LambdaUpdate {
        let lambda = match self.store.get(user_id).await {
            Ok(Some(record)) => record.lambda,
            _ => self.store.default_lambda(),
        };
        LambdaUpdate {
            previous: lambda,
            updated: lambda,
            predicted_before: retention(
                lambda,
                compute_spacing_sum(prior_events),
                observed.t_next_sec,
                observed.n_next,
            ),
            applied: false,
        }
    }

    async fn publish_lambda(&self, user_id: &str, previous: f64, updated: f64, source: LambdaSource) {
        self.bus
            .publish(SchedulerEvent::LambdaUpdated(LambdaUpdatedPayload {
                user_id: user_id.to_string(),
                previous,
                updated,
                source,
                timestamp: Utc::now(),
            }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::memory::{EstimatorConfig, RecommenderConfig};
    use crate::store::InMemoryParameterStore;
    use async_trait::async_trait;

    /// Reads work, every λ write fails.
    struct ReadOnlyStore {
        inner: InMemoryParameterStore,
    }

    #[async_trait]
    impl DecayParameterStore for ReadOnlyStore {
        fn default_lambda(&self) -> f64 {
            self.inner.default_lambda()
        }

        async fn get(&self, user_id: &str) -> Result<Option<DecayParameterRecord>, StoreError> {
            self.inner.get(user_id).await
        }

        async fn get_or_init(&self, user_id: &str) -> Result<DecayParameterRecord, StoreError> {
            self.inner.get_or_init(user_id).await
        }

        async fn compare_and_swap(
            &self,
            _expected_version: u64,
            _record: DecayParameterRecord,
        ) -> Result<Option<DecayParameterRecord>, StoreError> {
            Err(StoreError::Unavailable("read-only replica".into()))
        }

        async fn put(&self, _record: DecayParameterRecord) -> Result<DecayParameterRecord, StoreError> {
            Err(StoreError::Unavailable("read-only replica".into()))
        }
    }

    fn service(default_lambda: f64) -> ReviewService {
        let store: Arc<dyn DecayParameterStore> = Arc::new(InMemoryParameterStore::new(default_lambda));
        let recommender = Arc::new(IntervalRecommender::new(
            RecommenderConfig::default(),
            Arc::clone(&store),
        ));
        ReviewService::new(
            Arc::new(InMemoryHistory::new()),
            store,
            OnlineEstimator::new(EstimatorConfig {
                default_lambda,
                ..Default::default()
            }),
            recommender,
            Arc::new(EventBus::new()),
        )
    }

    fn report(item: &str, correct: bool) -> OutcomeReport {
        OutcomeReport {
            user_id: "u1".into(),
            item_id: item.into(),
            variant_id: None,
            correctness: Outcome::from_correct(correct),
            response_time_ms: Some(1500),
            n_reps: None,
            time_since_last_review_sec: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_first_outcome_defaults() {
        let svc = service(0.15);
        let receipt = svc.ingest_outcome(report("w1", true)).await.unwrap();
        assert_eq!(receipt.event.n_reps, 1);
        assert_eq!(receipt.event.time_since_last_review_sec, 0.0);
        assert_eq!(receipt.event.response_time_ms, Some(1500));
        assert_eq!(svc.events("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_outcome_derives_spacing() {
        let svc = service(0.15);
        let mut first = report("w1", true);
        first.timestamp = Some(Utc::now() - Duration::hours(2));
        svc.ingest_outcome(first).await.unwrap();

        let receipt = svc.ingest_outcome(report("w1", false)).await.unwrap();
        assert_eq!(receipt.event.n_reps, 2);
        let t = receipt.event.time_since_last_review_sec;
        assert!((7199.0..7300.0).contains(&t), "derived t = {t}");
    }

    #[tokio::test]
    async fn test_variant_is_kept_as_metadata() {
        let svc = service(0.15);
        let mut r = report("w1", true);
        r.variant_id = Some("v7".into());
        let receipt = svc.ingest_outcome(r).await.unwrap();
        assert_eq!(
            receipt.event.metadata,
            Some(serde_json::json!({ "variantId": "v7" }))
        );
    }

    #[tokio::test]
    async fn test_blank_ids_are_rejected() {
        let svc = service(0.15);
        let mut r = report("w1", true);
        r.user_id = "  ".into();
        assert!(matches!(
            svc.ingest_outcome(r).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_future_timestamp_rejected() {
        let svc = service(0.15);
        let mut r = report("w1", true);
        r.timestamp = Some(Utc::now() + Duration::days(1));
        assert!(matches!(
            svc.ingest_outcome(r).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_import_lambda_clamps_and_rejects_nan() {
        let svc = service(0.15);
        let stored = svc.import_lambda("u1", 50.0, None).await.unwrap();
        assert_eq!(stored.lambda, 1.0);
        assert_eq!(stored.source, LambdaSource::Imported);

        assert!(matches!(
            svc.import_lambda("u1", f64::NAN, None).await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(svc.lambda("u1").await.unwrap().lambda, 1.0);
    }

    #[tokio::test]
    async fn test_recalibrate_without_events_is_validation_error() {
        let svc = service(0.15);
        assert!(matches!(
            svc.recalibrate("u1", RecalibrationParams::default()).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_recalibrate_poor_accuracy_raises_lambda() {
        let svc = service(0.15);
        for item in ["w1", "w2", "w3"] {
            svc.ingest_outcome(report(item, false)).await.unwrap();
        }
        let before = svc.lambda("u1").await.unwrap().lambda;
        let outcome = svc
            .recalibrate("u1", RecalibrationParams::default())
            .await
            .unwrap();
        assert_eq!(outcome.events_used, 3);
        assert_eq!(outcome.avg_correctness, 0.0);
        assert!(outcome.updated > before);
        assert_eq!(
            svc.lambda("u1").await.unwrap().source,
            LambdaSource::AutoAdjust
        );
    }

    #[tokio::test]
    async fn test_due_items_lists_every_overdue_item() {
        let svc = service(1e-6);
        for (item, hours) in [("w1", 2), ("w2", 5), ("w3", 0)] {
            let mut r = report(item, true);
            r.timestamp = Some(Utc::now() - Duration::hours(hours));
            svc.ingest_outcome(r).await.unwrap();
        }
        let due = svc.due_items("u1").await.unwrap();
        let ids: Vec<&str> = due.iter().map(|d| d.item_id.as_str()).collect();
        assert_eq!(ids, vec!["w2", "w1"]);
    }

    #[tokio::test]
    async fn test_import_events_uses_path_user() {
        let svc = service(0.15);
        let raw: Vec<RawReviewEvent> = serde_json::from_value(serde_json::json!([
            {"userId": "someone-else", "itemId": "w1", "createdAt": "2024-03-01T10:00:00Z", "correct": true},
            {"userId": "u1", "itemId": "w2"}
        ]))
        .unwrap();
        let imported = svc.import_events("u1", raw).await.unwrap();
        assert_eq!(imported, 1);
        let events = svc.events("u1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_failed_lambda_write_keeps_outcome() {
        let store: Arc<dyn DecayParameterStore> = Arc::new(ReadOnlyStore {
            inner: InMemoryParameterStore::new(0.15),
        });
        let recommender = Arc::new(IntervalRecommender::new(
            RecommenderConfig::default(),
            Arc::clone(&store),
        ));
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe_global();
        let svc = ReviewService::new(
            Arc::new(InMemoryHistory::new()),
            store,
            OnlineEstimator::new(EstimatorConfig::default()),
            recommender,
            Arc::clone(&bus),
        );

        let receipt = svc.ingest_outcome(report("w1", false)).await.unwrap();
        assert!(!receipt.lambda.applied);
        assert_eq!(receipt.lambda.previous, 0.15);
        assert_eq!(receipt.lambda.updated, 0.15);
        assert_eq!(svc.events("u1").await.unwrap().len(), 1);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.event_type(), "outcome-recorded");
        assert_eq!(envelope.event.item_id(), Some("w1"));
        assert!(rx.try_recv().is_err());
    }
}
