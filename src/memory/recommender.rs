//! Interval Recommender - pick the next review gap from a candidate ladder
//!
//! For each ascending candidate gap t, predict R(λ, S, t, n_next) and choose
//! the smallest gap whose prediction reaches the target retention. When no
//! candidate reaches it, the largest candidate is returned: the ladder floor
//! is never undercut even for weak memories.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::retention::{compute_spacing_sum, retention};
use crate::store::{DecayParameterStore, StoreError};
use crate::types::{CandidateEvaluation, Recommendation, ReviewEvent};

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

pub const DEFAULT_TARGET_RETENTION: f64 = 0.9;
pub const DEFAULT_CANDIDATES_SEC: [u64; 7] =
    [HOUR, DAY, 3 * DAY, 7 * DAY, 14 * DAY, 30 * DAY, 90 * DAY];
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
/// Repetition count assumed for the upcoming review.
pub const DEFAULT_N_NEXT: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("candidate interval list is empty")]
    EmptyCandidates,
    #[error("parameter store error: {0}")]
    Store(#[from] StoreError),
}

/// Evaluate every candidate and select a gap.
///
/// An empty candidate list is a caller bug and is reported as
/// [`RecommendError::EmptyCandidates`].
pub fn recommend(
    lambda: f64,
    spacing_sum: f64,
    candidates_sec: &[u64],
    target_retention: f64,
    n_next: i64,
) -> Result<Recommendation, RecommendError> {
    let evaluations: Vec<CandidateEvaluation> = candidates_sec
        .iter()
        .map(|&interval_sec| CandidateEvaluation {
            interval_sec,
            predicted_retention: retention(lambda, spacing_sum, interval_sec as f64, n_next),
        })
        .collect();

    let chosen = evaluations
        .iter()
        .find(|c| c.predicted_retention >= target_retention)
        .or_else(|| evaluations.last())
        .copied()
        .ok_or(RecommendError::EmptyCandidates)?;

    Ok(Recommendation {
        interval_sec: chosen.interval_sec,
        predicted_retention: chosen.predicted_retention,
        candidates: evaluations,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommenderConfig {
    pub candidates_sec: Vec<u64>,
    pub target_retention: f64,
    /// Most recent events per item used for S; 0 uses the full history.
    pub history_window: usize,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            candidates_sec: DEFAULT_CANDIDATES_SEC.to_vec(),
            target_retention: DEFAULT_TARGET_RETENTION,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl RecommenderConfig {
    /// Sort and dedupe the ladder, falling back to defaults for unusable values.
    pub fn normalized(mut self) -> Self {
        self.candidates_sec.sort_unstable();
        self.candidates_sec.dedup();
        if self.candidates_sec.is_empty() {
            self.candidates_sec = DEFAULT_CANDIDATES_SEC.to_vec();
        }
        if !self.target_retention.is_finite()
            || self.target_retention <= 0.0
            || self.target_retention > 1.0
        {
            self.target_retention = DEFAULT_TARGET_RETENTION;
        }
        self
    }
}

/// Recommendation for one (user, item) pair plus the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecommendation {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub lambda: f64,
    pub spacing_sum: f64,
}

impl ItemRecommendation {
    pub fn interval_sec(&self) -> u64 {
        self.recommendation.interval_sec
    }
}

pub struct IntervalRecommender {
    config: RecommenderConfig,
    store: Arc<dyn DecayParameterStore>,
}

impl IntervalRecommender {
    pub fn new(config: RecommenderConfig, store: Arc<dyn DecayParameterStore>) -> Self {
        Self {
            config: config.normalized(),
            store,
        }
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    /// Pure evaluation against a known λ. `item_events` must be chronological.
    pub fn evaluate(
        &self,
        lambda: f64,
        item_events: &[ReviewEvent],
    ) -> Result<ItemRecommendation, RecommendError> {
        let window = self.recent_window(item_events);
        let spacing_sum = compute_spacing_sum(window);
        let recommendation = recommend(
            lambda,
            spacing_sum,
            &self.config.candidates_sec,
            self.config.target_retention,
            DEFAULT_N_NEXT,
        )?;
        Ok(ItemRecommendation {
            recommendation,
            lambda,
            spacing_sum,
        })
    }

    /// Loads the user's λ from the store, then evaluates.
    pub async fn recommend_for_item(
        &self,
        user_id: &str,
        item_events: &[ReviewEvent],
    ) -> Result<ItemRecommendation, RecommendError> {
        let record = self.store.get_or_init(user_id).await?;
        self.evaluate(record.lambda, item_events)
    }

    /// The most recent `history_window` events of a chronological slice.
    pub fn recent_window<'a>(&self, events: &'a [ReviewEvent]) -> &'a [ReviewEvent] {
        if self.config.history_window == 0 {
            return events;
        }
        let start = events.len().saturating_sub(self.config.history_window);
        &events[start..]
    }
}
