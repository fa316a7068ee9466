//! Online Estimator - per-user λ updated one observed outcome at a time
//!
//! Single gradient-descent step on L = (R - y)^2:
//!   dR/dλ = -(S + t/n) × R
//!   dL/dλ = -2 × (R - y) × (S + t/n) × R
//!   λ' = clamp(λ - lr × dL/dλ, λ_min, λ_max)
//!
//! S is measured in seconds, so the learning rate is tiny (1e-7 by default).
//! A non-finite step leaves λ untouched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::memory::retention::{compute_spacing_sum, exposure, retention, SpacingTerm};
use crate::store::{DecayParameterStore, StoreError};
use crate::types::{DecayParameterRecord, LambdaSource, Observation, ReviewEvent};

pub const DEFAULT_LAMBDA: f64 = 0.15;
pub const DEFAULT_LAMBDA_MIN: f64 = 1e-6;
pub const DEFAULT_LAMBDA_MAX: f64 = 1.0;
pub const DEFAULT_LEARNING_RATE: f64 = 1e-7;
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: usize = 8;

pub const RECALIBRATION_LEARNING_RATE: f64 = 0.2;
pub const RECALIBRATION_WINDOW: usize = 50;
pub const RECALIBRATION_TARGET_ACCURACY: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorConfig {
    pub learning_rate: f64,
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub default_lambda: f64,
    pub max_update_attempts: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            lambda_min: DEFAULT_LAMBDA_MIN,
            lambda_max: DEFAULT_LAMBDA_MAX,
            default_lambda: DEFAULT_LAMBDA,
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
    }
}

impl EstimatorConfig {
    pub fn normalized(mut self) -> Self {
        if !self.lambda_min.is_finite() || self.lambda_min <= 0.0 {
            self.lambda_min = DEFAULT_LAMBDA_MIN;
        }
        if !self.lambda_max.is_finite() || self.lambda_max <= 0.0 {
            self.lambda_max = DEFAULT_LAMBDA_MAX;
        }
        if self.lambda_min > self.lambda_max {
            std::mem::swap(&mut self.lambda_min, &mut self.lambda_max);
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            self.learning_rate = DEFAULT_LEARNING_RATE;
        }
        if !self.default_lambda.is_finite() {
            self.default_lambda = DEFAULT_LAMBDA;
        }
        self.default_lambda = self.clamp(self.default_lambda);
        self.max_update_attempts = self.max_update_attempts.max(1);
        self
    }

    pub fn clamp(&self, lambda: f64) -> f64 {
        lambda.clamp(self.lambda_min, self.lambda_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaUpdate {
    pub previous: f64,
    pub updated: f64,
    pub predicted_before: f64,
    /// False when the step was discarded as non-finite.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recalibration {
    pub previous: f64,
    pub updated: f64,
    pub avg_correctness: f64,
    pub events_used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecalibrationParams {
    pub learning_rate: f64,
    pub window: usize,
    pub target_accuracy: f64,
}

impl Default for RecalibrationParams {
    fn default() -> Self {
        Self {
            learning_rate: RECALIBRATION_LEARNING_RATE,
            window: RECALIBRATION_WINDOW,
            target_accuracy: RECALIBRATION_TARGET_ACCURACY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error("parameter store error: {0}")]
    Store(#[from] StoreError),
    #[error("concurrent updates for user {user_id}: gave up after {attempts} attempts")]
    Contention { user_id: String, attempts: usize },
    #[error("no review events to recalibrate from")]
    NoEvents,
}

/// One gradient step from `lambda` given the spacing sum of prior events.
pub fn gradient_step(
    lambda: f64,
    spacing_sum: f64,
    observed: &Observation,
    config: &EstimatorConfig,
) -> LambdaUpdate {
    let r = retention(lambda, spacing_sum, observed.t_next_sec, observed.n_next);
    let y = observed.outcome.as_target();
    let x = exposure(spacing_sum, observed.t_next_sec, observed.n_next);
    let grad = -2.0 * (r - y) * x * r;
    let candidate = lambda - config.learning_rate * grad;

    if !candidate.is_finite() {
        return LambdaUpdate {
            previous: lambda,
            updated: lambda,
            predicted_before: r,
            applied: false,
        };
    }

    LambdaUpdate {
        previous: lambda,
        updated: config.clamp(candidate),
        predicted_before: r,
        applied: true,
    }
}

/// Multiplicative correction toward a target accuracy:
/// λ' = clamp(λ × e^(lr × (target - avg))).
pub fn accuracy_adjustment(
    lambda: f64,
    avg_correctness: f64,
    params: &RecalibrationParams,
    config: &EstimatorConfig,
) -> Option<f64> {
    let factor = (params.learning_rate * (params.target_accuracy - avg_correctness)).exp();
    let adjusted = lambda * factor;
    adjusted.is_finite().then(|| config.clamp(adjusted))
}

pub struct OnlineEstimator {
    config: EstimatorConfig,
}

impl OnlineEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn step<T: SpacingTerm>(
        &self,
        lambda: f64,
        prior_events: &[T],
        observed: &Observation,
    ) -> LambdaUpdate {
        gradient_step(lambda, compute_spacing_sum(prior_events), observed, &self.config)
    }

    /// Incorporate one observed outcome into the user's stored λ.
    ///
    /// Read-modify-write with compare-and-swap; a lost race re-reads and
    /// recomputes from the fresher value.
    pub async fn update_lambda(
        &self,
        store: &dyn DecayParameterStore,
        user_id: &str,
        prior_events: &[ReviewEvent],
        observed: &Observation,
    ) -> Result<LambdaUpdate, EstimatorError> {
        let spacing_sum = compute_spacing_sum(prior_events);

        for attempt in 1..=self.config.max_update_attempts {
            let record = store.get_or_init(user_id).await?;
            let update = gradient_step(record.lambda, spacing_sum, observed, &self.config);

            if !update.applied {
                warn!(
                    user_id = %user_id,
                    lambda = record.lambda,
                    spacing_sum = spacing_sum,
                    "Non-finite lambda step discarded"
                );
                return Ok(update);
            }

            let next = DecayParameterRecord {
                lambda: update.updated,
                updated_at: Utc::now(),
                source: LambdaSource::Online,
                ..record.clone()
            };
            if store.compare_and_swap(record.version, next).await?.is_some() {
                debug!(
                    user_id = %user_id,
                    previous = update.previous,
                    updated = update.updated,
                    predicted = update.predicted_before,
                    "Lambda updated"
                );
                return Ok(update);
            }
            debug!(user_id = %user_id, attempt = attempt, "Lambda write lost a race, retrying");
        }

        Err(EstimatorError::Contention {
            user_id: user_id.to_string(),
            attempts: self.config.max_update_attempts,
        })
    }

    /// Recalibrate λ from the accuracy over the user's most recent events.
    pub async fn recalibrate(
        &self,
        store: &dyn DecayParameterStore,
        user_id: &str,
        events: &[ReviewEvent],
        params: &RecalibrationParams,
    ) -> Result<Recalibration, EstimatorError> {
        let window = if params.window == 0 {
            RECALIBRATION_WINDOW
        } else {
            params.window
        };
        let recent = &events[events.len().saturating_sub(window)..];
        if recent.is_empty() {
            return Err(EstimatorError::NoEvents);
        }
        let avg_correctness = recent
            .iter()
            .map(|e| e.correctness.as_target())
            .sum::<f64>()
            / recent.len() as f64;

        for _ in 0..self.config.max_update_attempts {
            let record = store.get_or_init(user_id).await?;
            let Some(updated) =
                accuracy_adjustment(record.lambda, avg_correctness, params, &self.config)
            else {
                warn!(user_id = %user_id, "Non-finite recalibration discarded");
                return Ok(Recalibration {
                    previous: record.lambda,
                    updated: record.lambda,
                    avg_correctness,
                    events_used: recent.len(),
                });
            };

            let next = DecayParameterRecord {
                lambda: updated,
                updated_at: Utc::now(),
                source: LambdaSource::AutoAdjust,
                ..record.clone()
            };
            if store.compare_and_swap(record.version, next).await?.is_some() {
                return Ok(Recalibration {
                    previous: record.lambda,
                    updated,
                    avg_correctness,
                    events_used: recent.len(),
                });
            }
        }

        Err(EstimatorError::Contention {
            user_id: user_id.to_string(),
            attempts: self.config.max_update_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryParameterStore;
    use crate::types::Outcome;
    use chrono::Utc;

    fn observed(t: f64, outcome: Outcome) -> Observation {
        Observation {
            t_next_sec: t,
            n_next: 1,
            outcome,
        }
    }

    #[test]
    fn test_forgotten_with_high_prediction_raises_lambda() {
        let config = EstimatorConfig::default();
        let update = gradient_step(1e-6, 0.0, &observed(3600.0, Outcome::Forgotten), &config);
        assert!(update.predicted_before > 0.99);
        assert!(update.applied);
        assert!(update.updated > update.previous);
    }

    #[test]
    fn test_recalled_with_low_prediction_lowers_lambda() {
        let config = EstimatorConfig {
            learning_rate: 1e-9,
            ..Default::default()
        };
        let update = gradient_step(1e-4, 0.0, &observed(12000.0, Outcome::Recalled), &config);
        assert!(update.predicted_before < 0.5);
        assert!(update.updated < update.previous);
        assert!(update.updated >= config.lambda_min);
    }

    #[test]
    fn test_step_is_clamped_to_bounds() {
        let config = EstimatorConfig::default();
        let update = gradient_step(1e-4, 0.0, &observed(12000.0, Outcome::Recalled), &config);
        assert_eq!(update.updated, config.lambda_min);

        let config = EstimatorConfig {
            learning_rate: 1.0,
            ..Default::default()
        };
        let update = gradient_step(1e-6, 0.0, &observed(3600.0, Outcome::Forgotten), &config);
        assert_eq!(update.updated, config.lambda_max);
    }

    #[test]
    fn test_non_finite_step_keeps_lambda() {
        let config = EstimatorConfig {
            learning_rate: f64::INFINITY,
            ..Default::default()
        };
        // bypass normalization to force an infinite step
        let update = gradient_step(0.5, 0.0, &observed(1.0, Outcome::Forgotten), &config);
        assert!(!update.applied);
        assert_eq!(update.updated, 0.5);
    }

    #[test]
    fn test_config_normalization() {
        let config = EstimatorConfig {
            lambda_min: 2.0,
            lambda_max: 0.5,
            default_lambda: 10.0,
            learning_rate: -1.0,
            max_update_attempts: 0,
        }
        .normalized();
        assert_eq!(config.lambda_min, 0.5);
        assert_eq!(config.lambda_max, 2.0);
        assert_eq!(config.default_lambda, 2.0);
        assert_eq!(config.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(config.max_update_attempts, 1);
    }

    #[test]
    fn test_accuracy_adjustment_direction() {
        let config = EstimatorConfig::default();
        let params = RecalibrationParams::default();
        let poor = accuracy_adjustment(0.15, 0.2, &params, &config).unwrap();
        let strong = accuracy_adjustment(0.15, 1.0, &params, &config).unwrap();
        assert!(poor > 0.15);
        assert!(strong < 0.15);
    }

    #[tokio::test]
    async fn test_update_lambda_persists_online_record() {
        let store = InMemoryParameterStore::new(DEFAULT_LAMBDA);
        let estimator = OnlineEstimator::new(EstimatorConfig {
            learning_rate: 1e-3,
            ..Default::default()
        });
        let update = estimator
            .update_lambda(&store, "u1", &[], &observed(1.0, Outcome::Forgotten))
            .await
            .unwrap();
        assert!(update.updated > update.previous);

        let record = store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.source, LambdaSource::Online);
        assert_eq!(record.lambda, update.updated);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_recalibrate_requires_events() {
        let store = InMemoryParameterStore::new(DEFAULT_LAMBDA);
        let estimator = OnlineEstimator::new(EstimatorConfig::default());
        let err = estimator
            .recalibrate(&store, "u1", &[], &RecalibrationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EstimatorError::NoEvents));
    }

    #[tokio::test]
    async fn test_zero_window_falls_back_to_default() {
        let store = InMemoryParameterStore::new(DEFAULT_LAMBDA);
        let estimator = OnlineEstimator::new(EstimatorConfig::default());
        let now = Utc::now();
        let events: Vec<ReviewEvent> = (0..RECALIBRATION_WINDOW + 10)
            .map(|i| {
                let outcome = Outcome::from_correct(i >= 10);
                ReviewEvent::new("u1", format!("w{i}"), now, outcome, 0.0, 1)
            })
            .collect();

        let outcome = estimator
            .recalibrate(
                &store,
                "u1",
                &events,
                &RecalibrationParams {
                    window: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.events_used, RECALIBRATION_WINDOW);
        assert_eq!(outcome.avg_correctness, 1.0);
        assert!(outcome.updated < outcome.previous);
    }
}
