//! Memory layer - forgetting curve, λ estimation and interval selection
//!
//! Contains:
//! - Retention Model - R = exp(-λ(S + t/n)) over the spacing sum S
//! - Online Estimator - per-user λ gradient step and accuracy recalibration
//! - Interval Recommender - smallest candidate gap meeting a target retention

pub mod estimator;
pub mod recommender;
pub mod retention;

pub use estimator::{
    accuracy_adjustment, gradient_step, EstimatorConfig, EstimatorError, LambdaUpdate,
    OnlineEstimator, Recalibration, RecalibrationParams,
};
pub use recommender::{
    recommend, IntervalRecommender, ItemRecommendation, RecommendError, RecommenderConfig,
};
pub use retention::{compute_spacing_sum, exposure, retention, SpacingTerm};
