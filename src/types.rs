use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binary recall outcome of one review. Serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Outcome {
    Forgotten,
    Recalled,
}

impl Outcome {
    pub fn from_correct(is_correct: bool) -> Self {
        if is_correct {
            Self::Recalled
        } else {
            Self::Forgotten
        }
    }

    /// Observed retention target `y` used by the estimator.
    pub fn as_target(self) -> f64 {
        match self {
            Self::Forgotten => 0.0,
            Self::Recalled => 1.0,
        }
    }
}

impl From<u8> for Outcome {
    fn from(value: u8) -> Self {
        Self::from_correct(value != 0)
    }
}

impl From<Outcome> for u8 {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Forgotten => 0,
            Outcome::Recalled => 1,
        }
    }
}

/// One observed interaction between a user and an item. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub correctness: Outcome,
    pub time_since_last_review_sec: f64,
    pub n_reps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ReviewEvent {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        correctness: Outcome,
        time_since_last_review_sec: f64,
        n_reps: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            item_id: item_id.into(),
            timestamp,
            correctness,
            time_since_last_review_sec,
            n_reps,
            response_time_ms: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LambdaSource {
    /// Never updated since creation.
    Default,
    /// Written by the online estimator.
    Online,
    /// Set by an external process such as an assessment questionnaire.
    Imported,
    /// Written by accuracy recalibration.
    AutoAdjust,
}

impl LambdaSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Online => "online",
            Self::Imported => "imported",
            Self::AutoAdjust => "auto-adjust",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(Self::Default),
            "online" => Some(Self::Online),
            "imported" => Some(Self::Imported),
            "auto-adjust" => Some(Self::AutoAdjust),
            _ => None,
        }
    }
}

/// Per-user decay parameter. `version` increases on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayParameterRecord {
    pub user_id: String,
    pub lambda: f64,
    pub updated_at: DateTime<Utc>,
    pub source: LambdaSource,
    pub version: u64,
}

impl DecayParameterRecord {
    pub fn with_default(user_id: impl Into<String>, lambda: f64) -> Self {
        Self {
            user_id: user_id.into(),
            lambda,
            updated_at: Utc::now(),
            source: LambdaSource::Default,
            version: 0,
        }
    }
}

/// Freshly observed outcome fed to the online estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub t_next_sec: f64,
    pub n_next: i64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvaluation {
    pub interval_sec: u64,
    pub predicted_retention: f64,
}

/// Chosen gap plus every candidate evaluated on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub interval_sec: u64,
    pub predicted_retention: f64,
    pub candidates: Vec<CandidateEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueItem {
    pub item_id: String,
    pub last_review_at: DateTime<Utc>,
    pub elapsed_sec: f64,
    pub recommended_interval_sec: u64,
}

impl DueItem {
    /// How far past its recommended gap the item is (1.0 = exactly due).
    pub fn overdue_ratio(&self) -> f64 {
        if self.recommended_interval_sec == 0 {
            return f64::INFINITY;
        }
        self.elapsed_sec / self.recommended_interval_sec as f64
    }
}
