//! Decay parameter persistence.
//!
//! One [`DecayParameterRecord`] per user behind a single accessor trait. Writes
//! are either compare-and-swap on the record version (estimator updates) or
//! unconditional overwrites (external overrides); both replace the whole record.

pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::types::DecayParameterRecord;

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt record for user {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },
}

#[async_trait]
pub trait DecayParameterStore: Send + Sync {
    /// Value assigned to records created on first access.
    fn default_lambda(&self) -> f64;

    async fn get(&self, user_id: &str) -> Result<Option<DecayParameterRecord>, StoreError>;

    /// Returns the user's record, creating a `Default` one if absent.
    async fn get_or_init(&self, user_id: &str) -> Result<DecayParameterRecord, StoreError>;

    /// Writes `record` only if the stored version still equals
    /// `expected_version`. On success the stored record (version bumped) is
    /// returned; `None` means another writer got there first.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: DecayParameterRecord,
    ) -> Result<Option<DecayParameterRecord>, StoreError>;

    /// Unconditional overwrite. Returns the stored record.
    async fn put(&self, record: DecayParameterRecord) -> Result<DecayParameterRecord, StoreError>;
}

pub struct InMemoryParameterStore {
    default_lambda: f64,
    records: RwLock<HashMap<String, DecayParameterRecord>>,
}

impl InMemoryParameterStore {
    pub fn new(default_lambda: f64) -> Self {
        Self {
            default_lambda,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl DecayParameterStore for InMemoryParameterStore {
    fn default_lambda(&self) -> f64 {
        self.default_lambda
    }

    async fn get(&self, user_id: &str) -> Result<Option<DecayParameterRecord>, StoreError> {
        Ok(self.records.read().get(user_id).cloned())
    }

    async fn get_or_init(&self, user_id: &str) -> Result<DecayParameterRecord, StoreError> {
        if let Some(record) = self.records.read().get(user_id) {
            return Ok(record.clone());
        }
        let mut records = self.records.write();
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| DecayParameterRecord::with_default(user_id, self.default_lambda));
        Ok(record.clone())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: DecayParameterRecord,
    ) -> Result<Option<DecayParameterRecord>, StoreError> {
        let mut records = self.records.write();
        let Some(current) = records.get_mut(&record.user_id) else {
            return Ok(None);
        };
        if current.version != expected_version {
            return Ok(None);
        }
        record.version = expected_version + 1;
        *current = record.clone();
        Ok(Some(record))
    }

    async fn put(&self, mut record: DecayParameterRecord) -> Result<DecayParameterRecord, StoreError> {
        let mut records = self.records.write();
        record.version = records
            .get(&record.user_id)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        record.updated_at = Utc::now();
        records.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }
}
