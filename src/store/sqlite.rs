use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::history::{HistoryError, ReviewHistory};
use crate::store::{DecayParameterStore, StoreError};
use crate::types::{DecayParameterRecord, LambdaSource, Outcome, ReviewEvent};

const SCHEMA_STATEMENTS: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS "decay_parameter" (
        "userId" TEXT PRIMARY KEY NOT NULL,
        "lambda" REAL NOT NULL,
        "updatedAt" TEXT NOT NULL,
        "source" TEXT NOT NULL,
        "version" INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "review_event" (
        "id" TEXT PRIMARY KEY NOT NULL,
        "userId" TEXT NOT NULL,
        "itemId" TEXT NOT NULL,
        "timestamp" TEXT NOT NULL,
        "correctness" INTEGER NOT NULL,
        "timeSinceLastReviewSec" REAL NOT NULL DEFAULT 0,
        "nReps" INTEGER NOT NULL DEFAULT 1,
        "responseTimeMs" INTEGER,
        "metadata" TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS "idx_review_event_user_item"
        ON "review_event" ("userId", "itemId")
    "#,
];

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("review-scheduler")
        .join("scheduler.db")
}

/// SQLite-backed parameter store and review history sharing one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    default_lambda: f64,
}

impl SqliteStore {
    pub async fn open(path: &Path, default_lambda: f64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "SQLite store opened");
        Self::with_pool(pool, default_lambda).await
    }

    pub async fn connect(url: &str, default_lambda: f64) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(url = %url, "SQLite store connected");
        Self::with_pool(pool, default_lambda).await
    }

    /// Private in-process database; a single connection keeps every query on
    /// the same memory instance.
    pub async fn in_memory(default_lambda: f64) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, default_lambda).await
    }

    pub async fn with_pool(pool: SqlitePool, default_lambda: f64) -> Result<Self, StoreError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self {
            pool,
            default_lambda,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_record(row: &SqliteRow) -> Result<DecayParameterRecord, StoreError> {
        let user_id: String = row.try_get("userId")?;
        let raw_source: String = row.try_get("source")?;
        let source = LambdaSource::parse(&raw_source).ok_or_else(|| StoreError::Corrupt {
            user_id: user_id.clone(),
            reason: format!("unknown source '{raw_source}'"),
        })?;
        let version: i64 = row.try_get("version")?;
        Ok(DecayParameterRecord {
            lambda: row.try_get("lambda")?,
            updated_at: row.try_get("updatedAt")?,
            source,
            version: version.max(0) as u64,
            user_id,
        })
    }

    fn row_to_event(row: &SqliteRow) -> Option<ReviewEvent> {
        let id: Result<String, _> = row.try_get("id");
        let user_id: Result<String, _> = row.try_get("userId");
        let item_id: Result<String, _> = row.try_get("itemId");
        let timestamp: Result<DateTime<Utc>, _> = row.try_get("timestamp");

        match (id, user_id, item_id, timestamp) {
            (Ok(id), Ok(user_id), Ok(item_id), Ok(timestamp)) => Some(ReviewEvent {
                id,
                user_id,
                item_id,
                timestamp,
                correctness: Outcome::from_correct(
                    row.try_get::<i64, _>("correctness").unwrap_or(0) != 0,
                ),
                time_since_last_review_sec: row
                    .try_get::<Option<f64>, _>("timeSinceLastReviewSec")
                    .ok()
                    .flatten()
                    .unwrap_or(0.0),
                n_reps: row
                    .try_get::<Option<i64>, _>("nReps")
                    .ok()
                    .flatten()
                    .unwrap_or(1),
                response_time_ms: row
                    .try_get::<Option<i64>, _>("responseTimeMs")
                    .ok()
                    .flatten()
                    .map(|v| v.max(0) as u64),
                metadata: row
                    .try_get::<Option<String>, _>("metadata")
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str(&raw).ok()),
            }),
            _ => {
                warn!("Failed to parse review event row, skipping");
                None
            }
        }
    }

    async fn fetch_events(
        &self,
        user_id: &str,
        item_id: Option<&str>,
    ) -> Result<Vec<ReviewEvent>, HistoryError> {
        let rows = match item_id {
            Some(item_id) => {
                sqlx::query(
                    r#"SELECT * FROM "review_event" WHERE "userId" = ?1 AND "itemId" = ?2 ORDER BY rowid"#,
                )
                .bind(user_id)
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(r#"SELECT * FROM "review_event" WHERE "userId" = ?1 ORDER BY rowid"#)
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut events: Vec<ReviewEvent> = rows.iter().filter_map(Self::row_to_event).collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[async_trait]
impl DecayParameterStore for SqliteStore {
    fn default_lambda(&self) -> f64 {
        self.default_lambda
    }

    async fn get(&self, user_id: &str) -> Result<Option<DecayParameterRecord>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM "decay_parameter" WHERE "userId" = ?1"#)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_or_init(&self, user_id: &str) -> Result<DecayParameterRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "decay_parameter" ("userId", "lambda", "updatedAt", "source", "version")
            VALUES (?1, ?2, ?3, ?4, 0)
            ON CONFLICT ("userId") DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.default_lambda)
        .bind(Utc::now())
        .bind(LambdaSource::Default.as_str())
        .execute(&self.pool)
        .await?;

        self.get(user_id).await?.ok_or_else(|| StoreError::Corrupt {
            user_id: user_id.to_string(),
            reason: "record missing after insert".to_string(),
        })
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: DecayParameterRecord,
    ) -> Result<Option<DecayParameterRecord>, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "decay_parameter"
            SET "lambda" = ?1, "updatedAt" = ?2, "source" = ?3, "version" = "version" + 1
            WHERE "userId" = ?4 AND "version" = ?5
            "#,
        )
        .bind(record.lambda)
        .bind(record.updated_at)
        .bind(record.source.as_str())
        .bind(&record.user_id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }
        record.version = expected_version + 1;
        Ok(Some(record))
    }

    async fn put(&self, mut record: DecayParameterRecord) -> Result<DecayParameterRecord, StoreError> {
        record.updated_at = Utc::now();
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO "decay_parameter" ("userId", "lambda", "updatedAt", "source", "version")
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT ("userId") DO UPDATE SET
                "lambda" = excluded."lambda",
                "updatedAt" = excluded."updatedAt",
                "source" = excluded."source",
                "version" = "decay_parameter"."version" + 1
            RETURNING "version"
            "#,
        )
        .bind(&record.user_id)
        .bind(record.lambda)
        .bind(record.updated_at)
        .bind(record.source.as_str())
        .fetch_one(&self.pool)
        .await?;

        record.version = version.max(0) as u64;
        Ok(record)
    }
}

#[async_trait]
impl ReviewHistory for SqliteStore {
    async fn events_for_user(&self, user_id: &str) -> Result<Vec<ReviewEvent>, HistoryError> {
        self.fetch_events(user_id, None).await
    }

    async fn events_for_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Vec<ReviewEvent>, HistoryError> {
        self.fetch_events(user_id, Some(item_id)).await
    }

    async fn append(&self, event: ReviewEvent) -> Result<(), HistoryError> {
        let metadata = event
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());
        sqlx::query(
            r#"
            INSERT INTO "review_event"
                ("id", "userId", "itemId", "timestamp", "correctness",
                 "timeSinceLastReviewSec", "nReps", "responseTimeMs", "metadata")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(&event.item_id)
        .bind(event.timestamp)
        .bind(u8::from(event.correctness) as i64)
        .bind(event.time_since_last_review_sec)
        .bind(event.n_reps)
        .bind(event.response_time_ms.map(|v| v as i64))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_parameter_record_lifecycle() {
        let store = SqliteStore::in_memory(0.15).await.unwrap();
        assert!(store.get("u1").await.unwrap().is_none());

        let record = store.get_or_init("u1").await.unwrap();
        assert_eq!(record.lambda, 0.15);
        assert_eq!(record.source, LambdaSource::Default);
        assert_eq!(record.version, 0);

        let next = DecayParameterRecord {
            lambda: 0.12,
            source: LambdaSource::Online,
            ..record.clone()
        };
        let stored = store.compare_and_swap(0, next.clone()).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(store.compare_and_swap(0, next).await.unwrap().is_none());

        let imported = DecayParameterRecord {
            lambda: 0.3,
            source: LambdaSource::Imported,
            ..record
        };
        let stored = store.put(imported).await.unwrap();
        assert_eq!(stored.version, 2);

        let current = store.get("u1").await.unwrap().unwrap();
        assert_eq!(current.lambda, 0.3);
        assert_eq!(current.source, LambdaSource::Imported);
    }

    #[tokio::test]
    async fn test_put_creates_missing_record() {
        let store = SqliteStore::in_memory(0.15).await.unwrap();
        let stored = store
            .put(DecayParameterRecord::with_default("u9", 0.4))
            .await
            .unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.get("u9").await.unwrap().unwrap().lambda, 0.4);
    }

    #[tokio::test]
    async fn test_review_events_round_trip_in_order() {
        let store = SqliteStore::in_memory(0.15).await.unwrap();
        let now = Utc::now();
        let mut late = ReviewEvent::new("u1", "w1", now, Outcome::Recalled, 3600.0, 2);
        late.metadata = Some(serde_json::json!({"variantId": "v1"}));
        late.response_time_ms = Some(1200);
        let early = ReviewEvent::new(
            "u1",
            "w1",
            now - Duration::hours(1),
            Outcome::Forgotten,
            0.0,
            1,
        );
        let other = ReviewEvent::new("u1", "w2", now, Outcome::Recalled, 0.0, 1);

        store.append(late.clone()).await.unwrap();
        store.append(early.clone()).await.unwrap();
        store.append(other).await.unwrap();

        let w1 = store.events_for_item("u1", "w1").await.unwrap();
        assert_eq!(w1.len(), 2);
        assert_eq!(w1[0].id, early.id);
        assert_eq!(w1[1].id, late.id);
        assert_eq!(w1[1].correctness, Outcome::Recalled);
        assert_eq!(w1[1].n_reps, 2);
        assert_eq!(w1[1].response_time_ms, Some(1200));
        assert_eq!(w1[1].metadata, late.metadata);

        assert_eq!(store.events_for_user("u1").await.unwrap().len(), 3);
        assert!(store.events_for_user("u2").await.unwrap().is_empty());
    }
}
