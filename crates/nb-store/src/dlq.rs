//! Durable queue of permanently-failed deliveries awaiting human review
//! (§3 DLQ Record, §6 persistence layout (b)).

use async_trait::async_trait;
use dashmap::DashMap;
use nb_common::types::{Channel, DlqRecord, DlqReviewState, Priority};
use sqlx::{PgPool, Row};

use crate::error::StoreError;

#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn insert(&self, record: &DlqRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<DlqRecord>, StoreError>;

    async fn set_review_state(
        &self,
        id: &str,
        state: DlqReviewState,
        resolver_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn init_schema(&self) -> Result<(), StoreError>;
}

pub struct PostgresDlqStore {
    pool: PgPool,
}

impl PostgresDlqStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<DlqRecord, StoreError> {
        let channel: Option<String> = row.try_get("channel").ok();
        let priority_str: String = row.get("priority");
        let review_state: String = row.get("review_state");
        let history_json: serde_json::Value = row.get("failure_history");

        Ok(DlqRecord {
            id: row.get("id"),
            delivery_id: row.try_get("delivery_id").ok(),
            user_id: row.get("user_id"),
            event_kind: row.get("event_kind"),
            channel: channel.map(|c| match c.as_str() {
                "sms" => Channel::Sms,
                "email" => Channel::Email,
                "push" => Channel::Push,
                _ => Channel::Socket,
            }),
            priority: match priority_str.as_str() {
                "low" => Priority::Low,
                "high" => Priority::High,
                "critical" => Priority::Critical,
                _ => Priority::Medium,
            },
            snapshot: row.get("snapshot"),
            failure_reason: row.get("failure_reason"),
            total_attempts: row.get::<i32, _>("total_attempts") as u32,
            failure_history: serde_json::from_value(history_json).unwrap_or_default(),
            review_state: DlqReviewState::from_str_db(&review_state),
            resolver_id: row.try_get("resolver_id").ok(),
            resolution_notes: row.try_get("resolution_notes").ok(),
            malformed: row.get("malformed"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    async fn insert(&self, record: &DlqRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO dlq_records (
                id, delivery_id, user_id, event_kind, channel, priority, snapshot,
                failure_reason, total_attempts, failure_history, review_state,
                resolver_id, resolution_notes, malformed, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(&record.id)
        .bind(&record.delivery_id)
        .bind(&record.user_id)
        .bind(&record.event_kind)
        .bind(record.channel.map(|c| c.as_str()))
        .bind(format!("{:?}", record.priority).to_lowercase())
        .bind(&record.snapshot)
        .bind(&record.failure_reason)
        .bind(record.total_attempts as i32)
        .bind(serde_json::to_value(&record.failure_history)?)
        .bind(record.review_state.as_str())
        .bind(&record.resolver_id)
        .bind(&record.resolution_notes)
        .bind(record.malformed)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DlqRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM dlq_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn set_review_state(
        &self,
        id: &str,
        state: DlqReviewState,
        resolver_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE dlq_records SET review_state = $1, resolver_id = $2, resolution_notes = $3 WHERE id = $4",
        )
        .bind(state.as_str())
        .bind(resolver_id)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dlq_records (
                id TEXT PRIMARY KEY,
                delivery_id TEXT,
                user_id TEXT NOT NULL,
                event_kind TEXT NOT NULL,
                channel TEXT,
                priority TEXT NOT NULL,
                snapshot JSONB NOT NULL,
                failure_reason TEXT NOT NULL,
                total_attempts INT NOT NULL,
                failure_history JSONB NOT NULL DEFAULT '[]',
                review_state TEXT NOT NULL DEFAULT 'pending_review',
                resolver_id TEXT,
                resolution_notes TEXT,
                malformed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_dlq_review_state ON dlq_records (review_state)",
            "CREATE INDEX IF NOT EXISTS idx_dlq_user ON dlq_records (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_dlq_channel_state ON dlq_records (channel, review_state)",
            "CREATE INDEX IF NOT EXISTS idx_dlq_priority_state ON dlq_records (priority, review_state)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDlqStore {
    records: DashMap<String, DlqRecord>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn insert(&self, record: &DlqRecord) -> Result<(), StoreError> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DlqRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn set_review_state(
        &self,
        id: &str,
        state: DlqReviewState,
        resolver_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(mut record) = self.records.get_mut(id) {
            record.review_state = state;
            record.resolver_id = resolver_id.map(|s| s.to_string());
            record.resolution_notes = notes.map(|s| s.to_string());
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
