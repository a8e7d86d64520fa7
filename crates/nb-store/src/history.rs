//! Durable log of every delivery attempt (§3 Delivery Record, §6 persistence
//! layout (a)).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nb_common::types::{Channel, DeliveryRecord, DeliveryStatus, Priority};
use sqlx::{PgPool, Row};

use crate::error::StoreError;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Upserts a Delivery Record by id. Router and Retry Engine are the only
    /// writers, and only the component currently driving an attempt mutates
    /// a given record (§3 lifecycle ownership).
    async fn save(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Records with status = `retrying` and `next_attempt_at <= now`, ordered
    /// ascending, capped at `limit` (the Retry Engine's per-tick batch bound).
    async fn find_retrying_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    async fn init_schema(&self) -> Result<(), StoreError>;
}

pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<DeliveryRecord, StoreError> {
        let channel_str: String = row.get("channel");
        let channel = match channel_str.as_str() {
            "sms" => Channel::Sms,
            "email" => Channel::Email,
            "push" => Channel::Push,
            _ => Channel::Socket,
        };
        let priority_str: String = row.get("priority");
        let priority = match priority_str.as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Medium,
        };
        let status: String = row.get("status");
        let data_json: serde_json::Value = row.get("data");

        Ok(DeliveryRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            event_kind: row.get("event_kind"),
            source_id: row.get("source_id"),
            channel,
            priority,
            title: row.get("title"),
            body: row.get("body"),
            data: serde_json::from_value(data_json).unwrap_or_default(),
            status: DeliveryStatus::from_str_db(&status),
            provider_tag: row.try_get("provider_tag").ok(),
            provider_message_id: row.try_get("provider_message_id").ok(),
            retry_count: row.get::<i32, _>("retry_count") as u32,
            last_attempt_at: row.try_get("last_attempt_at").ok(),
            next_attempt_at: row.try_get("next_attempt_at").ok(),
            error: row.try_get("error").ok(),
            created_at: row.get("created_at"),
            sent_at: row.try_get("sent_at").ok(),
            delivered_at: row.try_get("delivered_at").ok(),
            read_at: row.try_get("read_at").ok(),
            correlation_id: row.try_get("correlation_id").ok(),
            idempotency_key: row.get("idempotency_key"),
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn save(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO delivery_records (
                id, user_id, event_kind, source_id, channel, priority, title, body, data,
                status, provider_tag, provider_message_id, retry_count, last_attempt_at,
                next_attempt_at, error, created_at, sent_at, delivered_at, read_at,
                correlation_id, idempotency_key
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                provider_tag = EXCLUDED.provider_tag,
                provider_message_id = EXCLUDED.provider_message_id,
                retry_count = EXCLUDED.retry_count,
                last_attempt_at = EXCLUDED.last_attempt_at,
                next_attempt_at = EXCLUDED.next_attempt_at,
                error = EXCLUDED.error,
                sent_at = EXCLUDED.sent_at,
                delivered_at = EXCLUDED.delivered_at,
                read_at = EXCLUDED.read_at",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.event_kind)
        .bind(&record.source_id)
        .bind(record.channel.as_str())
        .bind(format!("{:?}", record.priority).to_lowercase())
        .bind(&record.title)
        .bind(&record.body)
        .bind(serde_json::to_value(&record.data)?)
        .bind(record.status.as_str())
        .bind(&record.provider_tag)
        .bind(&record.provider_message_id)
        .bind(record.retry_count as i32)
        .bind(record.last_attempt_at)
        .bind(record.next_attempt_at)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.read_at)
        .bind(&record.correlation_id)
        .bind(&record.idempotency_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM delivery_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn find_retrying_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM delivery_records
             WHERE status = 'retrying' AND next_attempt_at <= $1
             ORDER BY next_attempt_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS delivery_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                priority TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                data JSONB NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                provider_tag TEXT,
                provider_message_id TEXT,
                retry_count INT NOT NULL DEFAULT 0,
                last_attempt_at TIMESTAMPTZ,
                next_attempt_at TIMESTAMPTZ,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                sent_at TIMESTAMPTZ,
                delivered_at TIMESTAMPTZ,
                read_at TIMESTAMPTZ,
                correlation_id TEXT,
                idempotency_key TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_delivery_user_created ON delivery_records (user_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_delivery_channel_status ON delivery_records (channel, status)",
            "CREATE INDEX IF NOT EXISTS idx_delivery_source_id ON delivery_records (source_id)",
            "CREATE INDEX IF NOT EXISTS idx_delivery_created_at ON delivery_records (created_at)",
            "CREATE INDEX IF NOT EXISTS idx_delivery_next_attempt ON delivery_records (next_attempt_at) WHERE status = 'retrying'",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_delivery_idempotency ON delivery_records (idempotency_key)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }
}

/// In-memory fake for tests (§9: "enabling a test harness to substitute
/// in-memory fakes for all stores and adapters").
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: DashMap<String, DeliveryRecord>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn find_retrying_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let mut due: Vec<DeliveryRecord> = self
            .records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Retrying && r.next_attempt_at.map(|t| t <= now).unwrap_or(false))
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| r.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
