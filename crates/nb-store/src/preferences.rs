//! Per-user preferences, encrypted contact fields, device registry (§3 User
//! Preferences, §6 persistence layout (c): "Preferences document keyed
//! uniquely by user id").

use async_trait::async_trait;
use dashmap::DashMap;
use nb_common::types::UserPreferences;
use sqlx::{PgPool, Row};

use crate::error::StoreError;

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    /// Returns the user's preferences, creating a default row on first access.
    async fn get_or_create(&self, user_id: &str) -> Result<UserPreferences, StoreError>;

    async fn save(&self, prefs: &UserPreferences) -> Result<(), StoreError>;

    async fn init_schema(&self) -> Result<(), StoreError>;
}

pub struct PostgresPreferencesStore {
    pool: PgPool,
}

impl PostgresPreferencesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferencesStore for PostgresPreferencesStore {
    async fn get_or_create(&self, user_id: &str) -> Result<UserPreferences, StoreError> {
        let row = sqlx::query("SELECT document FROM preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            let doc: serde_json::Value = row.get("document");
            let prefs: UserPreferences = serde_json::from_value(doc)?;
            return Ok(prefs);
        }

        let prefs = UserPreferences::new(user_id);
        self.save(&prefs).await?;
        Ok(prefs)
    }

    async fn save(&self, prefs: &UserPreferences) -> Result<(), StoreError> {
        let doc = serde_json::to_value(prefs)?;
        sqlx::query(
            "INSERT INTO preferences (user_id, document) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET document = EXCLUDED.document",
        )
        .bind(&prefs.user_id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS preferences (
                user_id TEXT PRIMARY KEY,
                document JSONB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPreferencesStore {
    records: DashMap<String, UserPreferences>,
}

impl InMemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferencesStore for InMemoryPreferencesStore {
    async fn get_or_create(&self, user_id: &str) -> Result<UserPreferences, StoreError> {
        if let Some(prefs) = self.records.get(user_id) {
            return Ok(prefs.clone());
        }
        let prefs = UserPreferences::new(user_id);
        self.records.insert(user_id.to_string(), prefs.clone());
        Ok(prefs)
    }

    async fn save(&self, prefs: &UserPreferences) -> Result<(), StoreError> {
        self.records.insert(prefs.user_id.clone(), prefs.clone());
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
