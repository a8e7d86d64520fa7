//! Atomic "first-seen wins" registration of an event fingerprint with TTL
//! (§4.7).

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Script};

use crate::error::StoreError;

/// If the key is already present, return its value unchanged (the original
/// notification id); otherwise set it to the new notification id with the
/// kind's dedup window as TTL. Single round trip.
const CHECK_AND_REGISTER_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
  return existing
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return false
"#;

#[derive(Debug, Clone)]
pub struct DedupDecision {
    pub duplicate: bool,
    pub original_notification_id: Option<String>,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn check_and_register(
        &self,
        user_id: &str,
        kind: &str,
        source_id: &str,
        notification_id: &str,
        window: chrono::Duration,
    ) -> Result<DedupDecision, StoreError>;
}

fn dedup_key(user_id: &str, kind: &str, source_id: &str) -> String {
    format!("dedup:{user_id}:{kind}:{source_id}")
}

pub struct RedisDedupStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisDedupStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, script: Script::new(CHECK_AND_REGISTER_SCRIPT) }
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn check_and_register(
        &self,
        user_id: &str,
        kind: &str,
        source_id: &str,
        notification_id: &str,
        window: ChronoDuration,
    ) -> Result<DedupDecision, StoreError> {
        let mut conn = self.conn.clone();
        let existing: Option<String> = self
            .script
            .key(dedup_key(user_id, kind, source_id))
            .arg(notification_id)
            .arg(window.num_milliseconds().max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(match existing {
            Some(original) => DedupDecision { duplicate: true, original_notification_id: Some(original) },
            None => DedupDecision { duplicate: false, original_notification_id: None },
        })
    }
}

#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: DashMap<String, (String, chrono::DateTime<chrono::Utc>)>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn check_and_register(
        &self,
        user_id: &str,
        kind: &str,
        source_id: &str,
        notification_id: &str,
        window: ChronoDuration,
    ) -> Result<DedupDecision, StoreError> {
        let key = dedup_key(user_id, kind, source_id);
        let now = chrono::Utc::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.1 > now {
                return Ok(DedupDecision { duplicate: true, original_notification_id: Some(entry.0.clone()) });
            }
        }

        self.entries.insert(key, (notification_id.to_string(), now + window));
        Ok(DedupDecision { duplicate: false, original_notification_id: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_registration_within_window_is_duplicate() {
        let store = InMemoryDedupStore::new();
        let window = ChronoDuration::minutes(5);
        let first = store.check_and_register("u1", "transfer_completed", "t1", "n1", window).await.unwrap();
        assert!(!first.duplicate);

        let second = store.check_and_register("u1", "transfer_completed", "t1", "n2", window).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(second.original_notification_id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn source_id_none_still_keys_on_kind_and_user() {
        let store = InMemoryDedupStore::new();
        let window = ChronoDuration::minutes(5);
        let first = store.check_and_register("u1", "login_failed", "none", "n1", window).await.unwrap();
        assert!(!first.duplicate);
        let second = store.check_and_register("u1", "login_failed", "none", "n2", window).await.unwrap();
        assert!(second.duplicate);
    }
}
