//! Per-(user, frequency) ordered durable list with TTL (§3 Digest Entry,
//! §4.4 Digest Engine).

use async_trait::async_trait;
use dashmap::DashMap;
use nb_common::types::{DigestEntry, DigestFrequency};
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::error::StoreError;

/// One week, bounding orphan retention for entries whose user never fires a
/// digest (e.g. digest disabled after entries were already queued).
const ORPHAN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[async_trait]
pub trait DigestQueue: Send + Sync {
    async fn append(
        &self,
        user_id: &str,
        frequency: DigestFrequency,
        entry: DigestEntry,
    ) -> Result<(), StoreError>;

    /// Non-destructive read of the full queued list, in append order.
    async fn peek(&self, user_id: &str, frequency: DigestFrequency) -> Result<Vec<DigestEntry>, StoreError>;

    /// Clears the list. Called only after a digest email has been confirmed
    /// sent — a failed send must leave the list untouched (§8 idempotence).
    async fn clear(&self, user_id: &str, frequency: DigestFrequency) -> Result<(), StoreError>;

    /// Enumerates users with a non-empty queue for the given frequency, for
    /// the Digest Engine's per-tick scan.
    async fn users_with_entries(&self, frequency: DigestFrequency) -> Result<Vec<String>, StoreError>;
}

fn queue_key(user_id: &str, frequency: DigestFrequency) -> String {
    format!("digest:{frequency}:{user_id}")
}

impl std::fmt::Display for DigestFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RedisDigestQueue {
    conn: ConnectionManager,
    /// tracked set of (frequency, user) members so `users_with_entries`
    /// doesn't require a `KEYS`/`SCAN` sweep across the keyspace.
    index_prefix: String,
}

impl RedisDigestQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, index_prefix: "digest-index".to_string() }
    }

    fn index_key(&self, frequency: DigestFrequency) -> String {
        format!("{}:{}", self.index_prefix, frequency)
    }
}

#[async_trait]
impl DigestQueue for RedisDigestQueue {
    async fn append(
        &self,
        user_id: &str,
        frequency: DigestFrequency,
        entry: DigestEntry,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = queue_key(user_id, frequency);
        let payload = serde_json::to_string(&entry)?;

        let len: i64 = conn.rpush(&key, payload).await?;
        if len == 1 {
            let _: () = conn.expire(&key, ORPHAN_TTL_SECS).await?;
        }
        let _: () = conn.sadd(self.index_key(frequency), user_id).await?;
        Ok(())
    }

    async fn peek(&self, user_id: &str, frequency: DigestFrequency) -> Result<Vec<DigestEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(queue_key(user_id, frequency), 0, -1).await?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .collect()
    }

    async fn clear(&self, user_id: &str, frequency: DigestFrequency) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(queue_key(user_id, frequency)).await?;
        let _: () = conn.srem(self.index_key(frequency), user_id).await?;
        Ok(())
    }

    async fn users_with_entries(&self, frequency: DigestFrequency) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.index_key(frequency)).await?;
        Ok(members)
    }
}

#[derive(Default)]
pub struct InMemoryDigestQueue {
    lists: DashMap<(String, DigestFrequency), Vec<DigestEntry>>,
}

impl InMemoryDigestQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DigestQueue for InMemoryDigestQueue {
    async fn append(
        &self,
        user_id: &str,
        frequency: DigestFrequency,
        entry: DigestEntry,
    ) -> Result<(), StoreError> {
        self.lists.entry((user_id.to_string(), frequency)).or_default().push(entry);
        Ok(())
    }

    async fn peek(&self, user_id: &str, frequency: DigestFrequency) -> Result<Vec<DigestEntry>, StoreError> {
        Ok(self.lists.get(&(user_id.to_string(), frequency)).map(|v| v.clone()).unwrap_or_default())
    }

    async fn clear(&self, user_id: &str, frequency: DigestFrequency) -> Result<(), StoreError> {
        self.lists.remove(&(user_id.to_string(), frequency));
        Ok(())
    }

    async fn users_with_entries(&self, frequency: DigestFrequency) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lists
            .iter()
            .filter(|entry| entry.key().1 == frequency && !entry.value().is_empty())
            .map(|entry| entry.key().0.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_entry(id: &str) -> DigestEntry {
        DigestEntry {
            notification_id: id.to_string(),
            delivery_id: format!("{id}-d"),
            kind: "transfer_completed".to_string(),
            title: "Transfer".to_string(),
            body: "body".to_string(),
            created_at: Utc::now(),
            data: Default::default(),
        }
    }

    #[tokio::test]
    async fn clear_leaves_list_untouched_on_no_clear_call() {
        let queue = InMemoryDigestQueue::new();
        queue.append("u1", DigestFrequency::Daily, sample_entry("n1")).await.unwrap();
        queue.append("u1", DigestFrequency::Daily, sample_entry("n2")).await.unwrap();

        let entries = queue.peek("u1", DigestFrequency::Daily).await.unwrap();
        assert_eq!(entries.len(), 2);

        let users = queue.users_with_entries(DigestFrequency::Daily).await.unwrap();
        assert_eq!(users, vec!["u1".to_string()]);

        queue.clear("u1", DigestFrequency::Daily).await.unwrap();
        assert!(queue.peek("u1", DigestFrequency::Daily).await.unwrap().is_empty());
    }
}
