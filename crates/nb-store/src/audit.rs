//! Egress audit publisher (§6 Event bus, egress/audit): GZIP-compresses the
//! event body and writes it to a Redis Stream, the same transport
//! `nb_ingest::bus::RedisStreamsPublisher` uses for ingress. Kept here
//! rather than in `nb-ingest` so Router, Retry Engine and Digest Engine can
//! all depend on it without a cycle through `nb-ingest` (which itself
//! depends on `nb-router`).

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use nb_common::audit::EVENT_VERSION;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::error::StoreError;

#[async_trait]
pub trait AuditPublisher: Send + Sync {
    /// `partition_key` is the user id (§6 "partition key = user id"). Redis
    /// Streams has no native partition concept, so it rides along as a
    /// stream field alongside the gzipped body.
    async fn publish(&self, event_type: &str, partition_key: &str, body: &serde_json::Value) -> Result<(), StoreError>;
}

fn gzip(body: &serde_json::Value) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(body)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub struct RedisAuditPublisher {
    conn: ConnectionManager,
    topic: String,
    source_service: String,
}

impl RedisAuditPublisher {
    pub fn new(conn: ConnectionManager, topic: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self { conn, topic: topic.into(), source_service: source_service.into() }
    }
}

#[async_trait]
impl AuditPublisher for RedisAuditPublisher {
    async fn publish(&self, event_type: &str, partition_key: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let compressed = gzip(body)?;
        let _: String = conn
            .xadd(
                &self.topic,
                "*",
                &[
                    ("event-type", event_type.as_bytes().to_vec()),
                    ("event-version", EVENT_VERSION.as_bytes().to_vec()),
                    ("source-service", self.source_service.as_bytes().to_vec()),
                    ("partition-key", partition_key.as_bytes().to_vec()),
                    ("payload", compressed),
                ],
            )
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishedAuditEvent {
    pub event_type: String,
    pub partition_key: String,
    pub body: serde_json::Value,
}

/// Records every publish call for test assertions; never drops entries, so
/// tests can assert both what was published and what wasn't.
#[derive(Default)]
pub struct InMemoryAuditPublisher {
    published: Mutex<Vec<PublishedAuditEvent>>,
}

impl InMemoryAuditPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedAuditEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditPublisher for InMemoryAuditPublisher {
    async fn publish(&self, event_type: &str, partition_key: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        self.published.lock().unwrap().push(PublishedAuditEvent {
            event_type: event_type.to_string(),
            partition_key: partition_key.to_string(),
            body: body.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_publisher_records_every_event() {
        let publisher = InMemoryAuditPublisher::new();
        publisher.publish("notification.sent", "u1", &serde_json::json!({"a": 1})).await.unwrap();
        publisher.publish("notification.delivered", "u1", &serde_json::json!({"a": 2})).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].event_type, "notification.sent");
        assert_eq!(published[1].partition_key, "u1");
    }

    #[test]
    fn gzip_round_trips_via_flate2_reader() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let body = serde_json::json!({"notification_id": "d1", "user_id": "u1"});
        let compressed = gzip(&body).unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(decoded, body);
    }
}
