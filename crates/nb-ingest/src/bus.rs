//! Event-bus consumer/publisher contract, generalized from a single
//! SQS-shaped queue (`fc_queue::QueueConsumer`/`QueuePublisher`) to a
//! bus-agnostic one backed here by Redis Streams consumer groups. A
//! `BusMessage`'s `receipt` is the stream entry id; acking is `XACK`,
//! heartbeating is a self-`XCLAIM` that resets the pending-entry idle
//! clock so the consumer group doesn't hand the message to another
//! worker mid-processing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Stream entry id, e.g. `"1699999999999-0"`. Doubles as the receipt
    /// handle for ack/heartbeat.
    pub receipt: String,
    pub payload: String,
}

#[async_trait]
pub trait BusConsumer: Send + Sync {
    fn topic(&self) -> &str;

    /// Pulls up to `max` pending messages, blocking briefly if none are
    /// immediately available. Returns an empty batch on timeout, never an
    /// error, so the caller's poll loop can treat "nothing to do" and
    /// "genuinely idle" the same way.
    async fn poll(&self, max: usize) -> Result<Vec<BusMessage>, IngestError>;

    async fn ack(&self, message: &BusMessage) -> Result<(), IngestError>;

    /// Resets the pending-entry idle clock so the broker doesn't treat a
    /// message as abandoned while it's still being worked.
    async fn heartbeat(&self, message: &BusMessage) -> Result<(), IngestError>;
}

#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), IngestError>;
}

pub struct RedisStreamsConsumer {
    conn: ConnectionManager,
    topic: String,
    group: String,
    consumer_name: String,
}

impl RedisStreamsConsumer {
    /// Creates the consumer group if it doesn't already exist. `BUSYGROUP`
    /// (group already exists) is swallowed; any other error propagates.
    pub async fn new(
        conn: ConnectionManager,
        topic: impl Into<String>,
        group: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let topic = topic.into();
        let group = group.into();
        let mut conn_mut = conn.clone();

        let created: Result<(), redis::RedisError> =
            conn_mut.xgroup_create_mkstream(&topic, &group, "0").await;
        if let Err(err) = created {
            if !err.to_string().contains("BUSYGROUP") {
                return Err(IngestError::Bus(err.to_string()));
            }
        }

        Ok(Self { conn, topic, group, consumer_name: consumer_name.into() })
    }
}

#[async_trait]
impl BusConsumer for RedisStreamsConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&self, max: usize) -> Result<Vec<BusMessage>, IngestError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default().group(&self.group, &self.consumer_name).count(max);

        let reply: StreamReadReply = conn
            .xread_options(&[self.topic.as_str()], &[">"], &opts)
            .await
            .map_err(|e| IngestError::Bus(e.to_string()))?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let payload: String = id
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .ok_or_else(|| IngestError::Bus(format!("entry {} missing payload field", id.id)))?;
                messages.push(BusMessage { receipt: id.id, payload });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, message: &BusMessage) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.topic, &self.group, &[message.receipt.as_str()])
            .await
            .map_err(|e| IngestError::Bus(e.to_string()))?;
        Ok(())
    }

    async fn heartbeat(&self, message: &BusMessage) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let _: redis::Value = conn
            .xclaim(&self.topic, &self.group, &self.consumer_name, 0, &[message.receipt.as_str()])
            .await
            .map_err(|e| IngestError::Bus(e.to_string()))?;
        Ok(())
    }
}

pub struct RedisStreamsPublisher {
    conn: ConnectionManager,
}

impl RedisStreamsPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BusPublisher for RedisStreamsPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let _: String =
            conn.xadd(topic, "*", &[("payload", payload)]).await.map_err(|e| IngestError::Bus(e.to_string()))?;
        Ok(())
    }
}

/// In-memory fake backing unit tests. `pending` mirrors the stream's
/// unread entries; `poll` moves entries into `in_flight` (standing in for
/// the consumer group's PEL) and only `ack` removes them for good, so a
/// test can assert a message was left un-acked after a failure.
pub struct InMemoryBus {
    topic: String,
    pending: Mutex<VecDeque<BusMessage>>,
    in_flight: DashMap<String, BusMessage>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            pending: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn publish_for_test(&self, payload: impl Into<String>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push_back(BusMessage { receipt: format!("test-{id}"), payload: payload.into() });
    }

    /// Messages that were delivered via `poll` but never acked.
    pub fn unacked_count_for_test(&self) -> usize {
        self.in_flight.len()
    }
}

#[async_trait]
impl BusConsumer for InMemoryBus {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&self, max: usize) -> Result<Vec<BusMessage>, IngestError> {
        let mut pending = self.pending.lock().unwrap();
        let mut drained = Vec::new();
        while drained.len() < max {
            match pending.pop_front() {
                Some(message) => drained.push(message),
                None => break,
            }
        }
        for message in &drained {
            self.in_flight.insert(message.receipt.clone(), message.clone());
        }
        Ok(drained)
    }

    async fn ack(&self, message: &BusMessage) -> Result<(), IngestError> {
        self.in_flight.remove(&message.receipt);
        Ok(())
    }

    async fn heartbeat(&self, _message: &BusMessage) -> Result<(), IngestError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_bus_polls_in_publish_order() {
        let bus = InMemoryBus::new("security-events");
        bus.publish_for_test("one");
        bus.publish_for_test("two");

        let messages = bus.poll(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, "one");
        assert_eq!(messages[1].payload, "two");
    }

    #[tokio::test]
    async fn poll_caps_at_requested_max() {
        let bus = InMemoryBus::new("security-events");
        bus.publish_for_test("one");
        bus.publish_for_test("two");

        let messages = bus.poll(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(bus.poll(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unacked_message_is_tracked_until_ack() {
        let bus = InMemoryBus::new("security-events");
        bus.publish_for_test("one");

        let messages = bus.poll(10).await.unwrap();
        assert_eq!(bus.unacked_count_for_test(), 1);

        bus.ack(&messages[0]).await.unwrap();
        assert_eq!(bus.unacked_count_for_test(), 0);
    }
}
