//! Event Ingestor: pulls raw events off the bus, decodes and maps them to
//! routable notification requests, and hands them to the Router. One
//! worker task per topic, each running the poll/route/ack loop
//! independently so a slow or wedged topic never blocks another.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod mapping;

use std::sync::Arc;

use futures::future::join_all;
use nb_common::types::{DlqRecord, DlqReviewState, Priority};
use nb_config::IngestConfig;
use nb_router::Router;
use nb_store::DlqStore;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bus::{BusConsumer, BusMessage};
use envelope::{BusEnvelope, RouterCommand};
use error::IngestError;

pub struct EventIngestor {
    config: IngestConfig,
    consumers: Vec<Arc<dyn BusConsumer>>,
    router: Arc<Router>,
    dlq: Arc<dyn DlqStore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventIngestor {
    pub fn new(config: IngestConfig, consumers: Vec<Arc<dyn BusConsumer>>, router: Arc<Router>, dlq: Arc<dyn DlqStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { config, consumers, router, dlq, shutdown_tx }
    }

    /// Spawns one worker task per configured consumer and waits for all of
    /// them to exit. A worker only exits on shutdown or when a DLQ write
    /// itself fails (the partition halts rather than silently skipping a
    /// message it couldn't durably record).
    pub async fn run(self: Arc<Self>) {
        info!(consumers = self.consumers.len(), "starting event ingestor");
        let mut handles = Vec::new();

        for consumer in self.consumers.clone() {
            let ingestor = self.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(topic = consumer.topic(), "ingestor worker shutting down");
                            break;
                        }
                        result = consumer.poll(ingestor.config.batch_size) => {
                            match result {
                                Ok(messages) if !messages.is_empty() => {
                                    if let Err(e) = ingestor.handle_batch(consumer.as_ref(), messages).await {
                                        error!(error = %e, topic = consumer.topic(), "halting topic worker after unrecoverable error");
                                        break;
                                    }
                                }
                                Ok(_) => {
                                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                                }
                                Err(e) => {
                                    error!(error = %e, topic = consumer.topic(), "error polling bus");
                                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                                }
                            }
                        }
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handles a polled batch with up to `per_batch_concurrency` messages in
    /// flight at once, each acked independently as soon as it's decided —
    /// unlike a single partition offset, per-entry acks don't need to
    /// complete in poll order. Heartbeats between a message's decode and its
    /// ack so a slow provider call doesn't make the broker think the
    /// consumer died mid-batch.
    async fn handle_batch(&self, consumer: &dyn BusConsumer, messages: Vec<BusMessage>) -> Result<(), IngestError> {
        let semaphore = Arc::new(Semaphore::new(self.config.per_batch_concurrency.max(1)));

        let attempts = messages.iter().map(|message| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                let result = self.handle_one(consumer, message).await;
                consumer.heartbeat(message).await.ok();
                result
            }
        });

        for result in join_all(attempts).await {
            result?;
        }
        Ok(())
    }

    async fn handle_one(&self, consumer: &dyn BusConsumer, message: &BusMessage) -> Result<(), IngestError> {
        let topic = consumer.topic().to_string();

        let envelope: BusEnvelope = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                nb_router::router_metrics::record_ingest_consumed(&topic, "quarantined");
                return self.quarantine_and_ack(consumer, message, &topic, None, format!("undecodable envelope: {e}")).await;
            }
        };

        let command: RouterCommand = match RouterCommand::try_from(&envelope) {
            Ok(command) => command,
            Err(reason) => {
                nb_router::router_metrics::record_ingest_consumed(&topic, "quarantined");
                return self
                    .quarantine_and_ack(consumer, message, &topic, envelope.correlation_id.clone(), reason)
                    .await;
            }
        };

        let request = match mapping::build_request(&topic, &command) {
            Some(request) => request,
            None => {
                debug!(topic = %topic, kind = %command.kind, "dropping unrecognized (topic, kind) pair");
                nb_router::router_metrics::record_ingest_consumed(&topic, "dropped");
                return consumer.ack(message).await;
            }
        };

        match self.router.route(request).await {
            Ok(_) => {
                nb_router::router_metrics::record_ingest_consumed(&topic, "routed");
                consumer.ack(message).await
            }
            Err(e) => {
                nb_router::router_metrics::record_ingest_consumed(&topic, "quarantined");
                self.quarantine_and_ack(consumer, message, &topic, command.correlation_id.clone(), format!("router error: {e}")).await
            }
        }
    }

    /// Writes a DLQ record for a message the router or decoder couldn't
    /// handle, then acks it. If the DLQ write itself fails, the message is
    /// left un-acked and the error propagates so the caller halts this
    /// topic's worker rather than silently dropping a failure nobody will
    /// ever see.
    async fn quarantine_and_ack(
        &self,
        consumer: &dyn BusConsumer,
        message: &BusMessage,
        topic: &str,
        correlation_id: Option<String>,
        reason: String,
    ) -> Result<(), IngestError> {
        let id = correlation_id.unwrap_or_else(|| format!("{topic}:{}", message.receipt));
        warn!(id = %id, reason = %reason, "quarantining unroutable message");

        let record = DlqRecord {
            id: Uuid::new_v4().to_string(),
            delivery_id: None,
            user_id: "unknown".to_string(),
            event_kind: "unknown".to_string(),
            channel: None,
            priority: Priority::Medium,
            snapshot: serde_json::json!({ "source_id": id, "raw": message.payload }),
            failure_reason: reason,
            total_attempts: 0,
            failure_history: Vec::new(),
            review_state: DlqReviewState::PendingReview,
            resolver_id: None,
            resolution_notes: None,
            malformed: true,
            created_at: chrono::Utc::now(),
        };

        self.dlq.insert(&record).await?;
        consumer.ack(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use nb_common::{Channel, DeliveryRequest, ProviderOutcome};
    use nb_config::{RateBudgetConfig, RetryConfig, RouterConfig};
    use nb_crypto::FieldCipher;
    use nb_providers::ChannelProvider;
    use nb_store::{
        InMemoryAuditPublisher, InMemoryDedupStore, InMemoryDigestQueue, InMemoryDlqStore, InMemoryHistoryStore,
        InMemoryPreferencesStore, InMemoryRateBudgetStore,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        channel: Channel,
        outcome: ProviderOutcome,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(channel: Channel, outcome: ProviderOutcome) -> Self {
            Self { channel, outcome, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ChannelProvider for StubProvider {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _request: &DeliveryRequest) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn build_router(providers: HashMap<Channel, Arc<dyn ChannelProvider>>) -> Arc<Router> {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let cipher = Arc::new(FieldCipher::new(&key).unwrap());
        Arc::new(Router::new(
            &RouterConfig::default(),
            RateBudgetConfig::default(),
            RetryConfig::default(),
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryDlqStore::new()),
            Arc::new(InMemoryPreferencesStore::new()),
            Arc::new(InMemoryRateBudgetStore::new()),
            Arc::new(InMemoryDedupStore::new()),
            Arc::new(InMemoryDigestQueue::new()),
            providers,
            cipher,
            Arc::new(InMemoryAuditPublisher::new()),
        ))
    }

    fn envelope_json(event_type: &str, correlation_id: Option<&str>, payload: serde_json::Value) -> String {
        serde_json::json!({
            "eventType": event_type,
            "timestamp": "2026-07-26T12:00:00Z",
            "service": "ledger",
            "version": "1",
            "correlationId": correlation_id,
            "payload": payload,
        })
        .to_string()
    }

    fn ingestor(router: Arc<Router>, dlq: Arc<dyn DlqStore>, bus: Arc<bus::InMemoryBus>) -> EventIngestor {
        EventIngestor::new(IngestConfig::default(), vec![bus], router, dlq)
    }

    #[tokio::test]
    async fn well_formed_event_is_routed_and_acked() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let router = build_router(providers);
        let dlq: Arc<dyn DlqStore> = Arc::new(InMemoryDlqStore::new());
        let topic_bus = bus::InMemoryBus::new("transaction-events");
        topic_bus.publish_for_test(envelope_json("transfer_completed", Some("corr-1"), serde_json::json!({ "userId": "u1", "amount": "42.00" })));

        let ing = ingestor(router, dlq, topic_bus.clone());
        let messages = topic_bus.poll(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        ing.handle_one(topic_bus.as_ref(), &messages[0]).await.unwrap();
        assert_eq!(topic_bus.unacked_count_for_test(), 0);
    }

    #[tokio::test]
    async fn unrecognized_kind_is_dropped_and_acked_without_dlq() {
        let router = build_router(HashMap::new());
        let dlq = Arc::new(InMemoryDlqStore::new());
        let topic_bus = bus::InMemoryBus::new("transaction-events");
        topic_bus.publish_for_test(envelope_json("something_new", None, serde_json::json!({ "userId": "u1" })));

        let ing = ingestor(router, dlq.clone(), topic_bus.clone());
        let messages = topic_bus.poll(10).await.unwrap();
        ing.handle_one(topic_bus.as_ref(), &messages[0]).await.unwrap();

        assert_eq!(topic_bus.unacked_count_for_test(), 0);
        assert!(dlq.get("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_missing_user_id_is_quarantined() {
        let router = build_router(HashMap::new());
        let dlq: Arc<dyn DlqStore> = Arc::new(InMemoryDlqStore::new());
        let topic_bus = bus::InMemoryBus::new("transaction-events");
        topic_bus.publish_for_test(envelope_json("transfer_completed", Some("corr-2"), serde_json::json!({ "amount": "10.00" })));

        let ing = ingestor(router, dlq, topic_bus.clone());
        let messages = topic_bus.poll(10).await.unwrap();
        ing.handle_one(topic_bus.as_ref(), &messages[0]).await.unwrap();

        assert_eq!(topic_bus.unacked_count_for_test(), 0);
    }

    #[tokio::test]
    async fn dlq_write_failure_halts_without_acking() {
        struct FailingDlq;
        #[async_trait]
        impl DlqStore for FailingDlq {
            async fn insert(&self, _record: &DlqRecord) -> Result<(), nb_store::StoreError> {
                Err(nb_store::StoreError::NotFound("dlq unavailable".to_string()))
            }
            async fn get(&self, _id: &str) -> Result<Option<DlqRecord>, nb_store::StoreError> {
                Ok(None)
            }
            async fn set_review_state(
                &self,
                _id: &str,
                _state: DlqReviewState,
                _resolver_id: Option<&str>,
                _notes: Option<&str>,
            ) -> Result<(), nb_store::StoreError> {
                Ok(())
            }
            async fn init_schema(&self) -> Result<(), nb_store::StoreError> {
                Ok(())
            }
        }

        let router = build_router(HashMap::new());
        let dlq: Arc<dyn DlqStore> = Arc::new(FailingDlq);
        let topic_bus = bus::InMemoryBus::new("transaction-events");
        topic_bus.publish_for_test(envelope_json("transfer_completed", None, serde_json::json!({ "amount": "10.00" })));

        let ing = ingestor(router, dlq, topic_bus.clone());
        let messages = topic_bus.poll(10).await.unwrap();
        assert!(ing.handle_one(topic_bus.as_ref(), &messages[0]).await.is_err());
        assert_eq!(topic_bus.unacked_count_for_test(), 1);
    }
}
