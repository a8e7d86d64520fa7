//! Retry Engine: periodically rescans Delivery Records stuck in
//! `retrying` and re-attempts them on the provider they originally
//! targeted. Shares `nb_router::delivery::apply_outcome` with the
//! Router's first attempt so the lifecycle transitions (sent/delivered,
//! retry-again, exhausted-to-DLQ) are defined in exactly one place.
//! Mirrors `fc_scheduler::DispatchScheduler::start`'s spawned
//! tick-interval poller, with the `Arc<RwLock<bool>>` running flag and
//! the same tick/check/poll/log-and-continue shape.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nb_common::{Channel, DeliveryRecord, DeliveryRequest, DeliveryStatus, ProviderOutcome};
use nb_config::{RateBudgetConfig, RetryConfig};
use nb_crypto::FieldCipher;
use nb_providers::ChannelProvider;
use nb_router::delivery::{apply_outcome, publish_lifecycle_audit, resolve_budget_limits};
use nb_store::{AuditPublisher, DlqStore, HistoryStore, PreferencesStore, RateBudgetStore};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use error::RetryError;

pub struct RetryEngine {
    config: RetryConfig,
    rate_budget_config: RateBudgetConfig,
    history: Arc<dyn HistoryStore>,
    dlq: Arc<dyn DlqStore>,
    preferences: Arc<dyn PreferencesStore>,
    rate_budget: Arc<dyn RateBudgetStore>,
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
    cipher: Arc<FieldCipher>,
    audit: Arc<dyn AuditPublisher>,
    running: Arc<RwLock<bool>>,
}

impl RetryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RetryConfig,
        rate_budget_config: RateBudgetConfig,
        history: Arc<dyn HistoryStore>,
        dlq: Arc<dyn DlqStore>,
        preferences: Arc<dyn PreferencesStore>,
        rate_budget: Arc<dyn RateBudgetStore>,
        providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
        cipher: Arc<FieldCipher>,
        audit: Arc<dyn AuditPublisher>,
    ) -> Self {
        Self {
            config,
            rate_budget_config,
            history,
            dlq,
            preferences,
            rate_budget,
            providers,
            cipher,
            audit,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawns the periodic scan loop. A no-op if already running.
    pub async fn start(self: Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            warn!("retry engine already running");
            return;
        }
        *running = true;
        drop(running);

        info!(scan_interval_ms = self.config.scan_interval_ms, batch_size = self.config.scan_batch_size, "starting retry engine");

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(self.config.scan_interval_ms));
            loop {
                ticker.tick().await;
                if !*self.running.read().await {
                    break;
                }
                if let Err(e) = self.scan_once().await {
                    error!(error = %e, "error scanning for due retries");
                }
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("retry engine stopped");
    }

    /// One scan tick: loads the due batch and retries each record. A single
    /// record's failure to retry (e.g. a preferences lookup error) is
    /// logged and skipped rather than aborting the rest of the batch.
    async fn scan_once(&self) -> Result<(), RetryError> {
        let due = self.history.find_retrying_due(Utc::now(), self.config.scan_batch_size as u32).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "found due retries");

        for record in due {
            let id = record.id.clone();
            if let Err(e) = self.retry_one(record).await {
                error!(delivery_id = %id, error = %e, "error retrying delivery record");
            }
        }
        Ok(())
    }

    /// Re-attempts a single record against its original channel's provider.
    /// Shared by the scheduled scan and `manual_retry` below.
    async fn retry_one(&self, mut record: DeliveryRecord) -> Result<(), RetryError> {
        let prefs = self.preferences.get_or_create(&record.user_id).await?;

        if record.channel != Channel::Socket {
            let limits = resolve_budget_limits(record.channel, &self.rate_budget_config, &prefs);
            let decision = self.rate_budget.consume_budget(&record.user_id, record.channel, limits).await.unwrap_or_else(|e| {
                warn!(error = %e, "rate budget store unavailable, failing open");
                nb_common::BudgetDecision { allowed: true, remaining: u32::MAX, reset_at: Utc::now() }
            });

            if !decision.allowed {
                debug!(delivery_id = %record.id, "retry deferred, still over budget");
                return Ok(());
            }
        }

        let phone = prefs.phone.as_ref().and_then(|f| match self.cipher.decrypt(f) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "failed to decrypt phone field during retry");
                None
            }
        });
        let email = prefs.email.as_ref().and_then(|f| match self.cipher.decrypt(f) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(error = %e, "failed to decrypt email field during retry");
                None
            }
        });

        let delivery_request = DeliveryRequest {
            delivery_id: record.id.clone(),
            user_id: record.user_id.clone(),
            event_kind: record.event_kind.clone(),
            channel: record.channel,
            priority: record.priority,
            title: record.title.clone(),
            body: record.body.clone(),
            data: record.data.clone(),
            correlation_id: record.correlation_id.clone(),
            phone,
            email,
            devices: prefs.devices.clone(),
        };

        let outcome = match self.providers.get(&record.channel) {
            Some(provider) => provider.send(&delivery_request).await,
            None => ProviderOutcome::failed("no provider configured for this channel"),
        };

        let dlq_record = apply_outcome(&mut record, &outcome, &self.config);
        self.history.save(&record).await?;
        let dlq_written = dlq_record.is_some();
        if let Some(dlq) = dlq_record {
            self.dlq.insert(&dlq).await?;
        }
        publish_lifecycle_audit(self.audit.as_ref(), &record, dlq_written).await;
        nb_router::router_metrics::record_retry_attempt(record.status.as_str());
        Ok(())
    }

    /// Immediately retries one delivery out of band from the scan loop
    /// (the manual `RetryNow` operation). Allowed from `failed` or
    /// `retrying`; resets the retry count and next-attempt-at so a record
    /// that already hit the DLQ gets a fresh attempt window. Returns
    /// `false` if the record doesn't exist or isn't in either state.
    pub async fn manual_retry(&self, delivery_id: &str) -> Result<bool, RetryError> {
        let mut record = match self.history.get(delivery_id).await? {
            Some(record) if matches!(record.status, DeliveryStatus::Failed | DeliveryStatus::Retrying) => record,
            _ => return Ok(false),
        };
        record.retry_count = 0;
        record.next_attempt_at = Some(Utc::now());
        self.retry_one(record).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use nb_common::Priority;
    use nb_store::{InMemoryAuditPublisher, InMemoryDlqStore, InMemoryHistoryStore, InMemoryPreferencesStore, InMemoryRateBudgetStore};
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

    fn sample_record(status: DeliveryStatus, retry_count: u32) -> DeliveryRecord {
        DeliveryRecord {
            id: "d1".to_string(),
            user_id: "u1".to_string(),
            event_kind: "transfer_failed".to_string(),
            source_id: "t1".to_string(),
            channel: Channel::Socket,
            priority: Priority::High,
            title: "t".to_string(),
            body: "b".to_string(),
            data: HashMap::new(),
            status,
            provider_tag: None,
            provider_message_id: None,
            retry_count,
            last_attempt_at: None,
            next_attempt_at: Some(Utc::now()),
            error: Some("boom".to_string()),
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            correlation_id: None,
            idempotency_key: "u1:transfer_failed:t1:socket".to_string(),
        }
    }

    fn build_engine(providers: HashMap<Channel, Arc<dyn ChannelProvider>>) -> (Arc<RetryEngine>, Arc<dyn HistoryStore>, Arc<dyn DlqStore>) {
        let (engine, history, dlq, _audit) = build_engine_with_audit(providers);
        (engine, history, dlq)
    }

    fn build_engine_with_audit(
        providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
    ) -> (Arc<RetryEngine>, Arc<dyn HistoryStore>, Arc<dyn DlqStore>, Arc<InMemoryAuditPublisher>) {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let cipher = Arc::new(FieldCipher::new(&key).unwrap());
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let dlq: Arc<dyn DlqStore> = Arc::new(InMemoryDlqStore::new());
        let audit = Arc::new(InMemoryAuditPublisher::new());
        let engine = Arc::new(RetryEngine::new(
            RetryConfig { max_attempts: 3, scan_interval_ms: 1000, scan_batch_size: 10, delay_schedule_ms: vec![10, 20, 30] },
            RateBudgetConfig::default(),
            history.clone(),
            dlq.clone(),
            Arc::new(InMemoryPreferencesStore::new()),
            Arc::new(InMemoryRateBudgetStore::new()),
            providers,
            cipher,
            audit.clone(),
        ));
        (engine, history, dlq, audit)
    }

    #[tokio::test]
    async fn successful_retry_marks_record_delivered() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let (engine, history, _dlq) = build_engine(providers);

        history.save(&sample_record(DeliveryStatus::Retrying, 1)).await.unwrap();
        engine.scan_once().await.unwrap();

        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn exhausting_attempts_during_retry_marks_record_failed() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::failed("still broken"))));
        let (engine, history, _dlq) = build_engine(providers);

        history.save(&sample_record(DeliveryStatus::Retrying, 2)).await.unwrap();
        engine.scan_once().await.unwrap();

        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn manual_retry_rejects_a_record_not_in_retrying() {
        let (engine, history, _dlq) = build_engine(HashMap::new());
        history.save(&sample_record(DeliveryStatus::Delivered, 1)).await.unwrap();

        let retried = engine.manual_retry("d1").await.unwrap();
        assert!(!retried);
    }

    #[tokio::test]
    async fn manual_retry_attempts_a_record_in_retrying() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::sent("m1"))));
        let (engine, history, _dlq) = build_engine(providers);
        history.save(&sample_record(DeliveryStatus::Retrying, 1)).await.unwrap();

        let retried = engine.manual_retry("d1").await.unwrap();
        assert!(retried);
        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn manual_retry_un_sticks_a_record_already_in_the_dlq() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let (engine, history, _dlq) = build_engine(providers);
        history.save(&sample_record(DeliveryStatus::Failed, 3)).await.unwrap();

        let retried = engine.manual_retry("d1").await.unwrap();
        assert!(retried);
        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn retry_that_stays_retrying_publishes_a_retry_scheduled_audit_event() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::failed("still broken"))));
        let (engine, history, _dlq, audit) = build_engine_with_audit(providers);
        history.save(&sample_record(DeliveryStatus::Retrying, 1)).await.unwrap();

        engine.scan_once().await.unwrap();

        let published = audit.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "notification.retry.scheduled");
    }

    #[tokio::test]
    async fn retry_that_exhausts_attempts_publishes_failed_and_dlq_moved() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::failed("still broken"))));
        let (engine, history, _dlq, audit) = build_engine_with_audit(providers);
        history.save(&sample_record(DeliveryStatus::Retrying, 2)).await.unwrap();

        engine.scan_once().await.unwrap();

        let published = audit.published();
        let kinds: Vec<&str> = published.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["notification.failed", "notification.dlq.moved"]);
    }
}
