//! Digest Engine: periodically fires per-user summary emails for whichever
//! digest frequency is due, draining the queued notifications built up
//! while quiet hours (or a user's digest preference) held them back.
//! Mirrors `fc_scheduler::DispatchScheduler::start`'s tick-interval
//! poller shape (see nb-retry) and `fc_outbox`'s mark-success-only-
//! after-publish-succeeds ordering: a failed send leaves the queue
//! untouched for the next tick.

pub mod assemble;
pub mod error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use nb_common::{
    Channel, DeliveryRequest, DeliveryStatus, DigestFrequency, DigestSettings, Priority, ProviderStatus,
    UserPreferences,
};
use nb_config::DigestConfig;
use nb_crypto::FieldCipher;
use nb_providers::ChannelProvider;
use nb_router::delivery::publish_lifecycle_audit;
use nb_store::{AuditPublisher, DigestQueue, HistoryStore, PreferencesStore};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use error::DigestError;

const ALL_FREQUENCIES: [DigestFrequency; 3] = [DigestFrequency::Hourly, DigestFrequency::Daily, DigestFrequency::Weekly];

pub struct DigestEngine {
    config: DigestConfig,
    history: Arc<dyn HistoryStore>,
    preferences: Arc<dyn PreferencesStore>,
    digest_queue: Arc<dyn DigestQueue>,
    email_provider: Option<Arc<dyn ChannelProvider>>,
    cipher: Arc<FieldCipher>,
    audit: Arc<dyn AuditPublisher>,
    running: Arc<RwLock<bool>>,
}

impl DigestEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DigestConfig,
        history: Arc<dyn HistoryStore>,
        preferences: Arc<dyn PreferencesStore>,
        digest_queue: Arc<dyn DigestQueue>,
        email_provider: Option<Arc<dyn ChannelProvider>>,
        cipher: Arc<FieldCipher>,
        audit: Arc<dyn AuditPublisher>,
    ) -> Self {
        Self { config, history, preferences, digest_queue, email_provider, cipher, audit, running: Arc::new(RwLock::new(false)) }
    }

    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("digest engine disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("digest engine already running");
            return;
        }
        *running = true;
        drop(running);

        info!(check_interval_ms = self.config.check_interval_ms, "starting digest engine");

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(self.config.check_interval_ms));
            loop {
                ticker.tick().await;
                if !*self.running.read().await {
                    break;
                }
                if let Err(e) = self.scan_once().await {
                    error!(error = %e, "error scanning for due digests");
                }
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("digest engine stopped");
    }

    /// One scan tick: at most once per hour, per spec's firing grace
    /// window, checked against UTC minute (the minute component of an
    /// instant is timezone-offset-invariant for the whole-hour zones this
    /// service targets).
    async fn scan_once(&self) -> Result<(), DigestError> {
        let now = Utc::now();
        if now.minute() as i64 > self.config.firing_grace_minutes {
            return Ok(());
        }

        for frequency in ALL_FREQUENCIES {
            let users = self.digest_queue.users_with_entries(frequency).await?;
            for user_id in users {
                if let Err(e) = self.fire_if_due(&user_id, frequency).await {
                    error!(user_id = %user_id, error = %e, "error firing digest");
                }
            }
        }
        Ok(())
    }

    async fn fire_if_due(&self, user_id: &str, frequency: DigestFrequency) -> Result<(), DigestError> {
        let prefs = self.preferences.get_or_create(user_id).await?;
        if !prefs.digest.enabled || prefs.digest.frequency != frequency {
            return Ok(());
        }

        let local_now = resolve_local_now(&prefs);
        if !is_firing_hour(frequency, &prefs.digest, local_now) {
            return Ok(());
        }

        self.send_digest(user_id, frequency, &prefs).await
    }

    /// The `ForceDigest` operation: sends immediately, bypassing the
    /// hour-matching gate above, as long as the queue isn't empty.
    pub async fn force_digest(&self, user_id: &str) -> Result<bool, DigestError> {
        let prefs = self.preferences.get_or_create(user_id).await?;
        let entries = self.digest_queue.peek(user_id, prefs.digest.frequency).await?;
        if entries.is_empty() {
            return Ok(false);
        }
        self.send_digest(user_id, prefs.digest.frequency, &prefs).await?;
        Ok(true)
    }

    async fn send_digest(&self, user_id: &str, frequency: DigestFrequency, prefs: &UserPreferences) -> Result<(), DigestError> {
        let entries = self.digest_queue.peek(user_id, frequency).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let email = match prefs.email.as_ref().and_then(|f| self.cipher.decrypt(f).ok()) {
            Some(email) => email,
            None => {
                warn!(user_id = %user_id, "digest due but no decryptable email on file, leaving queue intact");
                return Ok(());
            }
        };

        let Some(provider) = &self.email_provider else {
            warn!(user_id = %user_id, "digest due but no email provider configured, leaving queue intact");
            return Ok(());
        };

        let request = DeliveryRequest {
            delivery_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_kind: "digest".to_string(),
            channel: Channel::Email,
            priority: Priority::Low,
            title: assemble::subject(frequency),
            body: assemble::body(frequency, &entries),
            data: HashMap::new(),
            correlation_id: None,
            phone: None,
            email: Some(email),
            devices: Vec::new(),
        };

        let outcome = provider.send(&request).await;
        match outcome.status {
            ProviderStatus::Sent | ProviderStatus::Delivered => {
                self.digest_queue.clear(user_id, frequency).await?;
                for entry in &entries {
                    if let Some(mut record) = self.history.get(&entry.delivery_id).await? {
                        record.status = DeliveryStatus::Delivered;
                        record.delivered_at.get_or_insert(Utc::now());
                        self.history.save(&record).await?;
                        publish_lifecycle_audit(self.audit.as_ref(), &record, false).await;
                    }
                }
                debug!(user_id = %user_id, entries = entries.len(), "digest sent and queue cleared");
                nb_router::router_metrics::record_digest_sent(frequency.as_str());
            }
            ProviderStatus::Failed => {
                warn!(user_id = %user_id, error = ?outcome.error, "digest send failed, leaving queue intact for next tick");
                nb_router::router_metrics::record_digest_failed(frequency.as_str());
            }
        }
        Ok(())
    }
}

fn resolve_local_now(prefs: &UserPreferences) -> DateTime<Tz> {
    let tz_str = prefs.quiet_hours.as_ref().map(|q| q.timezone.as_str()).unwrap_or("UTC");
    let tz: Tz = tz_str.parse().unwrap_or_else(|_| "UTC".parse().expect("UTC always parses"));
    Utc::now().with_timezone(&tz)
}

fn is_firing_hour(frequency: DigestFrequency, settings: &DigestSettings, local_now: DateTime<Tz>) -> bool {
    match frequency {
        DigestFrequency::Hourly => true,
        DigestFrequency::Daily => local_now.hour() as u8 == settings.hour,
        DigestFrequency::Weekly => local_now.weekday() == Weekday::Mon && local_now.hour() as u8 == settings.hour,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use nb_common::{DeliveryRecord, ProviderOutcome};
    use nb_store::{InMemoryAuditPublisher, InMemoryDigestQueue, InMemoryHistoryStore, InMemoryPreferencesStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEmailProvider {
        outcome: ProviderOutcome,
        calls: AtomicUsize,
    }

    impl StubEmailProvider {
        fn new(outcome: ProviderOutcome) -> Self {
            Self { outcome, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ChannelProvider for StubEmailProvider {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _request: &DeliveryRequest) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn sample_delivery_record(id: &str) -> DeliveryRecord {
        DeliveryRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            event_kind: "transfer_completed".to_string(),
            source_id: "t1".to_string(),
            channel: Channel::Email,
            priority: Priority::Medium,
            title: "Transfer complete".to_string(),
            body: "Your transfer has completed.".to_string(),
            data: HashMap::new(),
            status: DeliveryStatus::QueuedForDigest,
            provider_tag: None,
            provider_message_id: None,
            retry_count: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            correlation_id: None,
            idempotency_key: format!("u1:transfer_completed:t1:{id}"),
        }
    }

    async fn seed_user_with_one_entry(
        digest_queue: &Arc<dyn DigestQueue>,
        history: &Arc<dyn HistoryStore>,
        preferences: &Arc<dyn PreferencesStore>,
        frequency: DigestFrequency,
    ) {
        let mut prefs = preferences.get_or_create("u1").await.unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        let cipher = FieldCipher::new(&key).unwrap();
        prefs.email = Some(cipher.encrypt("user@example.com").unwrap());
        prefs.email_verified_at = Some(Utc::now());
        prefs.digest = DigestSettings { enabled: true, frequency, hour: 9 };
        preferences.save(&prefs).await.unwrap();

        history.save(&sample_delivery_record("d1")).await.unwrap();
        digest_queue
            .append(
                "u1",
                frequency,
                nb_common::types::DigestEntry {
                    notification_id: "n1".to_string(),
                    delivery_id: "d1".to_string(),
                    kind: "transfer_completed".to_string(),
                    title: "Transfer complete".to_string(),
                    body: "Your transfer has completed.".to_string(),
                    created_at: Utc::now(),
                    data: HashMap::new(),
                },
            )
            .await
            .unwrap();
    }

    fn build_engine(
        outcome: ProviderOutcome,
    ) -> (Arc<DigestEngine>, Arc<dyn DigestQueue>, Arc<dyn HistoryStore>, Arc<dyn PreferencesStore>) {
        let (engine, digest_queue, history, preferences, _audit) = build_engine_with_audit(outcome);
        (engine, digest_queue, history, preferences)
    }

    fn build_engine_with_audit(
        outcome: ProviderOutcome,
    ) -> (
        Arc<DigestEngine>,
        Arc<dyn DigestQueue>,
        Arc<dyn HistoryStore>,
        Arc<dyn PreferencesStore>,
        Arc<InMemoryAuditPublisher>,
    ) {
        let key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        let cipher = Arc::new(FieldCipher::new(&key).unwrap());
        let digest_queue: Arc<dyn DigestQueue> = Arc::new(InMemoryDigestQueue::new());
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let preferences: Arc<dyn PreferencesStore> = Arc::new(InMemoryPreferencesStore::new());
        let provider: Arc<dyn ChannelProvider> = Arc::new(StubEmailProvider::new(outcome));
        let audit = Arc::new(InMemoryAuditPublisher::new());

        let engine = Arc::new(DigestEngine::new(
            DigestConfig { enabled: true, check_interval_ms: 60_000, firing_grace_minutes: 5 },
            history.clone(),
            preferences.clone(),
            digest_queue.clone(),
            Some(provider),
            cipher,
            audit.clone(),
        ));
        (engine, digest_queue, history, preferences, audit)
    }

    #[tokio::test]
    async fn force_digest_sends_and_clears_on_success() {
        let (engine, digest_queue, history, preferences) = build_engine(ProviderOutcome::sent("m1"));
        seed_user_with_one_entry(&digest_queue, &history, &preferences, DigestFrequency::Daily).await;

        let sent = engine.force_digest("u1").await.unwrap();
        assert!(sent);

        assert!(digest_queue.peek("u1", DigestFrequency::Daily).await.unwrap().is_empty());
        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn force_digest_publishes_a_delivered_audit_event_per_entry() {
        let (engine, digest_queue, history, preferences, audit) = build_engine_with_audit(ProviderOutcome::delivered("m1"));
        seed_user_with_one_entry(&digest_queue, &history, &preferences, DigestFrequency::Daily).await;

        engine.force_digest("u1").await.unwrap();

        let published = audit.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "notification.delivered");
        assert_eq!(published[0].partition_key, "u1");
    }

    #[tokio::test]
    async fn force_digest_leaves_queue_intact_on_failure() {
        let (engine, digest_queue, history, preferences) = build_engine(ProviderOutcome::failed("smtp down"));
        seed_user_with_one_entry(&digest_queue, &history, &preferences, DigestFrequency::Daily).await;

        let sent = engine.force_digest("u1").await.unwrap();
        assert!(sent);

        assert_eq!(digest_queue.peek("u1", DigestFrequency::Daily).await.unwrap().len(), 1);
        let record = history.get("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::QueuedForDigest);
    }

    #[tokio::test]
    async fn force_digest_is_a_no_op_on_an_empty_queue() {
        let (engine, _digest_queue, _history, preferences) = build_engine(ProviderOutcome::sent("m1"));
        preferences.get_or_create("u1").await.unwrap();

        let sent = engine.force_digest("u1").await.unwrap();
        assert!(!sent);
    }

    #[test]
    fn hourly_always_fires_daily_only_at_its_hour() {
        let settings = DigestSettings { enabled: true, frequency: DigestFrequency::Daily, hour: 9 };
        let nine_am: DateTime<Tz> = "2026-07-26T09:00:00Z".parse::<DateTime<Utc>>().unwrap().with_timezone(&chrono_tz::UTC);
        let ten_am: DateTime<Tz> = "2026-07-26T10:00:00Z".parse::<DateTime<Utc>>().unwrap().with_timezone(&chrono_tz::UTC);

        assert!(is_firing_hour(DigestFrequency::Hourly, &settings, nine_am));
        assert!(is_firing_hour(DigestFrequency::Daily, &settings, nine_am));
        assert!(!is_firing_hour(DigestFrequency::Daily, &settings, ten_am));
    }
}
