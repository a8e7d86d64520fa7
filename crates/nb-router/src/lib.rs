//! The Router: the single `Route(request) -> RouteResult` entrypoint that
//! composes Dedup, Preferences and Rate Budget stores with the Provider
//! Adapters. Mirrors `fc_router::manager::QueueManager` as the top-level
//! orchestrator, with `fc_router::pool::ProcessPool`'s bounded-semaphore
//! fan-out narrowed to a single `tokio::sync::Semaphore` (no per-group FIFO
//! queues are needed here — channel attempts for one request have no
//! ordering relationship with each other).

pub mod cache;
pub mod delivery;
pub mod quiet_hours;
pub mod router_metrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nb_common::{
    catalog, BudgetDecision, Channel, ChannelAttempt, DeliveryRecord, DeliveryRequest, DeliveryStatus, DigestEntry,
    NotificationError, NotificationRequest, Priority, ProviderOutcome, RouteResult, SkipEntry, UserPreferences,
};
use nb_config::{RateBudgetConfig, RetryConfig, RouterConfig};
use nb_crypto::FieldCipher;
use nb_providers::ChannelProvider;
use nb_store::{
    AuditPublisher, DedupDecision, DedupStore, DigestQueue, DlqStore, HistoryStore, PreferencesStore, RateBudgetStore,
};
use tokio::sync::Semaphore;
use tracing::{error, warn};
use uuid::Uuid;

use cache::PreferencesCache;
use delivery::{apply_outcome, publish_audit_event, publish_lifecycle_audit, resolve_budget_limits};

struct ChannelResult {
    attempt: Option<ChannelAttempt>,
    skip: Option<SkipEntry>,
}

pub struct Router {
    rate_budget_config: RateBudgetConfig,
    retry_config: RetryConfig,
    history: Arc<dyn HistoryStore>,
    dlq: Arc<dyn DlqStore>,
    preferences: Arc<dyn PreferencesStore>,
    rate_budget: Arc<dyn RateBudgetStore>,
    dedup: Arc<dyn DedupStore>,
    digest_queue: Arc<dyn DigestQueue>,
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
    cipher: Arc<FieldCipher>,
    audit: Arc<dyn AuditPublisher>,
    fanout: Arc<Semaphore>,
    cache: PreferencesCache,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router_config: &RouterConfig,
        rate_budget_config: RateBudgetConfig,
        retry_config: RetryConfig,
        history: Arc<dyn HistoryStore>,
        dlq: Arc<dyn DlqStore>,
        preferences: Arc<dyn PreferencesStore>,
        rate_budget: Arc<dyn RateBudgetStore>,
        dedup: Arc<dyn DedupStore>,
        digest_queue: Arc<dyn DigestQueue>,
        providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
        cipher: Arc<FieldCipher>,
        audit: Arc<dyn AuditPublisher>,
    ) -> Self {
        Self {
            rate_budget_config,
            retry_config,
            history,
            dlq,
            preferences,
            rate_budget,
            dedup,
            digest_queue,
            providers,
            cipher,
            audit,
            fanout: Arc::new(Semaphore::new(router_config.fanout_pool_size)),
            cache: PreferencesCache::new(Duration::from_secs(router_config.preferences_cache_ttl_secs)),
        }
    }

    /// Marks a Delivery Record as read and publishes `notification.read`.
    /// The admin/user API surface that would call this is out of core scope
    /// (§6), but the underlying state transition and audit event are not.
    pub async fn mark_read(&self, delivery_id: &str) -> Result<bool, NotificationError> {
        let mut record = match self.history.get(delivery_id).await.map_err(|e| NotificationError::Store(e.to_string()))? {
            Some(record) => record,
            None => return Ok(false),
        };
        record.read_at = Some(Utc::now());
        self.history.save(&record).await.map_err(|e| NotificationError::Store(e.to_string()))?;
        publish_audit_event(&self.audit, &record, nb_common::audit::event_kind::READ).await;
        Ok(true)
    }

    pub async fn get_or_create_preferences(&self, user_id: &str) -> Result<UserPreferences, NotificationError> {
        if let Some(cached) = self.cache.get(user_id) {
            return Ok(cached);
        }
        let prefs = self
            .preferences
            .get_or_create(user_id)
            .await
            .map_err(|e| NotificationError::PreferencesUnavailable(e.to_string()))?;
        self.cache.put(user_id.to_string(), prefs.clone());
        Ok(prefs)
    }

    pub fn invalidate_preferences_cache(&self, user_id: &str) {
        self.cache.invalidate(user_id);
    }

    pub async fn reset_budget(&self, user_id: &str, channel: Option<Channel>) -> Result<(), NotificationError> {
        self.rate_budget.reset(user_id, channel).await.map_err(|e| NotificationError::Store(e.to_string()))
    }

    pub async fn route(&self, request: NotificationRequest) -> Result<RouteResult, NotificationError> {
        let notification_id = Uuid::new_v4().to_string();

        let kind_config = catalog::lookup(&request.event_kind)
            .ok_or_else(|| NotificationError::InvalidRequest(format!("unrecognized event kind: {}", request.event_kind)))?;

        // Step 2: dedup gate. Fails open on store unavailability.
        let dedup_decision = self
            .dedup
            .check_and_register(&request.user_id, &request.event_kind, &request.source_id, &notification_id, kind_config.dedup_window)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "dedup store unavailable, failing open");
                DedupDecision { duplicate: false, original_notification_id: None }
            });

        if dedup_decision.duplicate {
            router_metrics::record_route_skipped("duplicate");
            let original = dedup_decision.original_notification_id.unwrap_or_default();
            return Ok(RouteResult::duplicate_of(notification_id, &original));
        }

        // Step 3: load preferences. A store failure here aborts Route — policy
        // cannot be applied without it.
        let prefs = self.get_or_create_preferences(&request.user_id).await?;

        if prefs.do_not_contact {
            router_metrics::record_route_skipped("do_not_contact");
            let mut result = RouteResult::new(notification_id);
            result.skipped.push(SkipEntry { channel: None, reason: "user has opted out (do-not-contact)".to_string() });
            return Ok(result);
        }

        let kind_override = prefs.kind_overrides.get(&request.event_kind).cloned();
        if kind_override.as_ref().and_then(|ov| ov.enabled) == Some(false) {
            router_metrics::record_route_skipped("kind_disabled");
            let mut result = RouteResult::new(notification_id);
            result.skipped.push(SkipEntry { channel: None, reason: format!("{} notifications disabled for user", request.event_kind) });
            return Ok(result);
        }

        let effective_priority = request.priority.unwrap_or(kind_config.default_priority);

        // Step 4: resolve channel set.
        let base_channels: Vec<Channel> = kind_override
            .as_ref()
            .and_then(|ov| ov.channels.clone())
            .unwrap_or_else(|| kind_config.default_channels.to_vec());

        let mut channels: Vec<Channel> = base_channels.into_iter().filter(|c| prefs.is_channel_enabled(*c)).collect();

        if effective_priority == Priority::Critical && channels.is_empty() && prefs.is_channel_enabled(Channel::Socket) {
            channels.push(Channel::Socket);
        }

        if channels.is_empty() {
            router_metrics::record_route_skipped("no_enabled_channels");
            let mut result = RouteResult::new(notification_id);
            result.skipped.push(SkipEntry { channel: None, reason: "no enabled channels for this notification".to_string() });
            return Ok(result);
        }

        // Step 5: quiet-hours gate. Critical always bypasses regardless of the
        // per-user `critical_bypass` flag, which preferences carries for
        // parity with the data model but the algorithm makes unconditional.
        let bypass_quiet_hours =
            kind_config.bypass_quiet_hours || kind_override.as_ref().and_then(|ov| ov.bypass_quiet_hours).unwrap_or(false);

        if effective_priority != Priority::Critical && !bypass_quiet_hours {
            if let Some(qh) = &prefs.quiet_hours {
                if quiet_hours::in_quiet_hours(qh) {
                    if kind_config.digest_eligible && prefs.digest.enabled {
                        return self.queue_for_digest(notification_id, &request, effective_priority, &prefs, &channels).await;
                    }

                    let mut result = RouteResult::new(notification_id);
                    result.queued = true;
                    for c in &channels {
                        router_metrics::record_route_skipped("quiet_hours");
                        result.skipped.push(SkipEntry { channel: Some(*c), reason: "deferred: quiet hours".to_string() });
                    }
                    return Ok(result);
                }
            }
        }

        // Step 6: per-channel attempt, concurrent and bounded by the fan-out
        // pool.
        let phone = prefs.phone.as_ref().and_then(|f| match self.cipher.decrypt(f) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "failed to decrypt phone field");
                None
            }
        });
        let email = prefs.email.as_ref().and_then(|f| match self.cipher.decrypt(f) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(error = %e, "failed to decrypt email field");
                None
            }
        });

        let attempts_fut = channels
            .iter()
            .map(|channel| self.attempt_channel(*channel, &request, &prefs, &phone, &email, effective_priority));
        let channel_results = futures::future::join_all(attempts_fut).await;

        let mut result = RouteResult::new(notification_id);
        for channel_result in channel_results {
            if let Some(attempt) = channel_result.attempt {
                result.attempts.push(attempt);
            }
            if let Some(skip) = channel_result.skip {
                result.skipped.push(skip);
            }
        }

        Ok(result)
    }

    async fn attempt_channel(
        &self,
        channel: Channel,
        request: &NotificationRequest,
        prefs: &UserPreferences,
        phone: &Option<String>,
        email: &Option<String>,
        effective_priority: Priority,
    ) -> ChannelResult {
        let _permit = self.fanout.acquire().await.expect("fan-out semaphore closed");

        // Step 6b, checked before budget consumption (Open Question 1,
        // resolved precondition-first): a missing contact never spends a
        // budget slot.
        if let Some(reason) = channel_precondition(channel, prefs, phone, email) {
            router_metrics::record_route_skipped("missing_contact");
            return ChannelResult { attempt: None, skip: Some(SkipEntry { channel: Some(channel), reason }) };
        }

        let idempotency_key =
            DeliveryRecord::idempotency_key_for(&request.user_id, &request.event_kind, &request.source_id, channel);
        let mut record = DeliveryRecord {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            event_kind: request.event_kind.clone(),
            source_id: request.source_id.clone(),
            channel,
            priority: effective_priority,
            title: request.title.clone(),
            body: request.body.clone(),
            data: request.data.clone(),
            status: DeliveryStatus::Pending,
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
            correlation_id: request.correlation_id.clone(),
            idempotency_key,
        };

        // Step 6a: budget check. Socket bypasses budget logic entirely.
        if channel != Channel::Socket {
            let limits = resolve_budget_limits(channel, &self.rate_budget_config, prefs);
            let decision = self.rate_budget.consume_budget(&request.user_id, channel, limits).await.unwrap_or_else(|e| {
                warn!(error = %e, "rate budget store unavailable, failing open");
                BudgetDecision { allowed: true, remaining: u32::MAX, reset_at: Utc::now() }
            });

            if !decision.allowed {
                record.status = DeliveryStatus::RateLimited;
                record.last_attempt_at = Some(Utc::now());
                if let Err(e) = self.history.save(&record).await {
                    warn!(error = %e, "history store write failed for rate-limited attempt");
                }
                router_metrics::record_delivery_outcome(channel.as_str(), record.status.as_str());
                return ChannelResult {
                    attempt: Some(ChannelAttempt { channel, status: DeliveryStatus::RateLimited, delivery_id: record.id.clone() }),
                    skip: Some(SkipEntry {
                        channel: Some(channel),
                        reason: format!("rate limit exceeded, resets at {}", decision.reset_at.to_rfc3339()),
                    }),
                };
            }
        }

        // Step 6c: invoke the provider.
        let delivery_request = DeliveryRequest {
            delivery_id: record.id.clone(),
            user_id: request.user_id.clone(),
            event_kind: request.event_kind.clone(),
            channel,
            priority: effective_priority,
            title: request.title.clone(),
            body: request.body.clone(),
            data: request.data.clone(),
            correlation_id: request.correlation_id.clone(),
            phone: phone.clone(),
            email: email.clone(),
            devices: prefs.devices.clone(),
        };

        let outcome = match self.providers.get(&channel) {
            Some(provider) => provider.send(&delivery_request).await,
            None => ProviderOutcome::failed("no provider configured for this channel"),
        };

        // Step 6d: persist the outcome.
        let dlq_record = apply_outcome(&mut record, &outcome, &self.retry_config);
        if let Err(e) = self.history.save(&record).await {
            warn!(error = %e, "history store write failed");
        }
        let dlq_written = dlq_record.is_some();
        if let Some(dlq) = dlq_record {
            if let Err(e) = self.dlq.insert(&dlq).await {
                error!(error = %e, "failed to write dlq record after exhausting retries");
            }
        }
        publish_lifecycle_audit(self.audit.as_ref(), &record, dlq_written).await;
        router_metrics::record_delivery_outcome(channel.as_str(), record.status.as_str());

        ChannelResult {
            attempt: Some(ChannelAttempt { channel, status: record.status, delivery_id: record.id.clone() }),
            skip: None,
        }
    }

    async fn queue_for_digest(
        &self,
        notification_id: String,
        request: &NotificationRequest,
        priority: Priority,
        prefs: &UserPreferences,
        channels: &[Channel],
    ) -> Result<RouteResult, NotificationError> {
        let idempotency_key =
            DeliveryRecord::idempotency_key_for(&request.user_id, &request.event_kind, &request.source_id, Channel::Email);
        let record = DeliveryRecord {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            event_kind: request.event_kind.clone(),
            source_id: request.source_id.clone(),
            channel: Channel::Email,
            priority,
            title: request.title.clone(),
            body: request.body.clone(),
            data: request.data.clone(),
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
            correlation_id: request.correlation_id.clone(),
            idempotency_key,
        };

        if let Err(e) = self.history.save(&record).await {
            warn!(error = %e, "history store write failed for digest-queued record");
        }

        let entry = DigestEntry {
            notification_id: notification_id.clone(),
            delivery_id: record.id.clone(),
            kind: request.event_kind.clone(),
            title: request.title.clone(),
            body: request.body.clone(),
            created_at: Utc::now(),
            data: request.data.clone(),
        };

        if let Err(e) = self.digest_queue.append(&request.user_id, prefs.digest.frequency, entry).await {
            error!(error = %e, "failed to append digest queue entry, notification will not be included in a digest");
        }

        let mut result = RouteResult::new(notification_id);
        result.digest_queued = true;
        result.attempts.push(ChannelAttempt { channel: Channel::Email, status: DeliveryStatus::QueuedForDigest, delivery_id: record.id });
        for c in channels {
            if *c != Channel::Email {
                result.skipped.push(SkipEntry { channel: Some(*c), reason: "deferred to digest (quiet hours)".to_string() });
            }
        }
        Ok(result)
    }
}

fn channel_precondition(channel: Channel, prefs: &UserPreferences, phone: &Option<String>, email: &Option<String>) -> Option<String> {
    match channel {
        Channel::Socket => None,
        Channel::Sms => {
            if phone.is_some() && prefs.phone_verified_at.is_some() {
                None
            } else {
                Some("sms requires a verified phone number".to_string())
            }
        }
        Channel::Email => {
            if email.is_some() && prefs.email_verified_at.is_some() {
                None
            } else {
                Some("email requires a verified address".to_string())
            }
        }
        Channel::Push => {
            if !prefs.devices.is_empty() {
                None
            } else {
                Some("push requires at least one registered device".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use nb_common::QuietHours;
    use nb_config::RouterConfig;
    use nb_crypto::FieldCipher;
    use nb_store::{
        InMemoryAuditPublisher, InMemoryDedupStore, InMemoryDigestQueue, InMemoryDlqStore, InMemoryHistoryStore,
        InMemoryPreferencesStore, InMemoryRateBudgetStore,
    };
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

    fn build_router(providers: HashMap<Channel, Arc<dyn ChannelProvider>>) -> Router {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let cipher = Arc::new(FieldCipher::new(&key).unwrap());
        Router::new(
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
        )
    }

    fn build_router_with_audit(providers: HashMap<Channel, Arc<dyn ChannelProvider>>) -> (Router, Arc<InMemoryAuditPublisher>) {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let cipher = Arc::new(FieldCipher::new(&key).unwrap());
        let audit = Arc::new(InMemoryAuditPublisher::new());
        let router = Router::new(
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
            audit.clone(),
        );
        (router, audit)
    }

    fn sample_request(kind: &str) -> NotificationRequest {
        NotificationRequest {
            user_id: "u1".to_string(),
            event_kind: kind.to_string(),
            source_id: "t1".to_string(),
            title: "Transfer complete".to_string(),
            body: "Your transfer has completed.".to_string(),
            data: HashMap::new(),
            priority: None,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn happy_path_delivers_on_socket_and_push() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        providers.insert(Channel::Push, Arc::new(StubProvider::new(Channel::Push, ProviderOutcome::sent("m2"))));
        let router = build_router(providers);

        let result = router.route(sample_request("transfer_completed")).await.unwrap();
        assert_eq!(result.attempts.len(), 2);
        assert!(result.skipped.iter().any(|s| s.channel == Some(Channel::Push)));
    }

    #[tokio::test]
    async fn second_identical_event_is_deduplicated() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let router = build_router(providers);

        let first = router.route(sample_request("transfer_completed")).await.unwrap();
        let second = router.route(sample_request("transfer_completed")).await.unwrap();

        assert!(second.skipped.iter().any(|s| s.reason.starts_with("duplicate of")));
        assert_eq!(second.attempts.len(), 0);
        let _ = first;
    }

    #[tokio::test]
    async fn critical_priority_bypasses_quiet_hours_via_socket() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        providers.insert(Channel::Sms, Arc::new(StubProvider::new(Channel::Sms, ProviderOutcome::sent("m2"))));
        let router = build_router(providers);

        let mut prefs = router.preferences.get_or_create("u1").await.unwrap();
        prefs.quiet_hours = Some(QuietHours { start_hour: 0, end_hour: 23, timezone: "UTC".to_string(), critical_bypass: true });
        router.preferences.save(&prefs).await.unwrap();
        router.invalidate_preferences_cache("u1");

        let result = router.route(sample_request("fraud_detected")).await.unwrap();
        assert!(result.attempts.iter().any(|a| a.channel == Channel::Socket));
    }

    #[tokio::test]
    async fn unverified_phone_skips_sms_without_touching_budget() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        providers.insert(Channel::Sms, Arc::new(StubProvider::new(Channel::Sms, ProviderOutcome::sent("m2"))));
        let router = build_router(providers);

        let result = router.route(sample_request("login_failed")).await.unwrap();
        assert!(result.skipped.iter().any(|s| s.channel == Some(Channel::Sms) && s.reason.contains("verified phone")));
    }

    #[tokio::test]
    async fn exhausted_retry_budget_writes_a_dlq_record() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::failed("socket down"))));
        let mut router = build_router(providers);
        router.retry_config = RetryConfig { max_attempts: 1, scan_interval_ms: 1000, scan_batch_size: 10, delay_schedule_ms: vec![1000] };

        let result = router.route(sample_request("transfer_completed")).await.unwrap();
        let attempt = result.attempts.iter().find(|a| a.channel == Channel::Socket).unwrap();
        assert_eq!(attempt.status, DeliveryStatus::Failed);

        let record = router.history.get(&attempt.delivery_id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn delivered_outcome_publishes_a_sent_and_delivered_audit_event() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let (router, audit) = build_router_with_audit(providers);

        router.route(sample_request("transfer_completed")).await.unwrap();

        let published = audit.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "notification.delivered");
        assert_eq!(published[0].partition_key, "u1");
    }

    #[tokio::test]
    async fn mark_read_sets_read_at_and_publishes_notification_read() {
        let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        providers.insert(Channel::Socket, Arc::new(StubProvider::new(Channel::Socket, ProviderOutcome::delivered("m1"))));
        let (router, audit) = build_router_with_audit(providers);

        let result = router.route(sample_request("transfer_completed")).await.unwrap();
        let delivery_id = result.attempts[0].delivery_id.clone();

        let marked = router.mark_read(&delivery_id).await.unwrap();
        assert!(marked);

        let record = router.history.get(&delivery_id).await.unwrap().unwrap();
        assert!(record.read_at.is_some());

        let published = audit.published();
        assert!(published.iter().any(|e| e.event_type == "notification.read"));
    }
}
