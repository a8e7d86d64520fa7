//! Outcome application shared between the Router's first attempt and the
//! Retry Engine's subsequent ones: one function, two callers, so the
//! lifecycle transitions in the retry schedule are defined exactly once.

use chrono::{Duration as ChronoDuration, Utc};
use nb_common::audit::{event_kinds_for, AuditEvent};
use nb_common::{BudgetLimits, Channel, DeliveryRecord, DeliveryStatus, DlqRecord, DlqReviewState, ProviderOutcome, ProviderStatus, UserPreferences};
use nb_config::RateBudgetConfig;
use nb_config::RetryConfig;
use nb_store::AuditPublisher;
use tracing::warn;
use uuid::Uuid;

const FAILURE_HISTORY_KEY: &str = "_failure_history";

fn failure_history(record: &DeliveryRecord) -> Vec<String> {
    record
        .data
        .get(FAILURE_HISTORY_KEY)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Applies a provider outcome to a Delivery Record, advancing its lifecycle.
/// On a failure that exhausts `retry.max_attempts`, returns a DLQ record the
/// caller is responsible for persisting (Router's lifecycle rule: DLQ
/// records are only ever created alongside a record's transition into
/// terminal `failed`, never independently).
pub fn apply_outcome(record: &mut DeliveryRecord, outcome: &ProviderOutcome, retry: &RetryConfig) -> Option<DlqRecord> {
    let now = Utc::now();
    record.last_attempt_at = Some(now);

    match outcome.status {
        ProviderStatus::Sent => {
            record.status = DeliveryStatus::Sent;
            record.sent_at = Some(now);
            record.provider_message_id = outcome.provider_message_id.clone();
            record.error = None;
            record.next_attempt_at = None;
            None
        }
        ProviderStatus::Delivered => {
            record.status = DeliveryStatus::Delivered;
            record.sent_at.get_or_insert(now);
            record.delivered_at = Some(now);
            record.provider_message_id = outcome.provider_message_id.clone();
            record.error = None;
            record.next_attempt_at = None;
            None
        }
        ProviderStatus::Failed => {
            record.retry_count += 1;
            record.error = outcome.error.clone();

            let mut history = failure_history(record);
            history.push(outcome.error.clone().unwrap_or_else(|| "unknown provider failure".to_string()));
            record.data.insert(FAILURE_HISTORY_KEY.to_string(), serde_json::json!(history));

            if record.retry_count >= retry.max_attempts {
                record.status = DeliveryStatus::Failed;
                record.next_attempt_at = None;
                Some(DlqRecord {
                    id: Uuid::new_v4().to_string(),
                    delivery_id: Some(record.id.clone()),
                    user_id: record.user_id.clone(),
                    event_kind: record.event_kind.clone(),
                    channel: Some(record.channel),
                    priority: record.priority,
                    snapshot: serde_json::to_value(&*record).unwrap_or(serde_json::Value::Null),
                    failure_reason: record.error.clone().unwrap_or_else(|| "exhausted retry attempts".to_string()),
                    total_attempts: record.retry_count,
                    failure_history: history,
                    review_state: DlqReviewState::PendingReview,
                    resolver_id: None,
                    resolution_notes: None,
                    malformed: false,
                    created_at: now,
                })
            } else {
                record.status = DeliveryStatus::Retrying;
                let delay_ms = retry
                    .delay_schedule_ms
                    .get((record.retry_count - 1) as usize)
                    .or_else(|| retry.delay_schedule_ms.last())
                    .copied()
                    .unwrap_or(3_600_000);
                record.next_attempt_at = Some(now + ChronoDuration::milliseconds(delay_ms as i64));
                None
            }
        }
    }
}

/// Emits every audit event kind implied by a record's post-`apply_outcome`
/// state (§6 egress/audit). Shared by the Router's first attempt and the
/// Retry Engine's subsequent ones, same as `apply_outcome` itself. Publish
/// failures are logged and swallowed: the audit bus is best-effort and must
/// never fail or retry a delivery attempt on its own account.
pub async fn publish_lifecycle_audit(audit: &dyn AuditPublisher, record: &DeliveryRecord, dlq_written: bool) {
    for event_type in event_kinds_for(record.status, dlq_written) {
        publish_audit_event(audit, record, event_type).await;
    }
}

/// Publishes a single named audit event for a Delivery Record, e.g.
/// `notification.read` for the mark-read operation, which has no
/// `apply_outcome` transition of its own.
pub async fn publish_audit_event(audit: &dyn AuditPublisher, record: &DeliveryRecord, event_type: &str) {
    let body = serde_json::to_value(AuditEvent::from_record(record)).unwrap_or(serde_json::Value::Null);
    if let Err(e) = audit.publish(event_type, &record.user_id, &body).await {
        warn!(error = %e, event_type, delivery_id = %record.id, "failed to publish audit event");
    }
}

/// Per-user overrides are authoritative and may widen or narrow the
/// service-wide defaults (Open Question 3, resolved in DESIGN.md).
pub fn resolve_budget_limits(channel: Channel, defaults: &RateBudgetConfig, prefs: &UserPreferences) -> BudgetLimits {
    let base = match channel {
        Channel::Sms => defaults.sms,
        Channel::Email => defaults.email,
        Channel::Push => defaults.push,
        Channel::Socket => return BudgetLimits { hourly_cap: u32::MAX, daily_cap: u32::MAX },
    };

    match prefs.budget_overrides.get(&channel) {
        Some(ov) => BudgetLimits {
            hourly_cap: ov.hourly_cap.unwrap_or(base.hourly_cap),
            daily_cap: ov.daily_cap.unwrap_or(base.daily_cap),
        },
        None => BudgetLimits { hourly_cap: base.hourly_cap, daily_cap: base.daily_cap },
    }
}
