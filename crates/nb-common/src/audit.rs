//! The audit event-kind catalog for the egress event bus (§6 Event bus,
//! egress/audit). Router, Retry Engine and Digest Engine each publish these
//! at Delivery Record lifecycle transitions; the bus transport and GZIP
//! framing live in `nb_store::audit`, which depends on this module only for
//! the kind names and the body shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Channel, DeliveryRecord, DeliveryStatus};

pub const EVENT_VERSION: &str = "1";

pub mod event_kind {
    pub const SENT: &str = "notification.sent";
    pub const DELIVERED: &str = "notification.delivered";
    pub const FAILED: &str = "notification.failed";
    pub const READ: &str = "notification.read";
    pub const RETRY_SCHEDULED: &str = "notification.retry.scheduled";
    pub const DLQ_MOVED: &str = "notification.dlq.moved";
}

/// Minimum audit body: notification id, user id, channel and timestamps
/// (§6). `notification_id` here is the Delivery Record id, since the audit
/// bus is keyed off delivery lifecycle transitions rather than the
/// route-level notification id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub notification_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl AuditEvent {
    pub fn from_record(record: &DeliveryRecord) -> Self {
        Self {
            notification_id: record.id.clone(),
            user_id: record.user_id.clone(),
            channel: record.channel,
            status: record.status,
            created_at: record.created_at,
            last_attempt_at: record.last_attempt_at,
            sent_at: record.sent_at,
            delivered_at: record.delivered_at,
            read_at: record.read_at,
        }
    }
}

/// Which audit event kinds a Delivery Record's post-transition state should
/// emit. A failure that also exhausted its retries emits both `failed` and
/// `dlq.moved` — they are distinct events, not aliases of each other.
pub fn event_kinds_for(status: DeliveryStatus, dlq_written: bool) -> &'static [&'static str] {
    match status {
        DeliveryStatus::Sent => &[event_kind::SENT],
        DeliveryStatus::Delivered => &[event_kind::DELIVERED],
        DeliveryStatus::Retrying => &[event_kind::RETRY_SCHEDULED],
        DeliveryStatus::Failed if dlq_written => &[event_kind::FAILED, event_kind::DLQ_MOVED],
        DeliveryStatus::Failed => &[event_kind::FAILED],
        _ => &[],
    }
}
