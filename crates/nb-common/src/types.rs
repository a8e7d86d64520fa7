//! Domain types shared across the notification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Channels & Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Socket,
    Sms,
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Socket => "socket",
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

// ============================================================================
// Notification Request (ephemeral Router input)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: String,
    pub event_kind: String,
    /// Upstream business id (e.g. a transaction id), used for dedup. "none" means
    /// "do not deduplicate beyond kind+user in this window".
    #[serde(default = "default_source_id")]
    pub source_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub priority: Option<Priority>,
    pub correlation_id: Option<String>,
}

fn default_source_id() -> String {
    "none".to_string()
}

// ============================================================================
// Event Kind Catalog
// ============================================================================

#[derive(Debug, Clone)]
pub struct EventKindConfig {
    pub kind: &'static str,
    pub default_channels: &'static [Channel],
    pub default_priority: Priority,
    pub bypass_quiet_hours: bool,
    pub digest_eligible: bool,
    pub dedup_window: chrono::Duration,
}

// ============================================================================
// Delivery Record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Retrying,
    RateLimited,
    QueuedForDigest,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::RateLimited => "rate_limited",
            DeliveryStatus::QueuedForDigest => "queued_for_digest",
        }
    }

    pub fn from_str_db(s: &str) -> Self {
        match s {
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "failed" => DeliveryStatus::Failed,
            "retrying" => DeliveryStatus::Retrying,
            "rate_limited" => DeliveryStatus::RateLimited,
            "queued_for_digest" => DeliveryStatus::QueuedForDigest,
            _ => DeliveryStatus::Pending,
        }
    }

    /// Whether this is one of the two terminal "counts against invariants" statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub user_id: String,
    pub event_kind: String,
    pub source_id: String,
    pub channel: Channel,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub status: DeliveryStatus,
    pub provider_tag: Option<String>,
    pub provider_message_id: Option<String>,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub idempotency_key: String,
}

impl DeliveryRecord {
    pub fn idempotency_key_for(user_id: &str, kind: &str, source_id: &str, channel: Channel) -> String {
        format!("{user_id}:{kind}:{source_id}:{channel}")
    }
}

// ============================================================================
// Delivery Request (Router output, Provider Adapter input)
// ============================================================================

/// What the Router hands to a `ChannelProvider`. Contact fields arrive
/// already decrypted; the provider never touches `nb-crypto` or a store.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub delivery_id: String,
    pub user_id: String,
    pub event_kind: String,
    pub channel: Channel,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, serde_json::Value>,
    pub correlation_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub devices: Vec<PushDevice>,
}

// ============================================================================
// Outcome types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub status: ProviderStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl ProviderOutcome {
    pub fn sent(provider_message_id: impl Into<String>) -> Self {
        Self { status: ProviderStatus::Sent, provider_message_id: Some(provider_message_id.into()), error: None }
    }

    pub fn delivered(provider_message_id: impl Into<String>) -> Self {
        Self { status: ProviderStatus::Delivered, provider_message_id: Some(provider_message_id.into()), error: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { status: ProviderStatus::Failed, provider_message_id: None, error: Some(reason.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct SkipEntry {
    pub channel: Option<Channel>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ChannelAttempt {
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub delivery_id: String,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub notification_id: String,
    pub attempts: Vec<ChannelAttempt>,
    pub skipped: Vec<SkipEntry>,
    pub queued: bool,
    pub digest_queued: bool,
}

impl RouteResult {
    pub fn new(notification_id: String) -> Self {
        Self { notification_id, attempts: Vec::new(), skipped: Vec::new(), queued: false, digest_queued: false }
    }

    pub fn duplicate_of(notification_id: String, original_id: &str) -> Self {
        let mut result = Self::new(notification_id);
        result.skipped.push(SkipEntry {
            channel: None,
            reason: format!("duplicate of {original_id}"),
        });
        result
    }
}

// ============================================================================
// User Preferences
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 12],
}

impl std::fmt::Debug for EncryptedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedField").field("ciphertext", &"***").field("nonce", &"***").finish()
    }
}

impl std::fmt::Display for EncryptedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDevice {
    pub device_id: String,
    pub token: String,
    pub platform: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl DigestFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFrequency::Hourly => "hourly",
            DigestFrequency::Daily => "daily",
            DigestFrequency::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: String,
    pub critical_bypass: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindOverride {
    pub enabled: Option<bool>,
    pub channels: Option<Vec<Channel>>,
    pub bypass_quiet_hours: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBudgetOverride {
    pub hourly_cap: Option<u32>,
    pub daily_cap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSettings {
    pub enabled: bool,
    pub frequency: DigestFrequency,
    pub hour: u8,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self { enabled: false, frequency: DigestFrequency::Daily, hour: 9 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,
    pub channels_enabled: HashMap<Channel, bool>,
    pub phone: Option<EncryptedField>,
    pub phone_verified_at: Option<DateTime<Utc>>,
    pub email: Option<EncryptedField>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub devices: Vec<PushDevice>,
    pub kind_overrides: HashMap<String, KindOverride>,
    pub quiet_hours: Option<QuietHours>,
    pub budget_overrides: HashMap<Channel, ChannelBudgetOverride>,
    pub digest: DigestSettings,
    pub do_not_contact: bool,
    pub do_not_contact_reason: Option<String>,
    pub do_not_contact_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const MAX_DEVICES: usize = 10;

impl UserPreferences {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            channels_enabled: HashMap::new(),
            phone: None,
            phone_verified_at: None,
            email: None,
            email_verified_at: None,
            devices: Vec::new(),
            kind_overrides: HashMap::new(),
            quiet_hours: None,
            budget_overrides: HashMap::new(),
            digest: DigestSettings::default(),
            do_not_contact: false,
            do_not_contact_reason: None,
            do_not_contact_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_channel_enabled(&self, channel: Channel) -> bool {
        self.channels_enabled.get(&channel).copied().unwrap_or(true)
    }

    /// Registers a device, evicting the oldest (by last_seen) on overflow.
    pub fn register_device(&mut self, device: PushDevice) {
        self.devices.retain(|d| d.device_id != device.device_id);
        self.devices.push(device);
        if self.devices.len() > MAX_DEVICES {
            self.devices.sort_by_key(|d| d.last_seen);
            let overflow = self.devices.len() - MAX_DEVICES;
            self.devices.drain(0..overflow);
        }
    }
}

// ============================================================================
// Rate Budget
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub hourly_cap: u32,
    pub daily_cap: u32,
}

#[derive(Debug, Clone)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

// ============================================================================
// Digest Entry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub notification_id: String,
    pub delivery_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

// ============================================================================
// DLQ Record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqReviewState {
    PendingReview,
    UnderReview,
    Resolved,
    Abandoned,
}

impl DlqReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqReviewState::PendingReview => "pending_review",
            DlqReviewState::UnderReview => "under_review",
            DlqReviewState::Resolved => "resolved",
            DlqReviewState::Abandoned => "abandoned",
        }
    }

    pub fn from_str_db(s: &str) -> Self {
        match s {
            "under_review" => DlqReviewState::UnderReview,
            "resolved" => DlqReviewState::Resolved,
            "abandoned" => DlqReviewState::Abandoned,
            _ => DlqReviewState::PendingReview,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub id: String,
    pub delivery_id: Option<String>,
    pub user_id: String,
    pub event_kind: String,
    pub channel: Option<Channel>,
    pub priority: Priority,
    pub snapshot: serde_json::Value,
    pub failure_reason: String,
    pub total_attempts: u32,
    pub failure_history: Vec<String>,
    pub review_state: DlqReviewState,
    pub resolver_id: Option<String>,
    pub resolution_notes: Option<String>,
    pub malformed: bool,
    pub created_at: DateTime<Utc>,
}
