//! The event-kind catalog: a closed, process-wide set of notification kinds.
//!
//! Immutable at runtime. Authoritative for default channels/priority/dedup
//! window when a request omits them; users may override channels but not
//! the bypass/dedup flags.

use crate::types::{Channel, EventKindConfig, Priority};
use chrono::Duration;

const TRANSFER_CHANNELS: &[Channel] = &[Channel::Socket, Channel::Push];
const SECURITY_CHANNELS: &[Channel] = &[Channel::Socket, Channel::Sms, Channel::Push];
const FRAUD_CHANNELS: &[Channel] = &[Channel::Socket, Channel::Sms, Channel::Email, Channel::Push];
const LIFECYCLE_CHANNELS: &[Channel] = &[Channel::Email];

static CATALOG: &[EventKindConfig] = &[
    EventKindConfig {
        kind: "transfer_completed",
        default_channels: TRANSFER_CHANNELS,
        default_priority: Priority::High,
        bypass_quiet_hours: false,
        digest_eligible: true,
        dedup_window: Duration::minutes(5),
    },
    EventKindConfig {
        kind: "transfer_failed",
        default_channels: TRANSFER_CHANNELS,
        default_priority: Priority::High,
        bypass_quiet_hours: false,
        digest_eligible: true,
        dedup_window: Duration::minutes(5),
    },
    EventKindConfig {
        kind: "login_failed",
        default_channels: SECURITY_CHANNELS,
        default_priority: Priority::Medium,
        bypass_quiet_hours: false,
        digest_eligible: true,
        dedup_window: Duration::minutes(10),
    },
    EventKindConfig {
        kind: "password_changed",
        default_channels: SECURITY_CHANNELS,
        default_priority: Priority::High,
        bypass_quiet_hours: false,
        digest_eligible: false,
        dedup_window: Duration::minutes(5),
    },
    EventKindConfig {
        kind: "fraud_detected",
        default_channels: FRAUD_CHANNELS,
        default_priority: Priority::Critical,
        bypass_quiet_hours: true,
        digest_eligible: false,
        dedup_window: Duration::minutes(15),
    },
    EventKindConfig {
        kind: "account_locked",
        default_channels: FRAUD_CHANNELS,
        default_priority: Priority::Critical,
        bypass_quiet_hours: true,
        digest_eligible: false,
        dedup_window: Duration::minutes(15),
    },
    EventKindConfig {
        kind: "account_created",
        default_channels: LIFECYCLE_CHANNELS,
        default_priority: Priority::Low,
        bypass_quiet_hours: false,
        digest_eligible: true,
        dedup_window: Duration::hours(24),
    },
    EventKindConfig {
        kind: "kyc_required",
        default_channels: LIFECYCLE_CHANNELS,
        default_priority: Priority::Medium,
        bypass_quiet_hours: false,
        digest_eligible: true,
        dedup_window: Duration::hours(24),
    },
];

/// Looks up an event kind's static configuration. Unknown kinds have no
/// catalog entry; callers that can't find one should treat the request as
/// unrecognized (Event Ingestor drops it; Router rejects it as invalid).
pub fn lookup(kind: &str) -> Option<&'static EventKindConfig> {
    CATALOG.iter().find(|k| k.kind == kind)
}

pub fn all_kinds() -> impl Iterator<Item = &'static EventKindConfig> {
    CATALOG.iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraud_detected_bypasses_quiet_hours() {
        let cfg = lookup("fraud_detected").unwrap();
        assert!(cfg.bypass_quiet_hours);
        assert_eq!(cfg.default_priority, Priority::Critical);
    }

    #[test]
    fn unknown_kind_has_no_entry() {
        assert!(lookup("not_a_real_kind").is_none());
    }
}
