//! Static (topic, kind) -> notification content mapping. The event kind
//! catalog in `nb_common::catalog` owns routing defaults (channels,
//! priority, quiet-hours bypass); this table owns the human-readable
//! title/body text a given kind carries, and doubles as the allow-list of
//! which kind is expected on which topic. A kind arriving on a topic it
//! isn't mapped for is treated the same as an unrecognized kind: dropped
//! silently and debug-logged by the caller.

use serde_json::Map;

use crate::envelope::RouterCommand;
use nb_common::NotificationRequest;

type BodyFn = fn(&Map<String, serde_json::Value>) -> String;

struct MappingEntry {
    topic: &'static str,
    kind: &'static str,
    title: &'static str,
    body: BodyFn,
}

fn amount_str(payload: &Map<String, serde_json::Value>) -> String {
    payload
        .get("amount")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| format!("{f:.2}"))))
        .unwrap_or_else(|| "an amount".to_string())
}

fn reason_str(payload: &Map<String, serde_json::Value>) -> String {
    payload.get("reason").and_then(|v| v.as_str()).unwrap_or("an unrecognized reason").to_string()
}

static MAPPING_TABLE: &[MappingEntry] = &[
    MappingEntry {
        topic: "transaction-events",
        kind: "transfer_completed",
        title: "Transfer complete",
        body: |p| format!("Your transfer of {} has completed.", amount_str(p)),
    },
    MappingEntry {
        topic: "transaction-events",
        kind: "transfer_failed",
        title: "Transfer failed",
        body: |p| format!("Your transfer of {} could not be completed ({}).", amount_str(p), reason_str(p)),
    },
    MappingEntry {
        topic: "security-events",
        kind: "login_failed",
        title: "Failed sign-in attempt",
        body: |p| {
            let from = p.get("ipAddress").and_then(|v| v.as_str()).unwrap_or("an unknown location");
            format!("We blocked a failed sign-in attempt from {from}.")
        },
    },
    MappingEntry {
        topic: "security-events",
        kind: "password_changed",
        title: "Password changed",
        body: |_| "Your password was just changed. Contact us if this wasn't you.".to_string(),
    },
    MappingEntry {
        topic: "fraud-events",
        kind: "fraud_detected",
        title: "Suspicious activity detected",
        body: |p| format!("We flagged a suspicious transaction of {} on your account.", amount_str(p)),
    },
    MappingEntry {
        topic: "fraud-events",
        kind: "account_locked",
        title: "Account locked",
        body: |p| format!("Your account was locked ({}). Contact support to restore access.", reason_str(p)),
    },
    MappingEntry {
        topic: "user-lifecycle-events",
        kind: "account_created",
        title: "Welcome aboard",
        body: |_| "Your account has been created.".to_string(),
    },
    MappingEntry {
        topic: "user-lifecycle-events",
        kind: "kyc_required",
        title: "Verification needed",
        body: |_| "We need a few more details to verify your identity.".to_string(),
    },
];

fn lookup(topic: &str, kind: &str) -> Option<&'static MappingEntry> {
    MAPPING_TABLE.iter().find(|e| e.topic == topic && e.kind == kind)
}

/// Builds a routable notification request from a decoded command, or
/// `None` if (topic, kind) isn't a recognized combination.
pub fn build_request(topic: &str, command: &RouterCommand) -> Option<NotificationRequest> {
    let entry = lookup(topic, &command.kind)?;
    Some(NotificationRequest {
        user_id: command.user_id.clone(),
        event_kind: command.kind.clone(),
        source_id: command.source_id.clone(),
        title: entry.title.to_string(),
        body: (entry.body)(&command.payload),
        data: command.payload.clone().into_iter().collect(),
        priority: None,
        correlation_id: command.correlation_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(kind: &str) -> RouterCommand {
        RouterCommand {
            kind: kind.to_string(),
            user_id: "user-1".to_string(),
            source_id: "tx-1".to_string(),
            payload: Map::new(),
            correlation_id: Some("corr-1".to_string()),
        }
    }

    #[test]
    fn recognized_topic_kind_pair_builds_a_request() {
        let cmd = command("transfer_completed");
        let request = build_request("transaction-events", &cmd).expect("should map");
        assert_eq!(request.title, "Transfer complete");
        assert_eq!(request.user_id, "user-1");
    }

    #[test]
    fn kind_on_the_wrong_topic_is_unmapped() {
        let cmd = command("transfer_completed");
        assert!(build_request("security-events", &cmd).is_none());
    }

    #[test]
    fn unrecognized_kind_is_unmapped() {
        let cmd = command("something_new");
        assert!(build_request("transaction-events", &cmd).is_none());
    }
}
