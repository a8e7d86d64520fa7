//! Prometheus counters for the notification pipeline (§10 Metrics),
//! mirrored from `fc_router::router_metrics`'s one-wrapper-per-metric
//! shape. Used by the Router itself and, since it's the pipeline's shared
//! dependency, by the Retry Engine, Digest Engine and Event Ingestor too.

use metrics::counter;

pub fn record_route_skipped(reason: &str) {
    counter!("notification_route_skipped_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_delivery_outcome(channel: &str, status: &str) {
    counter!("notification_delivery_total", "channel" => channel.to_string(), "status" => status.to_string()).increment(1);
}

pub fn record_retry_attempt(outcome: &str) {
    counter!("notification_retry_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_digest_sent(frequency: &str) {
    counter!("notification_digest_sent_total", "frequency" => frequency.to_string()).increment(1);
}

pub fn record_digest_failed(frequency: &str) {
    counter!("notification_digest_failed_total", "frequency" => frequency.to_string()).increment(1);
}

pub fn record_ingest_consumed(topic: &str, outcome: &str) {
    counter!("notification_ingest_consumed_total", "topic" => topic.to_string(), "outcome" => outcome.to_string()).increment(1);
}
