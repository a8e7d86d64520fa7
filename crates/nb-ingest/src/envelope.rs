//! Wire shape of an event-bus message (spec §6: `eventType`, `timestamp`,
//! `service`, `version`, optional `correlationId`, `payload` containing
//! `userId`) and its decode into a strict, typed command. A payload that
//! fails to decode into this shape is the Design Note's "reject shapes
//! that fail to decode" case — the caller routes it to DLQ with a
//! `malformed` marker rather than propagating untyped data further.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Map;

#[derive(Debug, Clone, Deserialize)]
pub struct BusEnvelope {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
}

/// A decoded, strictly-typed event ready for (topic, kind) mapping.
#[derive(Debug, Clone)]
pub struct RouterCommand {
    pub kind: String,
    pub user_id: String,
    pub source_id: String,
    pub payload: Map<String, serde_json::Value>,
    pub correlation_id: Option<String>,
}

impl TryFrom<&BusEnvelope> for RouterCommand {
    type Error = String;

    fn try_from(envelope: &BusEnvelope) -> Result<Self, Self::Error> {
        let payload = envelope.payload.as_object().ok_or("payload is not a JSON object")?.clone();

        let user_id = payload
            .get("userId")
            .and_then(|v| v.as_str())
            .ok_or("payload missing required userId field")?
            .to_string();

        let source_id = payload
            .get("sourceId")
            .or_else(|| payload.get("transactionId"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "none".to_string());

        Ok(RouterCommand { kind: envelope.event_type.clone(), user_id, source_id, payload, correlation_id: envelope.correlation_id.clone() })
    }
}
