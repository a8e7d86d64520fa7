//! Push adapter: multi-device multicast over a generic HTTP push gateway.
//! Maps internal priority to platform-native priority, applies a 1-hour
//! TTL, and supports a silent-data variant for background delivery.

use async_trait::async_trait;
use nb_common::{Channel, DeliveryRequest, Priority, ProviderOutcome};
use nb_config::PushProviderConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::ChannelProvider;

const PUSH_TTL_SECS: u32 = 60 * 60;
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    token: &'a str,
    platform: &'a str,
    priority: &'a str,
    #[serde(rename = "priorityLevel")]
    priority_level: u8,
    ttl: u32,
    title: Option<&'a str>,
    body: Option<&'a str>,
    data: &'a serde_json::Map<String, serde_json::Value>,
    silent: bool,
}

pub struct PushProvider {
    client: Client,
    config: PushProviderConfig,
}

impl PushProvider {
    pub fn new(config: PushProviderConfig) -> Self {
        let client = Client::builder().timeout(TIMEOUT).build().expect("failed to build push http client");
        Self { client, config }
    }

    /// Sends to one registered device. `silent` drops title/body in favor
    /// of a data-only payload, used for background wake-ups.
    async fn send_to_device(
        &self,
        device: &nb_common::PushDevice,
        request: &DeliveryRequest,
        silent: bool,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, String> {
        let (priority, priority_level) =
            if request.priority == Priority::Critical { ("high", 10) } else { ("normal", 5) };

        let payload = PushPayload {
            token: &device.token,
            platform: &device.platform,
            priority,
            priority_level,
            ttl: PUSH_TTL_SECS,
            title: if silent { None } else { Some(&request.title) },
            body: if silent { None } else { Some(&request.body) },
            data,
            silent,
        };

        let resp = self
            .client
            .post(&self.config.gateway_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { "timeout".to_string() } else { format!("request failed: {e}") })?;

        if resp.status().is_success() {
            Ok(device.device_id.clone())
        } else if resp.status().as_u16() == 410 || resp.status().as_u16() == 404 {
            let suffix = token_suffix(&device.token);
            warn!(device_id = %device.device_id, token_suffix = %suffix, "push token revoked, upstream cleanup needed");
            Err(format!("device token revoked (token ending {suffix})"))
        } else {
            Err(format!("push gateway returned {}", resp.status()))
        }
    }
}

fn token_suffix(token: &str) -> String {
    let len = token.len();
    if len <= 6 {
        token.to_string()
    } else {
        token[len - 6..].to_string()
    }
}

#[async_trait]
impl ChannelProvider for PushProvider {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, request: &DeliveryRequest) -> ProviderOutcome {
        if !self.config.enabled {
            return ProviderOutcome::failed("channel not enabled");
        }
        if request.devices.is_empty() {
            return ProviderOutcome::failed("no registered devices");
        }

        let silent = request.data.get("silent").and_then(|v| v.as_bool()).unwrap_or(false);
        let data: serde_json::Map<String, serde_json::Value> = request.data.clone().into_iter().collect();

        let mut delivered_ids = Vec::new();
        let mut errors = Vec::new();
        for device in &request.devices {
            match self.send_to_device(device, request, silent, &data).await {
                Ok(id) => delivered_ids.push(id),
                Err(e) => errors.push(e),
            }
        }

        if !delivered_ids.is_empty() {
            ProviderOutcome::sent(delivered_ids.join(","))
        } else {
            ProviderOutcome::failed(errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_handles_short_tokens() {
        assert_eq!(token_suffix("ab"), "ab");
        assert_eq!(token_suffix("abcdefghij"), "efghij");
    }
}
