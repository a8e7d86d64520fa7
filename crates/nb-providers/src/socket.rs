//! Socket-gateway adapter: HTTP POST to a peer service that fronts the
//! real-time connection layer, plus a connection check to decide between
//! `sent` (buffered) and `delivered` (peer currently connected).

use async_trait::async_trait;
use nb_common::{Channel, DeliveryRequest, ProviderOutcome};
use nb_config::SocketProviderConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;
use crate::ChannelProvider;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Map<String, serde_json::Value>,
}

pub struct SocketProvider {
    client: Client,
    config: SocketProviderConfig,
    circuit: CircuitBreaker,
}

impl SocketProvider {
    pub fn new(config: SocketProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .expect("failed to build socket gateway http client");
        Self { client, config, circuit: CircuitBreaker::default() }
    }

    async fn is_connected(&self, user_id: &str) -> bool {
        let url = format!("{}/api/connections/{}", self.config.base_url, user_id);
        match self.client.get(&url).header("X-API-Key", &self.config.api_key).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "connection check failed, assuming offline");
                false
            }
        }
    }
}

#[async_trait]
impl ChannelProvider for SocketProvider {
    fn channel(&self) -> Channel {
        Channel::Socket
    }

    async fn send(&self, request: &DeliveryRequest) -> ProviderOutcome {
        if !self.config.enabled {
            return ProviderOutcome::failed("channel not enabled");
        }
        if !self.circuit.allow_request() {
            return ProviderOutcome::failed("circuit breaker open");
        }

        let data: serde_json::Map<String, serde_json::Value> = request.data.clone().into_iter().collect();
        let payload = SendPayload { user_id: &request.user_id, title: &request.title, body: &request.body, data: &data };
        let url = format!("{}/api/notifications/send", self.config.base_url);

        match self.client.post(&url).header("X-API-Key", &self.config.api_key).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.circuit.record_success();
                let message_id = request.delivery_id.clone();
                if self.is_connected(&request.user_id).await {
                    ProviderOutcome::delivered(message_id)
                } else {
                    ProviderOutcome::sent(message_id)
                }
            }
            Ok(resp) => {
                self.circuit.record_failure();
                let status = resp.status();
                warn!(status = %status, "socket gateway rejected send");
                ProviderOutcome::failed(format!("socket gateway returned {status}"))
            }
            Err(e) => {
                self.circuit.record_failure();
                if e.is_timeout() {
                    ProviderOutcome::failed("socket gateway timeout")
                } else {
                    ProviderOutcome::failed(format!("socket gateway request failed: {e}"))
                }
            }
        }
    }
}
