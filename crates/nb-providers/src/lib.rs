//! The four Provider Adapters behind one uniform contract. An adapter never
//! throws for an ordinary delivery failure — it returns a `ProviderOutcome`
//! with a `failed` status and a reason string. `async_trait` object-safety
//! lets the Router and Digest Engine hold `Arc<dyn ChannelProvider>` without
//! knowing which channel they're talking to.

pub mod circuit;
pub mod email;
pub mod push;
pub mod sms;
pub mod socket;

use async_trait::async_trait;
use nb_common::{Channel, DeliveryRequest, ProviderOutcome};

pub use email::EmailProvider;
pub use push::PushProvider;
pub use sms::SmsProvider;
pub use socket::SocketProvider;

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn channel(&self) -> Channel;
    async fn send(&self, request: &DeliveryRequest) -> ProviderOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_common::{Priority, ProviderStatus};
    use nb_config::SocketProviderConfig;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_request(delivery_id: &str) -> DeliveryRequest {
        DeliveryRequest {
            delivery_id: delivery_id.to_string(),
            user_id: "u1".to_string(),
            event_kind: "transfer_completed".to_string(),
            channel: Channel::Socket,
            priority: Priority::High,
            title: "Transfer Complete".to_string(),
            body: "Your transfer has completed.".to_string(),
            data: HashMap::new(),
            correlation_id: None,
            phone: None,
            email: None,
            devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn socket_provider_reports_delivered_when_peer_connected() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/api/notifications/send"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET")).and(path("/api/connections/u1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = SocketProviderConfig { enabled: true, base_url: server.uri(), api_key: "key".to_string() };
        let provider = SocketProvider::new(config);
        let outcome = provider.send(&sample_request("d1")).await;
        assert_eq!(outcome.status, ProviderStatus::Delivered);
    }

    #[tokio::test]
    async fn socket_provider_reports_sent_when_peer_offline() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/api/notifications/send"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET")).and(path("/api/connections/u1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = SocketProviderConfig { enabled: true, base_url: server.uri(), api_key: "key".to_string() };
        let provider = SocketProvider::new(config);
        let outcome = provider.send(&sample_request("d2")).await;
        assert_eq!(outcome.status, ProviderStatus::Sent);
    }

    #[tokio::test]
    async fn disabled_channel_fails_without_a_call() {
        let config = SocketProviderConfig { enabled: false, base_url: "http://localhost:1".to_string(), api_key: String::new() };
        let provider = SocketProvider::new(config);
        let outcome = provider.send(&sample_request("d3")).await;
        assert_eq!(outcome.status, ProviderStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("channel not enabled"));
    }
}
