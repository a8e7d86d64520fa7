//! SMS adapter: E.164 validation, 160-char compose rule, `high` priority
//! for critical events.

use async_trait::async_trait;
use nb_common::{Channel, DeliveryRequest, Priority, ProviderOutcome};
use nb_config::SmsProviderConfig;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::ChannelProvider;

const SMS_CHAR_LIMIT: usize = 160;
const TIMEOUT: Duration = Duration::from_secs(10);

fn e164_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap())
}

pub fn is_valid_e164(phone: &str) -> bool {
    e164_pattern().is_match(phone)
}

/// Composes `title: body` plus `suffix`, truncating the body with an
/// ellipsis so the whole message fits `SMS_CHAR_LIMIT` characters.
pub fn compose_sms_body(title: &str, body: &str, suffix: &str) -> String {
    let prefix = format!("{title}: ");
    let fixed_len = prefix.chars().count() + suffix.chars().count();
    let budget = SMS_CHAR_LIMIT.saturating_sub(fixed_len);
    let body_len = body.chars().count();

    if body_len <= budget {
        return format!("{prefix}{body}{suffix}");
    }

    let keep = budget.saturating_sub(1);
    let truncated: String = body.chars().take(keep).collect();
    format!("{prefix}{truncated}…{suffix}")
}

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    from: &'a str,
    body: &'a str,
    priority: &'a str,
}

pub struct SmsProvider {
    client: Client,
    config: SmsProviderConfig,
}

impl SmsProvider {
    pub fn new(config: SmsProviderConfig) -> Self {
        let client = Client::builder().timeout(TIMEOUT).build().expect("failed to build sms http client");
        Self { client, config }
    }
}

#[async_trait]
impl ChannelProvider for SmsProvider {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, request: &DeliveryRequest) -> ProviderOutcome {
        if !self.config.enabled {
            return ProviderOutcome::failed("channel not enabled");
        }

        let Some(phone) = request.phone.as_deref() else {
            return ProviderOutcome::failed("no verified phone on file");
        };
        if !is_valid_e164(phone) {
            return ProviderOutcome::failed("phone number is not E.164");
        }

        let priority = if request.priority == Priority::Critical { "high" } else { "normal" };
        let body = compose_sms_body(&request.title, &request.body, &self.config.unsubscribe_suffix);
        let payload = SmsPayload { to: phone, from: &self.config.sender_id, body: &body, priority };

        let url = format!("{}/messages", self.config.api_base_url);
        match self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                ProviderOutcome::sent(request.delivery_id.clone())
            }
            Ok(resp) if resp.status().as_u16() == 400 || resp.status().as_u16() == 422 => {
                ProviderOutcome::failed(format!("sms provider rejected recipient: {}", resp.status()))
            }
            Ok(resp) => ProviderOutcome::failed(format!("sms provider returned {}", resp.status())),
            Err(e) if e.is_timeout() => ProviderOutcome::failed("sms provider timeout"),
            Err(e) => ProviderOutcome::failed(format!("sms provider request failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_e164() {
        assert!(is_valid_e164("+14155552671"));
        assert!(!is_valid_e164("4155552671"));
        assert!(!is_valid_e164("+0123"));
    }

    #[test]
    fn short_body_is_not_truncated() {
        let composed = compose_sms_body("Transfer Complete", "Your transfer of $50 has completed.", " Reply STOP to opt out.");
        assert!(!composed.contains('…'));
        assert!(composed.ends_with("Reply STOP to opt out."));
    }

    #[test]
    fn long_body_is_truncated_with_ellipsis() {
        let long_body = "x".repeat(200);
        let composed = compose_sms_body("Transfer Complete", &long_body, " Reply STOP to opt out.");
        assert!(composed.chars().count() <= SMS_CHAR_LIMIT);
        assert!(composed.contains('…'));
        assert!(composed.ends_with("Reply STOP to opt out."));
    }
}
