//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub dedup: DedupConfig,
    pub rate_budget: RateBudgetConfig,
    pub retry: RetryConfig,
    pub digest: DigestConfig,
    pub router: RouterConfig,
    pub ingest: IngestConfig,
    pub event_bus: EventBusConfig,
    pub crypto: CryptoConfig,
    pub providers: ProvidersConfig,
    pub metrics: MetricsConfig,

    pub data_dir: String,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            dedup: DedupConfig::default(),
            rate_budget: RateBudgetConfig::default(),
            retry: RetryConfig::default(),
            digest: DigestConfig::default(),
            router: RouterConfig::default(),
            ingest: IngestConfig::default(),
            event_bus: EventBusConfig::default(),
            crypto: CryptoConfig::default(),
            providers: ProvidersConfig::default(),
            metrics: MetricsConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: "redis://localhost:6379".to_string(), pool_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/notifications".to_string(),
            max_connections: 10,
        }
    }
}

/// `DEDUP_WINDOW_MS`: default dedup window, used when an event kind doesn't
/// specify one. Most kinds specify their own window in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub default_window_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { default_window_ms: 5 * 60 * 1000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCaps {
    pub hourly_cap: u32,
    pub daily_cap: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateBudgetConfig {
    pub sms: ChannelCaps,
    pub email: ChannelCaps,
    pub push: ChannelCaps,
}

impl Default for ChannelCaps {
    fn default() -> Self {
        Self { hourly_cap: 0, daily_cap: 0 }
    }
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            sms: ChannelCaps { hourly_cap: 10, daily_cap: 50 },
            email: ChannelCaps { hourly_cap: 20, daily_cap: 100 },
            push: ChannelCaps { hourly_cap: 30, daily_cap: 200 },
        }
    }
}

/// `MAX_RETRY_ATTEMPTS` and the attempt->delay schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub scan_interval_ms: u64,
    pub scan_batch_size: usize,
    /// delay in ms indexed by retry_count after increment (1-based)
    pub delay_schedule_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            scan_interval_ms: 30_000,
            scan_batch_size: 100,
            delay_schedule_ms: vec![1_000, 5_000, 30_000, 300_000, 3_600_000],
        }
    }
}

/// `DIGEST_ENABLED`, `DIGEST_CHECK_INTERVAL_MS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    /// how many minutes past the top of the hour a firing window stays open
    pub firing_grace_minutes: i64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self { enabled: true, check_interval_ms: 60_000, firing_grace_minutes: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// size of the bounded per-request channel fan-out pool
    pub fanout_pool_size: usize,
    pub socket_timeout_ms: u64,
    pub provider_default_timeout_ms: u64,
    pub preferences_cache_ttl_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fanout_pool_size: 4,
            socket_timeout_ms: 5_000,
            provider_default_timeout_ms: 10_000,
            preferences_cache_ttl_secs: 300,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub topics: Vec<String>,
    pub batch_size: usize,
    pub per_batch_concurrency: usize,
    pub session_timeout_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topics: vec![
                "security-events".to_string(),
                "transaction-events".to_string(),
                "fraud-events".to_string(),
                "user-lifecycle-events".to_string(),
            ],
            batch_size: 20,
            per_batch_concurrency: 8,
            session_timeout_secs: 30,
            heartbeat_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub brokers: Vec<String>,
    pub consumer_group: String,
    pub audit_topic: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["redis://localhost:6379".to_string()],
            consumer_group: "notification-service".to_string(),
            audit_topic: "notification-audit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// base64 32-byte AES-256 key. Required; empty fails validation at startup.
    pub field_encryption_key: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { field_encryption_key: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub socket: SocketProviderConfig,
    pub sms: SmsProviderConfig,
    pub email: EmailProviderConfig,
    pub push: PushProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            socket: SocketProviderConfig::default(),
            sms: SmsProviderConfig::default(),
            email: EmailProviderConfig::default(),
            push: PushProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
}

impl Default for SocketProviderConfig {
    fn default() -> Self {
        Self { enabled: true, base_url: "http://localhost:9100".to_string(), api_key: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsProviderConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub api_key: String,
    pub sender_id: String,
    pub unsubscribe_suffix: String,
}

impl Default for SmsProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "https://api.sms-provider.example/v1".to_string(),
            api_key: String::new(),
            sender_id: "BANK".to_string(),
            unsubscribe_suffix: " Reply STOP to opt out.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailProviderConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: "notifications@bank.example".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushProviderConfig {
    pub enabled: bool,
    pub gateway_url: String,
    pub api_key: String,
}

impl Default for PushProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gateway_url: "https://push-gateway.example/v1/send".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crypto.field_encryption_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "crypto.field_encryption_key is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn example_toml() -> String {
        r#"# Notification service configuration
# Environment variables override these settings

[redis]
url = "redis://localhost:6379"
pool_size = 10

[database]
url = "postgres://localhost:5432/notifications"
max_connections = 10

[dedup]
default_window_ms = 300000

[rate_budget.sms]
hourly_cap = 10
daily_cap = 50

[rate_budget.email]
hourly_cap = 20
daily_cap = 100

[rate_budget.push]
hourly_cap = 30
daily_cap = 200

[retry]
max_attempts = 5
scan_interval_ms = 30000
scan_batch_size = 100
delay_schedule_ms = [1000, 5000, 30000, 300000, 3600000]

[digest]
enabled = true
check_interval_ms = 60000
firing_grace_minutes = 5

[router]
fanout_pool_size = 4
socket_timeout_ms = 5000
provider_default_timeout_ms = 10000
preferences_cache_ttl_secs = 300
shutdown_grace_secs = 30

[ingest]
topics = ["security-events", "transaction-events", "fraud-events", "user-lifecycle-events"]
batch_size = 20
per_batch_concurrency = 8
session_timeout_secs = 30
heartbeat_secs = 3

[event_bus]
brokers = ["redis://localhost:6379"]
consumer_group = "notification-service"
audit_topic = "notification-audit"

[crypto]
field_encryption_key = ""

[providers.socket]
enabled = true
base_url = "http://localhost:9100"
api_key = ""

[providers.sms]
enabled = true
api_base_url = "https://api.sms-provider.example/v1"
api_key = ""
sender_id = "BANK"
unsubscribe_suffix = " Reply STOP to opt out."

[providers.email]
enabled = true
smtp_host = "localhost"
smtp_port = 587
smtp_username = ""
smtp_password = ""
from_address = "notifications@bank.example"

[providers.push]
enabled = true
gateway_url = "https://push-gateway.example/v1/send"
api_key = ""

[metrics]
port = 9090

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_caps() {
        let config = AppConfig::default();
        assert_eq!(config.rate_budget.sms.hourly_cap, 10);
        assert_eq!(config.rate_budget.sms.daily_cap, 50);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_schedule_ms, vec![1_000, 5_000, 30_000, 300_000, 3_600_000]);
    }

    #[test]
    fn example_toml_round_trips() {
        let toml_str = AppConfig::example_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.router.fanout_pool_size, 4);
    }

    #[test]
    fn validate_rejects_missing_key() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }
}
