//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "application.toml",
    "notification-service.toml",
    "./config/config.toml",
    "/etc/notification-service/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("NOTIFICATION_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("NOTIFICATION_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_DATABASE_URL") {
            config.database.url = val;
        }

        if let Ok(val) = env::var("DEDUP_WINDOW_MS") {
            if let Ok(ms) = val.parse() {
                config.dedup.default_window_ms = ms;
            }
        }

        if let Ok(val) = env::var("MAX_RETRY_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.retry.max_attempts = n;
            }
        }
        if let Ok(val) = env::var("RETRY_SCAN_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.scan_interval_ms = ms;
            }
        }

        if let Ok(val) = env::var("DIGEST_ENABLED") {
            config.digest.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("DIGEST_CHECK_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                config.digest.check_interval_ms = ms;
            }
        }

        if let Ok(val) = env::var("NOTIFICATION_ENCRYPTION_KEY") {
            config.crypto.field_encryption_key = val;
        }

        if let Ok(val) = env::var("SOCKET_GATEWAY_ENABLED") {
            config.providers.socket.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("SOCKET_GATEWAY_BASE_URL") {
            config.providers.socket.base_url = val;
        }
        if let Ok(val) = env::var("SOCKET_GATEWAY_API_KEY") {
            config.providers.socket.api_key = val;
        }
        if let Ok(val) = env::var("SMS_PROVIDER_ENABLED") {
            config.providers.sms.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("EMAIL_PROVIDER_ENABLED") {
            config.providers.email.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("EMAIL_SMTP_HOST") {
            config.providers.email.smtp_host = val;
        }
        if let Ok(val) = env::var("PUSH_PROVIDER_ENABLED") {
            config.providers.push.enabled = val.parse().unwrap_or(true);
        }

        if let Ok(val) = env::var("EVENT_BUS_BROKERS") {
            config.event_bus.brokers = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = env::var("EVENT_BUS_CONSUMER_GROUP") {
            config.event_bus.consumer_group = val;
        }

        if let Ok(val) = env::var("NOTIFICATION_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
