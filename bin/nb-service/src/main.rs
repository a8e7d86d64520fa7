//! Notification service composition root.
//!
//! Wires the store backends, provider adapters and the Router together,
//! then runs the three drivers that keep notifications moving: the Event
//! Ingestor (bus -> Router), the Retry Engine (periodic rescan of
//! `retrying` records) and the Digest Engine (periodic per-user batch
//! sends). Mirrors `bin/fc-router/src/main.rs`'s wiring order: config,
//! then backing clients, then services, then the long-running drivers,
//! then a signal-driven graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use nb_common::Channel;
use nb_config::AppConfig;
use nb_crypto::FieldCipher;
use nb_digest::DigestEngine;
use nb_ingest::bus::{BusConsumer, RedisStreamsConsumer};
use nb_ingest::EventIngestor;
use nb_providers::{ChannelProvider, EmailProvider, PushProvider, SmsProvider, SocketProvider};
use nb_retry::RetryEngine;
use nb_router::Router;
use nb_store::{
    AuditPublisher, DedupStore, DigestQueue, DlqStore, HistoryStore, PostgresDlqStore, PostgresHistoryStore,
    PostgresPreferencesStore, PreferencesStore, RateBudgetStore, RedisAuditPublisher, RedisDedupStore,
    RedisDigestQueue, RedisRateBudgetStore,
};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    nb_common::logging::init_logging("nb-service");

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!("starting notification service");

    let redis_client = redis::Client::open(config.redis.url.as_str()).context("invalid redis url")?;
    let conn = ConnectionManager::new(redis_client).await.context("failed to connect to redis")?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;

    let history: Arc<dyn HistoryStore> = Arc::new(PostgresHistoryStore::new(pg_pool.clone()));
    let dlq: Arc<dyn DlqStore> = Arc::new(PostgresDlqStore::new(pg_pool.clone()));
    let preferences: Arc<dyn PreferencesStore> = Arc::new(PostgresPreferencesStore::new(pg_pool.clone()));
    let dedup: Arc<dyn DedupStore> = Arc::new(RedisDedupStore::new(conn.clone()));
    let rate_budget: Arc<dyn RateBudgetStore> = Arc::new(RedisRateBudgetStore::new(conn.clone()));
    let digest_queue: Arc<dyn DigestQueue> = Arc::new(RedisDigestQueue::new(conn.clone()));

    history.init_schema().await.context("history schema init failed")?;
    dlq.init_schema().await.context("dlq schema init failed")?;
    preferences.init_schema().await.context("preferences schema init failed")?;
    info!("postgres schema initialized");

    let cipher = Arc::new(FieldCipher::new(&config.crypto.field_encryption_key).context("invalid field encryption key")?);

    let audit: Arc<dyn AuditPublisher> =
        Arc::new(RedisAuditPublisher::new(conn.clone(), config.event_bus.audit_topic.clone(), "nb-service"));

    let mut providers: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
    providers.insert(Channel::Socket, Arc::new(SocketProvider::new(config.providers.socket.clone())));
    providers.insert(Channel::Sms, Arc::new(SmsProvider::new(config.providers.sms.clone())));
    providers.insert(Channel::Email, Arc::new(EmailProvider::new(config.providers.email.clone())));
    providers.insert(Channel::Push, Arc::new(PushProvider::new(config.providers.push.clone())));

    let router = Arc::new(Router::new(
        &config.router,
        config.rate_budget.clone(),
        config.retry.clone(),
        history.clone(),
        dlq.clone(),
        preferences.clone(),
        rate_budget.clone(),
        dedup.clone(),
        digest_queue.clone(),
        providers.clone(),
        cipher.clone(),
        audit.clone(),
    ));

    let instance_id = std::env::var("HOSTNAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let mut consumers: Vec<Arc<dyn BusConsumer>> = Vec::with_capacity(config.ingest.topics.len());
    for topic in &config.ingest.topics {
        let consumer = RedisStreamsConsumer::new(
            conn.clone(),
            topic.clone(),
            config.event_bus.consumer_group.clone(),
            instance_id.clone(),
        )
        .await
        .with_context(|| format!("failed to initialize consumer group for topic {topic}"))?;
        consumers.push(Arc::new(consumer));
    }
    info!(topics = config.ingest.topics.len(), "bus consumers ready");

    let ingestor = Arc::new(EventIngestor::new(config.ingest.clone(), consumers, router.clone(), dlq.clone()));

    let retry_engine = Arc::new(RetryEngine::new(
        config.retry.clone(),
        config.rate_budget.clone(),
        history.clone(),
        dlq.clone(),
        preferences.clone(),
        rate_budget.clone(),
        providers.clone(),
        cipher.clone(),
        audit.clone(),
    ));

    let digest_engine = Arc::new(DigestEngine::new(
        config.digest.clone(),
        history.clone(),
        preferences.clone(),
        digest_queue.clone(),
        providers.get(&Channel::Email).cloned(),
        cipher.clone(),
        audit.clone(),
    ));

    let metrics_addr: std::net::SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install prometheus exporter")?;
    info!(port = config.metrics.port, "metrics endpoint listening");

    let ingestor_handle = tokio::spawn(ingestor.clone().run());
    retry_engine.clone().start().await;
    digest_engine.clone().start().await;

    info!("notification service started, press ctrl+c to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");

    ingestor.shutdown();
    retry_engine.stop().await;
    digest_engine.stop().await;

    let grace = Duration::from_secs(config.router.shutdown_grace_secs);
    if tokio::time::timeout(grace, ingestor_handle).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "ingestor did not drain within the shutdown grace window");
    }

    info!("notification service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
