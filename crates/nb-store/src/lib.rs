//! Durable and TTL-backed stores backing the notification pipeline: History,
//! DLQ and Preferences on Postgres; Rate Budget, Dedup and Digest Queue on
//! Redis with single-round-trip atomic primitives. Each trait has an
//! in-memory fake for tests (§9).

pub mod audit;
pub mod dedup;
pub mod digest_queue;
pub mod dlq;
pub mod error;
pub mod history;
pub mod preferences;
pub mod rate_budget;

pub use audit::{AuditPublisher, InMemoryAuditPublisher, PublishedAuditEvent, RedisAuditPublisher};
pub use dedup::{DedupDecision, DedupStore, InMemoryDedupStore, RedisDedupStore};
pub use digest_queue::{DigestQueue, InMemoryDigestQueue, RedisDigestQueue};
pub use dlq::{DlqStore, InMemoryDlqStore, PostgresDlqStore};
pub use error::StoreError;
pub use history::{HistoryStore, InMemoryHistoryStore, PostgresHistoryStore};
pub use preferences::{InMemoryPreferencesStore, PostgresPreferencesStore, PreferencesStore};
pub use rate_budget::{InMemoryRateBudgetStore, RateBudgetStore, RedisRateBudgetStore};
