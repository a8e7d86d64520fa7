//! Error taxonomy.
//!
//! Policy refusals (duplicate, quiet hours, rate limit, missing contact,
//! do-not-contact) are never represented here — they are `Skip` entries on
//! `RouteResult`. This enum is reserved for things that actually fail a
//! call: bad input shapes, unavailable stores, and provider/config faults.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("preferences store unavailable: {0}")]
    PreferencesUnavailable(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),
}
