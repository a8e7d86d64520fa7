//! Shared domain types, error taxonomy, the event-kind catalog, and
//! structured logging setup for the notification service.

pub mod audit;
pub mod catalog;
pub mod error;
pub mod logging;
pub mod types;

pub use error::NotificationError;
pub use types::*;
