use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("bus error: {0}")]
    Bus(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("router error: {0}")]
    Router(#[from] nb_common::NotificationError),

    #[error("store error: {0}")]
    Store(#[from] nb_store::StoreError),
}
