use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("store error: {0}")]
    Store(#[from] nb_store::StoreError),
}
