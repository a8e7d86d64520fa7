use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("store error: {0}")]
    Store(#[from] nb_store::StoreError),
}
