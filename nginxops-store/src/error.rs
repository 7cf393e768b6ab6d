use thiserror::Error;

/// Store errors are transport-only: a missing key is an `Ok(None)`, never an
/// error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] etcd_client::Error),
}
