//! Error types for the synchronization engine.

use std::path::PathBuf;

use thiserror::Error;

use nginxops_store::StoreError;
use nginxops_transport::TransportError;

/// All errors that can arise from repository management and reconciler
/// passes.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("git auth configuration: {0}")]
    Auth(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
