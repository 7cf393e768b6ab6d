use thiserror::Error;

use nginxops_store::StoreError;

/// Errors from the SSH transport and push pipeline.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("auth configuration: {0}")]
    Auth(String),

    #[error("remote command '{command}' exited with status {status}: {output}")]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transfer task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("push pipeline cancelled")]
    Cancelled,
}

pub(crate) fn io_err(path: impl Into<String>, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.into(),
        source,
    }
}
