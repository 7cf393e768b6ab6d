//! # nginxops-transport
//!
//! Secure-shell transport for the managed fleet: a client multiplexing a
//! command channel and an SFTP file channel over one connection, a bounded
//! per-target connection pool, and the push pipeline that makes a remote
//! directory bit-identical to a store namespace.
//!
//! The SSH layer is blocking; async callers bridge it with
//! `tokio::task::spawn_blocking`, which is how the push pipeline runs its
//! transfers.

pub mod client;
pub mod error;
pub mod pool;
pub mod push;

pub use client::{CommandOutput, SshClient};
pub use error::TransportError;
pub use pool::{SshPool, DEFAULT_POOL_CAPACITY};
pub use push::{
    nginx_reload_command, nginx_test_command, push_prefix, run_remote_command, ExecOutput,
    PushOutcome,
};
