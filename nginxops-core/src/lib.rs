//! # nginxops-core
//!
//! Configuration model, store key layout, and the shared utilities that the
//! rest of the workspace builds on: the ignore matcher, the unified-diff
//! generator, and the service lifecycle manager.

pub mod config;
pub mod diff;
pub mod error;
pub mod ignore;
pub mod keys;
pub mod manager;

pub use config::{
    ApiConfig, AuthConfig, AuthMethod, Config, GitAuthConfig, GitAuthKind, GitConfig, LogConfig,
    ServerGroup, ServerTarget, StoreConfig, SyncConfig, SyncerConfig,
};
pub use diff::{generate_unified_diff, DiffResult};
pub use error::ConfigError;
pub use ignore::is_ignored;
pub use manager::{Service, ServiceManager};
