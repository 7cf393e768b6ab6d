//! # nginxops-store
//!
//! Narrow wrapper over the etcd v3 client plus the [`Snapshot`] view the
//! push pipeline and the tree API read from. Key absence is never an error;
//! the only error surface is transport unavailability.

pub mod client;
pub mod error;
pub mod snapshot;

pub use client::StoreClient;
pub use error::StoreError;
pub use snapshot::{hash_index, Snapshot, SnapshotFile};
