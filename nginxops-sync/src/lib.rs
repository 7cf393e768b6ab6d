//! # nginxops-sync
//!
//! The synchronization engine: a local Git repository kept in step with its
//! origin, and three mirror-reconcilers that populate the `prod`, `git`, and
//! `preview` namespaces of the coordination store for every managed host.
//!
//! Each reconciler owns the subtree
//! `<prefix>/<group>/<host>/<config_dir_suffix>/` and no two reconcilers may
//! share one (a configuration constraint, not an enforced one).

pub mod error;
pub mod git_in;
pub mod mirror;
pub mod preview_in;
pub mod remote_in;
pub mod repo;

pub use error::SyncError;
pub use git_in::GitSyncer;
pub use mirror::{MirrorFile, MirrorStats};
pub use preview_in::PreviewSyncer;
pub use remote_in::RemoteSyncer;
pub use repo::{BranchTree, CommitInfo, RepoStatus, TreeFile};
