//! JSON request/response shapes for the operator API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nginxops_sync::{CommitInfo, RepoStatus};
use nginxops_transport::{ExecOutput, PushOutcome};

// ---------------------------------------------------------------------------
// Shared query/request types
// ---------------------------------------------------------------------------

/// The namespace a read or check compares against production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The working-tree (`preview`) namespace.
    Preview,
    /// The committed (`git`) namespace.
    Prod,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub group: String,
    pub host: String,
    pub mode: Mode,
}

#[derive(Debug, Deserialize)]
pub struct FileDiffQuery {
    pub group: String,
    pub host: String,
    pub mode: Mode,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    pub mode: Mode,
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub group: String,
    pub server: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub hosts: Vec<HostSummary>,
}

#[derive(Debug, Serialize)]
pub struct HostSummary {
    pub name: String,
    pub host: String,
    pub config_dir_suffix: String,
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub prefix: String,
    pub paths: Vec<String>,
    /// `added | modified | deleted` per relPath; unchanged paths are absent.
    pub file_statuses: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct FileDiffResponse {
    pub path: String,
    pub prod_content: String,
    pub compare_content: String,
    pub diff: String,
    pub mode: Mode,
    pub compare_label: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub total: usize,
    pub skipped: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updated_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_files: Vec<String>,
}

impl From<PushOutcome> for SyncResult {
    fn from(outcome: PushOutcome) -> Self {
        Self {
            total: outcome.total,
            skipped: outcome.skipped,
            added: outcome.added,
            updated: outcome.updated,
            deleted: outcome.deleted,
            added_files: outcome.added_files,
            updated_files: outcome.updated_files,
            deleted_files: outcome.deleted_files,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NginxExecOutput {
    pub command: String,
    pub ok: bool,
    pub output: String,
}

impl From<ExecOutput> for NginxExecOutput {
    fn from(exec: ExecOutput) -> Self {
        Self {
            command: exec.command,
            ok: exec.ok,
            output: exec.output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub ok: bool,
    pub mode: Mode,
    pub sync: SyncResult,
    pub nginx: NginxExecOutput,
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub ok: bool,
    pub message: String,
    pub sync: SyncResult,
    pub nginx: NginxExecOutput,
}

#[derive(Debug, Serialize)]
pub struct GitStatusResponse {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_commit: Option<CommitSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_commit: Option<CommitSummary>,
    /// `synced | ahead | behind | diverged | error`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommitSummary {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl From<CommitInfo> for CommitSummary {
    fn from(info: CommitInfo) -> Self {
        Self {
            hash: info.hash,
            message: info.message,
            author: info.author,
            timestamp: info.timestamp,
        }
    }
}

impl From<RepoStatus> for GitStatusResponse {
    fn from(status: RepoStatus) -> Self {
        Self {
            branch: status.branch,
            local_commit: Some(status.local.into()),
            remote_commit: status.remote.map(Into::into),
            status: status.relation,
            diff: status.diff,
            error: status.error,
        }
    }
}
