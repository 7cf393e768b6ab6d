//! Push pipeline: make a remote directory bit-identical to a store prefix.
//!
//! Order of operations: snapshot read, remote listing with per-file md5,
//! delete phase, then a capped-parallel upload phase. After a successful
//! push the set of paths under the destination equals the snapshot and every
//! file's md5 matches the store content. Empty directories left behind by
//! deletions are permitted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};

use nginxops_core::config::ServerTarget;
use nginxops_store::{Snapshot, SnapshotFile, StoreClient};

use crate::client::{is_missing, SshClient};
use crate::error::TransportError;
use crate::pool::SshPool;

/// Upload-phase concurrency cap, bounding load on the remote host.
const MAX_CONCURRENT_TRANSFERS: usize = 10;

/// Summary of one push: counts plus the affected relPaths.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    pub total: usize,
    pub skipped: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub added_files: Vec<String>,
    pub updated_files: Vec<String>,
    pub deleted_files: Vec<String>,
}

/// Captured output of a remote nginx invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub command: String,
    pub ok: bool,
    pub output: String,
}

/// Copy every file under `source_prefix` in the store to `dest_dir` on the
/// pool's target, deleting remote files the store does not contain.
///
/// The first error aborts the operation; in-flight transfers may complete
/// but their results are discarded.
pub async fn push_prefix(
    store: &StoreClient,
    pool: Arc<SshPool>,
    source_prefix: &str,
    dest_dir: &str,
) -> Result<PushOutcome, TransportError> {
    let dest = dest_dir.trim_end_matches('/').to_string();

    // 1. Snapshot the store prefix, metadata keys filtered out.
    let pairs = store.get_prefix(source_prefix).await?;
    let snapshot = Snapshot::from_pairs(source_prefix, &pairs);

    let mut outcome = PushOutcome {
        total: snapshot.len(),
        ..PushOutcome::default()
    };

    // 2. Remote listing: relPath -> remote md5.
    let remote_files = {
        let pool = pool.clone();
        let dest = dest.clone();
        task::spawn_blocking(move || -> Result<HashMap<String, String>, TransportError> {
            let client = pool.get()?;
            let listing = list_remote_files(&client, &dest);
            pool.put(client);
            listing
        })
        .await??
    };

    // 3–4. Delete phase: anything remote the snapshot does not contain.
    let to_delete = files_to_delete(&remote_files, &snapshot);
    if !to_delete.is_empty() {
        let pool = pool.clone();
        let dest = dest.clone();
        let rels = to_delete.clone();
        task::spawn_blocking(move || -> Result<(), TransportError> {
            let client = pool.get()?;
            for rel in &rels {
                let remote_path = format!("{dest}/{rel}");
                if let Err(err) = client.remove_file(&remote_path) {
                    pool.put(client);
                    return Err(err);
                }
                tracing::info!(path = %remote_path, "deleted remote file");
            }
            pool.put(client);
            Ok(())
        })
        .await??;
        outcome.deleted = to_delete.len();
        outcome.deleted_files = to_delete;
    }

    // 5. Upload phase, capped at MAX_CONCURRENT_TRANSFERS.
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TRANSFERS));
    let mut transfers: JoinSet<Result<Upload, TransportError>> = JoinSet::new();

    for (rel, file) in snapshot.files {
        let existing = remote_files.get(&rel).cloned();
        let pool = pool.clone();
        let semaphore = semaphore.clone();
        let dest = dest.clone();
        transfers.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TransportError::Cancelled)?;
            task::spawn_blocking(move || upload_one(&pool, &dest, rel, file, existing)).await?
        });
    }

    let mut first_err = None;
    while let Some(joined) = transfers.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(TransportError::from(err)),
        };
        match result {
            Ok(upload) => match upload.kind {
                UploadKind::Skipped => outcome.skipped += 1,
                UploadKind::Added => {
                    outcome.added += 1;
                    outcome.added_files.push(upload.rel);
                }
                UploadKind::Updated => {
                    outcome.updated += 1;
                    outcome.updated_files.push(upload.rel);
                }
            },
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    outcome.added_files.sort();
    outcome.updated_files.sort();
    Ok(outcome)
}

/// Run one command on the pool's target, capturing combined output and a
/// success flag. A nonzero exit status is reported in the flag, never as an
/// error; the bytes are already on disk by the time nginx runs.
pub async fn run_remote_command(
    pool: Arc<SshPool>,
    command: String,
) -> Result<ExecOutput, TransportError> {
    task::spawn_blocking(move || {
        let client = pool.get()?;
        let result = client.run_command(&command);
        pool.put(client);
        let out = result?;
        Ok(ExecOutput {
            ok: out.exit_status == 0,
            output: out.output,
            command,
        })
    })
    .await?
}

/// `nginx -t` invocation for a pushed directory, assuming `nginx.conf` at
/// its root.
pub fn nginx_test_command(target: &ServerTarget, dest_dir: &str) -> String {
    format!(
        "{} -t -c {}/nginx.conf",
        target.nginx_binary(),
        dest_dir.trim_end_matches('/')
    )
}

/// `nginx -s reload` invocation.
pub fn nginx_reload_command(target: &ServerTarget) -> String {
    format!("{} -s reload", target.nginx_binary())
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Skipped,
    Added,
    Updated,
}

struct Upload {
    rel: String,
    kind: UploadKind,
}

fn upload_one(
    pool: &SshPool,
    dest: &str,
    rel: String,
    file: SnapshotFile,
    existing: Option<String>,
) -> Result<Upload, TransportError> {
    if existing.as_deref() == Some(file.md5_hex.as_str()) {
        return Ok(Upload {
            rel,
            kind: UploadKind::Skipped,
        });
    }

    let target_path = format!("{dest}/{rel}");
    let client = pool.get()?;
    let write = (|| {
        if let Some(idx) = target_path.rfind('/') {
            client.mkdir_all(&target_path[..idx])?;
        }
        client.write_file(&target_path, &file.bytes)
    })();
    pool.put(client);
    write?;

    let kind = if existing.is_some() {
        UploadKind::Updated
    } else {
        UploadKind::Added
    };
    tracing::info!(path = %target_path, kind = ?kind, "uploaded file");
    Ok(Upload { rel, kind })
}

/// RelPaths present on the remote but absent from the snapshot, sorted.
fn files_to_delete(remote_files: &HashMap<String, String>, snapshot: &Snapshot) -> Vec<String> {
    let mut doomed: Vec<String> = remote_files
        .keys()
        .filter(|rel| !snapshot.files.contains_key(*rel))
        .cloned()
        .collect();
    doomed.sort();
    doomed
}

/// Recursively list every file under `base`, mapping relPath to its remote
/// md5. A missing base directory yields an empty listing. A file whose hash
/// cannot be computed maps to an empty string, which always compares unequal
/// and forces a re-upload.
fn list_remote_files(
    client: &SshClient,
    base: &str,
) -> Result<HashMap<String, String>, TransportError> {
    let mut files = HashMap::new();
    match walk_remote_dir(client, base, base, &mut files) {
        Ok(()) => Ok(files),
        Err(TransportError::Ssh(err)) if is_missing(&err) && files.is_empty() => Ok(HashMap::new()),
        Err(err) => Err(err),
    }
}

fn walk_remote_dir(
    client: &SshClient,
    base: &str,
    current: &str,
    files: &mut HashMap<String, String>,
) -> Result<(), TransportError> {
    for (path, stat) in client.read_dir(current)? {
        let full = path.to_string_lossy().into_owned();
        if stat.is_dir() {
            walk_remote_dir(client, base, &full, files)?;
        } else {
            let rel = full
                .strip_prefix(base)
                .unwrap_or(full.as_str())
                .trim_start_matches('/')
                .to_string();
            let hash = client.file_hash(&full).unwrap_or_default();
            files.insert(rel, hash);
        }
    }
    Ok(())
}
