//! Shared reconciler skeleton.
//!
//! One pass takes the enumerated source files, writes every entry whose
//! content hash differs from the stored `.hash` sibling, and mirror-deletes
//! everything under the namespace whose base key is outside the desired set.
//!
//! Per-file write order is content, then hash, then metadata. A reader that
//! observes the hash without the content must re-check both, which is also
//! why the skip condition requires the content key to exist: a crash between
//! the content and hash writes is healed on the next pass.

use std::collections::{HashMap, HashSet};

use nginxops_core::keys::{self, COMMIT_SUFFIX, HASH_SUFFIX, META_SUFFIX};
use nginxops_store::StoreClient;

use crate::error::SyncError;

/// One file as enumerated by a reconciler's source of truth.
#[derive(Debug, Clone)]
pub struct MirrorFile {
    pub rel_path: String,
    pub bytes: Vec<u8>,
    pub meta: serde_json::Value,
    /// Commit sha, written as the `.commit` sibling (git namespace only).
    pub commit: Option<String>,
}

/// Counters for one reconciler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub synced: usize,
    pub skipped: usize,
    pub deleted: usize,
}

/// Run one mirror pass for a namespace.
pub async fn mirror_pass(
    store: &StoreClient,
    ns_prefix: &str,
    files: Vec<MirrorFile>,
    log_host: &str,
) -> Result<MirrorStats, SyncError> {
    let pairs = store.get_prefix(ns_prefix).await?;
    let existing: HashMap<String, Vec<u8>> = pairs.into_iter().collect();

    let mut stats = MirrorStats::default();
    let mut desired = HashSet::with_capacity(files.len());

    for file in files {
        desired.insert(file.rel_path.clone());

        let key = keys::entry_key(ns_prefix, &file.rel_path);
        let hash_key = format!("{key}{HASH_SUFFIX}");
        let hash = keys::md5_hex(&file.bytes);

        let existing_hash = existing
            .get(&hash_key)
            .map(|v| String::from_utf8_lossy(v).into_owned());
        let content_exists = existing.contains_key(&key);

        // Skip only when the hash matches AND the content is actually there.
        if existing_hash.as_deref() == Some(hash.as_str()) && content_exists {
            tracing::debug!(host = %log_host, key = %key, hash = %hash, "hash matches and content exists, skipping");
            stats.skipped += 1;
            continue;
        }

        if let Err(err) = store.put(&key, file.bytes).await {
            tracing::error!(host = %log_host, key = %key, error = %err, "failed to put file into store");
            continue;
        }

        // Metadata writes are best-effort; a miss here leaves the hashes
        // mismatched and the next pass retries.
        if let Err(err) = store.put(&hash_key, hash.clone()).await {
            tracing::warn!(host = %log_host, key = %hash_key, error = %err, "failed to put hash sibling");
        }
        match serde_json::to_vec(&file.meta) {
            Ok(doc) => {
                if let Err(err) = store.put(&format!("{key}{META_SUFFIX}"), doc).await {
                    tracing::warn!(host = %log_host, key = %key, error = %err, "failed to put meta sibling");
                }
            }
            Err(err) => {
                tracing::warn!(host = %log_host, key = %key, error = %err, "failed to encode meta document");
            }
        }
        if let Some(commit) = &file.commit {
            if let Err(err) = store
                .put(&format!("{key}{COMMIT_SUFFIX}"), commit.clone())
                .await
            {
                tracing::warn!(host = %log_host, key = %key, error = %err, "failed to put commit sibling");
            }
        }

        tracing::info!(
            host = %log_host,
            key = %key,
            hash = %hash,
            existing = existing_hash.as_deref().unwrap_or(""),
            re_sync = !content_exists && existing_hash.as_deref() == Some(hash.as_str()),
            "synced file into store",
        );
        stats.synced += 1;
    }

    stats.deleted = mirror_delete(store, ns_prefix, &desired).await?;
    Ok(stats)
}

/// Delete every key under `ns_prefix` whose base key is not in the desired
/// set, metadata siblings included. Individual delete failures are skipped;
/// the next pass retries them.
pub async fn mirror_delete(
    store: &StoreClient,
    ns_prefix: &str,
    desired: &HashSet<String>,
) -> Result<usize, SyncError> {
    let allowed = allowed_keys(ns_prefix, desired);
    let scope = format!("{ns_prefix}/");

    let pairs = store.get_prefix(ns_prefix).await?;
    let mut deleted = 0;
    for (key, _) in pairs {
        if !key.starts_with(&scope) {
            continue;
        }
        if allowed.contains(&key) {
            continue;
        }
        if store.delete(&key).await.is_ok() {
            deleted += 1;
        }
    }

    if deleted > 0 {
        tracing::info!(prefix = %ns_prefix, deleted, "mirror deleted orphan store keys");
    }
    Ok(deleted)
}

/// The full key family allowed to exist for a desired set: every base key
/// plus its `.hash`, `.meta`, and `.commit` siblings.
pub fn allowed_keys(ns_prefix: &str, desired: &HashSet<String>) -> HashSet<String> {
    let mut allowed = HashSet::with_capacity(desired.len() * 4);
    for rel in desired {
        let base = keys::entry_key(ns_prefix, rel);
        allowed.insert(format!("{base}{HASH_SUFFIX}"));
        allowed.insert(format!("{base}{META_SUFFIX}"));
        allowed.insert(format!("{base}{COMMIT_SUFFIX}"));
        allowed.insert(base);
    }
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired_of(rels: &[&str]) -> HashSet<String> {
        rels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowed_keys_cover_the_full_family() {
        let allowed = allowed_keys("/ns/g/h/c", &desired_of(&["nginx.conf"]));
        assert_eq!(allowed.len(), 4);
        assert!(allowed.contains("/ns/g/h/c/nginx.conf"));
        assert!(allowed.contains("/ns/g/h/c/nginx.conf.hash"));
        assert!(allowed.contains("/ns/g/h/c/nginx.conf.meta"));
        assert!(allowed.contains("/ns/g/h/c/nginx.conf.commit"));
    }

    #[test]
    fn allowed_keys_empty_desired_set() {
        assert!(allowed_keys("/ns/g/h/c", &HashSet::new()).is_empty());
    }

    #[test]
    fn orphan_detection_against_allowed_set() {
        let allowed = allowed_keys("/ns/g/h/c", &desired_of(&["nginx.conf"]));
        let scope = "/ns/g/h/c/";

        // The orphaned family of a removed file is fully doomed.
        for key in [
            "/ns/g/h/c/old.conf",
            "/ns/g/h/c/old.conf.hash",
            "/ns/g/h/c/old.conf.meta",
            "/ns/g/h/c/old.conf.commit",
        ] {
            assert!(key.starts_with(scope) && !allowed.contains(key), "{key} should be orphaned");
        }

        // The desired family survives.
        assert!(allowed.contains("/ns/g/h/c/nginx.conf"));

        // A sibling namespace sharing the string prefix is out of scope.
        assert!(!"/ns/g/h/conf2/nginx.conf".starts_with(scope));
    }

    #[test]
    fn identical_content_in_two_files_yields_independent_entries() {
        let allowed = allowed_keys("/ns", &desired_of(&["a.conf", "b.conf"]));
        assert!(allowed.contains("/ns/a.conf"));
        assert!(allowed.contains("/ns/b.conf"));
        assert_eq!(allowed.len(), 8);
    }
}
