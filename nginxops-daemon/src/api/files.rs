//! Namespace tree and per-file diff handlers.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;

use nginxops_core::diff::generate_unified_diff;
use nginxops_core::keys;
use nginxops_store::snapshot::hash_index;

use super::error::ApiError;
use super::types::{FileDiffQuery, FileDiffResponse, Mode, TreeQuery, TreeResponse};
use super::AppState;

pub(crate) async fn get_tree(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<TreeResponse>, ApiError> {
    let target = state
        .find_target(&query.group, &query.host)
        .ok_or_else(ApiError::server_not_found)?;
    let suffix = target.config_dir_suffix();

    let compare_prefix = match query.mode {
        Mode::Preview => &state.cfg.sync.preview_syncer.key_prefix,
        Mode::Prod => &state.cfg.sync.git_syncer.key_prefix,
    };
    let compare_ns = keys::namespace_prefix(compare_prefix, &query.group, &query.host, suffix);
    let prod_ns = keys::namespace_prefix(
        &state.cfg.sync.remote_syncer.key_prefix,
        &query.group,
        &query.host,
        suffix,
    );

    let compare_pairs = state.store.get_prefix(&compare_ns).await?;
    let prod_pairs = state.store.get_prefix(&prod_ns).await?;

    let compare_hashes = hash_index(&compare_ns, &compare_pairs);
    let prod_hashes = hash_index(&prod_ns, &prod_pairs);

    let (paths, file_statuses) = compute_tree(&compare_hashes, &prod_hashes);

    Ok(Json(TreeResponse {
        prefix: compare_ns,
        paths,
        file_statuses,
    }))
}

pub(crate) async fn get_file_diff(
    State(state): State<AppState>,
    Query(query): Query<FileDiffQuery>,
) -> Result<Json<FileDiffResponse>, ApiError> {
    if query.path.is_empty() {
        return Err(ApiError::bad_request("path is required"));
    }
    let target = state
        .find_target(&query.group, &query.host)
        .ok_or_else(ApiError::server_not_found)?;
    let suffix = target.config_dir_suffix();

    let prod_ns = keys::namespace_prefix(
        &state.cfg.sync.remote_syncer.key_prefix,
        &query.group,
        &query.host,
        suffix,
    );
    let git_ns = keys::namespace_prefix(
        &state.cfg.sync.git_syncer.key_prefix,
        &query.group,
        &query.host,
        suffix,
    );
    let preview_ns = keys::namespace_prefix(
        &state.cfg.sync.preview_syncer.key_prefix,
        &query.group,
        &query.host,
        suffix,
    );

    // Tolerate clients sending a full store key instead of the relPath.
    let rel = [&preview_ns, &git_ns, &prod_ns]
        .iter()
        .find_map(|ns| query.path.strip_prefix(ns.as_str()))
        .unwrap_or(&query.path)
        .trim_start_matches('/')
        .to_string();

    let prod_content = read_utf8(&state, &keys::entry_key(&prod_ns, &rel)).await?;
    let (compare_ns, compare_label) = match query.mode {
        Mode::Preview => (&preview_ns, "Preview"),
        Mode::Prod => (&git_ns, "Git"),
    };
    let compare_content = read_utf8(&state, &keys::entry_key(compare_ns, &rel)).await?;

    let diff = generate_unified_diff(&prod_content, &compare_content, "production", compare_label);

    Ok(Json(FileDiffResponse {
        path: rel,
        prod_content,
        compare_content,
        diff: diff.unified_diff,
        mode: query.mode,
        compare_label: compare_label.to_string(),
    }))
}

async fn read_utf8(state: &AppState, key: &str) -> Result<String, ApiError> {
    Ok(state
        .store
        .get(key)
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default())
}

/// Classify every relPath across the compare and production namespaces.
/// Unchanged paths carry no status entry.
fn compute_tree(
    compare_hashes: &HashMap<String, String>,
    prod_hashes: &HashMap<String, String>,
) -> (Vec<String>, HashMap<String, String>) {
    let mut paths: Vec<String> = Vec::new();
    let mut statuses = HashMap::new();

    for (rel, hash) in compare_hashes {
        paths.push(rel.clone());
        match prod_hashes.get(rel) {
            None => {
                statuses.insert(rel.clone(), "added".to_string());
            }
            Some(prod_hash) if prod_hash != hash => {
                statuses.insert(rel.clone(), "modified".to_string());
            }
            Some(_) => {}
        }
    }

    for rel in prod_hashes.keys() {
        if !compare_hashes.contains_key(rel) {
            paths.push(rel.clone());
            statuses.insert(rel.clone(), "deleted".to_string());
        }
    }

    paths.sort();
    (paths, statuses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tree_classifies_added_modified_deleted() {
        let compare = hashes(&[
            ("nginx.conf", "aaaa"),
            ("sites/new.conf", "bbbb"),
            ("sites/same.conf", "cccc"),
        ]);
        let prod = hashes(&[
            ("nginx.conf", "ffff"),
            ("sites/same.conf", "cccc"),
            ("old.conf", "dddd"),
        ]);

        let (paths, statuses) = compute_tree(&compare, &prod);

        assert_eq!(
            paths,
            vec!["nginx.conf", "old.conf", "sites/new.conf", "sites/same.conf"]
        );
        assert_eq!(statuses.get("nginx.conf").map(String::as_str), Some("modified"));
        assert_eq!(statuses.get("sites/new.conf").map(String::as_str), Some("added"));
        assert_eq!(statuses.get("old.conf").map(String::as_str), Some("deleted"));
        assert!(!statuses.contains_key("sites/same.conf"), "unchanged has no status");
    }

    #[test]
    fn tree_of_empty_namespaces_is_empty() {
        let (paths, statuses) = compute_tree(&HashMap::new(), &HashMap::new());
        assert!(paths.is_empty());
        assert!(statuses.is_empty());
    }

    #[test]
    fn tree_with_empty_production_marks_everything_added() {
        let compare = hashes(&[("a.conf", "1"), ("b.conf", "2")]);
        let (paths, statuses) = compute_tree(&compare, &HashMap::new());
        assert_eq!(paths.len(), 2);
        assert!(statuses.values().all(|s| s == "added"));
    }
}
